use serde::{Deserialize, Serialize};

/// Opaque provider-side instance identifier (droplet ID, Linode ID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Specification for creating a compute instance.
///
/// Region, size and image are fixed per provider; only the OS identifier is
/// mapped onto a provider image.
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub name: String,
    pub os: String,
    pub tags: Vec<String>,
}

/// Instance status and metadata returned from the provider.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceInfo {
    pub id: InstanceId,
    pub name: String,
    pub state: InstanceState,
    /// Public IPv4 address, once the provider has assigned one.
    pub public_ip: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Provisioning,
    Running,
    Stopped,
    Deleting,
    Unknown,
}

// ── CDN ─────────────────────────────────────────────────────────────

/// Opaque provider-side distribution identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DistributionId(pub String);

impl std::fmt::Display for DistributionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct DistributionInfo {
    pub id: DistributionId,
    /// Public hostname the distribution answers on.
    pub url: String,
    pub deployed: bool,
}

/// A distribution's configuration as last read from the provider.
///
/// `document` is the provider's native representation and must be sent back
/// unchanged apart from the fields the caller means to edit.
#[derive(Debug, Clone)]
pub struct DistributionConfig {
    pub enabled: bool,
    pub document: String,
}

/// Optimistic-concurrency token (an HTTP ETag for CloudFront).
///
/// Each token is consumed by exactly one mutating call, which hands back its
/// successor. Tokens go stale as soon as the distribution changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyToken(pub String);

#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub value: T,
    pub token: ConcurrencyToken,
}

// ── Configuration execution ─────────────────────────────────────────

/// Host a configuration role is applied to.
#[derive(Debug, Clone)]
pub struct Target {
    pub host: String,
    pub root_password: String,
}
