pub mod ansible;
pub mod cloudfront;
pub mod digitalocean;
pub mod linode;
pub mod types;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use types::{
    ConcurrencyToken, DistributionConfig, DistributionId, DistributionInfo, InstanceId,
    InstanceInfo, InstanceSpec, Target, Versioned,
};

/// Tag stamped on every resource this system creates, and the scope of
/// provider-wide sweeps.
pub const RESOURCE_TAG: &str = "boxer";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("digitalocean error: {0}")]
    DigitalOcean(#[from] do_api::Error),

    #[error("linode error: {0}")]
    Linode(#[from] linode_api::Error),

    #[error("cloudfront error: {0}")]
    CloudFront(#[from] cloudfront_api::Error),

    #[error("playbook {playbook} failed: {detail}")]
    Playbook { playbook: String, detail: String },

    #[error("failed to launch ansible: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("{provider} has no image for os {os:?}")]
    UnsupportedOs { provider: ProviderName, os: String },

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("missing secret: {0}")]
    MissingSecret(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

impl Error {
    /// Whether the same call may succeed if tried again later: transport
    /// failures, throttling, provider-side 5xx, and CloudFront refusing to
    /// delete a distribution whose disable has not propagated yet.
    pub fn is_retryable(&self) -> bool {
        let overloaded = |status: u16| status == 429 || status >= 500;
        match self {
            Error::DigitalOcean(do_api::Error::Request(_))
            | Error::Linode(linode_api::Error::Request(_))
            | Error::CloudFront(cloudfront_api::Error::Request(_)) => true,
            Error::DigitalOcean(do_api::Error::Api { status, .. })
            | Error::Linode(linode_api::Error::Api { status, .. }) => overloaded(status.as_u16()),
            Error::CloudFront(e @ cloudfront_api::Error::Api { status, .. }) => {
                e.is_not_disabled() || overloaded(status.as_u16())
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Known compute provider backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    DigitalOcean,
    Linode,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DigitalOcean => "digitalocean",
            Self::Linode => "linode",
        }
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "digitalocean" => Ok(Self::DigitalOcean),
            "linode" => Ok(Self::Linode),
            other => Err(Error::UnknownProvider(other.to_string())),
        }
    }
}

/// Known CDN provider backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CdnProviderName {
    CloudFront,
}

impl CdnProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CloudFront => "cloudfront",
        }
    }
}

impl fmt::Display for CdnProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CdnProviderName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cloudfront" => Ok(Self::CloudFront),
            other => Err(Error::UnknownProvider(other.to_string())),
        }
    }
}

/// Provider credentials, looked up by name from the secret store.
#[derive(Debug, Clone, Default)]
pub struct Secrets(HashMap<String, String>);

impl Secrets {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self(values)
    }

    /// Look up a secret; empty values count as missing.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| Error::MissingSecret(name.to_string()))
    }
}

/// Backend-agnostic interface for managing compute instances.
#[async_trait]
pub trait ComputeProvider: Send + Sync + 'static {
    /// Ask the provider for a new instance. Returns as soon as the provider
    /// accepts the request; the public IP usually arrives later.
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<InstanceInfo>;

    async fn get_instance(&self, id: &InstanceId) -> Result<InstanceInfo>;

    /// Destroy an instance. Deleting an instance that no longer exists succeeds.
    async fn delete_instance(&self, id: &InstanceId) -> Result<()>;

    /// Every instance carrying `tag`.
    async fn list_instances(&self, tag: &str) -> Result<Vec<InstanceInfo>>;

    /// Destroy every instance carrying `tag`.
    async fn delete_all(&self, tag: &str) -> Result<()>;

    fn name(&self) -> ProviderName;
}

/// Backend-agnostic interface for CDN distributions.
///
/// Mutations follow the provider's optimistic-concurrency protocol: every
/// update or delete consumes the token from the previous read or write.
#[async_trait]
pub trait CdnProvider: Send + Sync + 'static {
    /// Create a distribution fronting `origin_domain`.
    async fn create_distribution(&self, origin_domain: &str) -> Result<DistributionInfo>;

    /// Current config and its token; `None` once the distribution is gone.
    async fn fetch_config(&self, id: &DistributionId) -> Result<Option<Versioned<DistributionConfig>>>;

    /// Submit `config`, returning the token of the updated distribution.
    async fn update_config(
        &self,
        id: &DistributionId,
        config: &DistributionConfig,
        token: &ConcurrencyToken,
    ) -> Result<ConcurrencyToken>;

    /// Delete a disabled distribution. Fails while the disable is still
    /// propagating; callers retry.
    async fn delete_distribution(&self, id: &DistributionId, token: &ConcurrencyToken) -> Result<()>;

    /// Block until the provider reports the distribution fully deployed.
    async fn wait_until_deployed(&self, id: &DistributionId) -> Result<()>;

    fn name(&self) -> CdnProviderName;
}

/// Runs configuration-management roles against remote hosts.
#[async_trait]
pub trait ConfigExecutor: Send + Sync + 'static {
    /// Whether `host` accepts connections on `port` right now.
    async fn probe(&self, host: &str, port: u16) -> bool;

    /// Apply the named role to `target`.
    async fn run_role(&self, target: &Target, role: &str) -> Result<()>;

    /// Install `ssh_key` for root on `target`.
    async fn grant_access(&self, target: &Target, ssh_key: &str) -> Result<()>;
}

/// Registry of all configured compute and CDN providers.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    compute: HashMap<ProviderName, Arc<dyn ComputeProvider>>,
    cdn: HashMap<CdnProviderName, Arc<dyn CdnProvider>>,
}

impl ProviderRegistry {
    pub fn with_compute(mut self, provider: Arc<dyn ComputeProvider>) -> Self {
        self.compute.insert(provider.name(), provider);
        self
    }

    pub fn with_cdn(mut self, provider: Arc<dyn CdnProvider>) -> Self {
        self.cdn.insert(provider.name(), provider);
        self
    }

    pub fn compute(&self, name: ProviderName) -> Option<&Arc<dyn ComputeProvider>> {
        self.compute.get(&name)
    }

    pub fn cdn(&self, name: CdnProviderName) -> Option<&Arc<dyn CdnProvider>> {
        self.cdn.get(&name)
    }

    /// Names of all configured compute providers, sorted.
    pub fn available(&self) -> Vec<ProviderName> {
        let mut names: Vec<_> = self.compute.keys().copied().collect();
        names.sort_by_key(|n| n.as_str());
        names
    }

    pub fn is_empty(&self) -> bool {
        self.compute.is_empty() && self.cdn.is_empty()
    }
}

/// Build every provider whose secrets are present.
///
/// Providers with missing credentials are skipped with a debug log, so a
/// fresh install with an empty secret store still boots.
pub fn build_providers(secrets: &Secrets) -> ProviderRegistry {
    let mut registry = ProviderRegistry::default();

    match digitalocean::DigitalOceanProvider::from_secrets(secrets) {
        Ok(p) => {
            tracing::info!("registered DigitalOcean compute provider");
            registry = registry.with_compute(Arc::new(p));
        }
        Err(e) => tracing::debug!("skipping DigitalOcean provider: {e}"),
    }

    match linode::LinodeProvider::from_secrets(secrets) {
        Ok(p) => {
            tracing::info!("registered Linode compute provider");
            registry = registry.with_compute(Arc::new(p));
        }
        Err(e) => tracing::debug!("skipping Linode provider: {e}"),
    }

    match cloudfront::CloudFrontProvider::from_secrets(secrets) {
        Ok(p) => {
            tracing::info!("registered CloudFront CDN provider");
            registry = registry.with_cdn(Arc::new(p));
        }
        Err(e) => tracing::debug!("skipping CloudFront provider: {e}"),
    }

    if registry.is_empty() {
        tracing::warn!("no providers configured; add provider secrets and restart");
    }

    registry
}
