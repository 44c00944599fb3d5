use serde::{Deserialize, Serialize};

// ── Instance types ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CreateInstanceRequest {
    pub label: String,
    pub region: String,
    #[serde(rename = "type")]
    pub instance_type: String,
    pub image: String,
    pub root_pass: String,
    pub authorized_keys: Vec<String>,
    pub tags: Vec<String>,
    pub booted: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Instance {
    pub id: u64,
    pub label: String,
    pub status: InstanceStatus,
    #[serde(default)]
    pub ipv4: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Running,
    Offline,
    Booting,
    Rebooting,
    ShuttingDown,
    Provisioning,
    Deleting,
    Migrating,
    Rebuilding,
    Cloning,
    Restoring,
    Resizing,
    #[serde(other)]
    Unknown,
}

/// Paginated list envelope used by every Linode collection endpoint.
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub pages: u32,
}
