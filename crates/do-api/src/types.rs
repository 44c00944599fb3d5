use serde::{Deserialize, Serialize};

// ── Droplet types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CreateDropletRequest {
    pub name: String,
    pub region: String,
    pub size: String,
    pub image: String,
    pub ssh_keys: Vec<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Droplet {
    pub id: u64,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub networks: Networks,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Droplet {
    /// First public IPv4 address, if one has been assigned yet.
    pub fn public_ipv4(&self) -> Option<&str> {
        self.networks
            .v4
            .iter()
            .find(|n| n.kind == "public" && !n.ip_address.is_empty())
            .map(|n| n.ip_address.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Networks {
    #[serde(default)]
    pub v4: Vec<NetworkV4>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkV4 {
    pub ip_address: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DropletEnvelope {
    pub droplet: Droplet,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListDropletsResponse {
    pub droplets: Vec<Droplet>,
    #[serde(default)]
    pub links: Links,
}

impl ListDropletsResponse {
    pub fn has_next_page(&self) -> bool {
        self.links
            .pages
            .as_ref()
            .and_then(|p| p.next.as_ref())
            .is_some()
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Links {
    pub pages: Option<Pages>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Pages {
    pub next: Option<String>,
}
