//! Typed Rust client for the DigitalOcean v2 API.
//!
//! Covers the subset needed for managing engagement VPSes:
//! droplets (create, get, list by tag, delete, delete by tag).

mod types;

pub use types::*;

const BASE_URL: &str = "https://api.digitalocean.com/v2";
const PAGE_SIZE: u32 = 200;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("digitalocean api request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("digitalocean api {endpoint} returned {status}: {body}")]
    Api {
        endpoint: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Client for the DigitalOcean REST API.
#[derive(Clone)]
pub struct DoClient {
    token: String,
    http: reqwest::Client,
}

impl DoClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{BASE_URL}{path}")
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.token)
    }

    async fn check(resp: reqwest::Response, endpoint: &'static str) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api { endpoint, status, body });
        }
        Ok(resp)
    }

    /// Like `check` but also treats 404 as success (for delete idempotency).
    async fn check_allow_404(resp: reqwest::Response, endpoint: &'static str) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() && status.as_u16() != 404 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api { endpoint, status, body });
        }
        Ok(resp)
    }

    // ── Droplets ─────────────────────────────────────────────────────

    pub async fn create_droplet(&self, req: &CreateDropletRequest) -> Result<Droplet> {
        let resp = self
            .http
            .post(self.url("/droplets"))
            .header("Authorization", self.auth())
            .json(req)
            .send()
            .await?;

        let envelope: DropletEnvelope = Self::check(resp, "create droplet").await?.json().await?;
        Ok(envelope.droplet)
    }

    pub async fn get_droplet(&self, droplet_id: u64) -> Result<Droplet> {
        let resp = self
            .http
            .get(self.url(&format!("/droplets/{droplet_id}")))
            .header("Authorization", self.auth())
            .send()
            .await?;

        let envelope: DropletEnvelope = Self::check(resp, "get droplet").await?.json().await?;
        Ok(envelope.droplet)
    }

    /// List every droplet carrying `tag`, following pagination to the end.
    pub async fn list_droplets_by_tag(&self, tag: &str) -> Result<Vec<Droplet>> {
        let mut droplets = Vec::new();
        let mut page = 1u32;

        loop {
            let resp = self
                .http
                .get(self.url("/droplets"))
                .header("Authorization", self.auth())
                .query(&[
                    ("tag_name", tag.to_string()),
                    ("page", page.to_string()),
                    ("per_page", PAGE_SIZE.to_string()),
                ])
                .send()
                .await?;

            let list: ListDropletsResponse = Self::check(resp, "list droplets").await?.json().await?;
            let last_page = !list.has_next_page();
            droplets.extend(list.droplets);

            if last_page {
                break;
            }
            page += 1;
        }

        Ok(droplets)
    }

    pub async fn delete_droplet(&self, droplet_id: u64) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/droplets/{droplet_id}")))
            .header("Authorization", self.auth())
            .send()
            .await?;

        Self::check_allow_404(resp, "delete droplet").await?;
        Ok(())
    }

    /// Delete every droplet carrying `tag` in a single call.
    pub async fn delete_droplets_by_tag(&self, tag: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.url("/droplets"))
            .header("Authorization", self.auth())
            .query(&[("tag_name", tag)])
            .send()
            .await?;

        Self::check_allow_404(resp, "delete droplets by tag").await?;
        Ok(())
    }
}
