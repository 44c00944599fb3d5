//! Typed Rust client for the Linode v4 API.
//!
//! Covers Linode instances only: create, get, list (filtered by tag), delete.

mod types;

pub use types::*;

const BASE_URL: &str = "https://api.linode.com/v4";
const PAGE_SIZE: u32 = 500;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("linode api request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("linode api {endpoint} returned {status}: {body}")]
    Api {
        endpoint: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Client for the Linode REST API.
#[derive(Clone)]
pub struct LinodeClient {
    token: String,
    http: reqwest::Client,
}

impl LinodeClient {
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
            return Err(Error::Api {
                endpoint,
                status,
                body,
            });
        }
        Ok(resp)
    }

    async fn check_allow_404(
        resp: reqwest::Response,
        endpoint: &'static str,
    ) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() && status.as_u16() != 404 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                endpoint,
                status,
                body,
            });
        }
        Ok(resp)
    }

    // ── Instances ───────────────────────────────────────────────────

    pub async fn create_instance(&self, req: &CreateInstanceRequest) -> Result<Instance> {
        let resp = self
            .http
            .post(self.url("/linode/instances"))
            .header("Authorization", self.auth())
            .json(req)
            .send()
            .await?;

        Self::check(resp, "create instance")
            .await?
            .json()
            .await
            .map_err(Error::from)
    }

    pub async fn get_instance(&self, instance_id: u64) -> Result<Instance> {
        let resp = self
            .http
            .get(self.url(&format!("/linode/instances/{instance_id}")))
            .header("Authorization", self.auth())
            .send()
            .await?;

        Self::check(resp, "get instance")
            .await?
            .json()
            .await
            .map_err(Error::from)
    }

    /// List every instance carrying `tag`, walking all result pages.
    pub async fn list_instances_by_tag(&self, tag: &str) -> Result<Vec<Instance>> {
        let filter = serde_json::json!({ "tags": tag }).to_string();
        let mut instances = Vec::new();
        let mut page = 1u32;

        loop {
            let resp = self
                .http
                .get(self.url("/linode/instances"))
                .header("Authorization", self.auth())
                .header("X-Filter", &filter)
                .query(&[("page", page), ("page_size", PAGE_SIZE)])
                .send()
                .await?;

            let list: Page<Instance> = Self::check(resp, "list instances").await?.json().await?;
            let pages = list.pages;
            instances.extend(list.data);

            if page >= pages {
                break;
            }
            page += 1;
        }

        Ok(instances)
    }

    pub async fn delete_instance(&self, instance_id: u64) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/linode/instances/{instance_id}")))
            .header("Authorization", self.auth())
            .send()
            .await?;

        Self::check_allow_404(resp, "delete instance").await?;
        Ok(())
    }
}
