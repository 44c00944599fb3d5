//! Minimal client for the Amazon CloudFront control-plane API (2020-05-31).
//!
//! Only what a redirector needs: create a distribution in front of a custom
//! origin, read it back, toggle it off, and delete it.

mod sign;
mod types;

pub use sign::Credentials;
pub use types::*;

use chrono::Utc;
use reqwest::Method;

const HOST: &str = "cloudfront.amazonaws.com";
const API_VERSION: &str = "2020-05-31";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cloudfront api request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("cloudfront api {endpoint} returned {status} ({code}): {body}")]
    Api {
        endpoint: &'static str,
        status: reqwest::StatusCode,
        code: String,
        body: String,
    },

    #[error("cloudfront response is not valid xml: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("cloudfront response could not be decoded: {0}")]
    Decode(#[from] quick_xml::DeError),

    #[error("malformed distribution config: {0}")]
    Malformed(String),

    #[error("cloudfront {0} response carried no ETag")]
    MissingEtag(&'static str),
}

impl Error {
    /// CloudFront refuses to delete a distribution that is still enabled or
    /// still propagating the disable.
    pub fn is_not_disabled(&self) -> bool {
        matches!(self, Error::Api { code, .. } if code == "DistributionNotDisabled")
    }

    /// The distribution does not exist, or no longer does.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Api { status, code, .. }
                if *status == reqwest::StatusCode::NOT_FOUND || code == "NoSuchDistribution"
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone)]
pub struct CloudFrontClient {
    creds: Credentials,
    http: reqwest::Client,
}

impl CloudFrontClient {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            creds: Credentials {
                access_key_id: access_key_id.into(),
                secret_access_key: secret_access_key.into(),
            },
            http: reqwest::Client::new(),
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
        if_match: Option<&str>,
    ) -> Result<reqwest::Response> {
        let payload = body.unwrap_or_default();
        let signed = sign::sign(
            &self.creds,
            method.as_str(),
            HOST,
            path,
            "",
            payload.as_bytes(),
            Utc::now(),
        );

        let mut req = self
            .http
            .request(method, format!("https://{HOST}{path}"))
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header("Authorization", signed.authorization);

        if let Some(etag) = if_match {
            req = req.header("If-Match", etag);
        }
        if !payload.is_empty() {
            req = req.header("Content-Type", "text/xml").body(payload);
        }

        Ok(req.send().await?)
    }

    async fn check(resp: reqwest::Response, endpoint: &'static str) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let code = quick_xml::de::from_str::<ErrorResponse>(&body)
                .map(|r| r.error.code)
                .unwrap_or_default();
            return Err(Error::Api { endpoint, status, code, body });
        }
        Ok(resp)
    }

    fn etag(resp: &reqwest::Response, endpoint: &'static str) -> Result<String> {
        resp.headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(Error::MissingEtag(endpoint))
    }

    async fn versioned_distribution(
        resp: reqwest::Response,
        endpoint: &'static str,
    ) -> Result<Versioned<Distribution>> {
        let resp = Self::check(resp, endpoint).await?;
        let etag = Self::etag(&resp, endpoint)?;
        let body = resp.text().await?;
        Ok(Versioned {
            value: quick_xml::de::from_str(&body)?,
            etag,
        })
    }

    // ── Distributions ────────────────────────────────────────────────

    pub async fn create_distribution(&self, req: &NewDistribution) -> Result<Versioned<Distribution>> {
        let path = format!("/{API_VERSION}/distribution");
        let resp = self.send(Method::POST, &path, Some(req.to_xml()), None).await?;
        Self::versioned_distribution(resp, "create distribution").await
    }

    pub async fn get_distribution(&self, id: &str) -> Result<Versioned<Distribution>> {
        let path = format!("/{API_VERSION}/distribution/{id}");
        let resp = self.send(Method::GET, &path, None, None).await?;
        Self::versioned_distribution(resp, "get distribution").await
    }

    pub async fn get_distribution_config(&self, id: &str) -> Result<Versioned<DistributionConfigDocument>> {
        let path = format!("/{API_VERSION}/distribution/{id}/config");
        let resp = self.send(Method::GET, &path, None, None).await?;
        let resp = Self::check(resp, "get distribution config").await?;
        let etag = Self::etag(&resp, "get distribution config")?;
        Ok(Versioned {
            value: DistributionConfigDocument::from_xml(resp.text().await?),
            etag,
        })
    }

    /// Replace the distribution config. `if_match` must be the ETag from the
    /// most recent read; the returned ETag supersedes it.
    pub async fn update_distribution_config(
        &self,
        id: &str,
        config: &DistributionConfigDocument,
        if_match: &str,
    ) -> Result<Versioned<Distribution>> {
        let path = format!("/{API_VERSION}/distribution/{id}/config");
        let resp = self
            .send(Method::PUT, &path, Some(config.as_xml().to_string()), Some(if_match))
            .await?;
        Self::versioned_distribution(resp, "update distribution config").await
    }

    /// Delete a disabled distribution. A distribution that no longer exists
    /// counts as deleted.
    pub async fn delete_distribution(&self, id: &str, if_match: &str) -> Result<()> {
        let path = format!("/{API_VERSION}/distribution/{id}");
        let resp = self.send(Method::DELETE, &path, None, Some(if_match)).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(resp, "delete distribution").await?;
        Ok(())
    }
}
