use std::time::Duration;

use async_trait::async_trait;
use cloudfront_api::{CloudFrontClient, DistributionConfigDocument, NewDistribution};
use tracing::{debug, info};

use crate::types::{
    ConcurrencyToken, DistributionConfig, DistributionId, DistributionInfo, Versioned,
};
use crate::{CdnProvider, CdnProviderName, Result, Secrets};

/// Delay between `GetDistribution` polls while waiting for a deployment.
const DEPLOY_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Amazon CloudFront, authenticated with the `awsaccount` access key ID and
/// the `awssecret` secret key.
pub struct CloudFrontProvider {
    client: CloudFrontClient,
}

impl CloudFrontProvider {
    pub fn from_secrets(secrets: &Secrets) -> Result<Self> {
        Ok(Self {
            client: CloudFrontClient::new(
                secrets.require("awsaccount")?,
                secrets.require("awssecret")?,
            ),
        })
    }
}

#[async_trait]
impl CdnProvider for CloudFrontProvider {
    async fn create_distribution(&self, origin_domain: &str) -> Result<DistributionInfo> {
        let created = self
            .client
            .create_distribution(&NewDistribution {
                caller_reference: chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default().to_string(),
                origin_domain: origin_domain.to_string(),
                comment: format!("redirector for {origin_domain}"),
            })
            .await?;

        let dist = created.value;
        info!(distribution_id = %dist.id, origin = origin_domain, "cloudfront: distribution created");

        Ok(DistributionInfo {
            deployed: dist.is_deployed(),
            id: DistributionId(dist.id),
            url: dist.domain_name,
        })
    }

    async fn fetch_config(&self, id: &DistributionId) -> Result<Option<Versioned<DistributionConfig>>> {
        let fetched = match self.client.get_distribution_config(&id.0).await {
            Ok(fetched) => fetched,
            Err(e) if e.is_not_found() => {
                debug!(distribution_id = %id, "cloudfront: distribution already gone");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Some(Versioned {
            value: DistributionConfig {
                enabled: fetched.value.enabled()?,
                document: fetched.value.as_xml().to_string(),
            },
            token: ConcurrencyToken(fetched.etag),
        }))
    }

    async fn update_config(
        &self,
        id: &DistributionId,
        config: &DistributionConfig,
        token: &ConcurrencyToken,
    ) -> Result<ConcurrencyToken> {
        let mut doc = DistributionConfigDocument::from_xml(config.document.clone());
        if doc.enabled()? != config.enabled {
            doc.set_enabled(config.enabled)?;
        }

        let updated = self
            .client
            .update_distribution_config(&id.0, &doc, &token.0)
            .await?;

        info!(distribution_id = %id, enabled = config.enabled, "cloudfront: config updated");
        Ok(ConcurrencyToken(updated.etag))
    }

    async fn delete_distribution(&self, id: &DistributionId, token: &ConcurrencyToken) -> Result<()> {
        self.client.delete_distribution(&id.0, &token.0).await?;
        info!(distribution_id = %id, "cloudfront: distribution deleted");
        Ok(())
    }

    async fn wait_until_deployed(&self, id: &DistributionId) -> Result<()> {
        loop {
            let dist = self.client.get_distribution(&id.0).await?;
            if dist.value.is_deployed() {
                return Ok(());
            }
            debug!(distribution_id = %id, status = %dist.value.status, "cloudfront: not deployed yet");
            tokio::time::sleep(DEPLOY_POLL_INTERVAL).await;
        }
    }

    fn name(&self) -> CdnProviderName {
        CdnProviderName::CloudFront
    }
}
