use async_trait::async_trait;
use do_api::{CreateDropletRequest, DoClient, Droplet};
use tracing::info;

use crate::types::{InstanceId, InstanceInfo, InstanceSpec, InstanceState};
use crate::{ComputeProvider, Error, ProviderName, Result, Secrets};

const REGION: &str = "nyc3";
const SIZE: &str = "s-1vcpu-1gb";

/// DigitalOcean droplets.
///
/// Needs the `digitalocean` API token and the `sshfingerprint` of a key
/// already registered with the account.
pub struct DigitalOceanProvider {
    client: DoClient,
    ssh_fingerprint: String,
}

impl DigitalOceanProvider {
    pub fn from_secrets(secrets: &Secrets) -> Result<Self> {
        Ok(Self {
            client: DoClient::new(secrets.require("digitalocean")?),
            ssh_fingerprint: secrets.require("sshfingerprint")?.to_string(),
        })
    }

    fn image(os: &str) -> Result<&'static str> {
        match os {
            "ubuntu-2204" => Ok("ubuntu-22-04-x64"),
            other => Err(Error::UnsupportedOs {
                provider: ProviderName::DigitalOcean,
                os: other.to_string(),
            }),
        }
    }

    fn parse_id(id: &InstanceId) -> Result<u64> {
        id.0.parse().map_err(|_| Error::InvalidId(id.0.clone()))
    }

    fn parse_state(status: &str) -> InstanceState {
        match status {
            "new" => InstanceState::Provisioning,
            "active" => InstanceState::Running,
            "off" => InstanceState::Stopped,
            "archive" => InstanceState::Deleting,
            _ => InstanceState::Unknown,
        }
    }

    fn info(droplet: &Droplet) -> InstanceInfo {
        InstanceInfo {
            id: InstanceId(droplet.id.to_string()),
            name: droplet.name.clone(),
            state: Self::parse_state(&droplet.status),
            public_ip: droplet.public_ipv4().map(str::to_string),
        }
    }
}

#[async_trait]
impl ComputeProvider for DigitalOceanProvider {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<InstanceInfo> {
        let droplet = self
            .client
            .create_droplet(&CreateDropletRequest {
                name: spec.name.clone(),
                region: REGION.into(),
                size: SIZE.into(),
                image: Self::image(&spec.os)?.into(),
                ssh_keys: vec![self.ssh_fingerprint.clone()],
                tags: spec.tags.clone(),
            })
            .await?;

        info!(droplet_id = droplet.id, "digitalocean: droplet created");
        Ok(Self::info(&droplet))
    }

    async fn get_instance(&self, id: &InstanceId) -> Result<InstanceInfo> {
        let droplet = self.client.get_droplet(Self::parse_id(id)?).await?;
        Ok(Self::info(&droplet))
    }

    async fn delete_instance(&self, id: &InstanceId) -> Result<()> {
        self.client.delete_droplet(Self::parse_id(id)?).await?;
        info!(droplet_id = %id, "digitalocean: droplet deleted");
        Ok(())
    }

    async fn list_instances(&self, tag: &str) -> Result<Vec<InstanceInfo>> {
        let droplets = self.client.list_droplets_by_tag(tag).await?;
        Ok(droplets.iter().map(Self::info).collect())
    }

    async fn delete_all(&self, tag: &str) -> Result<()> {
        self.client.delete_droplets_by_tag(tag).await?;
        info!(tag, "digitalocean: tagged droplets deleted");
        Ok(())
    }

    fn name(&self) -> ProviderName {
        ProviderName::DigitalOcean
    }
}
