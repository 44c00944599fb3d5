use async_trait::async_trait;
use linode_api::{CreateInstanceRequest, Instance, InstanceStatus, LinodeClient};
use tracing::{info, warn};

use crate::types::{InstanceId, InstanceInfo, InstanceSpec, InstanceState};
use crate::{ComputeProvider, Error, ProviderName, Result, Secrets};

const REGION: &str = "eu-central";
const INSTANCE_TYPE: &str = "g6-nanode-1";

/// Linode instances.
///
/// Needs the `linode` API token, the `publicSSHKey` to authorize for root and
/// the shared `root_password`.
pub struct LinodeProvider {
    client: LinodeClient,
    public_key: String,
    root_password: String,
}

impl LinodeProvider {
    pub fn from_secrets(secrets: &Secrets) -> Result<Self> {
        Ok(Self {
            client: LinodeClient::new(secrets.require("linode")?),
            public_key: secrets.require("publicSSHKey")?.to_string(),
            root_password: secrets.require("root_password")?.to_string(),
        })
    }

    fn image(os: &str) -> Result<&'static str> {
        match os {
            "ubuntu-2204" => Ok("linode/ubuntu22.04"),
            other => Err(Error::UnsupportedOs {
                provider: ProviderName::Linode,
                os: other.to_string(),
            }),
        }
    }

    fn parse_id(id: &InstanceId) -> Result<u64> {
        id.0.parse().map_err(|_| Error::InvalidId(id.0.clone()))
    }

    fn parse_state(status: InstanceStatus) -> InstanceState {
        match status {
            InstanceStatus::Running => InstanceState::Running,
            InstanceStatus::Provisioning | InstanceStatus::Booting => InstanceState::Provisioning,
            InstanceStatus::Offline | InstanceStatus::ShuttingDown => InstanceState::Stopped,
            InstanceStatus::Deleting => InstanceState::Deleting,
            _ => InstanceState::Unknown,
        }
    }

    /// The address is assigned at create time but the host only answers once
    /// booted, so it is withheld until the instance is running.
    fn info(instance: &Instance) -> InstanceInfo {
        let state = Self::parse_state(instance.status);
        let public_ip = match state {
            InstanceState::Running => instance.ipv4.first().cloned(),
            _ => None,
        };

        InstanceInfo {
            id: InstanceId(instance.id.to_string()),
            name: instance.label.clone(),
            state,
            public_ip,
        }
    }
}

#[async_trait]
impl ComputeProvider for LinodeProvider {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<InstanceInfo> {
        let instance = self
            .client
            .create_instance(&CreateInstanceRequest {
                label: spec.name.clone(),
                region: REGION.into(),
                instance_type: INSTANCE_TYPE.into(),
                image: Self::image(&spec.os)?.into(),
                root_pass: self.root_password.clone(),
                authorized_keys: vec![self.public_key.clone()],
                tags: spec.tags.clone(),
                booted: true,
            })
            .await?;

        info!(linode_id = instance.id, "linode: instance created");
        Ok(Self::info(&instance))
    }

    async fn get_instance(&self, id: &InstanceId) -> Result<InstanceInfo> {
        let instance = self.client.get_instance(Self::parse_id(id)?).await?;
        Ok(Self::info(&instance))
    }

    async fn delete_instance(&self, id: &InstanceId) -> Result<()> {
        self.client.delete_instance(Self::parse_id(id)?).await?;
        info!(linode_id = %id, "linode: instance deleted");
        Ok(())
    }

    async fn list_instances(&self, tag: &str) -> Result<Vec<InstanceInfo>> {
        let instances = self.client.list_instances_by_tag(tag).await?;
        Ok(instances.iter().map(Self::info).collect())
    }

    /// Linode has no delete-by-tag, so each tagged instance is deleted in
    /// turn. One failure does not stop the sweep; the last error is returned.
    async fn delete_all(&self, tag: &str) -> Result<()> {
        let instances = self.client.list_instances_by_tag(tag).await?;
        let mut last_err = None;

        for instance in instances {
            match self.client.delete_instance(instance.id).await {
                Ok(()) => info!(linode_id = instance.id, "linode: instance deleted"),
                Err(e) => {
                    warn!(linode_id = instance.id, error = %e, "linode: sweep delete failed");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn name(&self) -> ProviderName {
        ProviderName::Linode
    }
}
