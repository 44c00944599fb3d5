use std::collections::BTreeSet;
use std::sync::Arc;

use bx_db::models::{NewServer, Server, ServerStatus};
use bx_infra::types::{InstanceId, InstanceInfo, InstanceSpec, Target};
use bx_infra::{ComputeProvider, ProviderName, RESOURCE_TAG};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::notify::Notice;
use super::retry::{self, Attempt, PollError};
use super::tasks::{ResourceKey, Spawn, TaskKind};
use super::{
    Error, Orchestrator, Result, SSH_PORT, log_task_end, normalize_roles, validate_hostname,
    wait_failed,
};
use crate::auth::RequestContext;

#[derive(Debug, Clone)]
pub struct CreateServer {
    pub provider: String,
    pub name: String,
    pub os: String,
    pub project: i32,
    pub roles: Vec<String>,
}

impl Orchestrator {
    fn compute_provider(&self, provider: &str) -> Result<Arc<dyn ComputeProvider>> {
        provider
            .parse::<ProviderName>()
            .ok()
            .and_then(|name| self.inner.providers.compute(name))
            .cloned()
            .ok_or_else(|| Error::ProviderUnavailable(provider.to_string()))
    }

    // ── Create ──────────────────────────────────────────────────────

    /// Record a new server in `Deploying` and start deploying it.
    pub async fn create_server(&self, ctx: &RequestContext, req: CreateServer) -> Result<Server> {
        validate_hostname(&req.name)?;
        let roles = normalize_roles(&req.roles)?;
        let provider = self.compute_provider(&req.provider)?;

        let ssh_key = self
            .inner
            .store
            .get_user(ctx.user_id)
            .await?
            .and_then(|u| u.ssh_key)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Validation("add an SSH key to your account before creating servers".into()))?;

        let server = self
            .inner
            .store
            .insert_server(&NewServer {
                provider: provider.name().as_str(),
                name: &req.name,
                os: &req.os,
                roles: &roles,
                project: req.project,
                creator: ctx.user_id,
            })
            .await?;

        info!(server_id = %server.id, provider = %provider.name(), hostname = %server.name, "server accepted");
        self.broadcast_server(&server);

        let key = ResourceKey::Server(server.id);
        let this = self.clone();
        let record = server.clone();
        let user = ctx.user_id;
        self.inner.tasks.spawn(key, TaskKind::Lifecycle, async move {
            log_task_end(key, this.deploy(record, provider, user, ssh_key).await);
        });

        Ok(server)
    }

    async fn deploy(
        &self,
        mut server: Server,
        provider: Arc<dyn ComputeProvider>,
        user: Uuid,
        ssh_key: String,
    ) -> Result<()> {
        let key = ResourceKey::Server(server.id);
        let spec = InstanceSpec {
            name: server.name.clone(),
            os: server.os.clone(),
            tags: vec![RESOURCE_TAG.to_string()],
        };

        let created = match provider.create_instance(&spec).await {
            Ok(info) => info,
            Err(e) => {
                self.abandon(&server, user, format!("Error deploying server {}: {e}", server.name))
                    .await;
                return Err(e.into());
            }
        };

        self.ensure_live(key)?;
        let written = self.inner.store.set_server_provider_id(server.id, &created.id.0).await;
        self.persisted(&server, Some(user), written).await?;
        server.provider_id = Some(created.id.0.clone());

        let ip = match self.wait_for_ip(&provider, &created).await {
            Ok(ip) => ip,
            Err(e) => {
                if let Err(del) = provider.delete_instance(&created.id).await {
                    warn!(server_id = %server.id, error = %del, "failed to delete instance that never got an address");
                }
                self.abandon(&server, user, format!("Error deploying server {}: {e}", server.name))
                    .await;
                return Err(e);
            }
        };

        self.ensure_live(key)?;
        let written = self
            .inner
            .store
            .set_server_deployed(server.id, &created.id.0, &ip, ServerStatus::Configuring)
            .await;
        self.persisted(&server, Some(user), written).await?;
        server.ip = Some(ip);
        server.status = ServerStatus::Configuring;

        info!(server_id = %server.id, ip = ?server.ip, "server deployed");
        self.notify(Some(user), Notice::success(format!("Server {} deployed, configuring...", server.name)));
        self.broadcast_server(&server);

        if let Err(e) = self.grant_access(&server, &ssh_key).await {
            warn!(server_id = %server.id, error = %e, "could not install creator's SSH key");
        }

        if server.roles.is_empty() {
            self.ensure_live(key)?;
            let written = self.inner.store.set_server_status(server.id, ServerStatus::Ready).await;
            self.persisted(&server, Some(user), written).await?;
            server.status = ServerStatus::Ready;

            info!(server_id = %server.id, "server ready");
            self.notify(Some(user), Notice::success(format!("Server {} ready", server.name)));
            self.broadcast_server(&server);
            return Ok(());
        }

        self.apply_roles(server, Some(user)).await
    }

    async fn wait_for_ip(&self, provider: &Arc<dyn ComputeProvider>, created: &InstanceInfo) -> Result<String> {
        let result: std::result::Result<String, PollError<Error>> =
            retry::poll(&self.inner.config.ip_wait, |attempt| {
                let provider = provider.clone();
                let id = created.id.clone();
                async move {
                    match provider.get_instance(&id).await {
                        Ok(InstanceInfo { public_ip: Some(ip), .. }) => Attempt::Ready(ip),
                        Ok(_) => Attempt::Pending,
                        Err(e) if e.is_retryable() => {
                            warn!(instance_id = %id, attempt, error = %e, "instance lookup failed");
                            Attempt::Pending
                        }
                        Err(e) => Attempt::Fail(e.into()),
                    }
                }
            })
            .await;

        result.map_err(|e| wait_failed("public IP", e))
    }

    /// Drop the record of a server whose deployment failed and tell its
    /// creator. A retired server is left alone.
    async fn abandon(&self, server: &Server, user: Uuid, message: String) {
        if self.ensure_live(ResourceKey::Server(server.id)).is_err() {
            return;
        }
        if let Err(e) = self.inner.store.delete_server(server.id).await {
            warn!(server_id = %server.id, error = %e, "failed to delete record of failed server");
        }
        self.notify(Some(user), Notice::error(message));
    }

    /// Pass a successful write through. A failed one is reported to `user`
    /// and the server is marked `ERROR` if the store still accepts that.
    async fn persisted(&self, server: &Server, user: Option<Uuid>, written: sqlx::Result<()>) -> Result<()> {
        let Err(e) = written else {
            return Ok(());
        };

        error!(server_id = %server.id, error = %e, "failed to persist server state");
        self.notify(user, Notice::error(format!("Error updating server {} in database!", server.name)));

        match self.inner.store.set_server_status(server.id, ServerStatus::Error).await {
            Ok(()) => {
                let mut failed = server.clone();
                failed.status = ServerStatus::Error;
                self.broadcast_server(&failed);
            }
            Err(e) => warn!(server_id = %server.id, error = %e, "could not mark server as errored"),
        }
        Err(e.into())
    }

    async fn target(&self, server: &Server) -> Result<Target> {
        let host = server
            .ip
            .clone()
            .ok_or_else(|| Error::Validation(format!("server {} has no address", server.name)))?;
        Ok(Target {
            host,
            root_password: self.root_password().await?,
        })
    }

    async fn wait_for_ssh(&self, host: &str) -> Result<()> {
        let result: std::result::Result<(), PollError<Error>> =
            retry::poll(&self.inner.config.ssh_wait, |_| {
                let executor = self.inner.executor.clone();
                let host = host.to_string();
                async move {
                    if executor.probe(&host, SSH_PORT).await {
                        Attempt::Ready(())
                    } else {
                        Attempt::Pending
                    }
                }
            })
            .await;

        result.map_err(|e| wait_failed("SSH", e))
    }

    async fn grant_access(&self, server: &Server, ssh_key: &str) -> Result<()> {
        let target = self.target(server).await?;
        self.wait_for_ssh(&target.host).await?;
        self.inner.executor.grant_access(&target, ssh_key).await?;
        Ok(())
    }

    // ── Provision ───────────────────────────────────────────────────

    /// Apply every role of `server` in order, ending in `Ready` or `ERROR`.
    async fn apply_roles(&self, mut server: Server, user: Option<Uuid>) -> Result<()> {
        let key = ResourceKey::Server(server.id);

        self.ensure_live(key)?;
        let written = self.inner.store.set_server_status(server.id, ServerStatus::Provisioning).await;
        self.persisted(&server, user, written).await?;
        server.status = ServerStatus::Provisioning;
        self.broadcast_server(&server);
        self.notify(user, Notice::success(format!("Server {} is being provisioned", server.name)));

        match self.run_roles(&server).await {
            Ok(()) => {
                self.ensure_live(key)?;
                let written = self.inner.store.set_server_status(server.id, ServerStatus::Ready).await;
                self.persisted(&server, user, written).await?;
                server.status = ServerStatus::Ready;

                info!(server_id = %server.id, roles = ?server.roles, "server provisioned");
                self.broadcast_server(&server);
                self.notify(user, Notice::success(format!("Server {} ready", server.name)));
                Ok(())
            }
            Err(Error::Tombstoned) => Err(Error::Tombstoned),
            Err(e) => {
                self.ensure_live(key)?;
                let written = self.inner.store.set_server_status(server.id, ServerStatus::Error).await;
                self.persisted(&server, user, written).await?;
                server.status = ServerStatus::Error;

                self.broadcast_server(&server);
                self.notify(
                    user,
                    Notice::error(format!("Error provisioning server {}: {e}", server.name)),
                );
                Err(e)
            }
        }
    }

    /// Stops at the first failing role; later roles are never attempted.
    async fn run_roles(&self, server: &Server) -> Result<()> {
        let key = ResourceKey::Server(server.id);
        let target = self.target(server).await?;
        self.wait_for_ssh(&target.host).await?;

        for role in &server.roles {
            self.ensure_live(key)?;
            info!(server_id = %server.id, role, "applying role");
            self.inner.executor.run_role(&target, role).await?;
        }
        Ok(())
    }

    fn start_provisioning(&self, server: &Server, user: Uuid) -> Result<()> {
        let key = ResourceKey::Server(server.id);
        let this = self.clone();
        let record = server.clone();
        let spawned = self.inner.tasks.spawn_exclusive(key, async move {
            log_task_end(key, this.apply_roles(record, Some(user)).await);
        });

        match spawned {
            Spawn::Started => Ok(()),
            Spawn::Busy => Err(Error::Validation(format!(
                "server {} is already being provisioned",
                server.name
            ))),
            Spawn::Refused => Err(Error::NotFound("server")),
        }
    }

    /// Re-run every role already recorded on the server.
    pub async fn provision_server(&self, ctx: &RequestContext, id: Uuid) -> Result<Server> {
        let server = self
            .inner
            .store
            .get_server(id)
            .await?
            .ok_or(Error::NotFound("server"))?;

        check_provisionable(&server)?;
        self.start_provisioning(&server, ctx.user_id)?;
        Ok(server)
    }

    /// Merge `roles` into the server's role list, then provision with the
    /// merged list. Nothing is stored unless the server can be provisioned.
    pub async fn update_server_roles(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        roles: &[String],
    ) -> Result<Server> {
        let requested = normalize_roles(roles)?;
        let mut server = self
            .inner
            .store
            .get_server(id)
            .await?
            .ok_or(Error::NotFound("server"))?;

        for role in requested {
            if !server.roles.contains(&role) {
                server.roles.push(role);
            }
        }
        check_provisionable(&server)?;

        self.inner.store.set_server_roles(id, &server.roles).await?;
        self.start_provisioning(&server, ctx.user_id)?;
        Ok(server)
    }

    // ── Remove ──────────────────────────────────────────────────────

    /// Delete the server at its provider, then its record.
    pub async fn remove_server(&self, ctx: &RequestContext, id: Uuid) -> Result<Server> {
        let server = self
            .inner
            .store
            .get_server(id)
            .await?
            .ok_or(Error::NotFound("server"))?;

        let key = ResourceKey::Server(id);
        let aborted = self.inner.tasks.retire(key);
        if aborted > 0 {
            info!(server_id = %id, aborted, "stopped in-flight lifecycle tasks");
        }

        let this = self.clone();
        let record = server.clone();
        let user = ctx.user_id;
        self.inner.tasks.spawn(key, TaskKind::Teardown, async move {
            log_task_end(key, this.teardown_server(record, user).await);
        });

        Ok(server)
    }

    async fn teardown_server(&self, server: Server, user: Uuid) -> Result<()> {
        let key = ResourceKey::Server(server.id);

        match &server.provider_id {
            Some(provider_id) => {
                let provider = match self.compute_provider(&server.provider) {
                    Ok(p) => p,
                    Err(e) => {
                        self.inner.tasks.revive(key);
                        self.notify(
                            Some(user),
                            Notice::error(format!("Unknown provider for server: {}", server.name)),
                        );
                        return Err(e);
                    }
                };

                if let Err(e) = provider.delete_instance(&InstanceId(provider_id.clone())).await {
                    self.inner.tasks.revive(key);
                    self.notify(
                        Some(user),
                        Notice::error(format!(
                            "Error removing server from {}: {}",
                            server.provider, server.name
                        )),
                    );
                    return Err(e.into());
                }
            }
            None => warn!(
                server_id = %server.id,
                "server has no provider instance yet; anything still being created is left to the tagged sweep"
            ),
        }

        if let Err(e) = self.inner.store.delete_server(server.id).await {
            self.notify(
                Some(user),
                Notice::error(format!("Error removing server from database: {}", server.name)),
            );
            return Err(e.into());
        }

        info!(server_id = %server.id, hostname = %server.name, "server removed");
        self.notify(Some(user), Notice::success(format!("Server removed: {}", server.name)));
        Ok(())
    }

    /// Delete every server record, then sweep each provider those records
    /// used for tagged instances.
    ///
    /// Records go first: a failed sweep leaves instances running with no
    /// record pointing at them.
    pub async fn remove_all_servers(&self, ctx: &RequestContext) -> Result<usize> {
        if !self.inner.config.allow_remove_all {
            return Err(Error::Disabled("removing all servers"));
        }
        if !ctx.is_admin() {
            return Err(Error::Forbidden("removing all servers"));
        }

        let servers = self.inner.store.list_servers().await?;
        let mut providers = BTreeSet::new();
        let mut deleted = 0;

        for server in &servers {
            self.inner.tasks.retire(ResourceKey::Server(server.id));
            match self.inner.store.delete_server(server.id).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!(server_id = %server.id, error = %e, "failed to delete server record"),
            }
            providers.insert(server.provider.as_str());
        }

        for name in providers {
            let provider = match self.compute_provider(name) {
                Ok(p) => p,
                Err(e) => {
                    warn!(provider = name, error = %e, "skipping sweep");
                    continue;
                }
            };

            let key = ResourceKey::Sweep(provider.name());
            self.inner.tasks.spawn(key, TaskKind::Teardown, async move {
                match provider.delete_all(RESOURCE_TAG).await {
                    Ok(()) => info!(provider = %provider.name(), "provider sweep finished"),
                    Err(e) => warn!(provider = %provider.name(), error = %e, "provider sweep failed"),
                }
            });
        }

        info!(deleted, "all servers removed");
        self.notify(Some(ctx.user_id), Notice::success(format!("{deleted} servers deleted")));
        Ok(deleted)
    }

    // ── Inventory ───────────────────────────────────────────────────

    /// Tagged instances currently present at `provider`.
    pub async fn list_instances(&self, provider: &str) -> Result<Vec<InstanceInfo>> {
        let provider = self.compute_provider(provider)?;
        Ok(provider.list_instances(RESOURCE_TAG).await?)
    }
}

/// A server can be provisioned once it has an address, is not mid-lifecycle
/// and has at least one role.
fn check_provisionable(server: &Server) -> Result<()> {
    if server.ip.is_none() {
        return Err(Error::Validation(format!("server {} has no address yet", server.name)));
    }
    if !server.status.is_settled() {
        return Err(Error::Validation(format!(
            "server {} is busy ({})",
            server.name, server.status
        )));
    }
    if server.roles.is_empty() {
        return Err(Error::Validation(format!("server {} has no roles to apply", server.name)));
    }
    Ok(())
}
