use std::sync::Arc;

use bx_db::models::{NewRedirector, Redirector, RedirectorStatus};
use bx_infra::types::{ConcurrencyToken, DistributionId};
use bx_infra::{CdnProvider, CdnProviderName};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::notify::Notice;
use super::retry::{self, Attempt, PollError};
use super::tasks::{ResourceKey, Spawn, TaskKind};
use super::{Error, Orchestrator, Result, log_task_end, validate_domain, wait_failed};
use crate::auth::RequestContext;

#[derive(Debug, Clone)]
pub struct CreateRedirector {
    pub provider: String,
    pub domain: String,
    pub project: i32,
}

impl Orchestrator {
    fn cdn_provider(&self, provider: &str) -> Result<Arc<dyn CdnProvider>> {
        provider
            .parse::<CdnProviderName>()
            .ok()
            .and_then(|name| self.inner.providers.cdn(name))
            .cloned()
            .ok_or_else(|| Error::ProviderUnavailable(provider.to_string()))
    }

    /// Create a distribution in front of `req.domain`, record it as
    /// `Creating` and wait for it to deploy in the background.
    pub async fn create_redirector(&self, ctx: &RequestContext, req: CreateRedirector) -> Result<Redirector> {
        validate_domain(&req.domain)?;
        let cdn = self.cdn_provider(&req.provider)?;

        let dist = cdn.create_distribution(&req.domain).await?;

        let redirector = match self
            .inner
            .store
            .insert_redirector(&NewRedirector {
                provider: cdn.name().as_str(),
                provider_id: &dist.id.0,
                url: &dist.url,
                domain: &req.domain,
                project: req.project,
            })
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!(distribution_id = %dist.id, error = %e, "distribution created but could not be recorded");
                return Err(e.into());
            }
        };

        info!(redirector_id = %redirector.id, distribution_id = %dist.id, url = %dist.url, "redirector created");
        self.notify(
            Some(ctx.user_id),
            Notice::success(format!("Redirector for {} created, waiting for deployment", redirector.domain)),
        );
        self.spawn_readiness_wait(redirector.clone(), Some(ctx.user_id));
        Ok(redirector)
    }

    /// Start a readiness wait unless one is already running for this
    /// redirector.
    fn spawn_readiness_wait(&self, redirector: Redirector, user: Option<Uuid>) -> bool {
        let key = ResourceKey::Redirector(redirector.id);
        let redirector_id = redirector.id;
        let this = self.clone();
        let spawned = self.inner.tasks.spawn_exclusive(key, async move {
            log_task_end(key, this.await_deployment(redirector, user).await);
        });

        match spawned {
            Spawn::Started => true,
            Spawn::Busy => {
                debug!(%redirector_id, "readiness wait already running");
                true
            }
            Spawn::Refused => false,
        }
    }

    async fn await_deployment(&self, mut redirector: Redirector, user: Option<Uuid>) -> Result<()> {
        let key = ResourceKey::Redirector(redirector.id);
        let cdn = self.cdn_provider(&redirector.provider)?;
        let id = DistributionId(redirector.provider_id.clone());

        let wait = cdn.wait_until_deployed(&id);
        let outcome = match self.inner.config.cdn_wait_timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(result) => result.map_err(Error::from),
                Err(_) => Err(Error::Timeout {
                    what: "distribution deployment",
                    detail: format!("still deploying after {}s", limit.as_secs()),
                }),
            },
            None => wait.await.map_err(Error::from),
        };

        if let Err(e) = outcome {
            self.notify(
                user,
                Notice::error(format!("Error waiting for redirector {}: {e}", redirector.domain)),
            );
            return Err(e);
        }

        self.ensure_live(key)?;
        self.inner
            .store
            .set_redirector_status(redirector.id, RedirectorStatus::Ready)
            .await?;
        redirector.status = RedirectorStatus::Ready;

        info!(redirector_id = %redirector.id, "redirector deployed");
        self.broadcast_redirector(&redirector);
        self.notify(user, Notice::success(format!("Redirector for {} is ready", redirector.domain)));
        Ok(())
    }

    /// Re-attach a readiness wait to an existing distribution.
    pub async fn resync_redirector(&self, ctx: &RequestContext, id: Uuid) -> Result<Redirector> {
        let redirector = self
            .inner
            .store
            .get_redirector(id)
            .await?
            .ok_or(Error::NotFound("redirector"))?;
        self.cdn_provider(&redirector.provider)?;

        if !self.spawn_readiness_wait(redirector.clone(), Some(ctx.user_id)) {
            return Err(Error::NotFound("redirector"));
        }
        Ok(redirector)
    }

    /// Re-attach readiness waits for every redirector still `Creating`.
    /// Called once at startup.
    pub async fn resume_pending(&self) -> Result<usize> {
        let pending = self
            .inner
            .store
            .list_redirectors_by_status(RedirectorStatus::Creating)
            .await?;

        let mut resumed = 0;
        for redirector in pending {
            if let Err(e) = self.cdn_provider(&redirector.provider) {
                warn!(redirector_id = %redirector.id, error = %e, "cannot resume readiness wait");
                continue;
            }
            if self.spawn_readiness_wait(redirector, None) {
                resumed += 1;
            }
        }

        if resumed > 0 {
            info!(resumed, "resumed redirector readiness waits");
        }
        Ok(resumed)
    }

    // ── Delete ──────────────────────────────────────────────────────

    /// Disable the distribution, drop the record, then keep retrying the
    /// provider delete until the disable has propagated.
    pub async fn delete_redirector(&self, ctx: &RequestContext, id: Uuid) -> Result<Redirector> {
        let redirector = self
            .inner
            .store
            .get_redirector(id)
            .await?
            .ok_or(Error::NotFound("redirector"))?;
        let cdn = self.cdn_provider(&redirector.provider)?;

        let key = ResourceKey::Redirector(id);
        self.inner.tasks.retire(key);

        let this = self.clone();
        let record = redirector.clone();
        let user = ctx.user_id;
        self.inner.tasks.spawn(key, TaskKind::Teardown, async move {
            log_task_end(key, this.teardown_redirector(record, cdn, user).await);
        });

        Ok(redirector)
    }

    async fn teardown_redirector(
        &self,
        redirector: Redirector,
        cdn: Arc<dyn CdnProvider>,
        user: Uuid,
    ) -> Result<()> {
        let key = ResourceKey::Redirector(redirector.id);
        let id = DistributionId(redirector.provider_id.clone());

        let token = match disable(&*cdn, &id).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                info!(redirector_id = %redirector.id, distribution_id = %id, "distribution already gone");
                self.inner.store.delete_redirector(redirector.id).await?;
                self.notify(
                    Some(user),
                    Notice::success(format!("Redirector for {} removed", redirector.domain)),
                );
                return Ok(());
            }
            Err(e) => {
                self.inner.tasks.revive(key);
                self.notify(
                    Some(user),
                    Notice::error(format!("Error disabling redirector {}: {e}", redirector.domain)),
                );
                return Err(e);
            }
        };

        if let Err(e) = self.inner.store.delete_redirector(redirector.id).await {
            self.notify(
                Some(user),
                Notice::error(format!("Error removing redirector from database: {}", redirector.domain)),
            );
            return Err(e.into());
        }
        info!(redirector_id = %redirector.id, distribution_id = %id, "redirector disabled and removed");
        self.notify(
            Some(user),
            Notice::success(format!("Redirector for {} disabled, deleting once released", redirector.domain)),
        );

        let result: std::result::Result<(), PollError<Error>> =
            retry::poll(&self.inner.config.cdn_delete, |attempt| {
                let cdn = cdn.clone();
                let id = id.clone();
                let first_token = token.clone();
                async move {
                    // The disable token is only trusted for the first try; later
                    // attempts read the current one.
                    let token = if attempt == 1 {
                        first_token
                    } else {
                        match cdn.fetch_config(&id).await {
                            Ok(Some(current)) => current.token,
                            Ok(None) => return Attempt::Ready(()),
                            Err(e) if e.is_retryable() => {
                                debug!(distribution_id = %id, attempt, error = %e, "config read failed");
                                return Attempt::Pending;
                            }
                            Err(e) => return Attempt::Fail(e.into()),
                        }
                    };

                    match cdn.delete_distribution(&id, &token).await {
                        Ok(()) => Attempt::Ready(()),
                        Err(e) if e.is_retryable() => {
                            debug!(distribution_id = %id, attempt, error = %e, "distribution not deletable yet");
                            Attempt::Pending
                        }
                        Err(e) => Attempt::Fail(e.into()),
                    }
                }
            })
            .await;

        match result {
            Ok(()) => {
                info!(distribution_id = %id, "distribution deleted");
                Ok(())
            }
            Err(e) => {
                let err = wait_failed("distribution deletion", e);
                self.notify(
                    Some(user),
                    Notice::error(format!("Gave up deleting distribution for {}: {err}", redirector.domain)),
                );
                Err(err)
            }
        }
    }
}

/// Turn the distribution off, returning the token for the follow-up delete.
/// `None` means there is nothing left to delete.
async fn disable(cdn: &dyn CdnProvider, id: &DistributionId) -> Result<Option<ConcurrencyToken>> {
    let Some(current) = cdn.fetch_config(id).await? else {
        return Ok(None);
    };
    if !current.value.enabled {
        return Ok(Some(current.token));
    }

    let mut config = current.value;
    config.enabled = false;
    Ok(Some(cdn.update_config(id, &config, &current.token).await?))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::lifecycle::LifecycleConfig;
    use crate::lifecycle::retry::RetryPolicy;
    use crate::lifecycle::store::Store;
    use crate::lifecycle::testing::{Harness, advance};

    fn request(domain: &str) -> CreateRedirector {
        CreateRedirector {
            provider: "cloudfront".into(),
            domain: domain.into(),
            project: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn redirector_is_creating_until_deployed() {
        let h = Harness::new();

        let created = h.orch.create_redirector(&h.ctx, request("example.com")).await.unwrap();
        assert_eq!(created.status, RedirectorStatus::Creating);
        assert_eq!(created.url, "d111111abcdef8.cloudfront.net");

        advance(599).await;
        assert_eq!(h.store.redirector(created.id).unwrap().status, RedirectorStatus::Creating);
        assert!(h.sink.events("redirector-changed").is_empty());

        advance(2).await;
        assert_eq!(h.store.redirector(created.id).unwrap().status, RedirectorStatus::Ready);

        let events = h.sink.events("redirector-changed");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["status"], "Ready");
        assert_eq!(events[0].data["redirector_id"], created.id.to_string());
    }

    #[tokio::test]
    async fn invalid_domain_never_reaches_the_provider() {
        let h = Harness::new();

        let err = h.orch.create_redirector(&h.ctx, request("localhost")).await.unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert!(h.store.list_redirectors_by_status(RedirectorStatus::Creating).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_disables_once_then_retries_until_released() {
        let h = Harness::new();
        let created = h.orch.create_redirector(&h.ctx, request("example.com")).await.unwrap();
        advance(601).await;
        h.cdn.delete_failures.store(3, Ordering::SeqCst);

        h.orch.delete_redirector(&h.ctx, created.id).await.unwrap();
        advance(1).await;
        assert!(h.store.redirector(created.id).is_none());
        assert!(!h.cdn.deleted.load(Ordering::SeqCst));

        advance(60).await;
        assert!(h.cdn.deleted.load(Ordering::SeqCst));
        assert_eq!(h.cdn.update_calls.load(Ordering::SeqCst), 1);
        // One read to disable, then a fresh read before every retry.
        assert_eq!(h.cdn.fetch_calls.load(Ordering::SeqCst), 4);
        assert_eq!(*h.cdn.delete_tokens.lock().unwrap(), vec!["E2"; 4]);
        assert!(h.sink.errors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_retry_respects_its_deadline() {
        let h = Harness::with_config(LifecycleConfig {
            cdn_delete: RetryPolicy::unbounded(Duration::from_secs(10))
                .with_deadline(Some(Duration::from_secs(35))),
            ..LifecycleConfig::default()
        });
        let created = h.orch.create_redirector(&h.ctx, request("example.com")).await.unwrap();
        h.cdn.delete_failures.store(u32::MAX, Ordering::SeqCst);

        h.orch.delete_redirector(&h.ctx, created.id).await.unwrap();
        advance(120).await;

        assert!(!h.cdn.deleted.load(Ordering::SeqCst));
        assert_eq!(h.cdn.delete_tokens.lock().unwrap().len(), 4);
        let errors = h.sink.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Gave up deleting distribution for example.com"), "{}", errors[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn deleting_a_creating_redirector_cancels_its_wait() {
        let h = Harness::new();
        let created = h.orch.create_redirector(&h.ctx, request("example.com")).await.unwrap();

        advance(10).await;
        h.orch.delete_redirector(&h.ctx, created.id).await.unwrap();
        advance(900).await;

        assert!(h.store.redirector(created.id).is_none());
        assert_eq!(h.store.orphans(), 0);
        assert!(h.sink.events("redirector-changed").is_empty());
        assert!(h.cdn.deleted.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn pending_redirectors_resume_with_a_single_wait() {
        let h = Harness::new();
        let pending = h
            .store
            .insert_redirector(&NewRedirector {
                provider: "cloudfront",
                provider_id: "EDFDVBD6EXAMPLE",
                url: "d111111abcdef8.cloudfront.net",
                domain: "example.com",
                project: 1,
            })
            .await
            .unwrap();

        assert_eq!(h.orch.resume_pending().await.unwrap(), 1);
        h.orch.resync_redirector(&h.ctx, pending.id).await.unwrap();
        assert_eq!(
            h.orch.inner.tasks.active(ResourceKey::Redirector(pending.id), TaskKind::Lifecycle),
            1
        );

        advance(601).await;
        assert_eq!(h.store.redirector(pending.id).unwrap().status, RedirectorStatus::Ready);
        assert_eq!(h.sink.events("redirector-changed").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_wait_can_time_out() {
        let h = Harness::with_config(LifecycleConfig {
            cdn_wait_timeout: Some(Duration::from_secs(60)),
            ..LifecycleConfig::default()
        });
        let created = h.orch.create_redirector(&h.ctx, request("example.com")).await.unwrap();

        advance(61).await;

        assert_eq!(h.store.redirector(created.id).unwrap().status, RedirectorStatus::Creating);
        let errors = h.sink.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("timed out waiting for distribution deployment"), "{}", errors[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn already_deleted_distribution_just_drops_the_record() {
        let h = Harness::new();
        let created = h.orch.create_redirector(&h.ctx, request("example.com")).await.unwrap();
        advance(601).await;
        h.cdn.gone.store(true, Ordering::SeqCst);

        h.orch.delete_redirector(&h.ctx, created.id).await.unwrap();
        advance(60).await;

        assert!(h.store.redirector(created.id).is_none());
        assert!(h.cdn.delete_tokens.lock().unwrap().is_empty());
        assert_eq!(h.cdn.update_calls.load(Ordering::SeqCst), 0);
        assert!(h.sink.errors().is_empty());
        assert!(
            h.sink
                .notices()
                .iter()
                .any(|n| n.message == "Redirector for example.com removed")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn distribution_vanishing_mid_retry_ends_the_delete() {
        let h = Harness::new();
        let created = h.orch.create_redirector(&h.ctx, request("example.com")).await.unwrap();
        advance(601).await;
        h.cdn.delete_failures.store(u32::MAX, Ordering::SeqCst);

        h.orch.delete_redirector(&h.ctx, created.id).await.unwrap();
        advance(1).await;
        assert_eq!(h.cdn.delete_tokens.lock().unwrap().len(), 1);

        h.cdn.gone.store(true, Ordering::SeqCst);
        advance(60).await;

        assert_eq!(h.cdn.delete_tokens.lock().unwrap().len(), 1);
        assert!(h.store.redirector(created.id).is_none());
        assert!(h.sink.errors().is_empty());
    }
}
