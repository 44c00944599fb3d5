//! Asynchronous lifecycle of servers and redirectors.
//!
//! Every public entry point validates and persists synchronously, then hands
//! the slow part (provider calls, readiness polling, playbook runs) to a task
//! owned by the [`TaskRegistry`]. Outcomes reach operators through the
//! [`NotificationSink`] and the persisted status, never through a return
//! value.

mod redirectors;
pub mod retry;
mod servers;
pub mod store;
pub mod tasks;
pub mod notify;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use bx_db::models::{Redirector, Server};
use bx_infra::{ConfigExecutor, ProviderRegistry};
use uuid::Uuid;

use self::notify::{DomainEvent, Notice, NotificationSink};
use self::retry::{PollError, RetryPolicy};
use self::store::Store;
use self::tasks::{ResourceKey, TaskRegistry};

pub use redirectors::CreateRedirector;
pub use servers::CreateServer;

const SSH_PORT: u16 = 22;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("provider not configured: {0}")]
    ProviderUnavailable(String),

    #[error("provider error: {0}")]
    Infra(#[from] bx_infra::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("timed out waiting for {what}: {detail}")]
    Timeout { what: &'static str, detail: String },

    #[error("resource was removed while the task was running")]
    Tombstoned,

    #[error("missing secret: {0}")]
    MissingSecret(&'static str),

    #[error("{0} is disabled")]
    Disabled(&'static str),

    #[error("{0} requires an administrator")]
    Forbidden(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Polling bounds and feature switches for lifecycle tasks.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Waiting for a new instance's public IP.
    pub ip_wait: RetryPolicy,
    /// Waiting for SSH before any playbook runs.
    pub ssh_wait: RetryPolicy,
    /// Retrying the delete of a disabled CDN distribution.
    pub cdn_delete: RetryPolicy,
    /// Upper bound on a single CDN readiness wait; `None` waits forever.
    pub cdn_wait_timeout: Option<Duration>,
    pub guard_tombstones: bool,
    /// Whether remove-all may run at all.
    pub allow_remove_all: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            ip_wait: RetryPolicy::bounded(12, Duration::from_secs(5)).sleeping_first(),
            ssh_wait: RetryPolicy::bounded(10, Duration::from_secs(3)),
            cdn_delete: RetryPolicy::unbounded(Duration::from_secs(10)),
            cdn_wait_timeout: None,
            guard_tombstones: true,
            allow_remove_all: true,
        }
    }
}

struct Inner {
    store: Arc<dyn Store>,
    providers: ProviderRegistry,
    executor: Arc<dyn ConfigExecutor>,
    notifier: Arc<dyn NotificationSink>,
    tasks: TaskRegistry,
    config: LifecycleConfig,
}

/// Drives servers and redirectors through their lifecycles.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        providers: ProviderRegistry,
        executor: Arc<dyn ConfigExecutor>,
        notifier: Arc<dyn NotificationSink>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                providers,
                executor,
                notifier,
                tasks: TaskRegistry::new(config.guard_tombstones),
                config,
            }),
        }
    }

    /// Abort every background task.
    pub fn shutdown(&self) {
        self.inner.tasks.shutdown();
    }

    fn ensure_live(&self, key: ResourceKey) -> Result<()> {
        if self.inner.tasks.is_tombstoned(key) {
            return Err(Error::Tombstoned);
        }
        Ok(())
    }

    fn notify(&self, user_id: Option<Uuid>, notice: Notice) {
        if let Some(user_id) = user_id {
            self.inner.notifier.send(user_id, &notice);
        }
    }

    fn broadcast_server(&self, server: &Server) {
        self.inner.notifier.broadcast(&server_changed(server));
    }

    fn broadcast_redirector(&self, redirector: &Redirector) {
        self.inner.notifier.broadcast(
            &DomainEvent::new("redirector-changed")
                .with("redirector_id", redirector.id)
                .with("status", redirector.status),
        );
    }

    async fn root_password(&self) -> Result<String> {
        self.inner
            .store
            .get_secret("root_password")
            .await?
            .filter(|v| !v.is_empty())
            .ok_or(Error::MissingSecret("root_password"))
    }
}

fn server_changed(server: &Server) -> DomainEvent {
    DomainEvent::new("server-changed")
        .with("server_id", server.id)
        .with("project", server.project)
        .with("provider", &server.provider)
        .with("hostname", &server.name)
        .with("os", &server.os)
        .with("status", server.status)
        .with("ip_address", server.ip.as_deref().unwrap_or_default())
}

/// Collapse a polling failure into a lifecycle error.
fn wait_failed(what: &'static str, err: PollError<Error>) -> Error {
    match err {
        PollError::Failed(e) => e,
        other => Error::Timeout {
            what,
            detail: other.to_string(),
        },
    }
}

/// Log the end of a background task. Tombstoned tasks exit quietly.
fn log_task_end(key: ResourceKey, result: Result<()>) {
    match result {
        Ok(()) => {}
        Err(Error::Tombstoned) => tracing::debug!(?key, "resource retired; task stopped"),
        Err(e) => tracing::error!(?key, error = %e, "lifecycle task failed"),
    }
}

// ── Validation ──────────────────────────────────────────────────────

/// 1-63 chars of ASCII alphanumerics, `-` or `.`, not starting or ending
/// with `-`.
pub fn validate_hostname(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= 63
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.')
        && !name.starts_with('-')
        && !name.ends_with('-');
    if !ok {
        return Err(Error::Validation(format!("invalid hostname: {name:?}")));
    }
    Ok(())
}

/// Check role names and drop repeats, keeping first occurrences in order.
pub fn normalize_roles(roles: &[String]) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(roles.len());
    for role in roles {
        let role = role.trim();
        let ok = !role.is_empty()
            && role.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !ok {
            return Err(Error::Validation(format!("invalid role name: {role:?}")));
        }
        if !out.iter().any(|r| r == role) {
            out.push(role.to_string());
        }
    }
    Ok(out)
}

/// A fully qualified DNS name: dot-separated labels of 1-63 alphanumerics
/// or inner hyphens, at most 253 chars in total.
pub fn validate_domain(domain: &str) -> Result<()> {
    let label_ok = |label: &str| {
        !label.is_empty()
            && label.len() <= 63
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    };
    let ok = domain.len() <= 253 && domain.contains('.') && domain.split('.').all(label_ok);
    if !ok {
        return Err(Error::Validation(format!("invalid domain: {domain:?}")));
    }
    Ok(())
}
