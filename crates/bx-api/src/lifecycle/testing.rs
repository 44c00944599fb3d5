//! In-memory doubles for driving the orchestrator in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bx_db::models::{
    ADMIN_ACCESS_LEVEL, NewRedirector, NewServer, Redirector, RedirectorStatus, Server,
    ServerStatus, User,
};
use bx_infra::types::{
    ConcurrencyToken, DistributionConfig, DistributionId, DistributionInfo, InstanceId,
    InstanceInfo, InstanceSpec, InstanceState, Target, Versioned,
};
use bx_infra::{
    CdnProvider, CdnProviderName, ComputeProvider, ConfigExecutor, ProviderName, ProviderRegistry,
};
use chrono::Utc;
use uuid::Uuid;

use super::notify::{DomainEvent, Notice, NotificationSink};
use super::store::Store;
use super::{LifecycleConfig, Orchestrator};
use crate::auth::RequestContext;

fn playbook_error(role: &str) -> bx_infra::Error {
    bx_infra::Error::Playbook {
        playbook: format!("{role}.yml"),
        detail: "exit status 2".into(),
    }
}

fn api_error(what: &str) -> bx_infra::Error {
    bx_infra::Error::InvalidId(what.to_string())
}

fn status(code: u16) -> reqwest::StatusCode {
    reqwest::StatusCode::from_u16(code).unwrap()
}

fn droplet_error(code: u16) -> bx_infra::Error {
    do_api::Error::Api {
        endpoint: "get droplet",
        status: status(code),
        body: String::new(),
    }
    .into()
}

fn not_disabled() -> bx_infra::Error {
    cloudfront_api::Error::Api {
        endpoint: "delete distribution",
        status: status(409),
        code: "DistributionNotDisabled".into(),
        body: String::new(),
    }
    .into()
}

pub fn server(name: &str, status: ServerStatus) -> Server {
    let now = Utc::now();
    Server {
        id: Uuid::new_v4(),
        provider: "digitalocean".into(),
        provider_id: None,
        name: name.into(),
        ip: None,
        os: "ubuntu-2204".into(),
        roles: Vec::new(),
        project: 1,
        creator: Uuid::new_v4(),
        status,
        created_at: now,
        updated_at: now,
    }
}

/// Ordered record of side effects across the store and the providers.
pub type Journal = Arc<Mutex<Vec<String>>>;

fn log(journal: &Journal, entry: String) {
    journal.lock().unwrap().push(entry);
}

// ── Store ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStore {
    pub journal: Journal,
    servers: Mutex<HashMap<Uuid, Server>>,
    redirectors: Mutex<HashMap<Uuid, Redirector>>,
    users: Mutex<HashMap<Uuid, User>>,
    secrets: Mutex<HashMap<String, String>>,
    history: Mutex<HashMap<Uuid, Vec<ServerStatus>>>,
    /// Writes aimed at rows that no longer exist.
    pub orphan_writes: AtomicUsize,
    /// Server status writes of this status fail.
    pub fail_status: Mutex<Option<ServerStatus>>,
}

impl MemoryStore {
    pub fn add_user(&self, ssh_key: Option<&str>) -> Uuid {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: "operator".into(),
            access_level: 1,
            ssh_key: ssh_key.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        let id = user.id;
        self.users.lock().unwrap().insert(id, user);
        id
    }

    pub fn set_secret(&self, name: &str, value: &str) {
        self.secrets.lock().unwrap().insert(name.into(), value.into());
    }

    pub fn seed_server(&self, server: Server) {
        let (id, status) = (server.id, server.status);
        self.servers.lock().unwrap().insert(id, server);
        self.history.lock().unwrap().entry(id).or_default().push(status);
    }

    pub fn server(&self, id: Uuid) -> Option<Server> {
        self.servers.lock().unwrap().get(&id).cloned()
    }

    pub fn server_count(&self) -> usize {
        self.servers.lock().unwrap().len()
    }

    pub fn redirector(&self, id: Uuid) -> Option<Redirector> {
        self.redirectors.lock().unwrap().get(&id).cloned()
    }

    /// Every status the server has passed through, in order.
    pub fn history(&self, id: Uuid) -> Vec<ServerStatus> {
        self.history.lock().unwrap().get(&id).cloned().unwrap_or_default()
    }

    pub fn orphans(&self) -> usize {
        self.orphan_writes.load(Ordering::SeqCst)
    }

    fn check_status_write(&self, status: ServerStatus) -> sqlx::Result<()> {
        if *self.fail_status.lock().unwrap() == Some(status) {
            return Err(sqlx::Error::PoolTimedOut);
        }
        Ok(())
    }

    fn update_server(&self, id: Uuid, f: impl FnOnce(&mut Server)) {
        let mut servers = self.servers.lock().unwrap();
        match servers.get_mut(&id) {
            Some(server) => {
                let before = server.status;
                f(server);
                if server.status != before {
                    self.history.lock().unwrap().entry(id).or_default().push(server.status);
                }
            }
            None => {
                self.orphan_writes.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_server(&self, new: &NewServer<'_>) -> sqlx::Result<Server> {
        let mut server = server(new.name, ServerStatus::Deploying);
        server.provider = new.provider.into();
        server.os = new.os.into();
        server.roles = new.roles.to_vec();
        server.project = new.project;
        server.creator = new.creator;
        self.seed_server(server.clone());
        Ok(server)
    }

    async fn get_server(&self, id: Uuid) -> sqlx::Result<Option<Server>> {
        Ok(self.server(id))
    }

    async fn list_servers(&self) -> sqlx::Result<Vec<Server>> {
        let mut servers: Vec<_> = self.servers.lock().unwrap().values().cloned().collect();
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(servers)
    }

    async fn set_server_provider_id(&self, id: Uuid, provider_id: &str) -> sqlx::Result<()> {
        self.update_server(id, |s| s.provider_id = Some(provider_id.into()));
        Ok(())
    }

    async fn set_server_deployed(
        &self,
        id: Uuid,
        provider_id: &str,
        ip: &str,
        status: ServerStatus,
    ) -> sqlx::Result<()> {
        self.check_status_write(status)?;
        self.update_server(id, |s| {
            s.provider_id = Some(provider_id.into());
            s.ip = Some(ip.into());
            s.status = status;
        });
        Ok(())
    }

    async fn set_server_status(&self, id: Uuid, status: ServerStatus) -> sqlx::Result<()> {
        self.check_status_write(status)?;
        self.update_server(id, |s| s.status = status);
        Ok(())
    }

    async fn set_server_roles(&self, id: Uuid, roles: &[String]) -> sqlx::Result<()> {
        self.update_server(id, |s| s.roles = roles.to_vec());
        Ok(())
    }

    async fn delete_server(&self, id: Uuid) -> sqlx::Result<()> {
        if let Some(server) = self.servers.lock().unwrap().remove(&id) {
            log(&self.journal, format!("db delete {}", server.name));
        }
        Ok(())
    }

    async fn insert_redirector(&self, new: &NewRedirector<'_>) -> sqlx::Result<Redirector> {
        let now = Utc::now();
        let redirector = Redirector {
            id: Uuid::new_v4(),
            provider: new.provider.into(),
            provider_id: new.provider_id.into(),
            url: new.url.into(),
            domain: new.domain.into(),
            project: new.project,
            status: RedirectorStatus::Creating,
            created_at: now,
            updated_at: now,
        };
        self.redirectors.lock().unwrap().insert(redirector.id, redirector.clone());
        Ok(redirector)
    }

    async fn get_redirector(&self, id: Uuid) -> sqlx::Result<Option<Redirector>> {
        Ok(self.redirector(id))
    }

    async fn list_redirectors_by_status(&self, status: RedirectorStatus) -> sqlx::Result<Vec<Redirector>> {
        Ok(self
            .redirectors
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    async fn set_redirector_status(&self, id: Uuid, status: RedirectorStatus) -> sqlx::Result<()> {
        match self.redirectors.lock().unwrap().get_mut(&id) {
            Some(r) => r.status = status,
            None => {
                self.orphan_writes.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    async fn delete_redirector(&self, id: Uuid) -> sqlx::Result<()> {
        if let Some(r) = self.redirectors.lock().unwrap().remove(&id) {
            log(&self.journal, format!("db delete {}", r.domain));
        }
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> sqlx::Result<Option<User>> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn get_secret(&self, name: &str) -> sqlx::Result<Option<String>> {
        Ok(self.secrets.lock().unwrap().get(name).cloned())
    }

    async fn secrets(&self) -> sqlx::Result<HashMap<String, String>> {
        Ok(self.secrets.lock().unwrap().clone())
    }
}

// ── Compute ─────────────────────────────────────────────────────────

pub struct MockCompute {
    name: ProviderName,
    journal: Journal,
    pub fail_create: AtomicBool,
    /// Lookups before an address shows up; `None` never assigns one.
    pub ip_after: Mutex<Option<u32>>,
    /// Lookups that fail with a provider outage before lookups work again.
    pub lookup_outages: AtomicU32,
    /// Every lookup answers that the instance does not exist.
    pub lookup_missing: AtomicBool,
    pub fail_delete: AtomicBool,
    pub get_calls: AtomicU32,
    pub deleted: Mutex<Vec<String>>,
}

impl MockCompute {
    pub fn new(name: ProviderName, journal: Journal) -> Self {
        Self {
            name,
            journal,
            fail_create: AtomicBool::new(false),
            ip_after: Mutex::new(Some(0)),
            lookup_outages: AtomicU32::new(0),
            lookup_missing: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            get_calls: AtomicU32::new(0),
            deleted: Mutex::default(),
        }
    }

    pub fn gets(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComputeProvider for MockCompute {
    async fn create_instance(&self, spec: &InstanceSpec) -> bx_infra::Result<InstanceInfo> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(api_error("quota exceeded"));
        }
        Ok(InstanceInfo {
            id: InstanceId(format!("{}-{}", self.name, spec.name)),
            name: spec.name.clone(),
            state: InstanceState::Provisioning,
            public_ip: None,
        })
    }

    async fn get_instance(&self, id: &InstanceId) -> bx_infra::Result<InstanceInfo> {
        let calls = self.get_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.lookup_missing.load(Ordering::SeqCst) {
            return Err(droplet_error(404));
        }
        let outages = self.lookup_outages.load(Ordering::SeqCst);
        if outages > 0 {
            self.lookup_outages.store(outages - 1, Ordering::SeqCst);
            return Err(droplet_error(503));
        }
        let ready = self.ip_after.lock().unwrap().is_some_and(|after| calls > after);
        Ok(InstanceInfo {
            id: id.clone(),
            name: id.0.clone(),
            state: if ready { InstanceState::Running } else { InstanceState::Provisioning },
            public_ip: ready.then(|| "203.0.113.10".to_string()),
        })
    }

    async fn delete_instance(&self, id: &InstanceId) -> bx_infra::Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(api_error("provider unavailable"));
        }
        self.deleted.lock().unwrap().push(id.0.clone());
        log(&self.journal, format!("delete instance {id}"));
        Ok(())
    }

    async fn list_instances(&self, _tag: &str) -> bx_infra::Result<Vec<InstanceInfo>> {
        Ok(Vec::new())
    }

    async fn delete_all(&self, tag: &str) -> bx_infra::Result<()> {
        log(&self.journal, format!("sweep {} {tag}", self.name));
        Ok(())
    }

    fn name(&self) -> ProviderName {
        self.name
    }
}

// ── CDN ─────────────────────────────────────────────────────────────

pub struct MockCdn {
    /// How long `wait_until_deployed` takes.
    pub deploy_time: Duration,
    enabled: AtomicBool,
    etag: AtomicU32,
    /// Deletes that fail before one succeeds.
    pub delete_failures: AtomicU32,
    pub update_calls: AtomicU32,
    pub fetch_calls: AtomicU32,
    /// Tokens passed to `delete_distribution`, in order.
    pub delete_tokens: Mutex<Vec<String>>,
    pub deleted: AtomicBool,
    /// The distribution was removed outside this system.
    pub gone: AtomicBool,
}

impl MockCdn {
    pub fn new(deploy_time: Duration) -> Self {
        Self {
            deploy_time,
            enabled: AtomicBool::new(true),
            etag: AtomicU32::new(1),
            delete_failures: AtomicU32::new(0),
            update_calls: AtomicU32::new(0),
            fetch_calls: AtomicU32::new(0),
            delete_tokens: Mutex::default(),
            deleted: AtomicBool::new(false),
            gone: AtomicBool::new(false),
        }
    }

    fn token(&self) -> ConcurrencyToken {
        ConcurrencyToken(format!("E{}", self.etag.load(Ordering::SeqCst)))
    }
}

#[async_trait]
impl CdnProvider for MockCdn {
    async fn create_distribution(&self, _origin: &str) -> bx_infra::Result<DistributionInfo> {
        Ok(DistributionInfo {
            id: DistributionId("EDFDVBD6EXAMPLE".into()),
            url: "d111111abcdef8.cloudfront.net".into(),
            deployed: false,
        })
    }

    async fn fetch_config(&self, _id: &DistributionId) -> bx_infra::Result<Option<Versioned<DistributionConfig>>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.gone.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(Versioned {
            value: DistributionConfig {
                enabled: self.enabled.load(Ordering::SeqCst),
                document: "<DistributionConfig/>".into(),
            },
            token: self.token(),
        }))
    }

    async fn update_config(
        &self,
        _id: &DistributionId,
        config: &DistributionConfig,
        token: &ConcurrencyToken,
    ) -> bx_infra::Result<ConcurrencyToken> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if *token != self.token() {
            return Err(api_error("precondition failed"));
        }
        self.enabled.store(config.enabled, Ordering::SeqCst);
        self.etag.fetch_add(1, Ordering::SeqCst);
        Ok(self.token())
    }

    async fn delete_distribution(&self, _id: &DistributionId, token: &ConcurrencyToken) -> bx_infra::Result<()> {
        self.delete_tokens.lock().unwrap().push(token.0.clone());
        let remaining = self.delete_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.delete_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(not_disabled());
        }
        self.deleted.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_until_deployed(&self, _id: &DistributionId) -> bx_infra::Result<()> {
        tokio::time::sleep(self.deploy_time).await;
        Ok(())
    }

    fn name(&self) -> CdnProviderName {
        CdnProviderName::CloudFront
    }
}

// ── Executor ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockExecutor {
    pub ssh_down: AtomicBool,
    pub fail_role: Mutex<Option<String>>,
    pub probes: AtomicU32,
    pub roles_run: Mutex<Vec<String>>,
    pub grants: AtomicU32,
}

impl MockExecutor {
    pub fn ran(&self) -> Vec<String> {
        self.roles_run.lock().unwrap().clone()
    }

    pub fn probe_count(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigExecutor for MockExecutor {
    async fn probe(&self, _host: &str, _port: u16) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        !self.ssh_down.load(Ordering::SeqCst)
    }

    async fn run_role(&self, _target: &Target, role: &str) -> bx_infra::Result<()> {
        self.roles_run.lock().unwrap().push(role.to_string());
        if self.fail_role.lock().unwrap().as_deref() == Some(role) {
            return Err(playbook_error(role));
        }
        Ok(())
    }

    async fn grant_access(&self, _target: &Target, _ssh_key: &str) -> bx_infra::Result<()> {
        self.grants.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Sink ────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub notices: Mutex<Vec<(Uuid, Notice)>>,
    pub events: Mutex<Vec<DomainEvent>>,
}

impl RecordingSink {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().iter().map(|(_, n)| n.clone()).collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.notices()
            .into_iter()
            .filter(|n| n.status == super::notify::NoticeStatus::Error)
            .map(|n| n.message)
            .collect()
    }

    pub fn events(&self, kind: &str) -> Vec<DomainEvent> {
        self.events.lock().unwrap().iter().filter(|e| e.kind == kind).cloned().collect()
    }
}

impl NotificationSink for RecordingSink {
    fn send(&self, user_id: Uuid, notice: &Notice) {
        self.notices.lock().unwrap().push((user_id, notice.clone()));
    }

    fn broadcast(&self, event: &DomainEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct Harness {
    pub orch: Orchestrator,
    pub store: Arc<MemoryStore>,
    pub digitalocean: Arc<MockCompute>,
    pub linode: Arc<MockCompute>,
    pub cdn: Arc<MockCdn>,
    pub executor: Arc<MockExecutor>,
    pub sink: Arc<RecordingSink>,
    pub ctx: RequestContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(LifecycleConfig::default())
    }

    pub fn with_config(config: LifecycleConfig) -> Self {
        let store = Arc::new(MemoryStore::default());
        store.set_secret("root_password", "hunter2");
        let user_id = store.add_user(Some("ssh-ed25519 AAAA operator@laptop"));

        let digitalocean = Arc::new(MockCompute::new(ProviderName::DigitalOcean, store.journal.clone()));
        let linode = Arc::new(MockCompute::new(ProviderName::Linode, store.journal.clone()));
        let cdn = Arc::new(MockCdn::new(Duration::from_secs(600)));
        let executor = Arc::new(MockExecutor::default());
        let sink = Arc::new(RecordingSink::default());

        let providers = ProviderRegistry::default()
            .with_compute(digitalocean.clone())
            .with_compute(linode.clone())
            .with_cdn(cdn.clone());

        let orch = Orchestrator::new(store.clone(), providers, executor.clone(), sink.clone(), config);

        Self {
            orch,
            store,
            digitalocean,
            linode,
            cdn,
            executor,
            sink,
            ctx: RequestContext {
                user_id,
                username: "operator".into(),
                access_level: ADMIN_ACCESS_LEVEL,
            },
        }
    }

    pub fn journal(&self) -> Vec<String> {
        self.store.journal.lock().unwrap().clone()
    }
}

/// Let background tasks run for `secs` of (paused) virtual time.
pub async fn advance(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}
