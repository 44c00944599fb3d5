use std::collections::HashMap;

use async_trait::async_trait;
use bx_db::models::{
    NewRedirector, NewServer, Redirector, RedirectorStatus, Secret, Server, ServerStatus, User,
};
use sqlx::PgPool;
use uuid::Uuid;

/// Persistence the orchestrator depends on.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn insert_server(&self, server: &NewServer<'_>) -> sqlx::Result<Server>;
    async fn get_server(&self, id: Uuid) -> sqlx::Result<Option<Server>>;
    async fn list_servers(&self) -> sqlx::Result<Vec<Server>>;
    async fn set_server_provider_id(&self, id: Uuid, provider_id: &str) -> sqlx::Result<()>;
    async fn set_server_deployed(
        &self,
        id: Uuid,
        provider_id: &str,
        ip: &str,
        status: ServerStatus,
    ) -> sqlx::Result<()>;
    async fn set_server_status(&self, id: Uuid, status: ServerStatus) -> sqlx::Result<()>;
    async fn set_server_roles(&self, id: Uuid, roles: &[String]) -> sqlx::Result<()>;
    async fn delete_server(&self, id: Uuid) -> sqlx::Result<()>;

    async fn insert_redirector(&self, redirector: &NewRedirector<'_>) -> sqlx::Result<Redirector>;
    async fn get_redirector(&self, id: Uuid) -> sqlx::Result<Option<Redirector>>;
    async fn list_redirectors_by_status(&self, status: RedirectorStatus) -> sqlx::Result<Vec<Redirector>>;
    async fn set_redirector_status(&self, id: Uuid, status: RedirectorStatus) -> sqlx::Result<()>;
    async fn delete_redirector(&self, id: Uuid) -> sqlx::Result<()>;

    async fn get_user(&self, id: Uuid) -> sqlx::Result<Option<User>>;
    async fn get_secret(&self, name: &str) -> sqlx::Result<Option<String>>;
    async fn secrets(&self) -> sqlx::Result<HashMap<String, String>>;
}

/// [`Store`] over the Postgres models.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_server(&self, server: &NewServer<'_>) -> sqlx::Result<Server> {
        Server::insert(&self.pool, server).await
    }

    async fn get_server(&self, id: Uuid) -> sqlx::Result<Option<Server>> {
        Server::get_by_id(&self.pool, id).await
    }

    async fn list_servers(&self) -> sqlx::Result<Vec<Server>> {
        Server::list(&self.pool).await
    }

    async fn set_server_provider_id(&self, id: Uuid, provider_id: &str) -> sqlx::Result<()> {
        Server::set_provider_id(&self.pool, id, provider_id).await
    }

    async fn set_server_deployed(
        &self,
        id: Uuid,
        provider_id: &str,
        ip: &str,
        status: ServerStatus,
    ) -> sqlx::Result<()> {
        Server::set_deployed(&self.pool, id, provider_id, ip, status).await
    }

    async fn set_server_status(&self, id: Uuid, status: ServerStatus) -> sqlx::Result<()> {
        Server::set_status(&self.pool, id, status).await
    }

    async fn set_server_roles(&self, id: Uuid, roles: &[String]) -> sqlx::Result<()> {
        Server::set_roles(&self.pool, id, roles).await
    }

    async fn delete_server(&self, id: Uuid) -> sqlx::Result<()> {
        Server::delete(&self.pool, id).await
    }

    async fn insert_redirector(&self, redirector: &NewRedirector<'_>) -> sqlx::Result<Redirector> {
        Redirector::insert(&self.pool, redirector).await
    }

    async fn get_redirector(&self, id: Uuid) -> sqlx::Result<Option<Redirector>> {
        Redirector::get_by_id(&self.pool, id).await
    }

    async fn list_redirectors_by_status(&self, status: RedirectorStatus) -> sqlx::Result<Vec<Redirector>> {
        Redirector::list_by_status(&self.pool, status).await
    }

    async fn set_redirector_status(&self, id: Uuid, status: RedirectorStatus) -> sqlx::Result<()> {
        Redirector::set_status(&self.pool, id, status).await
    }

    async fn delete_redirector(&self, id: Uuid) -> sqlx::Result<()> {
        Redirector::delete(&self.pool, id).await
    }

    async fn get_user(&self, id: Uuid) -> sqlx::Result<Option<User>> {
        User::get_by_id(&self.pool, id).await
    }

    async fn get_secret(&self, name: &str) -> sqlx::Result<Option<String>> {
        Ok(Secret::get(&self.pool, name).await?.map(|s| s.value))
    }

    async fn secrets(&self) -> sqlx::Result<HashMap<String, String>> {
        Secret::all(&self.pool).await
    }
}
