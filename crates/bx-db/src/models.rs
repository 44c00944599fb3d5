use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

// ── User ────────────────────────────────────────────────────────────

/// Access level granted to administrators.
pub const ADMIN_ACCESS_LEVEL: i32 = 10;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub access_level: i32,
    /// Public key pushed to every server this user creates.
    pub ssh_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub async fn get_by_id(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<Self>> {
        sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}

// ── Secret ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct Secret {
    pub name: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

impl Secret {
    pub async fn get(pool: &PgPool, name: &str) -> sqlx::Result<Option<Self>> {
        sqlx::query_as("SELECT * FROM secrets WHERE name = $1")
            .bind(name)
            .fetch_optional(pool)
            .await
    }

    /// Every secret as a name → value map.
    pub async fn all(pool: &PgPool) -> sqlx::Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT name, value FROM secrets")
            .fetch_all(pool)
            .await?;
        Ok(rows.into_iter().collect())
    }
}

// ── Server ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "server_status")]
pub enum ServerStatus {
    Deploying,
    Configuring,
    Provisioning,
    Ready,
    #[sqlx(rename = "ERROR")]
    #[serde(rename = "ERROR")]
    Error,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deploying => "Deploying",
            Self::Configuring => "Configuring",
            Self::Provisioning => "Provisioning",
            Self::Ready => "Ready",
            Self::Error => "ERROR",
        }
    }

    /// No lifecycle task moves a server out of this state on its own.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Ready | Self::Error)
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Server {
    pub id: Uuid,
    pub provider: String,
    /// Provider-assigned instance ID, set once the provider accepts the create.
    pub provider_id: Option<String>,
    pub name: String,
    /// Public IPv4; only trustworthy once status has left Deploying/Configuring.
    pub ip: Option<String>,
    pub os: String,
    pub roles: Vec<String>,
    pub project: i32,
    pub creator: Uuid,
    pub status: ServerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct NewServer<'a> {
    pub provider: &'a str,
    pub name: &'a str,
    pub os: &'a str,
    pub roles: &'a [String],
    pub project: i32,
    pub creator: Uuid,
}

impl Server {
    /// Insert a new server in `Deploying` with no IP.
    pub async fn insert(pool: &PgPool, server: &NewServer<'_>) -> sqlx::Result<Self> {
        sqlx::query_as(
            r#"INSERT INTO servers (provider, name, os, roles, project, creator, status)
               VALUES ($1, $2, $3, $4, $5, $6, 'Deploying')
               RETURNING *"#,
        )
        .bind(server.provider)
        .bind(server.name)
        .bind(server.os)
        .bind(server.roles)
        .bind(server.project)
        .bind(server.creator)
        .fetch_one(pool)
        .await
    }

    pub async fn get_by_id(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<Self>> {
        sqlx::query_as("SELECT * FROM servers WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &PgPool) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as("SELECT * FROM servers ORDER BY created_at")
            .fetch_all(pool)
            .await
    }

    pub async fn list_for_project(pool: &PgPool, project: i32) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as("SELECT * FROM servers WHERE project = $1 ORDER BY created_at")
            .bind(project)
            .fetch_all(pool)
            .await
    }

    /// Record the provider's instance ID and address together with `status`.
    pub async fn set_deployed(
        pool: &PgPool,
        id: Uuid,
        provider_id: &str,
        ip: &str,
        status: ServerStatus,
    ) -> sqlx::Result<()> {
        sqlx::query("UPDATE servers SET provider_id = $1, ip = $2, status = $3 WHERE id = $4")
            .bind(provider_id)
            .bind(ip)
            .bind(status)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn set_provider_id(pool: &PgPool, id: Uuid, provider_id: &str) -> sqlx::Result<()> {
        sqlx::query("UPDATE servers SET provider_id = $1 WHERE id = $2")
            .bind(provider_id)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn set_status(pool: &PgPool, id: Uuid, status: ServerStatus) -> sqlx::Result<()> {
        sqlx::query("UPDATE servers SET status = $1 WHERE id = $2")
            .bind(status)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn set_roles(pool: &PgPool, id: Uuid, roles: &[String]) -> sqlx::Result<()> {
        sqlx::query("UPDATE servers SET roles = $1 WHERE id = $2")
            .bind(roles)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM servers WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}

// ── Redirector ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "redirector_status")]
pub enum RedirectorStatus {
    Creating,
    Ready,
}

impl RedirectorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "Creating",
            Self::Ready => "Ready",
        }
    }
}

impl fmt::Display for RedirectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Redirector {
    pub id: Uuid,
    pub provider: String,
    /// Provider distribution ID.
    pub provider_id: String,
    /// Hostname the distribution answers on.
    pub url: String,
    /// Origin domain the distribution fronts.
    pub domain: String,
    pub project: i32,
    pub status: RedirectorStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct NewRedirector<'a> {
    pub provider: &'a str,
    pub provider_id: &'a str,
    pub url: &'a str,
    pub domain: &'a str,
    pub project: i32,
}

impl Redirector {
    /// Insert a new redirector in `Creating`.
    pub async fn insert(pool: &PgPool, redirector: &NewRedirector<'_>) -> sqlx::Result<Self> {
        sqlx::query_as(
            r#"INSERT INTO redirectors (provider, provider_id, url, domain, project, status)
               VALUES ($1, $2, $3, $4, $5, 'Creating')
               RETURNING *"#,
        )
        .bind(redirector.provider)
        .bind(redirector.provider_id)
        .bind(redirector.url)
        .bind(redirector.domain)
        .bind(redirector.project)
        .fetch_one(pool)
        .await
    }

    pub async fn get_by_id(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<Self>> {
        sqlx::query_as("SELECT * FROM redirectors WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &PgPool) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as("SELECT * FROM redirectors ORDER BY created_at")
            .fetch_all(pool)
            .await
    }

    pub async fn list_by_status(pool: &PgPool, status: RedirectorStatus) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as("SELECT * FROM redirectors WHERE status = $1 ORDER BY created_at")
            .bind(status)
            .fetch_all(pool)
            .await
    }

    pub async fn set_status(pool: &PgPool, id: Uuid, status: RedirectorStatus) -> sqlx::Result<()> {
        sqlx::query("UPDATE redirectors SET status = $1 WHERE id = $2")
            .bind(status)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM redirectors WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
