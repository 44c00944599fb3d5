use bx_db::models::{Redirector, RedirectorStatus, Server, ServerStatus};
use bx_infra::types::{InstanceInfo, InstanceState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lifecycle::{CreateRedirector, CreateServer};

// ── Requests ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateServerRequest {
    pub provider: String,
    pub hostname: String,
    pub os: String,
    pub project: i32,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl From<CreateServerRequest> for CreateServer {
    fn from(req: CreateServerRequest) -> Self {
        Self {
            provider: req.provider,
            name: req.hostname,
            os: req.os,
            project: req.project,
            roles: req.roles,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateRolesRequest {
    pub roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRedirectorRequest {
    pub provider: String,
    pub domain: String,
    pub project: i32,
}

impl From<CreateRedirectorRequest> for CreateRedirector {
    fn from(req: CreateRedirectorRequest) -> Self {
        Self {
            provider: req.provider,
            domain: req.domain,
            project: req.project,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub project: Option<i32>,
}

// ── Responses ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ServerResponse {
    pub id: Uuid,
    pub provider: String,
    pub provider_id: Option<String>,
    pub hostname: String,
    pub ip_address: Option<String>,
    pub os: String,
    pub roles: Vec<String>,
    pub project: i32,
    pub creator: Uuid,
    pub status: ServerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Server> for ServerResponse {
    fn from(s: Server) -> Self {
        Self {
            id: s.id,
            provider: s.provider,
            provider_id: s.provider_id,
            hostname: s.name,
            ip_address: s.ip,
            os: s.os,
            roles: s.roles,
            project: s.project,
            creator: s.creator,
            status: s.status,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RedirectorResponse {
    pub id: Uuid,
    pub provider: String,
    pub distribution_id: String,
    pub url: String,
    pub domain: String,
    pub project: i32,
    pub status: RedirectorStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Redirector> for RedirectorResponse {
    fn from(r: Redirector) -> Self {
        Self {
            id: r.id,
            provider: r.provider,
            distribution_id: r.provider_id,
            url: r.url,
            domain: r.domain,
            project: r.project,
            status: r.status,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InstanceResponse {
    pub id: String,
    pub name: String,
    pub state: InstanceState,
    pub ip_address: Option<String>,
}

impl From<InstanceInfo> for InstanceResponse {
    fn from(i: InstanceInfo) -> Self {
        Self {
            id: i.id.0,
            name: i.name,
            state: i.state,
            ip_address: i.public_ip,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RemoveAllResponse {
    pub deleted: usize,
}
