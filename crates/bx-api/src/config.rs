use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::LifecycleConfig;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub control_plane_api_key: String,
    pub playbook_dir: PathBuf,
    pub ansible_private_key: PathBuf,
    pub ansible_debug: bool,
    pub in_production: bool,
    pub guard_tombstones: bool,
    pub cdn_wait_timeout_secs: Option<u64>,
    pub cdn_delete_deadline_secs: Option<u64>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            listen_addr: env::var("LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".into())
                .parse()
                .expect("LISTEN_ADDR must be a valid socket address"),
            control_plane_api_key: env::var("CONTROL_PLANE_API_KEY")
                .expect("CONTROL_PLANE_API_KEY must be set"),
            playbook_dir: env::var("PLAYBOOK_DIR")
                .unwrap_or_else(|_| "scripts".into())
                .into(),
            ansible_private_key: env::var("ANSIBLE_PRIVATE_KEY")
                .unwrap_or_else(|_| "id_rsa".into())
                .into(),
            ansible_debug: flag("ANSIBLE_DEBUG", false),
            in_production: flag("IN_PRODUCTION", false),
            guard_tombstones: flag("GUARD_TOMBSTONES", true),
            cdn_wait_timeout_secs: seconds("CDN_WAIT_TIMEOUT_SECS"),
            cdn_delete_deadline_secs: seconds("CDN_DELETE_DEADLINE_SECS"),
        }
    }

    pub fn lifecycle(&self) -> LifecycleConfig {
        let defaults = LifecycleConfig::default();
        LifecycleConfig {
            cdn_delete: defaults
                .cdn_delete
                .with_deadline(self.cdn_delete_deadline_secs.map(Duration::from_secs)),
            cdn_wait_timeout: self.cdn_wait_timeout_secs.map(Duration::from_secs),
            guard_tombstones: self.guard_tombstones,
            allow_remove_all: !self.in_production,
            ..defaults
        }
    }
}

fn flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => parse_flag(&v).unwrap_or_else(|| panic!("{name} must be true or false")),
        Err(_) => default,
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn seconds(name: &str) -> Option<u64> {
    env::var(name).ok().filter(|v| !v.trim().is_empty()).map(|v| {
        v.trim()
            .parse()
            .unwrap_or_else(|_| panic!("{name} must be a whole number of seconds"))
    })
}
