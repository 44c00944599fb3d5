use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, info};

use crate::types::Target;
use crate::{ConfigExecutor, Error, Result};

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const RUN_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Runs playbooks with the local `ansible-playbook` binary.
///
/// Role playbooks live at `<playbook_dir>/added/<role>.yml`; the access
/// playbook that installs a user's key is `<playbook_dir>/default/Access.yml`.
pub struct AnsibleExecutor {
    playbook_dir: PathBuf,
    private_key: PathBuf,
    debug: bool,
    run_timeout: Duration,
}

impl AnsibleExecutor {
    pub fn new(playbook_dir: impl Into<PathBuf>, private_key: impl Into<PathBuf>, debug: bool) -> Self {
        Self {
            playbook_dir: playbook_dir.into(),
            private_key: private_key.into(),
            debug,
            run_timeout: RUN_TIMEOUT,
        }
    }

    fn role_playbook(&self, role: &str) -> PathBuf {
        self.playbook_dir.join("added").join(format!("{role}.yml"))
    }

    fn access_playbook(&self) -> PathBuf {
        self.playbook_dir.join("default").join("Access.yml")
    }

    fn command(&self, playbook: &Path, host: &str, extra_vars: &serde_json::Value) -> Command {
        let mut cmd = Command::new("ansible-playbook");
        cmd.arg("-i")
            .arg(format!("{host},"))
            .arg("--private-key")
            .arg(&self.private_key)
            .arg("--ssh-common-args")
            .arg("-o StrictHostKeyChecking=no")
            .arg("-e")
            .arg(extra_vars.to_string())
            .arg(playbook)
            .env("ANSIBLE_HOST_KEY_CHECKING", "False")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run a playbook to completion, failing on a non-zero exit or when the
    /// run exceeds the per-run timeout.
    async fn run_checked(&self, playbook: PathBuf, host: &str, extra_vars: serde_json::Value) -> Result<()> {
        let name = playbook.display().to_string();
        if !playbook.is_file() {
            return Err(Error::Playbook {
                playbook: name,
                detail: "playbook file not found".into(),
            });
        }

        let child = self.command(&playbook, host, &extra_vars).spawn()?;
        let output = match tokio::time::timeout(self.run_timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(Error::Playbook {
                    playbook: name,
                    detail: format!("timed out after {}s", self.run_timeout.as_secs()),
                });
            }
        };

        if self.debug {
            debug!(playbook = %name, host, stdout = %String::from_utf8_lossy(&output.stdout), "ansible output");
        }

        if !output.status.success() {
            let exit = output.status.code().unwrap_or(-1);
            return Err(Error::Playbook {
                playbook: name,
                detail: format!(
                    "exit {exit}: {}{}",
                    String::from_utf8_lossy(&output.stderr),
                    String::from_utf8_lossy(&output.stdout),
                ),
            });
        }

        info!(playbook = %name, host, "ansible: playbook succeeded");
        Ok(())
    }

    fn base_vars(target: &Target) -> serde_json::Value {
        json!({
            "ansible_user": "root",
            "ansible_password": target.root_password,
            "host_key_checking": "False",
        })
    }
}

#[async_trait]
impl ConfigExecutor for AnsibleExecutor {
    async fn probe(&self, host: &str, port: u16) -> bool {
        matches!(
            tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect((host, port))).await,
            Ok(Ok(_))
        )
    }

    async fn run_role(&self, target: &Target, role: &str) -> Result<()> {
        self.run_checked(self.role_playbook(role), &target.host, Self::base_vars(target))
            .await
    }

    async fn grant_access(&self, target: &Target, ssh_key: &str) -> Result<()> {
        let mut vars = Self::base_vars(target);
        vars["ssh_key"] = json!(ssh_key);
        vars["root_password"] = json!(target.root_password);
        self.run_checked(self.access_playbook(), &target.host, vars).await
    }
}
