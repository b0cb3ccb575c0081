//! Backend that runs an external hook executable.
//!
//! The item is written to the hook's stdin as JSON. The hook sees
//! `DEPUTY_ITEM_ID`, `DEPUTY_ITEM_TYPE`, and (when configured)
//! `DEPUTY_HOOK_TOKEN` in its environment. Exit status zero is success;
//! stdout is taken as JSON result data, or kept as text if it is not JSON.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{ExecutionBackend, HookDescriptor};
use crate::error::{Error, Result};
use crate::model::WorkItem;

pub struct CommandBackend {
    hook: HookDescriptor,
    token: Option<SecretString>,
}

impl CommandBackend {
    pub fn new(hook: HookDescriptor, token: Option<SecretString>) -> Self {
        Self { hook, token }
    }
}

#[async_trait]
impl ExecutionBackend for CommandBackend {
    fn name(&self) -> &str {
        &self.hook.name
    }

    async fn execute(&self, item: &WorkItem) -> Result<Option<serde_json::Value>> {
        // Resolve relative command paths against the process CWD.
        let command = if self.hook.command.is_relative() {
            std::env::current_dir()?.join(&self.hook.command)
        } else {
            self.hook.command.clone()
        };

        debug!(
            backend = %self.hook.name,
            id = %item.id,
            command = %command.display(),
            "running hook"
        );

        let mut cmd = Command::new(&command);
        cmd.env("DEPUTY_ITEM_ID", item.id.0.to_string())
            .env("DEPUTY_ITEM_TYPE", item.item_type.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(token) = &self.token {
            cmd.env("DEPUTY_HOOK_TOKEN", token.expose_secret());
        }

        let mut child = cmd.spawn().map_err(|e| {
            Error::Execution(format!("{}: cannot start {}: {e}", self.hook.name, command.display()))
        })?;

        let input = serde_json::to_vec(item)?;
        if let Some(mut stdin) = child.stdin.take() {
            // A hook that ignores stdin may close it early.
            if let Err(e) = stdin.write_all(&input).await {
                debug!(backend = %self.hook.name, error = %e, "hook closed stdin");
            }
        }

        let timeout = Duration::from_secs(self.hook.timeout_secs);
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::Execution(format!(
                    "{} timed out after {}s",
                    self.hook.name, self.hook.timeout_secs
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Execution(format!(
                "{} exited with status {}: {}",
                self.hook.name,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            serde_json::from_str(stdout)
                .unwrap_or_else(|_| serde_json::Value::String(stdout.to_string())),
        ))
    }
}
