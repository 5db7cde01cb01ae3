//! Azure CLI invoker.
//!
//! Runs sanitized `az` commands as subprocesses under the execution limiter.
//! Commands are split into argv with `shell_words` and spawned directly —
//! never through a shell. Service-principal credentials from the settings are
//! injected into the child environment only when all three are present;
//! otherwise the CLI relies on ambient login state. On timeout the whole
//! process group is killed, not merely abandoned: an orphaned `az` process
//! keeps running with injected credentials.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::ServiceError;
use crate::limiter::ExecutionLimiter;
use crate::outcome::CommandResult;
use crate::settings::Settings;

/// Maximum captured output size in bytes (1MB).
const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Execution parameters for the CLI invoker.
#[derive(Debug, Clone)]
pub struct CliInvokerConfig {
    /// Per-call deadline.
    pub timeout: Duration,

    /// Binary spawned in place of the command's first token. Normally `az`;
    /// overridable for non-standard installs and for tests.
    pub binary: String,

    /// Captured output is truncated beyond this size.
    pub max_output_size: usize,
}

/// Executes sanitized Azure CLI commands.
#[derive(Debug, Clone)]
pub struct AzureCliInvoker {
    settings: Arc<Settings>,
    limiter: ExecutionLimiter,
    config: CliInvokerConfig,
}

impl AzureCliInvoker {
    pub fn new(settings: Arc<Settings>) -> Self {
        let limiter = ExecutionLimiter::new(settings.max_concurrent_commands);
        let config = CliInvokerConfig {
            timeout: settings.command_timeout(),
            binary: "az".to_string(),
            max_output_size: MAX_OUTPUT_SIZE,
        };
        Self {
            settings,
            limiter,
            config,
        }
    }

    /// Override the spawned binary.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.config.binary = binary.into();
        self
    }

    /// Override the per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn limiter(&self) -> &ExecutionLimiter {
        &self.limiter
    }

    /// Execute a sanitized command.
    ///
    /// Acquires a slot for the duration of the call; every failure mode is
    /// returned as `CommandResult` data. No automatic retries — retry policy
    /// belongs to the caller.
    pub async fn run(&self, sanitized_command: &str) -> CommandResult {
        let _slot = match self.limiter.acquire().await {
            Ok(slot) => slot,
            Err(err) => return err.into(),
        };

        info!(command = %sanitized_command, "executing Azure CLI command");
        match self.spawn_and_wait(sanitized_command).await {
            Ok(result) => result,
            Err(err) => {
                warn!(command = %sanitized_command, error = %err, "Azure CLI invocation failed");
                err.into()
            }
        }
    }

    async fn spawn_and_wait(&self, sanitized_command: &str) -> Result<CommandResult, ServiceError> {
        let argv = shell_words::split(sanitized_command)
            .map_err(|e| ServiceError::Validation(format!("unparseable command: {e}")))?;
        if argv.is_empty() {
            return Err(ServiceError::Validation("command is empty".to_string()));
        }

        let mut command = Command::new(&self.config.binary);
        command.args(&argv[1..]);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        if self.settings.has_cli_credentials() {
            debug!("injecting service principal credentials into child environment");
            // has_cli_credentials guarantees all three are present
            if let (Some(tenant), Some(client), Some(secret)) = (
                self.settings.azure_tenant_id.as_deref(),
                self.settings.azure_client_id.as_deref(),
                self.settings.azure_client_secret.as_deref(),
            ) {
                command.env("AZURE_TENANT_ID", tenant);
                command.env("AZURE_CLIENT_ID", client);
                command.env("AZURE_CLIENT_SECRET", secret);
            }
            if let Some(subscription) = self.settings.azure_subscription_id.as_deref() {
                command.env("AZURE_SUBSCRIPTION_ID", subscription);
            }
        }

        let mut child = command.spawn().map_err(|e| {
            ServiceError::External(format!("failed to spawn {}: {e}", self.config.binary))
        })?;

        // Drain the pipes concurrently so a chatty child never blocks on a
        // full pipe while we wait on its exit status.
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(read_pipe(stdout_pipe));
        let stderr_task = tokio::spawn(read_pipe(stderr_pipe));

        let status = match tokio::time::timeout(self.config.timeout, child.wait()).await {
            Ok(waited) => {
                waited.map_err(|e| ServiceError::External(format!("wait failed: {e}")))?
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.config.timeout.as_secs(),
                    "command timed out, killing process group"
                );
                kill_process_group(&child);
                let _ = child.kill().await;
                let _ = child.wait().await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(ServiceError::Timeout(self.config.timeout));
            }
        };

        let stdout = truncate(
            stdout_task.await.unwrap_or_default(),
            self.config.max_output_size,
        );
        let stderr = truncate(
            stderr_task.await.unwrap_or_default(),
            self.config.max_output_size,
        );

        if status.success() {
            debug!(bytes = stdout.len(), "command succeeded");
            Ok(CommandResult::ok_text(stdout))
        } else {
            let exit_code = status.code();
            let error = if stderr.trim().is_empty() { stdout } else { stderr };
            warn!(?exit_code, "command failed");
            Ok(CommandResult::fail_with_details(
                error,
                serde_json::json!({ "exit_code": exit_code }),
            ))
        }
    }
}

async fn read_pipe<R>(pipe: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buffer = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut buffer).await;
    }
    buffer
}

/// Kill the child's entire process group. The child was spawned with
/// `process_group(0)`, so its pid doubles as the group id.
#[cfg(unix)]
fn kill_process_group(child: &tokio::process::Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &tokio::process::Child) {
    // On non-Unix platforms child.kill() is the best available; kill_on_drop
    // covers the remaining paths.
}

fn truncate(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len.saturating_sub(3);
        // The cut point must land on a char boundary or truncate panics.
        while cut > 0 && !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("...");
    }
    s
}
