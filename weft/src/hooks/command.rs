//! Local command execution hook.
//!
//! Enforcement is allow-list first: unless at least one of {allowed
//! directories, allowed commands} is configured, zero tools are executable.
//! Within the allow-list the deny-list is evaluated first, so a denied
//! command stays denied even when it also appears in the allow-list.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::chain::{DataType, DataValue};
use crate::error::WeftError;

use super::{HookCall, ToolProvider, ToolSpec};

/// Tool name exposed by this provider.
pub const TOOL_RUN_COMMAND: &str = "run_command";

/// Allow/deny policy for local command execution.
#[derive(Clone, Debug, Default)]
pub struct CommandPolicy {
    /// Commands that may run. Empty means "any command" only when
    /// `allowed_dirs` is non-empty.
    pub allowed_commands: Vec<String>,
    /// Working directories commands may run in.
    pub allowed_dirs: Vec<PathBuf>,
    /// Commands refused even when allow-listed.
    pub deny_commands: Vec<String>,
}

impl CommandPolicy {
    /// Whether any allow-list is configured at all.
    fn is_configured(&self) -> bool {
        !self.allowed_commands.is_empty() || !self.allowed_dirs.is_empty()
    }

    /// Checks one invocation. Deny-list first, then the allow-lists.
    fn check(&self, command: &str, dir: Option<&PathBuf>) -> Result<(), WeftError> {
        if !self.is_configured() {
            return Err(WeftError::Unprocessable(
                "command execution disabled: no allow-list configured".into(),
            ));
        }
        if self.deny_commands.iter().any(|d| d == command) {
            return Err(WeftError::Unprocessable(format!(
                "command {command} is deny-listed"
            )));
        }
        if !self.allowed_commands.is_empty()
            && !self.allowed_commands.iter().any(|a| a == command)
        {
            return Err(WeftError::Unprocessable(format!(
                "command {command} is not allow-listed"
            )));
        }
        if let Some(dir) = dir {
            if !self.allowed_dirs.is_empty()
                && !self.allowed_dirs.iter().any(|a| dir.starts_with(a))
            {
                return Err(WeftError::Unprocessable(format!(
                    "directory {} is not allow-listed",
                    dir.display()
                )));
            }
        }
        Ok(())
    }
}

/// Hook provider running allow-listed local commands.
pub struct CommandToolProvider {
    hook: String,
    policy: CommandPolicy,
}

impl CommandToolProvider {
    pub fn new(hook: impl Into<String>, policy: CommandPolicy) -> Self {
        Self {
            hook: hook.into(),
            policy,
        }
    }
}

#[async_trait]
impl ToolProvider for CommandToolProvider {
    fn supports(&self) -> Vec<String> {
        vec![self.hook.clone()]
    }

    async fn tools_for_hook(&self, name: &str) -> Result<Vec<ToolSpec>, WeftError> {
        if name != self.hook {
            return Err(WeftError::NotFound(format!("hook {name}")));
        }
        // Missing allow-list means zero executable tools.
        if !self.policy.is_configured() {
            return Ok(Vec::new());
        }
        Ok(vec![ToolSpec {
            name: TOOL_RUN_COMMAND.to_string(),
            description: Some("Run an allow-listed local command".to_string()),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "args": {"type": "string", "description": "space separated arguments"},
                    "dir": {"type": "string"}
                },
                "required": ["command"]
            }),
        }])
    }

    async fn exec(
        &self,
        ctx: &CancellationToken,
        _now: DateTime<Utc>,
        _input: &DataValue,
        debug: bool,
        call: &HookCall,
    ) -> Result<(DataValue, DataType), WeftError> {
        if call.tool != TOOL_RUN_COMMAND {
            return Err(WeftError::NotFound(format!("tool {}", call.tool)));
        }
        let command = call
            .args
            .get("command")
            .ok_or_else(|| WeftError::BadInput("missing argument: command".into()))?;
        let dir = call.args.get("dir").map(PathBuf::from);
        self.policy.check(command, dir.as_ref())?;

        let binary = which::which(command)
            .map_err(|e| WeftError::BadInput(format!("command {command}: {e}")))?;
        let args: Vec<&str> = call
            .args
            .get("args")
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default();

        if debug {
            tracing::debug!(command = %binary.display(), ?args, "running command hook");
        }

        let mut cmd = tokio::process::Command::new(binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }

        let output = tokio::select! {
            _ = ctx.cancelled() => return Err(WeftError::Canceled),
            out = cmd.output() => out.map_err(|e| WeftError::Transport(e.to_string()))?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WeftError::Unprocessable(format!(
                "command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok((DataValue::String(stdout), DataType::String))
    }
}
