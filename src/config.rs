//! Bridge configuration parsing and validation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::acp::client::ClientOptions;
use crate::acp::schema::PermissionOptionKind;
use crate::acp::spawner::SpawnConfig;
use crate::{AppError, Result};

/// How the agent process is launched.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent executable (e.g. `claude-code-acp`).
    pub command: String,
    /// Arguments for the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the agent.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Deadlines, in seconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Deadline for `session/new` and `session/load`.
    #[serde(default = "default_request_seconds")]
    pub request_seconds: u64,
    /// Deadline for the `initialize` handshake.
    #[serde(default = "default_startup_seconds")]
    pub startup_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_seconds: default_request_seconds(),
            startup_seconds: default_startup_seconds(),
        }
    }
}

fn default_request_seconds() -> u64 {
    60
}

fn default_startup_seconds() -> u64 {
    10
}

/// Terminal defaults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TerminalConfig {
    /// Trailing-output cap applied when the agent does not set one.
    #[serde(default)]
    pub output_byte_limit: Option<usize>,
}

/// Standing answer to permission requests.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionPolicy {
    /// Prompt on the terminal.
    #[default]
    Ask,
    /// Pick the first `allow_once` option.
    AllowOnce,
    /// Pick the first `allow_always` option.
    AllowAlways,
    /// Pick the first `reject_once` option.
    RejectOnce,
}

impl PermissionPolicy {
    /// Option kind chosen automatically, or `None` for [`Self::Ask`].
    #[must_use]
    pub fn preferred_kind(self) -> Option<PermissionOptionKind> {
        match self {
            Self::Ask => None,
            Self::AllowOnce => Some(PermissionOptionKind::AllowOnce),
            Self::AllowAlways => Some(PermissionOptionKind::AllowAlways),
            Self::RejectOnce => Some(PermissionOptionKind::RejectOnce),
        }
    }
}

/// Permission handling.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PermissionConfig {
    /// Standing answer.
    #[serde(default)]
    pub policy: PermissionPolicy,
}

/// Bridge configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Directory sessions and terminals run in.
    pub workspace_root: PathBuf,
    /// Agent launch settings.
    pub agent: AgentConfig,
    /// Deadlines.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Terminal defaults.
    #[serde(default)]
    pub terminal: TerminalConfig,
    /// Permission handling.
    #[serde(default)]
    pub permissions: PermissionConfig,
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the workspace root and re-validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the directory does not exist.
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Result<Self> {
        self.workspace_root = root.into();
        self.validate()?;
        Ok(self)
    }

    /// Connection tunables derived from this configuration.
    #[must_use]
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            request_timeout: Duration::from_secs(self.timeouts.request_seconds),
            initialize_timeout: Duration::from_secs(self.timeouts.startup_seconds),
            default_cwd: self.workspace_root.clone(),
            output_byte_limit: self.terminal.output_byte_limit,
            ..ClientOptions::default()
        }
    }

    /// Launch settings for the agent process.
    #[must_use]
    pub fn spawn_config(&self) -> SpawnConfig {
        SpawnConfig {
            command: self.agent.command.clone(),
            args: self.agent.args.clone(),
            env: self.agent.env.clone(),
            workspace_root: self.workspace_root.clone(),
        }
    }

    fn validate(&mut self) -> Result<()> {
        if self.agent.command.trim().is_empty() {
            return Err(AppError::Config("agent.command must not be empty".into()));
        }

        if self.timeouts.request_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.request_seconds must be greater than zero".into(),
            ));
        }

        if self.timeouts.startup_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.startup_seconds must be greater than zero".into(),
            ));
        }

        let canonical_root = self
            .workspace_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("workspace_root invalid: {err}")))?;
        self.workspace_root = canonical_root;

        Ok(())
    }
}
