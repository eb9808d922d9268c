pub mod api;
pub mod error;
pub mod job;
pub mod logging;
pub mod notify;
pub mod trigger;
pub mod webhook;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Result, WebhookError};
use crate::notify::Notifier;
use crate::trigger::TriggerSet;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";
pub const DEFAULT_DEPLOY_TIMEOUT_SECS: u64 = 30 * 60;
pub const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_LOG_FILES: usize = 5;

const DEFAULT_CONFIG: &str = r#"# git_deploy_hook configuration

# Debug messages are displayed. This makes the console more verbose.
debug = true

# Address the webhook listener binds to (BIND_ADDRESS overrides it)
bind_address = "0.0.0.0:3000"

# Directory for rolling log files; console only when unset
# log_dir = "logs"

# Send command output with successful deploy notifications
include_success_output = false

# Kill deploy commands running longer than this; 0 disables the limit
deploy_timeout_secs = 1800

# Each trigger deploys on push events signed with its webhook secret.
# [[trigger]]
# name = "website"
# webhook_secret = "change-me"
# notify_webhook = "https://discord.com/api/webhooks/..."
# working_dir = "/srv/website"
# command = "make"
# args = ["deploy"]
# branches = ["main"]
"#;

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    #[serde(default)]
    pub debug: bool,
    pub bind_address: Option<String>,
    pub log_dir: Option<PathBuf>,
    pub max_log_files: Option<usize>,
    #[serde(default)]
    pub include_success_output: bool,
    pub deploy_timeout_secs: Option<u64>,
    pub notify_timeout_secs: Option<u64>,
    #[serde(default)]
    pub trigger: Vec<TriggerConfig>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TriggerConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub webhook_secret: String,
    #[serde(default)]
    pub notify_webhook: String,
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub branches: Vec<String>,
    pub include_output: Option<bool>,
    pub timeout_secs: Option<u64>,
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

impl WebhookConfig {
    pub fn bind_address(&self) -> &str {
        self.bind_address.as_deref().unwrap_or(DEFAULT_BIND_ADDRESS)
    }

    /// Deploy settings shared by every job
    pub fn deploy_settings(&self) -> DeploySettings {
        let timeout = match self
            .deploy_timeout_secs
            .unwrap_or(DEFAULT_DEPLOY_TIMEOUT_SECS)
        {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        DeploySettings {
            include_success_output: self.include_success_output,
            timeout,
        }
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(
            self.notify_timeout_secs
                .unwrap_or(DEFAULT_NOTIFY_TIMEOUT_SECS),
        )
    }
}

/// Global deploy behaviour; triggers may override each field
#[derive(Debug, Clone, Copy, Default)]
pub struct DeploySettings {
    pub include_success_output: bool,
    pub timeout: Option<Duration>,
}

/// Load and parse the configuration file
pub fn load_config(path: &Path) -> Result<WebhookConfig> {
    if path.is_dir() {
        return Err(WebhookError::ConfigError(format!(
            "'{}' is a directory, should be a file",
            path.display()
        )));
    }

    let config_str = fs::read_to_string(path).map_err(|e| {
        WebhookError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let config: WebhookConfig = toml::from_str(&config_str)?;
    Ok(config)
}

/// Write a commented starter configuration to `path`
pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, DEFAULT_CONFIG)?;
    Ok(())
}

pub struct AppState {
    pub triggers: TriggerSet,
    pub notifier: Notifier,
    pub settings: DeploySettings,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(triggers: TriggerSet, notifier: Notifier, settings: DeploySettings) -> Self {
        Self {
            triggers,
            notifier,
            settings,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("webhook.toml");
        write_default_config(&path).unwrap();

        let config = load_config(&path).unwrap();
        assert!(config.debug);
        assert!(config.trigger.is_empty());
        assert_eq!(config.bind_address(), DEFAULT_BIND_ADDRESS);
        assert_eq!(
            config.deploy_settings().timeout,
            Some(Duration::from_secs(DEFAULT_DEPLOY_TIMEOUT_SECS))
        );
    }

    #[test]
    fn parses_triggers() {
        let config: WebhookConfig = toml::from_str(
            r#"
deploy_timeout_secs = 0

[[trigger]]
name = "api"
webhook_secret = "s3cret"
notify_webhook = "https://chat.example.com/hook"
working_dir = "/srv/api"
command = "make"
args = ["deploy"]
branches = ["main"]
timeout_secs = 60
"#,
        )
        .unwrap();

        assert_eq!(config.deploy_settings().timeout, None);
        let trigger = &config.trigger[0];
        assert_eq!(trigger.name, "api");
        assert_eq!(trigger.args, vec!["deploy"]);
        assert_eq!(trigger.working_dir, PathBuf::from("/srv/api"));
        assert_eq!(trigger.timeout_secs, Some(60));
    }

    #[test]
    fn directory_is_not_a_config() {
        let dir = tempdir().unwrap();
        match load_config(dir.path()) {
            Err(WebhookError::ConfigError(msg)) => assert!(msg.contains("is a directory")),
            other => panic!("expected ConfigError, got {:?}", other),
        }
    }

    #[test]
    fn bad_toml_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("webhook.toml");
        fs::write(&path, "debug = [").unwrap();
        assert!(matches!(
            load_config(&path),
            Err(WebhookError::TomlParseError(_))
        ));
    }
}
