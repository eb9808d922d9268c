//! Trigger definitions, built once from configuration

use reqwest::Url;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use crate::error::{Result, WebhookError};
use crate::webhook::{EventVerifier, GithubEvent};
use crate::{DeploySettings, TriggerConfig, WebhookConfig};

/// Binding between a webhook secret, a deploy command and a notification endpoint
#[derive(Debug)]
pub struct TriggerDefinition {
    pub name: String,
    pub notify_endpoint: String,
    pub working_directory: PathBuf,
    pub command: String,
    pub arguments: Vec<String>,
    pub branches: Vec<String>,
    pub include_output: Option<bool>,
    pub timeout: Option<Duration>,
    pub verifier: EventVerifier,
}

impl TriggerDefinition {
    fn from_config(cfg: &TriggerConfig) -> std::result::Result<Self, Vec<String>> {
        let label = if cfg.name.trim().is_empty() {
            "<unnamed>"
        } else {
            cfg.name.as_str()
        };
        let mut problems = Vec::new();

        if cfg.name.trim().is_empty() {
            problems.push(format!("{}: name not set", label));
        }
        if cfg.webhook_secret.is_empty() {
            problems.push(format!("{}: webhook secret not set", label));
        }
        if cfg.notify_webhook.is_empty() {
            problems.push(format!("{}: notify webhook not set", label));
        } else {
            match Url::parse(&cfg.notify_webhook) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => problems.push(format!(
                    "{}: notify webhook must be http or https, got '{}'",
                    label,
                    url.scheme()
                )),
                Err(e) => problems.push(format!("{}: invalid notify webhook: {}", label, e)),
            }
        }
        if cfg.command.trim().is_empty() {
            problems.push(format!("{}: command not set", label));
        }

        if !problems.is_empty() {
            return Err(problems);
        }

        Ok(Self {
            name: cfg.name.clone(),
            notify_endpoint: cfg.notify_webhook.clone(),
            working_directory: cfg.working_dir.clone(),
            command: cfg.command.clone(),
            arguments: cfg.args.clone(),
            branches: cfg.branches.clone(),
            include_output: cfg.include_output,
            timeout: cfg.timeout_secs.map(Duration::from_secs),
            verifier: EventVerifier::new(cfg.webhook_secret.clone(), &[GithubEvent::Push]),
        })
    }

    /// True if a push to `branch` should deploy this trigger
    pub fn accepts_branch(&self, branch: &str) -> bool {
        self.branches.is_empty() || self.branches.iter().any(|b| b == branch)
    }

    pub fn include_output(&self, settings: &DeploySettings) -> bool {
        self.include_output
            .unwrap_or(settings.include_success_output)
    }

    /// Per-trigger timeout wins; a zero override disables the limit
    pub fn timeout(&self, settings: &DeploySettings) -> Option<Duration> {
        match self.timeout {
            Some(t) if t.is_zero() => None,
            Some(t) => Some(t),
            None => settings.timeout,
        }
    }
}

/// Ordered, read-only collection of active triggers
#[derive(Debug, Clone)]
pub struct TriggerSet {
    triggers: Arc<[Arc<TriggerDefinition>]>,
}

impl TriggerSet {
    /// Build the set from configuration. Any invalid trigger fails the whole
    /// set; every problem found is logged and returned.
    pub fn from_config(config: &WebhookConfig) -> Result<Self> {
        let mut triggers = Vec::with_capacity(config.trigger.len());
        let mut problems = Vec::new();

        for cfg in &config.trigger {
            match TriggerDefinition::from_config(cfg) {
                Ok(def) => triggers.push(Arc::new(def)),
                Err(errs) => {
                    for e in &errs {
                        error!("{}", e);
                    }
                    problems.extend(errs);
                }
            }
        }

        if !problems.is_empty() {
            return Err(WebhookError::InvalidTriggers(problems));
        }

        Ok(Self {
            triggers: triggers.into(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TriggerDefinition>> {
        self.triggers.iter()
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }
}
