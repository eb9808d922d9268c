use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

/// Fatal errors raised while bootstrapping the server
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid trigger configuration:\n{}", .0.join("\n"))]
    InvalidTriggers(Vec<String>),

    #[error("Logging setup failed: {0}")]
    LogSetup(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

/// Reasons an inbound request does not verify against a trigger
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("missing X-GitHub-Event header")]
    MissingEventHeader,

    #[error("event '{0}' is not handled by this trigger")]
    EventNotFound(String),

    #[error("missing X-Hub-Signature-256 header")]
    MissingSignature,

    #[error("signature header is not a sha256 hex digest")]
    InvalidSignatureFormat,

    #[error("HMAC verification failed")]
    SignatureMismatch,

    #[error("empty payload")]
    EmptyPayload,

    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}

impl VerifyError {
    /// True when the request simply carries an event kind the trigger ignores.
    pub fn is_unsupported_event(&self) -> bool {
        matches!(self, VerifyError::EventNotFound(_))
    }
}

/// Failure of a single deploy command run
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("working directory {} is unavailable: {source}", .path.display())]
    WorkingDirectory { path: PathBuf, source: io::Error },

    #[error("{command} failed to start: {source}")]
    Spawn { command: String, source: io::Error },

    #[error("reading command output: {0}")]
    Output(#[from] io::Error),

    #[error("{0}")]
    ExitStatus(ExitStatus),

    #[error("timed out after {} seconds", .0.as_secs())]
    TimedOut(Duration),
}

/// Failure delivering a chat notification
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("endpoint answered {0}")]
    Status(reqwest::StatusCode),
}

/// Helper type for Results that use WebhookError
pub type Result<T> = std::result::Result<T, WebhookError>;
