//! GitHub webhook verification and payload decoding

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::error::VerifyError;

type HmacSha256 = Hmac<Sha256>;

pub const EVENT_HEADER: &str = "x-github-event";
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const DELIVERY_HEADER: &str = "x-github-delivery";

/// Event kinds a trigger can listen for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GithubEvent {
    Ping,
    Push,
}

impl GithubEvent {
    fn from_header(value: &str) -> Option<Self> {
        match value {
            "ping" => Some(GithubEvent::Ping),
            "push" => Some(GithubEvent::Push),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub name: String,
    pub full_name: Option<String>,
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitAuthor {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeadCommit {
    pub id: Option<String>,
    pub message: Option<String>,
    pub author: Option<CommitAuthor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pusher {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingPayload {
    pub zen: Option<String>,
    pub hook_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushPayload {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub after: Option<String>,
    pub repository: Repository,
    pub head_commit: Option<HeadCommit>,
    pub pusher: Option<Pusher>,
}

impl PushPayload {
    /// Branch name with the `refs/heads/` prefix stripped
    pub fn branch(&self) -> &str {
        self.git_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.git_ref)
    }
}

/// A verified and decoded webhook delivery
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    Ping(PingPayload),
    Push(Box<PushPayload>),
}

/// Per-trigger verifier: checks the shared secret and decodes the events the
/// trigger listens for. Ping deliveries are always recognized.
#[derive(Clone)]
pub struct EventVerifier {
    secret: String,
    events: Vec<GithubEvent>,
}

impl std::fmt::Debug for EventVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventVerifier")
            .field("secret", &"<redacted>")
            .field("events", &self.events)
            .finish()
    }
}

impl EventVerifier {
    pub fn new(secret: impl Into<String>, events: &[GithubEvent]) -> Self {
        Self {
            secret: secret.into(),
            events: events.to_vec(),
        }
    }

    /// Verify and classify one delivery. Calling this repeatedly with the same
    /// headers and body always yields the same classification.
    pub fn parse(&self, headers: &HeaderMap, body: &[u8]) -> Result<WebhookEvent, VerifyError> {
        let event_name = headers
            .get(EVENT_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(VerifyError::MissingEventHeader)?;

        let event = match GithubEvent::from_header(event_name) {
            Some(GithubEvent::Ping) => GithubEvent::Ping,
            Some(evt) if self.events.contains(&evt) => evt,
            _ => return Err(VerifyError::EventNotFound(event_name.to_string())),
        };

        if body.is_empty() {
            return Err(VerifyError::EmptyPayload);
        }

        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(VerifyError::MissingSignature)?;
        verify_github_signature(&self.secret, body, signature)?;

        match event {
            GithubEvent::Ping => Ok(WebhookEvent::Ping(serde_json::from_slice(body)?)),
            GithubEvent::Push => Ok(WebhookEvent::Push(Box::new(serde_json::from_slice(body)?))),
        }
    }
}

/// Checks a `sha256=<hex>` signature header against the HMAC of the payload
pub fn verify_github_signature(
    secret: &str,
    payload: &[u8],
    signature_header: &str,
) -> Result<(), VerifyError> {
    let git_signature = signature_header
        .strip_prefix("sha256=")
        .ok_or(VerifyError::InvalidSignatureFormat)?;
    let git_signature_bytes =
        hex::decode(git_signature).map_err(|_| VerifyError::InvalidSignatureFormat)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| VerifyError::SignatureMismatch)?;
    mac.update(payload);
    // Constant-time comparison
    mac.verify_slice(&git_signature_bytes)
        .map_err(|_| VerifyError::SignatureMismatch)
}

/// Data extracted from a push payload; exported to deploy commands as
/// environment variables
#[derive(Debug, Clone, Default)]
pub struct WebhookData {
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub commit_author: Option<String>,
    pub pusher_name: Option<String>,
    pub repository_url: Option<String>,
}

impl WebhookData {
    pub fn from_push(payload: &PushPayload) -> Self {
        let head = payload.head_commit.as_ref();
        Self {
            repository: Some(
                payload
                    .repository
                    .full_name
                    .clone()
                    .unwrap_or_else(|| payload.repository.name.clone()),
            ),
            branch: Some(payload.branch().to_string()),
            commit_sha: payload
                .after
                .clone()
                .or_else(|| head.and_then(|c| c.id.clone())),
            commit_message: head.and_then(|c| c.message.clone()),
            commit_author: head
                .and_then(|c| c.author.as_ref())
                .and_then(|a| a.name.clone()),
            pusher_name: payload.pusher.as_ref().and_then(|p| p.name.clone()),
            repository_url: payload.repository.html_url.clone(),
        }
    }

    /// Environment variable pairs for the deploy command; unset values are skipped
    pub fn env_vars(&self) -> Vec<(&'static str, &str)> {
        [
            ("WEBHOOK_REPOSITORY", &self.repository),
            ("WEBHOOK_BRANCH", &self.branch),
            ("WEBHOOK_COMMIT_SHA", &self.commit_sha),
            ("WEBHOOK_COMMIT_MESSAGE", &self.commit_message),
            ("WEBHOOK_COMMIT_AUTHOR", &self.commit_author),
            ("WEBHOOK_PUSHER", &self.pusher_name),
            ("WEBHOOK_REPOSITORY_URL", &self.repository_url),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_deref().map(|v| (key, v)))
        .collect()
    }
}
