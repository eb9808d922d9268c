#![allow(dead_code)]

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use git_deploy_hook::notify::Notifier;
use git_deploy_hook::trigger::TriggerSet;
use git_deploy_hook::{AppState, SharedState, TriggerConfig, WebhookConfig};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

pub fn push_body(branch: &str) -> Vec<u8> {
    serde_json::json!({
        "ref": format!("refs/heads/{}", branch),
        "after": "0d1a26e67d8f5eaf1f6ba5c57fc3c7d91ac0fd1c",
        "repository": {
            "name": "site",
            "full_name": "acme/site",
            "html_url": "https://github.com/acme/site"
        },
        "head_commit": {
            "id": "0d1a26e67d8f5eaf1f6ba5c57fc3c7d91ac0fd1c",
            "message": "Update README",
            "author": { "name": "Sam", "email": "sam@example.com" }
        },
        "pusher": { "name": "sam" }
    })
    .to_string()
    .into_bytes()
}

pub fn ping_body() -> Vec<u8> {
    br#"{"zen":"Design for failure.","hook_id":42}"#.to_vec()
}

/// Local chat endpoint; every posted `content` is forwarded to the receiver
pub async fn chat_sink() -> (String, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let app = Router::new()
        .route(
            "/hook",
            post(
                |State(tx): State<mpsc::UnboundedSender<String>>,
                 Json(body): Json<serde_json::Value>| async move {
                    let content = body["content"].as_str().unwrap_or_default().to_string();
                    let _ = tx.send(content);
                    StatusCode::NO_CONTENT
                },
            ),
        )
        .with_state(tx);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/hook", addr), rx)
}

pub fn shell_trigger(
    name: &str,
    secret: &str,
    dir: &Path,
    script: &str,
    notify_url: &str,
) -> TriggerConfig {
    TriggerConfig {
        name: name.to_string(),
        webhook_secret: secret.to_string(),
        notify_webhook: notify_url.to_string(),
        working_dir: dir.to_path_buf(),
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        ..Default::default()
    }
}

pub fn state(triggers: Vec<TriggerConfig>) -> SharedState {
    let config = WebhookConfig {
        debug: true,
        bind_address: None,
        log_dir: None,
        max_log_files: None,
        include_success_output: false,
        deploy_timeout_secs: Some(30),
        notify_timeout_secs: Some(5),
        trigger: triggers,
    };
    let triggers = TriggerSet::from_config(&config).unwrap();
    let notifier = Notifier::new(config.notify_timeout()).unwrap();
    Arc::new(AppState::new(triggers, notifier, config.deploy_settings()))
}

/// Wait for the next notification, failing the test after a few seconds
pub async fn next_message(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("chat sink closed")
}
