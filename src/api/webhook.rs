//! Webhook handler: matches GitHub deliveries against triggers

use axum::{
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, StatusCode},
};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::SharedState;
use crate::job::DeployJob;
use crate::webhook::{DELIVERY_HEADER, EVENT_HEADER, WebhookData, WebhookEvent};

/// What a single delivery caused across all triggers
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DispatchSummary {
    pub pings: usize,
    pub deploys: Vec<Uuid>,
    pub skipped: usize,
}

/// Handles the GitHub webhook POST request.
///
/// Always answers 200 once every trigger has been scanned; deploy results
/// are reported through each trigger's notification endpoint.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let delivery = headers
        .get(DELIVERY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    info_span!("delivery", id = %delivery).in_scope(|| {
        let summary = dispatch(&state, &headers, &body);
        info!(
            "Delivery handled: {} deploy(s) started, {} ping(s), {} trigger(s) skipped",
            summary.deploys.len(),
            summary.pings,
            summary.skipped
        );
    });
    StatusCode::OK
}

/// Scan triggers in configured order and start a deploy for every trigger
/// the delivery verifies against. Never waits for a deploy.
pub fn dispatch(state: &SharedState, headers: &HeaderMap, body: &[u8]) -> DispatchSummary {
    let mut summary = DispatchSummary::default();

    for trigger in state.triggers.iter() {
        let event = match trigger.verifier.parse(headers, body) {
            Ok(event) => event,
            Err(e) if e.is_unsupported_event() => {
                debug!(
                    "Ignoring event {} {:?}: {}",
                    trigger.name,
                    headers.get(EVENT_HEADER),
                    e
                );
                summary.skipped += 1;
                continue;
            }
            Err(e) => {
                warn!("Failed to parse hook {}: {}", trigger.name, e);
                summary.skipped += 1;
                continue;
            }
        };

        match event {
            WebhookEvent::Ping(ping) => {
                info!(
                    "Ping event received for {} (hook {:?}): {}",
                    trigger.name,
                    ping.hook_id,
                    ping.zen.as_deref().unwrap_or("")
                );
                summary.pings += 1;
            }
            WebhookEvent::Push(push) => {
                if !trigger.accepts_branch(push.branch()) {
                    info!(
                        "Ignoring push to '{}' for {}: branch not configured",
                        push.branch(),
                        trigger.name
                    );
                    summary.skipped += 1;
                    continue;
                }

                let job = DeployJob::new(trigger.clone(), WebhookData::from_push(&push));
                info!(
                    "Push to {}@{} matched {}, starting job {}",
                    push.repository.name,
                    push.branch(),
                    trigger.name,
                    job.id
                );
                summary.deploys.push(job.id);

                // Not joined: the result goes to the trigger's notify endpoint
                tokio::spawn(job.run(state.settings, state.notifier.clone()));
            }
        }
    }

    summary
}
