//! HTTP surface: webhook receiver and health check

pub mod handlers;
pub mod webhook;

use axum::{Router, extract::DefaultBodyLimit, routing};

use crate::SharedState;

pub use handlers::root;
pub use webhook::{DispatchSummary, dispatch, handle_webhook};

/// Largest delivery GitHub sends (25 MB). Bigger bodies are rejected with
/// 413 before any trigger is scanned.
pub const MAX_WEBHOOK_BODY: usize = 25 * 1024 * 1024;

/// Build the application router
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", routing::get(root))
        .route(
            "/webhooks",
            routing::post(handle_webhook).layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY)),
        )
        .with_state(state)
}
