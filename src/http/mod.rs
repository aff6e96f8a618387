//! HTTP surface: lead submission and status management for affiliates,
//! the partner platform webhook, and postback configuration.

use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::domain::Lead;
use crate::state::AppState;

pub mod auth;
pub mod leads;
pub mod postbacks;
pub mod webhooks;


pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/health",
            get(|| async { Json(serde_json::json!({"status": "healthy", "service": "leadgate"})) }),
        )
        .route("/api/v1/leads", post(leads::submit_lead))
        .route(
            "/api/v1/leads/:lead_number/status",
            put(leads::update_lead_status),
        )
        .route("/api/v1/webhooks/orders", post(webhooks::handle_order_event))
        .route(
            "/api/v1/postbacks/config",
            get(postbacks::get_config).put(postbacks::put_config),
        )
        .route("/api/v1/postbacks/test", post(postbacks::test_postback))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Success body: `{"success": true, "data": ...}`.
#[derive(Serialize)]
pub(crate) struct Envelope<T: Serialize> {
    pub success: bool,
    pub data: T,
}

pub(crate) fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
    })
}

/// Postbacks run after the response; their outcome lands in the
/// notification log, not in this request.
pub(crate) fn spawn_postback(state: &AppState, lead: Lead) {
    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move { dispatcher.dispatch(&lead).await });
}
