//! API route definitions.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use super::state::AppState;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/history", get(history))
        .route("/check-now", post(check_now))
}

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.engine.state();
    let uptime = (chrono::Utc::now() - snapshot.start_time).num_seconds();
    let status = if snapshot.last_error_message.is_some() { "degraded" } else { "ok" };
    Json(json!({
        "data": {
            "status": status,
            "uptimeSeconds": uptime,
            "scheduler": snapshot,
        },
        "meta": meta()
    }))
}

#[derive(Deserialize)]
struct HistoryQuery {
    /// Newest-N cap; the full window is returned when absent.
    limit: Option<usize>,
}

async fn history(State(state): State<AppState>, Query(q): Query<HistoryQuery>) -> Json<Value> {
    let mut records = state.store.read_all();
    if let Some(limit) = q.limit {
        if records.len() > limit {
            records.drain(..records.len() - limit);
        }
    }
    let total = records.len();
    Json(json!({ "data": records, "meta": { "total": total } }))
}

async fn check_now(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.engine.run_one_off_api_check().await {
        Ok(Some(outcome)) => (StatusCode::OK, Json(json!({ "data": outcome, "meta": meta() }))),
        Ok(None) => (
            StatusCode::OK,
            Json(json!({ "data": null, "meta": { "message": "no api token configured" } })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string(), "meta": meta() })),
        ),
    }
}
