//! Static dashboard page and liveness probe.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use hemabridge_core::store::Store;
use serde_json::{Value, json};

use crate::state::AppState;

const DASHBOARD_HTML: &str = include_str!("dashboard.html");

/// Serves the single-page dashboard. The page talks to the REST API with
/// the bearer token it receives from `/login`.
pub async fn index() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

/// Reports liveness and whether the database answers.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.db(Store::ping).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "database": "ok",
                "version": env!("CARGO_PKG_VERSION"),
            })),
        ),
        Err(error) => {
            tracing::error!(error = %error, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "database": "unavailable" })),
            )
        },
    }
}
