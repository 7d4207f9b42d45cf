//! Dispatch trigger — POST /dispatch.
//!
//! Runs one dispatch cycle and answers with its summary. Meant to be hit by
//! an external timer (cron, Cloud Scheduler, a systemd timer). When
//! `gateway.trigger_token` is configured, callers must present it as a
//! bearer token.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use cronpost_core::CronpostError;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::AppState;

pub async fn dispatch_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Some(expected) = state.config.gateway.trigger_token.as_deref() {
        verify_bearer_token(&headers, expected).map_err(|e| auth_error(&e))?;
    }

    let summary = state
        .engine
        .run_dispatch_cycle(Utc::now())
        .await
        .map_err(|e| {
            let err = CronpostError::Database(e.to_string());
            warn!(error = %err, "dispatch cycle aborted");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"ok": false, "error": err.code()})),
            )
        })?;

    info!(selected = summary.selected, succeeded = summary.succeeded, "dispatch trigger served");
    Ok(Json(json!({"ok": true, "summary": summary})))
}

/// Verify a static bearer token in the `Authorization: Bearer <token>` header.
fn verify_bearer_token(headers: &HeaderMap, expected: &str) -> Result<(), String> {
    let auth_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| "missing Authorization header".to_string())?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| "Authorization header must use Bearer scheme".to_string())?;

    if token == expected {
        Ok(())
    } else {
        Err("bearer token mismatch".to_string())
    }
}

fn auth_error(reason: &str) -> (StatusCode, Json<Value>) {
    warn!(reason = %reason, "dispatch trigger authentication failed");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"ok": false, "error": "authentication failed"})),
    )
}
