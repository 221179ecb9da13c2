//! REST API handlers.
//!
//! Records are read from `StateStore`; health snapshots come from the
//! running `HealthMonitor`. Every response uses the same JSON envelope.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use fleet_access::{ValidityView, evaluate};
use fleet_state::*;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn state_error(e: &StateError) -> Response {
    let status = match e {
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        StateError::Invalid(_) => StatusCode::BAD_REQUEST,
        _ => {
            error!(error = %e, "state store error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(&e.to_string(), status)
}

// ── Servers ────────────────────────────────────────────────────

/// GET /api/v1/servers
pub async fn list_servers(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_servers() {
        Ok(servers) => ApiResponse::ok(servers).into_response(),
        Err(e) => state_error(&e),
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /api/v1/health
pub async fn list_health(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.monitor.statuses().await)
}

/// GET /api/v1/servers/{id}/health
pub async fn get_server_health(
    State(state): State<ApiState>,
    Path(id): Path<ServerId>,
) -> impl IntoResponse {
    match state.monitor.status(id).await {
        Some(status) => ApiResponse::ok(status).into_response(),
        None => error_response("server is not monitored", StatusCode::NOT_FOUND),
    }
}

/// GET /api/v1/health-checks/{id}
pub async fn get_health_check(
    State(state): State<ApiState>,
    Path(id): Path<ServerId>,
) -> impl IntoResponse {
    match state.store.get_health_check(id) {
        Ok(Some(config)) => ApiResponse::ok(config).into_response(),
        Ok(None) => error_response("health check not found", StatusCode::NOT_FOUND),
        Err(e) => state_error(&e),
    }
}

/// PUT /api/v1/health-checks/{id}
///
/// Invalid settings are rejected with 400 and nothing is stored. Accepted
/// settings take effect on the server's monitor immediately.
pub async fn update_health_check(
    State(state): State<ApiState>,
    Path(id): Path<ServerId>,
    Json(update): Json<HealthCheckUpdate>,
) -> impl IntoResponse {
    let config = match state.store.update_health_check(id, &update) {
        Ok(config) => config,
        Err(e) => {
            warn!(server_id = id, error = %e, "health check update rejected");
            return state_error(&e);
        }
    };

    match state.store.get_server(id) {
        Ok(Some(server)) => {
            if let Err(e) = state.monitor.start_monitor(server, config.clone()).await {
                return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
        Ok(None) => warn!(server_id = id, "health check updated for unknown server"),
        Err(e) => return state_error(&e),
    }

    info!(server_id = id, "health check reconfigured");
    ApiResponse::ok(config).into_response()
}

// ── Access keys ────────────────────────────────────────────────

/// GET /api/v1/access-keys/{id}/validity
pub async fn get_validity(
    State(state): State<ApiState>,
    Path(id): Path<AccessKeyId>,
) -> impl IntoResponse {
    match state.store.get_access_key(id) {
        Ok(Some(key)) => {
            let view = ValidityView::new(&key, evaluate(&key, Utc::now()));
            ApiResponse::ok(view).into_response()
        }
        Ok(None) => error_response("access key not found", StatusCode::NOT_FOUND),
        Err(e) => state_error(&e),
    }
}

/// Result of recording key usage.
#[derive(Debug, serde::Serialize)]
pub struct UsageRecorded {
    /// Whether this call started the key's validity period.
    pub first_use: bool,
    pub usage_started_at: Option<DateTime<Utc>>,
}

/// POST /api/v1/access-keys/{id}/usage
///
/// Safe to call on every connection; only the first call writes.
pub async fn record_usage(
    State(state): State<ApiState>,
    Path(id): Path<AccessKeyId>,
) -> impl IntoResponse {
    let first_use = match state.store.mark_usage_started(id, Utc::now()) {
        Ok(written) => written,
        Err(e) => return state_error(&e),
    };
    match state.store.get_access_key(id) {
        Ok(Some(key)) => ApiResponse::ok(UsageRecorded {
            first_use,
            usage_started_at: key.usage_started_at,
        })
        .into_response(),
        Ok(None) => error_response("access key not found", StatusCode::NOT_FOUND),
        Err(e) => state_error(&e),
    }
}
