//! fleet-api — REST API for the relay fleet.
//!
//! Provides axum route handlers for reading servers and their health,
//! editing health-check settings, and reading or advancing access-key
//! validity.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/servers` | List servers |
//! | GET | `/api/v1/health` | Health status of every monitored server |
//! | GET | `/api/v1/servers/{id}/health` | Health status of one server |
//! | GET | `/api/v1/health-checks/{id}` | Health-check settings |
//! | PUT | `/api/v1/health-checks/{id}` | Update settings and reschedule |
//! | GET | `/api/v1/access-keys/{id}/validity` | Current validity state |
//! | POST | `/api/v1/access-keys/{id}/usage` | Record first use of a key |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use fleet_health::HealthMonitor;
use fleet_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub monitor: HealthMonitor,
}

/// Build the complete API router.
pub fn build_router(store: StateStore, monitor: HealthMonitor) -> Router {
    let api_state = ApiState { store, monitor };

    let api_routes = Router::new()
        .route("/servers", get(handlers::list_servers))
        .route("/servers/{id}/health", get(handlers::get_server_health))
        .route("/health", get(handlers::list_health))
        .route(
            "/health-checks/{id}",
            get(handlers::get_health_check).put(handlers::update_health_check),
        )
        .route("/access-keys/{id}/validity", get(handlers::get_validity))
        .route("/access-keys/{id}/usage", post(handlers::record_usage))
        .with_state(api_state);

    Router::new().nest("/api/v1", api_routes)
}
