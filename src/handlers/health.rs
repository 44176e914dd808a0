use axum::{extract::State, http::StatusCode, response::IntoResponse, response::Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::error;
use utoipa::ToSchema;

use crate::AppState;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    Down,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct HealthInfo {
    pub status: HealthStatus,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub database: HealthStatus,
    /// Circuit state per carrier (`closed`, `open`, `halfopen`)
    pub carriers: BTreeMap<String, String>,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthInfo),
        (status = 503, description = "Database unreachable", body = HealthInfo)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match crate::db::check_connection(&state.db).await {
        Ok(()) => HealthStatus::Up,
        Err(err) => {
            error!(error = %err, "database health check failed");
            HealthStatus::Down
        }
    };

    let info = HealthInfo {
        status: database,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        database,
        carriers: state.services.carriers.circuit_states(),
    };
    let code = match info.status {
        HealthStatus::Up => StatusCode::OK,
        HealthStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(info))
}
