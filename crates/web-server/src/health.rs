//! Health check endpoints.
//!
//! - `GET /v1/health`: the process is up. Always 200; the database is not
//!   touched.
//! - `GET /v1/health/detailed`: adds database connectivity and uptime. 200
//!   when the database answers the liveness probe, 503 otherwise.

use crate::AppState;
use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use chrono::{DateTime, Utc};
use database::DatabaseStatus;
use serde::{Serialize, Serializer};
use std::sync::Arc;

/// ISO 8601, UTC, whole seconds, `Z` suffix.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Body of `GET /v1/health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatusResponse {
    pub status: HealthStatus,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

/// Body of `GET /v1/health/detailed`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthDetail {
    pub status: HealthStatus,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub database: DatabaseStatus,
    pub uptime_seconds: f64,
}

pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

fn serialize_timestamp<S: Serializer>(
    timestamp: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(timestamp))
}

/// Health routes, mounted under `/v1`.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/detailed", get(health_check_detailed))
}

/// # GET /v1/health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthStatusResponse> {
    Json(HealthStatusResponse {
        status: HealthStatus::Healthy,
        timestamp: Utc::now(),
        version: state.version.clone(),
    })
}

/// # GET /v1/health/detailed
pub async fn health_check_detailed(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthDetail>) {
    let uptime_seconds = state.uptime_seconds();
    let database = state.probe.check_connectivity(None).await;

    let (status, code) = if database.is_connected() {
        (HealthStatus::Healthy, StatusCode::OK)
    } else {
        (HealthStatus::Unhealthy, StatusCode::SERVICE_UNAVAILABLE)
    };

    let detail = HealthDetail {
        status,
        timestamp: Utc::now(),
        version: state.version.clone(),
        database,
        uptime_seconds,
    };

    (code, Json(detail))
}
