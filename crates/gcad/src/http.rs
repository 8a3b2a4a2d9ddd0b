//! HTTP API
//!
//! JSON endpoint handlers for onboarding (GCA key registration, equipment
//! authorization, equipment migration, peer-server gossip), queries (recent
//! reports, all-device stats, equipment list), and the rate-limited archive
//! snapshot. Handlers copy what they need under the primary lock and
//! release it before any network I/O.

use crate::archive;
use crate::gossip;
use crate::registry::{RegistryError, ServerAddOutcome};
use crate::server::Server;
use crate::state::Slot;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use gca_core::types::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// API errors with their HTTP status mapping
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed input: 400
    #[error("{0}")]
    BadRequest(String),

    /// Archive rate limit: 429
    #[error("{0}")]
    RateLimited(String),

    /// Signature, authorization-state, conflict, and internal failures: 500
    #[error("{0}")]
    Internal(String),
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(%status, "api error: {self}");
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the API router
pub fn router(server: Arc<Server>) -> Router {
    Router::new()
        .route("/api/v1/register-gca", post(register_gca))
        .route("/api/v1/authorize-equipment", post(authorize_equipment))
        .route("/api/v1/equipment-migrate", post(equipment_migrate))
        .route(
            "/api/v1/authorized-servers",
            get(list_authorized_servers).post(add_authorized_server),
        )
        .route("/api/v1/recent-reports", get(recent_reports))
        .route("/api/v1/recent-equipment-auths", get(recent_equipment_auths))
        .route("/api/v1/all-device-stats", get(all_device_stats))
        .route("/api/v1/equipment", get(equipment))
        .route("/api/v1/archive", get(archive_snapshot))
        .with_state(server)
}

// =============================================================================
// RESPONSE BODIES
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    fn success() -> Self {
        Self { status: "success" }
    }
}

/// Returned by register-gca so the GCA learns this server's identity
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterGcaResponse {
    pub public_key: PublicKey,
    pub http_port: u16,
    pub tcp_port: u16,
    pub udp_port: u16,
}

/// The device's full ring plus the server's signature over the JSON
/// serialization of `reports`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentReportsResponse {
    pub reports: Vec<Slot>,
    pub timeslot_offset: Timeslot,
    pub signature: Signature,
}

// =============================================================================
// ONBOARDING
// =============================================================================

async fn register_gca(
    State(server): State<Arc<Server>>,
    Json(registration): Json<GcaRegistration>,
) -> Result<Json<RegisterGcaResponse>, ApiError> {
    server.register_gca(&registration)?;
    let config = server.config();
    Ok(Json(RegisterGcaResponse {
        public_key: server.public_key(),
        http_port: config.http_port,
        tcp_port: config.tcp_port,
        udp_port: config.udp_port,
    }))
}

async fn authorize_equipment(
    State(server): State<Arc<Server>>,
    Json(auth): Json<EquipmentAuthorization>,
) -> Result<Json<StatusResponse>, ApiError> {
    let is_new = server.save_equipment(&auth)?;
    if is_new {
        gossip::gossip_authorization(&server, &auth);
    }
    Ok(Json(StatusResponse::success()))
}

async fn equipment_migrate(
    State(server): State<Arc<Server>>,
    Json(migration): Json<EquipmentMigration>,
) -> Result<Json<StatusResponse>, ApiError> {
    server.store_migration(&migration)?;
    Ok(Json(StatusResponse::success()))
}

async fn list_authorized_servers(
    State(server): State<Arc<Server>>,
) -> Json<Vec<AuthorizedServer>> {
    Json(server.gca_servers().clone())
}

async fn add_authorized_server(
    State(server): State<Arc<Server>>,
    Json(record): Json<AuthorizedServer>,
) -> Result<Json<StatusResponse>, ApiError> {
    if server.add_authorized_server(&record)? == ServerAddOutcome::Added {
        // tell the fleet, then bring the newcomer up to date
        gossip::gossip_server_record(&server, &record);
        gossip::push_equipment_list(&server, &record);
    }
    Ok(Json(StatusResponse::success()))
}

// =============================================================================
// QUERIES
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecentReportsQuery {
    public_key: String,
}

async fn recent_reports(
    State(server): State<Arc<Server>>,
    Query(query): Query<RecentReportsQuery>,
) -> Result<Json<RecentReportsResponse>, ApiError> {
    let key = parse_pubkey(&query.public_key)?;
    let (reports, timeslot_offset) = {
        let state = server.state();
        let short_id = state
            .short_id_for_key(&key)
            .ok_or_else(|| ApiError::BadRequest("unknown public key".to_string()))?;
        let device = state.device(short_id).ok_or_else(|| {
            ApiError::Internal("registry maps disagree on the device".to_string())
        })?;
        (device.reports.to_vec(), state.offset())
    };

    let body = serde_json::to_vec(&reports)
        .map_err(|e| ApiError::Internal(format!("serialization failed: {e}")))?;
    let signature = server
        .keypair()
        .sign(&body)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(RecentReportsResponse {
        reports,
        timeslot_offset,
        signature,
    }))
}

async fn recent_equipment_auths(
    State(server): State<Arc<Server>>,
) -> Json<Vec<EquipmentAuthorization>> {
    Json(server.state().recent_auths().to_vec())
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    timeslot_offset: Timeslot,
}

async fn all_device_stats(
    State(server): State<Arc<Server>>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<AllDeviceStats>, ApiError> {
    if query.timeslot_offset % TIMESLOTS_PER_WEEK != 0 {
        return Err(ApiError::BadRequest(format!(
            "timeslot offset {} is not a week boundary",
            query.timeslot_offset
        )));
    }

    let state = server.state();
    if query.timeslot_offset == state.offset() {
        let stats = state
            .freeze_week(server.keypair())
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        return Ok(Json(stats));
    }
    if query.timeslot_offset < state.offset() {
        let index = (query.timeslot_offset / TIMESLOTS_PER_WEEK) as usize;
        let stats = state
            .history
            .get(index)
            .ok_or_else(|| ApiError::Internal("history record missing".to_string()))?;
        return Ok(Json(stats.clone()));
    }
    Err(ApiError::BadRequest(format!(
        "timeslot offset {} is beyond the current window",
        query.timeslot_offset
    )))
}

async fn equipment(
    State(server): State<Arc<Server>>,
) -> Json<HashMap<ShortId, EquipmentAuthorization>> {
    let state = server.state();
    Json(
        state
            .devices()
            .map(|(id, device)| (*id, device.auth.clone()))
            .collect(),
    )
}

// =============================================================================
// ARCHIVE
// =============================================================================

async fn archive_snapshot(State(server): State<Arc<Server>>) -> Result<Response, ApiError> {
    if !server.archive_limiter().allow() {
        return Err(ApiError::RateLimited(
            "archive rate limit exceeded; retry after the window slides".to_string(),
        ));
    }
    let bytes =
        archive::build_archive(&server).map_err(|e| ApiError::Internal(e.to_string()))?;
    server.events().append("archive snapshot produced");
    Ok(([(header::CONTENT_TYPE, "application/zip")], bytes).into_response())
}

fn parse_pubkey(hex_str: &str) -> Result<PublicKey, ApiError> {
    let bytes = hex::decode(hex_str)
        .map_err(|_| ApiError::BadRequest("public key is not valid hex".to_string()))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| ApiError::BadRequest("public key must be 32 bytes".to_string()))?;
    Ok(PublicKey(arr))
}
