// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device-facing HTTP handlers (§6). Every response shape here is a wire
//! contract a device's firmware already expects; field names and status
//! codes are not negotiable the way an internal API's would be.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::FabricApp;
use crate::registry::{normalize_mac, ClaimRequest, ClaimStatus, RevocationDenialReason};

#[derive(Debug, Deserialize)]
pub struct ClaimingModeRequest {
    pub mac: String,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClaimingModeResponse {
    pub success: bool,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
}

/// `POST /device/claiming-mode`
pub async fn claiming_mode(
    State(app): State<Arc<FabricApp>>,
    Json(req): Json<ClaimingModeRequest>,
) -> impl IntoResponse {
    let mac = normalize_mac(&req.mac);
    match app.registry.open_claiming_window(&mac, None).await {
        Ok(expires_at) => Json(ClaimingModeResponse { success: true, expires_at }).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `POST /devices/claim`
pub async fn claim(
    State(app): State<Arc<FabricApp>>,
    Json(req): Json<ClaimRequest>,
) -> impl IntoResponse {
    let broker_url = app.mqtt_broker_url();
    match app.registry.claim(&req, &broker_url).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /device/check-claim/{mac}`
pub async fn check_claim(State(app): State<Arc<FabricApp>>, Path(mac): Path<String>) -> impl IntoResponse {
    let broker_url = app.mqtt_broker_url();
    match app.registry.check_claim(&mac, &broker_url).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ClaimStatusQuery {
    pub mac: String,
}

#[derive(Debug, Serialize)]
struct ClaimStatusBody {
    claimed: bool,
    #[serde(skip_serializing_if = "Option::is_none", rename = "revokedAt")]
    revoked_at: Option<DateTime<Utc>>,
}

/// `GET /device/claim-status?mac={MAC}` — see the table in §4.C: `claimed`,
/// `not claimed`, `404` (never existed), and `410` (revoked, with `revokedAt`)
/// are four distinct outcomes, not a boolean plus an error case.
pub async fn claim_status(
    State(app): State<Arc<FabricApp>>,
    Query(q): Query<ClaimStatusQuery>,
) -> impl IntoResponse {
    match app.registry.claim_status(&q.mac).await {
        Ok(ClaimStatus::Claimed) => Json(ClaimStatusBody { claimed: true, revoked_at: None }).into_response(),
        Ok(ClaimStatus::NotClaimed) => Json(ClaimStatusBody { claimed: false, revoked_at: None }).into_response(),
        Ok(ClaimStatus::Gone { revoked_at }) => {
            (StatusCode::GONE, Json(ClaimStatusBody { claimed: false, revoked_at: Some(revoked_at) })).into_response()
        }
        Ok(ClaimStatus::NeverExisted) => {
            (StatusCode::NOT_FOUND, Json(ClaimStatusBody { claimed: false, revoked_at: None })).into_response()
        }
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyRevocationRequest {
    pub mac: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
struct VerifyRevocationResponse {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<RevocationDenialReason>,
}

/// `POST /device/verify-revocation`
pub async fn verify_revocation(
    State(app): State<Arc<FabricApp>>,
    Json(req): Json<VerifyRevocationRequest>,
) -> impl IntoResponse {
    use crate::registry::VerifyRevocationResult;

    match app.registry.verify_revocation(&req.mac, &req.token).await {
        Ok(VerifyRevocationResult::Valid) => {
            Json(VerifyRevocationResponse { valid: true, reason: None }).into_response()
        }
        Ok(VerifyRevocationResult::Invalid(reason)) => {
            Json(VerifyRevocationResponse { valid: false, reason: Some(reason) }).into_response()
        }
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct UnclaimNotifyRequest {
    pub mac: String,
    pub source: String,
}

#[derive(Debug, Serialize)]
struct UnclaimNotifyResponse {
    success: bool,
}

/// `POST /device/unclaim-notify`
pub async fn unclaim_notify(
    State(app): State<Arc<FabricApp>>,
    Json(req): Json<UnclaimNotifyRequest>,
) -> impl IntoResponse {
    match app.registry.log_unclaim_notify(&req.mac, &req.source).await {
        Ok(()) => Json(UnclaimNotifyResponse { success: true }).into_response(),
        Err(e) => e.into_response(),
    }
}
