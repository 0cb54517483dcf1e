// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The device-facing HTTP surface (§6): six routes, none of them
//! authenticated — a device presents a MAC and, where relevant, a
//! short-lived code or token, never a session credential.

pub mod http;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::app::FabricApp;

pub fn build_router(app: Arc<FabricApp>) -> Router {
    Router::new()
        .route("/device/claiming-mode", post(http::claiming_mode))
        .route("/devices/claim", post(http::claim))
        .route("/device/check-claim/{mac}", get(http::check_claim))
        .route("/device/claim-status", get(http::claim_status))
        .route("/device/verify-revocation", post(http::verify_revocation))
        .route("/device/unclaim-notify", post(http::unclaim_notify))
        .layer(CorsLayer::permissive())
        .with_state(app)
}
