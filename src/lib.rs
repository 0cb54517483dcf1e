// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device fabric: a multi-tenant IoT control plane for battery-powered
//! motion-sensing camera devices — device enrollment and credential
//! lifecycle (Broker Authority, Device Registry), the MQTT message plane
//! (Message Fabric), and the alert/escalation pipeline (Session & Alert
//! Core, Escalation Engine).

pub mod app;
pub mod broker_authority;
pub mod config;
pub mod db;
pub mod error;
pub mod escalation;
pub mod liveness;
pub mod mqtt;
pub mod outbound_client;
pub mod registry;
pub mod session;
pub mod time;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::app::FabricApp;
use crate::config::AppConfig;
use crate::transport::build_router;

/// Runs the device fabric control plane until shutdown.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let app = Arc::new(FabricApp::build(config, shutdown.clone()).await?);

    tracing::info!("device fabric listening on {addr}");
    let router = build_router(Arc::clone(&app));
    let listener = TcpListener::bind(&addr).await?;

    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown_signal.cancel();
    });

    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;
    Ok(())
}
