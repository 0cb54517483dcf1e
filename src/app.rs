// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Root application struct: wires together the five components behind a
//! single `Arc` shared with every HTTP handler and background task.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::broker_authority::BrokerAuthority;
use crate::config::AppConfig;
use crate::db::Db;
use crate::escalation::EscalationEngine;
use crate::mqtt::Fabric;
use crate::registry::Registry;
use crate::session::SessionCore;

/// Shared application state. Every field is itself cheaply cloneable
/// (`Db`, `Fabric`, `Registry` wrap a pool/client/handle), so this struct is
/// only ever held behind an `Arc` to give axum a single `State` type.
pub struct FabricApp {
    pub config: AppConfig,
    pub db: Db,
    pub registry: Registry,
    pub session: Arc<SessionCore>,
    pub escalation: Arc<EscalationEngine>,
    pub broker: Arc<BrokerAuthority>,
    pub shutdown: CancellationToken,
}

impl FabricApp {
    /// Builds every component in the order their constructors require:
    /// `EscalationEngine` before `SessionCore`, since the latter holds an
    /// `Arc<EscalationEngine>` to tear down escalation state on resolution.
    pub async fn build(config: AppConfig, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let db = Db::connect(&config.database_url).await?;
        db.migrate().await?;

        let broker = BrokerAuthority::spawn(config.broker_admin_url.clone(), config.credential_debounce());

        let (fabric, inbound_rx) = Fabric::connect(&config, shutdown.clone())?;

        let registry = Registry::new(db.clone(), Arc::clone(&broker), fabric.clone());

        let notifications = Arc::new(crate::outbound_client::NotificationClient::new(
            config.push_url.clone(),
            config.sms_url.clone(),
            config.email_url.clone(),
        ));
        let classification =
            config.classification_url.clone().map(crate::outbound_client::ClassificationClient::new);

        let escalation = Arc::new(EscalationEngine::new(
            db.clone(),
            fabric.clone(),
            Arc::clone(&notifications),
            config.escalation_policy,
        ));

        let session = Arc::new(SessionCore::new(
            db.clone(),
            fabric.clone(),
            config.heartbeat_timeout(),
            classification,
            notifications,
            Arc::clone(&escalation),
        ));

        session.clone().spawn_workers(inbound_rx, config.worker_count, shutdown.clone());
        session.spawn_heartbeat_sweep();
        Arc::clone(&escalation).spawn_ticker(config.escalation_tick_interval(), shutdown.clone());
        Arc::new(registry.clone()).spawn_purge_loop(config.purge_after_days);
        tokio::spawn(Arc::clone(&broker).spawn_reconciliation_loop(db.clone(), config.reconciliation_interval()));

        Ok(Self { config, db, registry, session, escalation, broker, shutdown })
    }

    pub fn mqtt_broker_url(&self) -> String {
        let scheme = if self.config.mqtt_tls { "mqtts" } else { "mqtt" };
        format!("{scheme}://{}:{}", self.config.mqtt_host, self.config.mqtt_port)
    }
}
