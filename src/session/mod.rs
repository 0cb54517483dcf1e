// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session & Alert Core (component D): pure in-memory plus DB-backed handlers
//! driven by events off the Message Fabric. Owns the device heartbeat map and
//! the alert lifecycle; the Escalation Engine (component E) reads the alert
//! rows this module writes but does not write them itself.

mod alert;
mod classification;
mod status;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::{Db, Severity};
use crate::error::FabricResult;
use crate::escalation::EscalationEngine;
use crate::liveness::HeartbeatMap;
use crate::mqtt::dispatch::{DeviceEventKind, InboundMessage};
use crate::mqtt::Fabric;
use crate::outbound_client::{ClassificationClient, NotificationClient};

const ALERT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast to any live dashboard channel. This crate only emits the event;
/// consuming it is an external collaborator's concern.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AlertEvent {
    pub alert_id: Uuid,
    pub device_id: Uuid,
    pub tenant_id: Uuid,
    pub severity: Severity,
}

pub struct SessionCore {
    pub(crate) db: Db,
    pub(crate) fabric: Fabric,
    pub(crate) heartbeats: HeartbeatMap,
    pub(crate) classification: Option<ClassificationClient>,
    pub(crate) notifications: Arc<NotificationClient>,
    pub(crate) escalation: Arc<EscalationEngine>,
    pub(crate) alert_events: broadcast::Sender<AlertEvent>,
}

impl SessionCore {
    pub fn new(
        db: Db,
        fabric: Fabric,
        heartbeat_timeout: Duration,
        classification: Option<ClassificationClient>,
        notifications: Arc<NotificationClient>,
        escalation: Arc<EscalationEngine>,
    ) -> Self {
        let (alert_events, _) = broadcast::channel(ALERT_EVENT_CHANNEL_CAPACITY);
        Self {
            db,
            fabric,
            heartbeats: HeartbeatMap::new(heartbeat_timeout),
            classification,
            notifications,
            escalation,
            alert_events,
        }
    }

    /// Resolves a device's open alerts and acknowledges them with the
    /// Escalation Engine so it stops advancing a now-resolved alert.
    pub async fn acknowledge_alert(&self, alert_id: Uuid, tenant: &str, mac: &str) -> FabricResult<()> {
        self.db.acknowledge_alert(alert_id).await?;
        self.escalation.stop_escalating(alert_id, tenant, mac).await
    }

    pub fn subscribe_alert_events(&self) -> broadcast::Receiver<AlertEvent> {
        self.alert_events.subscribe()
    }

    async fn dispatch(&self, msg: InboundMessage) {
        let InboundMessage { tenant, mac, kind } = msg;
        let result = match kind {
            DeviceEventKind::Status(payload) => self.handle_status(&tenant, &mac, payload).await,
            DeviceEventKind::Alert(payload) => self.handle_alert(&tenant, &mac, payload).await,
            DeviceEventKind::AlertCleared => self.handle_alert_cleared(&tenant, &mac).await,
            DeviceEventKind::Motion(payload) => self.handle_motion(&tenant, &mac, payload).await,
            // Rotation acks are already resolved inside the Message Fabric's reader
            // loop before the message reaches this queue; nothing left to do here.
            DeviceEventKind::RotationAck(_) => Ok(()),
            DeviceEventKind::OtaProgress(_) | DeviceEventKind::CameraSnapshot(_) => Ok(()),
        };
        if let Err(e) = result {
            tracing::warn!(tenant, mac, error = %e, "failed to handle inbound device message");
        }
    }

    /// Spawns `worker_count` tasks draining the shared inbound queue. A single
    /// reader task (owned by [`crate::mqtt::Fabric`]) feeds this queue; workers
    /// here only ever pull, never push.
    pub fn spawn_workers(
        self: Arc<Self>,
        inbound_rx: tokio::sync::mpsc::Receiver<InboundMessage>,
        worker_count: usize,
        shutdown: CancellationToken,
    ) {
        let rx = Arc::new(Mutex::new(inbound_rx));
        for _ in 0..worker_count.max(1) {
            let core = Arc::clone(&self);
            let rx = Arc::clone(&rx);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let next = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            _ = shutdown.cancelled() => None,
                            msg = rx.recv() => msg,
                        }
                    };
                    match next {
                        Some(msg) => core.dispatch(msg).await,
                        None => break,
                    }
                }
            });
        }
    }

    pub fn spawn_heartbeat_sweep(&self) {
        self.heartbeats.clone().spawn_sweep_loop(self.db.clone());
    }
}
