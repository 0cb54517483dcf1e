// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Liveness, retained-revoke hygiene, and reconnect reconciliation — all
//! three live on the same `status` message because all three are judged off
//! the same payload.

use chrono::Utc;
use serde_json::json;

use super::SessionCore;
use crate::db::Severity;
use crate::error::FabricResult;
use crate::mqtt::dispatch::StatusPayload;
use crate::time::normalize_device_timestamp;

impl SessionCore {
    pub(super) async fn handle_status(
        &self,
        tenant: &str,
        mac: &str,
        payload: StatusPayload,
    ) -> FabricResult<()> {
        let Some(device) = self.db.find_active_device_by_mac(mac).await? else {
            tracing::debug!(tenant, mac, "status message for unknown or unclaimed device");
            return Ok(());
        };

        self.db
            .update_heartbeat(
                device.id,
                payload.online,
                payload.fw_version.as_deref(),
                payload.fs_version.as_deref(),
                payload.uptime,
                payload.ip.as_deref(),
                payload.rssi,
            )
            .await?;

        if payload.online {
            self.heartbeats.touch(tenant, mac, device.id).await;
            if let Err(e) = self.fabric.clear_retained_revoke(tenant, mac).await {
                tracing::warn!(tenant, mac, error = %e, "failed to clear retained revoke on status");
            }
        }

        if payload.triggered && self.db.find_active_alert_for_device(device.id).await?.is_none() {
            let triggered_at = payload
                .timestamp
                .map(normalize_device_timestamp)
                .unwrap_or_else(Utc::now);
            let sensor_data = json!({"synced_from_device": true});
            self.create_alert(device.id, device.tenant_id, Severity::High, triggered_at, sensor_data)
                .await?;
        }

        Ok(())
    }
}
