// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Motion classification path: a blocking RPC to the ML service, persisted
//! regardless of outcome, feeding the alert pipeline only on a confident
//! rodent match.

use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};

use super::SessionCore;
use crate::db::Severity;
use crate::error::FabricResult;
use crate::mqtt::dispatch::MotionPayload;
use crate::time::normalize_device_timestamp;

const RODENT_LABEL: &str = "rodent";
const RODENT_CONFIDENCE_THRESHOLD: f64 = 0.5;

impl SessionCore {
    pub(super) async fn handle_motion(
        &self,
        tenant: &str,
        mac: &str,
        payload: MotionPayload,
    ) -> FabricResult<()> {
        let Some(client) = &self.classification else {
            tracing::debug!(tenant, mac, "no classification service configured, dropping motion event");
            return Ok(());
        };
        let Some(device) = self.db.find_active_device_by_mac(mac).await? else {
            tracing::debug!(tenant, mac, "motion message for unknown or unclaimed device");
            return Ok(());
        };

        let result = match client.classify(&payload.image).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(tenant, mac, error = %e, "classification RPC failed");
                return Ok(());
            }
        };

        let image_hash = hex_encode(&Sha256::digest(payload.image.as_bytes()));
        self.db
            .insert_image_classification(
                device.id,
                device.tenant_id,
                &image_hash,
                &result.label,
                result.confidence,
                result.predictions.clone(),
                &result.model_version,
                result.inference_ms,
            )
            .await?;

        if result.label == RODENT_LABEL && result.confidence > RODENT_CONFIDENCE_THRESHOLD {
            let triggered_at = payload
                .timestamp
                .map(normalize_device_timestamp)
                .unwrap_or_else(Utc::now);
            let sensor_data = json!({
                "source": "motion_classification",
                "label": result.label,
                "confidence": result.confidence,
            });
            let alert = self
                .create_alert(device.id, device.tenant_id, Severity::High, triggered_at, sensor_data)
                .await?;
            if let Some(alert) = alert {
                self.db
                    .set_alert_classification(alert.id, json!({"label": result.label, "confidence": result.confidence}))
                    .await?;
            }
        }

        Ok(())
    }
}

fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
}
