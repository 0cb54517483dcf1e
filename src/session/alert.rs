// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Alert lifecycle: creation (invariant I5, single active alert per device),
//! bidirectional resolution with the device, and the fan-out on creation.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::{AlertEvent, SessionCore};
use crate::db::{Alert, Severity};
use crate::error::FabricResult;
use crate::mqtt::dispatch::AlertPayload;
use crate::outbound_client::Urgency;

impl SessionCore {
    /// Inserts a new alert if none is active for the device (I5) and fans it
    /// out. Returns `Ok(None)` — not an error — when suppressed by I5.
    pub(super) async fn create_alert(
        &self,
        device_id: Uuid,
        tenant_id: Uuid,
        severity: Severity,
        triggered_at: DateTime<Utc>,
        sensor_data: Value,
    ) -> FabricResult<Option<Alert>> {
        if self.db.find_active_alert_for_device(device_id).await?.is_some() {
            tracing::debug!(%device_id, "alert suppressed: device already has an active alert");
            return Ok(None);
        }

        let alert = self
            .db
            .insert_alert(device_id, tenant_id, severity.clone(), triggered_at, sensor_data)
            .await?;

        self.fan_out_new_alert(&alert).await;
        Ok(Some(alert))
    }

    pub(super) async fn handle_alert(
        &self,
        tenant: &str,
        mac: &str,
        payload: AlertPayload,
    ) -> FabricResult<()> {
        let Some(device) = self.db.find_active_device_by_mac(mac).await? else {
            tracing::debug!(tenant, mac, "alert message for unknown or unclaimed device");
            return Ok(());
        };
        let severity = parse_severity(payload.severity.as_deref());
        self.create_alert(device.id, device.tenant_id, severity, Utc::now(), payload.sensor_data)
            .await?;
        Ok(())
    }

    /// Device → server ack that it has cleared its local trigger state.
    /// Idempotent: resolving zero rows is not an error.
    pub(super) async fn handle_alert_cleared(&self, tenant: &str, mac: &str) -> FabricResult<()> {
        let Some(device) = self.db.find_active_device_by_mac(mac).await? else {
            tracing::debug!(tenant, mac, "alert_cleared for unknown or unclaimed device");
            return Ok(());
        };
        let resolved = self.db.resolve_open_alerts_for_device(device.id, "device").await?;
        self.escalation.stop_escalating_many(&resolved, tenant, mac).await?;
        Ok(())
    }

    /// Server → device: an operator has resolved the alert out-of-band.
    /// Idempotent in both directions: publishing `alert_reset` to an already
    /// quiescent device is harmless.
    pub async fn resolve_alert(&self, device_id: Uuid, tenant: &str, mac: &str, resolved_by: &str) -> FabricResult<()> {
        let resolved = self.db.resolve_open_alerts_for_device(device_id, resolved_by).await?;
        self.escalation.stop_escalating_many(&resolved, tenant, mac).await?;
        self.fabric
            .publish_command(tenant, mac, "alert_reset", serde_json::json!({}))
            .await?;
        Ok(())
    }

    async fn fan_out_new_alert(&self, alert: &Alert) {
        let _ = self.alert_events.send(AlertEvent {
            alert_id: alert.id,
            device_id: alert.device_id,
            tenant_id: alert.tenant_id,
            severity: alert.severity.clone(),
        });

        match self.db.notification_preferences_for_tenant(alert.tenant_id).await {
            Ok(prefs) => {
                for pref in prefs {
                    let message = format!("New {:?} alert on a monitored device", alert.severity);
                    if let Err(e) = self
                        .notifications
                        .send_push(&pref.user_id.to_string(), &message, Urgency::Normal, false)
                        .await
                    {
                        tracing::warn!(user_id = %pref.user_id, error = %e, "push notification failed");
                    }
                }
            }
            Err(e) => tracing::warn!(tenant_id = %alert.tenant_id, error = %e, "failed to load notification preferences"),
        }

        match self.db.emergency_contacts_for_tenant(alert.tenant_id).await {
            Ok(contacts) => {
                for contact in contacts.into_iter().filter(|c| c.escalation_level <= 1) {
                    let message = "New alert on a monitored device".to_string();
                    let result = match contact.channel.as_str() {
                        "sms" => self.notifications.send_sms(&contact.address, &message).await,
                        "email" => self.notifications.send_email(&contact.address, &message).await,
                        _ => {
                            self.notifications
                                .send_push(&contact.address, &message, Urgency::Normal, false)
                                .await
                        }
                    };
                    if let Err(e) = result {
                        tracing::warn!(contact_id = %contact.id, channel = %contact.channel, error = %e, "emergency contact notification failed");
                    }
                }
            }
            Err(e) => tracing::warn!(tenant_id = %alert.tenant_id, error = %e, "failed to load emergency contacts"),
        }
    }
}

fn parse_severity(raw: Option<&str>) -> Severity {
    match raw {
        Some("low") => Severity::Low,
        Some("high") => Severity::High,
        Some("critical") => Severity::Critical,
        _ => Severity::Medium,
    }
}
