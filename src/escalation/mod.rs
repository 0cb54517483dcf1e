// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Escalation Engine (component E): a periodic scheduler that advances
//! unresolved alerts through escalation levels, emitting notifications and
//! device-side signaling, independent of the Session & Alert Core that
//! created the alert in the first place.

mod notify;
mod signal;
mod timing;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EscalationPolicy;
use crate::db::{Alert, Db, NotificationPreference};
use crate::error::FabricResult;
use crate::mqtt::Fabric;
use crate::outbound_client::NotificationClient;

const BATCH_LIMIT: i64 = 100;

pub struct EscalationEngine {
    db: Db,
    fabric: Fabric,
    notifications: Arc<NotificationClient>,
    policy: EscalationPolicy,
}

impl EscalationEngine {
    pub fn new(db: Db, fabric: Fabric, notifications: Arc<NotificationClient>, policy: EscalationPolicy) -> Self {
        Self { db, fabric, notifications, policy }
    }

    pub fn spawn_ticker(self: Arc<Self>, tick_interval: Duration, shutdown: CancellationToken) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = self.tick().await {
                    tracing::warn!(error = %e, "escalation tick failed");
                }
            }
        });
    }

    pub async fn tick(&self) -> FabricResult<()> {
        let alerts = self.db.due_alerts_for_escalation(BATCH_LIMIT).await?;
        for alert in alerts {
            if let Err(e) = self.process_alert(&alert).await {
                tracing::warn!(alert_id = %alert.id, error = %e, "failed to process alert escalation");
            }
        }
        Ok(())
    }

    async fn process_alert(&self, alert: &Alert) -> FabricResult<()> {
        let state = self.db.find_escalation_state(alert.id).await?;
        let prefs = self.db.notification_preferences_for_tenant(alert.tenant_id).await?;
        let governing = select_governing_preference(&prefs, self.policy);

        let (preset, custom_levels, critical_override_dnd) = match governing {
            Some(p) => (p.preset.as_str(), p.custom_levels.as_ref(), p.critical_override_dnd),
            None => ("normal", None, false),
        };
        let thresholds = timing::thresholds_for(preset, custom_levels);

        let now = chrono::Utc::now();
        let elapsed_minutes = (now - alert.triggered_at).num_minutes();
        let prev_level = state.as_ref().map(|s| s.current_level).unwrap_or(0);
        let new_level = timing::compute_level(elapsed_minutes, &thresholds, prev_level.max(1));

        let tenant = alert.tenant_id.to_string();
        let device_mac = self.mac_for_device(alert.device_id).await?;

        notify::notify_for_level(
            &self.db,
            &self.notifications,
            alert,
            new_level,
            &prefs,
            critical_override_dnd,
            state.as_ref(),
        )
        .await?;

        if let Some(mac) = &device_mac {
            let signal = signal::signal_payload(new_level);
            if let Err(e) = self.fabric.publish_command(&tenant, mac, "escalation", signal).await {
                tracing::warn!(alert_id = %alert.id, error = %e, "failed to publish escalation signal");
            }
        }

        Ok(())
    }

    async fn mac_for_device(&self, device_id: Uuid) -> FabricResult<Option<String>> {
        Ok(self.db.find_device_by_id(device_id).await?.map(|d| d.mac))
    }

    /// Deletes escalation state and stops further advances. Called on both
    /// acknowledgment and resolution; a no-op device signal for an alert that
    /// was never escalated is still sent once, which the device tolerates.
    pub async fn stop_escalating(&self, alert_id: Uuid, tenant: &str, mac: &str) -> FabricResult<()> {
        self.stop_escalating_many(&[alert_id], tenant, mac).await
    }

    pub async fn stop_escalating_many(&self, alert_ids: &[Uuid], tenant: &str, mac: &str) -> FabricResult<()> {
        if alert_ids.is_empty() {
            return Ok(());
        }
        for id in alert_ids {
            self.db.delete_escalation_state(*id).await?;
        }
        self.fabric
            .publish_command(tenant, mac, "alert_clear", serde_json::json!({}))
            .await?;
        Ok(())
    }
}

fn select_governing_preference(
    prefs: &[NotificationPreference],
    policy: EscalationPolicy,
) -> Option<&NotificationPreference> {
    match policy {
        EscalationPolicy::FirstUser => prefs.first(),
        EscalationPolicy::MostAggressive => prefs.iter().min_by(|a, b| {
            let ta = timing::thresholds_for(&a.preset, a.custom_levels.as_ref());
            let tb = timing::thresholds_for(&b.preset, b.custom_levels.as_ref());
            ta[0].cmp(&tb[0])
        }),
    }
}

#[cfg(test)]
mod tests {
    use sqlx::PgPool;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    use super::*;
    use crate::config::AppConfig;

    fn test_config() -> AppConfig {
        AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            database_url: String::new(),
            mqtt_host: "127.0.0.1".into(),
            mqtt_port: 1,
            mqtt_tls: false,
            mqtt_username: None,
            mqtt_password: None,
            broker_admin_url: None,
            heartbeat_timeout_secs: 900,
            escalation_tick_secs: 60,
            rotation_ack_timeout_secs: 1,
            reconciliation_interval_secs: 300,
            credential_debounce_ms: 2000,
            classification_url: None,
            push_url: None,
            sms_url: None,
            email_url: None,
            worker_count: 1,
            escalation_policy: EscalationPolicy::FirstUser,
            purge_after_days: 180,
        }
    }

    async fn test_engine(pool: PgPool) -> EscalationEngine {
        let db = Db { pool };
        let config = test_config();
        let (fabric, _rx) = Fabric::connect(&config, CancellationToken::new()).expect("connect fabric");
        let notifications = Arc::new(NotificationClient::new(None, None, None));
        EscalationEngine::new(db, fabric, notifications, config.escalation_policy)
    }

    #[sqlx::test]
    async fn tick_advances_alert_through_levels_as_time_passes(pool: PgPool) {
        let tenant_id: Uuid = sqlx::query_scalar("INSERT INTO tenants (name) VALUES ('t') RETURNING id")
            .fetch_one(&pool)
            .await
            .unwrap();
        let device_id: Uuid = sqlx::query_scalar(
            "INSERT INTO devices (tenant_id, mac, name, password_hash) VALUES ($1, 'AABBCCDDEEFF', 'd', 'h') RETURNING id",
        )
        .bind(tenant_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        let alert_id: Uuid = sqlx::query_scalar(
            "INSERT INTO alerts (device_id, tenant_id, severity, status, triggered_at, sensor_data)
             VALUES ($1, $2, 'high', 'new', now() - interval '61 minutes', '{}') RETURNING id",
        )
        .bind(device_id)
        .bind(tenant_id)
        .fetch_one(&pool)
        .await
        .unwrap();

        let engine = test_engine(pool.clone()).await;

        engine.tick().await.expect("first tick");
        let (level,): (i32,) =
            sqlx::query_as("SELECT current_level FROM alert_escalation_state WHERE alert_id = $1").bind(alert_id).fetch_one(&pool).await.unwrap();
        assert_eq!(level, 2, "alert past the 60-minute threshold advances to level 2");

        // A second tick right away is a no-op: next_notification_at is still in
        // the future from the level-2 notify.
        engine.tick().await.expect("second tick");
        let (level,): (i32,) =
            sqlx::query_as("SELECT current_level FROM alert_escalation_state WHERE alert_id = $1").bind(alert_id).fetch_one(&pool).await.unwrap();
        assert_eq!(level, 2);

        // Simulate the clock reaching the 121-minute mark: backdate the trigger
        // and force this alert due again.
        sqlx::query(
            "UPDATE alerts SET triggered_at = now() - interval '121 minutes' WHERE id = $1",
        )
        .bind(alert_id)
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("UPDATE alert_escalation_state SET next_notification_at = now() - interval '1 minute' WHERE alert_id = $1")
            .bind(alert_id)
            .execute(&pool)
            .await
            .unwrap();

        engine.tick().await.expect("third tick");
        let (level,): (i32,) =
            sqlx::query_as("SELECT current_level FROM alert_escalation_state WHERE alert_id = $1").bind(alert_id).fetch_one(&pool).await.unwrap();
        assert_eq!(level, 3, "past the 120-minute threshold the alert advances to level 3");
    }
}
