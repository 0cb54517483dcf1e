// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistence layer. All multi-row invariants (I1, I5) are enforced by a
//! single transaction with the current state as an `UPDATE ... WHERE`
//! predicate, never by read-then-write from the application layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use crate::error::{FabricError, FabricResult};

#[derive(Debug, Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, sqlx::Type, Serialize, Deserialize, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, sqlx::Type, Serialize, Deserialize, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum AlertStatus {
    New,
    Acknowledged,
    Resolved,
}

#[derive(Debug, Clone, sqlx::Type, Serialize, Deserialize, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum ClaimCodeStatus {
    Active,
    Claimed,
    Expired,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Device {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub mac: String,
    pub name: String,
    pub fw_version: Option<String>,
    pub fs_version: Option<String>,
    pub uptime: Option<i64>,
    pub ip: Option<String>,
    pub rssi: Option<i64>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub online: bool,
    pub unclaimed_at: Option<DateTime<Utc>>,
    pub password_hash: String,
    pub password_plain: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClaimingWindow {
    pub mac: String,
    pub tenant_hint: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClaimCode {
    pub code: String,
    pub tenant_id: Uuid,
    pub device_name: String,
    pub expires_at: DateTime<Utc>,
    pub status: ClaimCodeStatus,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Alert {
    pub id: Uuid,
    pub device_id: Uuid,
    pub tenant_id: Uuid,
    pub severity: Severity,
    pub status: AlertStatus,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub sensor_data: Value,
    pub classification: Option<Value>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EscalationState {
    pub alert_id: Uuid,
    pub current_level: i32,
    pub last_notification_at: Option<DateTime<Utc>>,
    pub next_notification_at: DateTime<Utc>,
    pub notification_count: i32,
    pub contacts_notified: Value,
    pub dnd_overridden: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NotificationPreference {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub preset: String,
    pub custom_levels: Option<Value>,
    pub critical_override_dnd: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmergencyContact {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub channel: String,
    pub address: String,
    pub escalation_level: i32,
    pub enabled: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RevocationTokenRow {
    pub token: String,
    pub device_id: Uuid,
    pub mac: String,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}

impl Db {
    // --- Claiming windows -------------------------------------------------

    pub async fn upsert_claiming_window(
        &self,
        mac: &str,
        tenant_hint: Option<Uuid>,
        expires_at: DateTime<Utc>,
    ) -> FabricResult<()> {
        sqlx::query(
            "INSERT INTO device_claiming_queue (mac, tenant_hint, expires_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (mac) DO UPDATE SET tenant_hint = $2, expires_at = $3",
        )
        .bind(mac)
        .bind(tenant_hint)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_claiming_window(&self, mac: &str) -> FabricResult<Option<ClaimingWindow>> {
        let row = sqlx::query_as::<_, ClaimingWindow>(
            "SELECT mac, tenant_hint, expires_at FROM device_claiming_queue WHERE mac = $1",
        )
        .bind(mac)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn delete_claiming_window(&self, mac: &str) -> FabricResult<()> {
        sqlx::query("DELETE FROM device_claiming_queue WHERE mac = $1")
            .bind(mac)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- Claim codes --------------------------------------------------------

    pub async fn find_active_claim_code(&self, code: &str) -> FabricResult<Option<ClaimCode>> {
        let row = sqlx::query_as::<_, ClaimCode>(
            "SELECT code, tenant_id, device_name, expires_at, status FROM claim_codes
             WHERE code = $1 AND status = 'active'",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn mark_claim_code_claimed(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        code: &str,
    ) -> FabricResult<()> {
        sqlx::query("UPDATE claim_codes SET status = 'claimed' WHERE code = $1")
            .bind(code)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    // --- Devices -------------------------------------------------------------

    pub async fn find_active_device_by_mac(&self, mac: &str) -> FabricResult<Option<Device>> {
        let row = sqlx::query_as::<_, Device>(
            "SELECT id, tenant_id, mac, name, fw_version, fs_version, uptime, ip, rssi, last_seen_at, online,
                    unclaimed_at, password_hash, password_plain
             FROM devices WHERE mac = $1 AND unclaimed_at IS NULL",
        )
        .bind(mac)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn find_device_by_mac_any(&self, mac: &str) -> FabricResult<Option<Device>> {
        let row = sqlx::query_as::<_, Device>(
            "SELECT id, tenant_id, mac, name, fw_version, fs_version, uptime, ip, rssi, last_seen_at, online,
                    unclaimed_at, password_hash, password_plain
             FROM devices WHERE mac = $1 ORDER BY last_seen_at DESC NULLS LAST LIMIT 1",
        )
        .bind(mac)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn find_device_by_id(&self, id: Uuid) -> FabricResult<Option<Device>> {
        let row = sqlx::query_as::<_, Device>(
            "SELECT id, tenant_id, mac, name, fw_version, fs_version, uptime, ip, rssi, last_seen_at, online,
                    unclaimed_at, password_hash, password_plain
             FROM devices WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Deletes a soft-deleted row for `mac`, if present. Used by claim completion
    /// to clear the way for a fresh claim to take over a previously-revoked MAC.
    pub async fn delete_soft_deleted_by_mac(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        mac: &str,
    ) -> FabricResult<()> {
        sqlx::query("DELETE FROM devices WHERE mac = $1 AND unclaimed_at IS NOT NULL")
            .bind(mac)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_claimed_device(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        tenant_id: Uuid,
        mac: &str,
        name: &str,
        password_hash: &str,
        password_plain: &str,
    ) -> FabricResult<Device> {
        let row = sqlx::query_as::<_, Device>(
            "INSERT INTO devices (id, tenant_id, mac, name, online, unclaimed_at,
                                   password_hash, password_plain)
             VALUES (gen_random_uuid(), $1, $2, $3, false, NULL, $4, $5)
             RETURNING id, tenant_id, mac, name, fw_version, fs_version, uptime, ip, rssi, last_seen_at, online,
                       unclaimed_at, password_hash, password_plain",
        )
        .bind(tenant_id)
        .bind(mac)
        .bind(name)
        .bind(password_hash)
        .bind(password_plain)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row)
    }

    pub async fn update_device_credentials(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        device_id: Uuid,
        password_hash: &str,
        password_plain: &str,
    ) -> FabricResult<()> {
        sqlx::query(
            "UPDATE devices SET password_hash = $2, password_plain = $3 WHERE id = $1",
        )
        .bind(device_id)
        .bind(password_hash)
        .bind(password_plain)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn update_device_tenant(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        device_id: Uuid,
        new_tenant_id: Uuid,
    ) -> FabricResult<()> {
        sqlx::query("UPDATE devices SET tenant_id = $2 WHERE id = $1")
            .bind(device_id)
            .bind(new_tenant_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn soft_delete_device(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        device_id: Uuid,
    ) -> FabricResult<()> {
        sqlx::query("UPDATE devices SET unclaimed_at = now() WHERE id = $1 AND unclaimed_at IS NULL")
            .bind(device_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn purge_soft_deleted_older_than(&self, days: i64) -> FabricResult<u64> {
        let result = sqlx::query(
            "DELETE FROM devices WHERE unclaimed_at IS NOT NULL AND unclaimed_at < now() - ($1 || ' days')::interval",
        )
        .bind(days.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn update_heartbeat(
        &self,
        device_id: Uuid,
        online: bool,
        fw_version: Option<&str>,
        fs_version: Option<&str>,
        uptime: Option<i64>,
        ip: Option<&str>,
        rssi: Option<i64>,
    ) -> FabricResult<()> {
        sqlx::query(
            "UPDATE devices SET online = $2, last_seen_at = now(),
                    fw_version = COALESCE($3, fw_version),
                    fs_version = COALESCE($4, fs_version),
                    uptime = COALESCE($5, uptime),
                    ip = COALESCE($6, ip),
                    rssi = COALESCE($7, rssi)
             WHERE id = $1",
        )
        .bind(device_id)
        .bind(online)
        .bind(fw_version)
        .bind(fs_version)
        .bind(uptime)
        .bind(ip)
        .bind(rssi)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_offline(&self, device_id: Uuid) -> FabricResult<()> {
        sqlx::query("UPDATE devices SET online = false WHERE id = $1")
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn all_claimed_devices(&self) -> FabricResult<Vec<Device>> {
        let rows = sqlx::query_as::<_, Device>(
            "SELECT id, tenant_id, mac, name, fw_version, fs_version, uptime, ip, rssi, last_seen_at, online,
                    unclaimed_at, password_hash, password_plain
             FROM devices WHERE unclaimed_at IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // --- Revocation tokens -----------------------------------------------------

    pub async fn insert_revocation_token(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        token: &str,
        device_id: Uuid,
        mac: &str,
        expires_at: DateTime<Utc>,
    ) -> FabricResult<()> {
        sqlx::query(
            "INSERT INTO revocation_tokens (token, device_id, mac, expires_at, consumed)
             VALUES ($1, $2, $3, $4, false)",
        )
        .bind(token)
        .bind(device_id)
        .bind(mac)
        .bind(expires_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn find_revocation_token(
        &self,
        token: &str,
    ) -> FabricResult<Option<RevocationTokenRow>> {
        let row = sqlx::query_as::<_, RevocationTokenRow>(
            "SELECT token, device_id, mac, expires_at, consumed FROM revocation_tokens WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Atomically consumes a token: returns `true` iff this call was the one that
    /// flipped `consumed` from false to true (guards invariant I3 against races).
    pub async fn consume_revocation_token(&self, token: &str) -> FabricResult<bool> {
        let result = sqlx::query(
            "UPDATE revocation_tokens SET consumed = true WHERE token = $1 AND consumed = false",
        )
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    // --- Alerts ------------------------------------------------------------

    pub async fn find_active_alert_for_device(
        &self,
        device_id: Uuid,
    ) -> FabricResult<Option<Alert>> {
        let row = sqlx::query_as::<_, Alert>(
            "SELECT id, device_id, tenant_id, severity, status, triggered_at, resolved_at,
                    resolved_by, sensor_data, classification
             FROM alerts WHERE device_id = $1 AND status IN ('new','acknowledged')",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_alert(
        &self,
        device_id: Uuid,
        tenant_id: Uuid,
        severity: Severity,
        triggered_at: DateTime<Utc>,
        sensor_data: Value,
    ) -> FabricResult<Alert> {
        let row = sqlx::query_as::<_, Alert>(
            "INSERT INTO alerts (id, device_id, tenant_id, severity, status, triggered_at,
                                  sensor_data)
             VALUES (gen_random_uuid(), $1, $2, $3, 'new', $4, $5)
             RETURNING id, device_id, tenant_id, severity, status, triggered_at, resolved_at,
                       resolved_by, sensor_data, classification",
        )
        .bind(device_id)
        .bind(tenant_id)
        .bind(severity)
        .bind(triggered_at)
        .bind(sensor_data)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Resolves any still-open alert for `device_id`, returning the ids of the
    /// rows it affected so callers can also tear down escalation state.
    /// Idempotent: returns an empty vec if nothing was open.
    pub async fn resolve_open_alerts_for_device(
        &self,
        device_id: Uuid,
        resolved_by: &str,
    ) -> FabricResult<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "UPDATE alerts SET status = 'resolved', resolved_at = now(), resolved_by = $2
             WHERE device_id = $1 AND status IN ('new','acknowledged')
             RETURNING id",
        )
        .bind(device_id)
        .bind(resolved_by)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    pub async fn acknowledge_alert(&self, alert_id: Uuid) -> FabricResult<u64> {
        let result = sqlx::query(
            "UPDATE alerts SET status = 'acknowledged' WHERE id = $1 AND status = 'new'",
        )
        .bind(alert_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn set_alert_classification(
        &self,
        alert_id: Uuid,
        classification: Value,
    ) -> FabricResult<()> {
        sqlx::query("UPDATE alerts SET classification = $2 WHERE id = $1")
            .bind(alert_id)
            .bind(classification)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_image_classification(
        &self,
        device_id: Uuid,
        tenant_id: Uuid,
        image_hash: &str,
        label: &str,
        confidence: f64,
        predictions: Value,
        model_version: &str,
        inference_ms: i64,
    ) -> FabricResult<()> {
        sqlx::query(
            "INSERT INTO image_classifications
                (id, device_id, tenant_id, image_hash, label, confidence, predictions,
                 model_version, inference_ms, created_at)
             VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7, $8, now())",
        )
        .bind(device_id)
        .bind(tenant_id)
        .bind(image_hash)
        .bind(label)
        .bind(confidence)
        .bind(predictions)
        .bind(model_version)
        .bind(inference_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- Escalation ----------------------------------------------------------

    /// Alerts due for an escalation look at this tick: new, and either no
    /// escalation state yet or the state's `next_notification_at` has elapsed.
    pub async fn due_alerts_for_escalation(&self, limit: i64) -> FabricResult<Vec<Alert>> {
        let rows = sqlx::query_as::<_, Alert>(
            "SELECT a.id, a.device_id, a.tenant_id, a.severity, a.status, a.triggered_at,
                    a.resolved_at, a.resolved_by, a.sensor_data, a.classification
             FROM alerts a
             LEFT JOIN alert_escalation_state s ON s.alert_id = a.id
             WHERE a.status = 'new' AND (s.alert_id IS NULL OR s.next_notification_at <= now())
             ORDER BY a.triggered_at ASC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn find_escalation_state(&self, alert_id: Uuid) -> FabricResult<Option<EscalationState>> {
        let row = sqlx::query_as::<_, EscalationState>(
            "SELECT alert_id, current_level, last_notification_at, next_notification_at,
                    notification_count, contacts_notified, dnd_overridden
             FROM alert_escalation_state WHERE alert_id = $1",
        )
        .bind(alert_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_escalation_state(&self, state: &EscalationState) -> FabricResult<()> {
        sqlx::query(
            "INSERT INTO alert_escalation_state
                (alert_id, current_level, last_notification_at, next_notification_at,
                 notification_count, contacts_notified, dnd_overridden)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (alert_id) DO UPDATE SET
                current_level = $2, last_notification_at = $3, next_notification_at = $4,
                notification_count = $5, contacts_notified = $6, dnd_overridden = $7",
        )
        .bind(state.alert_id)
        .bind(state.current_level)
        .bind(state.last_notification_at)
        .bind(state.next_notification_at)
        .bind(state.notification_count)
        .bind(&state.contacts_notified)
        .bind(state.dnd_overridden)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_escalation_state(&self, alert_id: Uuid) -> FabricResult<()> {
        sqlx::query("DELETE FROM alert_escalation_state WHERE alert_id = $1")
            .bind(alert_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn notification_preferences_for_tenant(
        &self,
        tenant_id: Uuid,
    ) -> FabricResult<Vec<NotificationPreference>> {
        let rows = sqlx::query_as::<_, NotificationPreference>(
            "SELECT tenant_id, user_id, preset, custom_levels, critical_override_dnd, created_at
             FROM notification_preferences WHERE tenant_id = $1 ORDER BY created_at ASC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn emergency_contacts_for_tenant(
        &self,
        tenant_id: Uuid,
    ) -> FabricResult<Vec<EmergencyContact>> {
        let rows = sqlx::query_as::<_, EmergencyContact>(
            "SELECT id, tenant_id, name, channel, address, escalation_level, enabled
             FROM emergency_contacts WHERE tenant_id = $1 AND enabled = true",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn log_notification(
        &self,
        tenant_id: Uuid,
        recipient: &str,
        channel: &str,
    ) -> FabricResult<()> {
        sqlx::query(
            "INSERT INTO notification_log (id, tenant_id, recipient, channel, sent_at)
             VALUES (gen_random_uuid(), $1, $2, $3, now())",
        )
        .bind(tenant_id)
        .bind(recipient)
        .bind(channel)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count of notifications sent to `recipient` via `channel` in the trailing window,
    /// for the per-recipient rate limiters in the escalation engine.
    pub async fn notification_count_since(
        &self,
        recipient: &str,
        channel: &str,
        since: DateTime<Utc>,
    ) -> FabricResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM notification_log
             WHERE recipient = $1 AND channel = $2 AND sent_at >= $3",
        )
        .bind(recipient)
        .bind(channel)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn log_claim_audit(&self, mac: &str, source: &str) -> FabricResult<()> {
        sqlx::query(
            "INSERT INTO device_claim_audit (id, mac, source, created_at)
             VALUES (gen_random_uuid(), $1, $2, now())",
        )
        .bind(mac)
        .bind(source)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn begin(&self) -> FabricResult<sqlx::Transaction<'_, sqlx::Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| FabricError::Transient(e.to_string()))
    }
}
