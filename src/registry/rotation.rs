// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential rotation with positive acknowledgment (invariant I4: at most
//! one outstanding rotation per device). This call does not itself serialize
//! concurrent rotations for the same device — callers are expected not to
//! issue overlapping rotation requests for one device.

use uuid::Uuid;

use super::{generate_password, hash_password, Registry};
use crate::error::{FabricError, FabricResult};
use crate::mqtt::RotationOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationResult {
    Acked,
    TimedOutRolledBack,
}

impl Registry {
    /// Rotates a claimed device's MQTT password. Ordering keeps the device
    /// reachable regardless of outcome: the old credential remains valid at
    /// the broker until the device acks, and only on ack does the database
    /// record of the new credential get committed.
    pub async fn rotate_credentials(&self, device_id: Uuid) -> FabricResult<RotationResult> {
        let device = self
            .db
            .find_device_by_id(device_id)
            .await?
            .ok_or_else(|| FabricError::NotFound("device not found".into()))?;
        if device.unclaimed_at.is_some() {
            return Err(FabricError::Gone("device is unclaimed".into()));
        }

        let new_password = generate_password();
        let old_password = device.password_plain.clone();

        self.broker.upsert_credential(&device.mac, &new_password).await;
        self.broker.force_reload().await?;

        let tenant = device.tenant_id.to_string();
        let outcome = self.fabric.rotate_credentials(&tenant, &device.mac, &new_password).await?;

        match outcome {
            RotationOutcome::Acked => {
                let new_hash = hash_password(&new_password);
                let mut tx = self.db.begin().await?;
                self.db
                    .update_device_credentials(&mut tx, device.id, &new_hash, &new_password)
                    .await?;
                tx.commit().await.map_err(|e| FabricError::Transient(e.to_string()))?;
                Ok(RotationResult::Acked)
            }
            RotationOutcome::TimedOut => {
                if let Some(old) = old_password {
                    self.broker.upsert_credential(&device.mac, &old).await;
                    self.broker.force_reload().await?;
                } else {
                    tracing::warn!(device_id = %device.id, "rotation timed out with no prior plaintext to roll back to");
                }
                Ok(RotationResult::TimedOutRolledBack)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use sqlx::PgPool;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    use super::*;
    use crate::broker_authority::BrokerAuthority;
    use crate::config::{AppConfig, EscalationPolicy};
    use crate::db::Db;
    use crate::mqtt::Fabric;

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

    #[sqlx::test]
    async fn rotation_with_no_device_ack_times_out_and_rolls_back(pool: PgPool) {
        let tenant_id: Uuid = sqlx::query_scalar("INSERT INTO tenants (name) VALUES ('t') RETURNING id")
            .fetch_one(&pool)
            .await
            .unwrap();
        let device_id: Uuid = sqlx::query_scalar(
            "INSERT INTO devices (tenant_id, mac, name, password_hash, password_plain)
             VALUES ($1, 'AABBCCDDEEFF', 'd', $2, 'original-password') RETURNING id",
        )
        .bind(tenant_id)
        .bind(hash_password("original-password"))
        .fetch_one(&pool)
        .await
        .unwrap();

        let db = Db { pool: pool.clone() };
        let config = test_config();
        let broker = BrokerAuthority::spawn(None, config.credential_debounce());
        let (fabric, _rx) = Fabric::connect(&config, CancellationToken::new()).expect("connect fabric");
        let registry = Registry::new(db, broker, fabric);

        // Nothing is listening on the configured broker, so the device never
        // acks and the 1s timeout in test_config fires (S6).
        let result = registry.rotate_credentials(device_id).await.expect("rotate_credentials");
        assert_eq!(result, RotationResult::TimedOutRolledBack);

        let (hash,): (String,) =
            sqlx::query_as("SELECT password_hash FROM devices WHERE id = $1").bind(device_id).fetch_one(&pool).await.unwrap();
        assert_eq!(hash, hash_password("original-password"), "rollback leaves the original credential in place");
    }
}
