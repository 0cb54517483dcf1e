// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token-verified revocation. The server never unclaims a device as a
//! consequence of the MQTT channel alone (invariant I6): only an admin
//! action (this module's `revoke`) or a verified device call
//! (`verify_revocation`) can flip `unclaimed_at`, and the latter never writes
//! to `unclaimed_at` at all — it was already set by `revoke`, before the
//! token even reaches the device.

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::{generate_revocation_token, normalize_mac, Registry, REVOCATION_TOKEN_EXPIRY_MINUTES};
use crate::error::{FabricError, FabricResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationDenialReason {
    InvalidToken,
    TokenExpired,
    DeviceMismatch,
    MissingParams,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerifyRevocationResult {
    Valid,
    Invalid(RevocationDenialReason),
}

impl Registry {
    /// Admin-initiated revocation: soft-deletes the device and hands it a
    /// single-use token to verify the instruction for itself.
    pub async fn revoke(&self, device_id: Uuid) -> FabricResult<()> {
        let device = self
            .db
            .find_device_by_id(device_id)
            .await?
            .ok_or_else(|| FabricError::NotFound("device not found".into()))?;
        if device.unclaimed_at.is_some() {
            // Already revoked: idempotent no-op, not an error.
            return Ok(());
        }

        let token = generate_revocation_token();
        let expires_at = Utc::now() + chrono::Duration::minutes(REVOCATION_TOKEN_EXPIRY_MINUTES);

        let mut tx = self.db.begin().await?;
        self.db
            .insert_revocation_token(&mut tx, &token, device.id, &device.mac, expires_at)
            .await?;
        self.db.soft_delete_device(&mut tx, device.id).await?;
        tx.commit().await.map_err(|e| FabricError::Transient(e.to_string()))?;

        let tenant = device.tenant_id.to_string();
        self.fabric.publish_revoke(&tenant, &device.mac, &token).await?;
        self.broker.delete_credential(&device.mac).await;
        Ok(())
    }

    /// Verifies a device's presented revocation token. On any failure the
    /// device MUST remain claimed — the `Invalid` branch never mutates
    /// `unclaimed_at` (it was already set, by `revoke`, independent of this
    /// call succeeding or failing).
    pub async fn verify_revocation(&self, mac: &str, token: &str) -> FabricResult<VerifyRevocationResult> {
        if mac.is_empty() || token.is_empty() {
            return Ok(VerifyRevocationResult::Invalid(RevocationDenialReason::MissingParams));
        }
        let mac = normalize_mac(mac);

        let Some(row) = self.db.find_revocation_token(token).await? else {
            return Ok(VerifyRevocationResult::Invalid(RevocationDenialReason::InvalidToken));
        };
        if row.mac != mac {
            return Ok(VerifyRevocationResult::Invalid(RevocationDenialReason::DeviceMismatch));
        }
        if row.expires_at <= Utc::now() {
            return Ok(VerifyRevocationResult::Invalid(RevocationDenialReason::TokenExpired));
        }
        if row.consumed {
            return Ok(VerifyRevocationResult::Invalid(RevocationDenialReason::InvalidToken));
        }

        // Atomic consume: guards against a racing second verify call seeing
        // `consumed = false` between this check and the flip (invariant I3).
        if !self.db.consume_revocation_token(token).await? {
            return Ok(VerifyRevocationResult::Invalid(RevocationDenialReason::InvalidToken));
        }

        Ok(VerifyRevocationResult::Valid)
    }

    pub async fn log_unclaim_notify(&self, mac: &str, source: &str) -> FabricResult<()> {
        self.db.log_claim_audit(&normalize_mac(mac), source).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_reasons_serialize_snake_case() {
        let json = serde_json::to_string(&RevocationDenialReason::TokenExpired).unwrap();
        assert_eq!(json, "\"token_expired\"");
    }
}
