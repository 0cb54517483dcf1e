// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Enrollment protocol: claim codes, claiming windows, and the stable
//! claim-status contract.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{generate_password, hash_password, normalize_mac, Registry};
use crate::error::{FabricError, FabricResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub mac_address: String,
    pub hw_version: Option<String>,
    pub fw_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub claim_code: String,
    pub device_info: DeviceInfo,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub device_id: Uuid,
    pub tenant_id: Uuid,
    pub mqtt_client_id: String,
    pub mqtt_username: String,
    pub mqtt_password: String,
    pub mqtt_broker_url: String,
    pub device_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckClaimResult {
    pub claimed: bool,
    pub data: Option<ClaimResponse>,
}

/// Outcome of `GET /device/claim-status` — every branch in §4.C's table.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimStatus {
    Claimed,
    NotClaimed,
    Gone { revoked_at: chrono::DateTime<Utc> },
    NeverExisted,
}

impl Registry {
    /// Completes enrollment. Checks, in order: the claim code is active and
    /// unexpired; the claiming window for the presenting MAC is unexpired; no
    /// active device already owns this MAC (a soft-deleted row, if any, is
    /// deleted to clear the way — "dead devices may be resurrected only by
    /// completing a fresh claim").
    pub async fn claim(
        &self,
        req: &ClaimRequest,
        mqtt_broker_url: &str,
    ) -> FabricResult<ClaimResponse> {
        let mac = normalize_mac(&req.device_info.mac_address);

        let code = self
            .db
            .find_active_claim_code(&req.claim_code)
            .await?
            .ok_or_else(|| FabricError::Validation("claim code not found or inactive".into()))?;
        if code.expires_at <= Utc::now() {
            return Err(FabricError::Validation("claim code expired".into()));
        }

        let window = self
            .db
            .find_claiming_window(&mac)
            .await?
            .ok_or_else(|| FabricError::Validation("no claiming window open for this device".into()))?;
        if window.expires_at <= Utc::now() {
            return Err(FabricError::Validation("claiming window expired".into()));
        }

        // Idempotent double-claim: an already-claimed device with this MAC and a
        // matching claim code is a no-op that returns the existing credentials
        // rather than failing or minting a second identity (invariant I1).
        if let Some(existing) = self.db.find_active_device_by_mac(&mac).await? {
            return Ok(ClaimResponse {
                device_id: existing.id,
                tenant_id: existing.tenant_id,
                mqtt_client_id: existing.mac.clone(),
                mqtt_username: existing.mac.clone(),
                mqtt_password: existing.password_plain.clone().unwrap_or_default(),
                mqtt_broker_url: mqtt_broker_url.to_string(),
                device_name: existing.name,
            });
        }

        let password = generate_password();
        let password_hash = hash_password(&password);

        let mut tx = self.db.begin().await?;
        self.db.delete_soft_deleted_by_mac(&mut tx, &mac).await?;
        let device = self
            .db
            .insert_claimed_device(
                &mut tx,
                code.tenant_id,
                &mac,
                &code.device_name,
                &password_hash,
                &password,
            )
            .await?;
        self.db.mark_claim_code_claimed(&mut tx, &code.code).await?;
        tx.commit().await.map_err(|e| FabricError::Transient(e.to_string()))?;

        self.db.delete_claiming_window(&mac).await?;
        self.broker.upsert_credential(&mac, &password).await;

        let tenant_name = tenant_topic_name(device.tenant_id);
        if let Err(e) = self.fabric.clear_retained_revoke(&tenant_name, &mac).await {
            tracing::warn!(mac, error = %e, "failed to clear retained revoke after claim");
        }

        Ok(ClaimResponse {
            device_id: device.id,
            tenant_id: device.tenant_id,
            mqtt_client_id: mac.clone(),
            mqtt_username: mac,
            mqtt_password: password,
            mqtt_broker_url: mqtt_broker_url.to_string(),
            device_name: device.name,
        })
    }

    /// Polled by the device every ~5s while its claiming window is open.
    pub async fn check_claim(&self, mac: &str, mqtt_broker_url: &str) -> FabricResult<CheckClaimResult> {
        let mac = normalize_mac(mac);
        match self.db.find_active_device_by_mac(&mac).await? {
            Some(device) => Ok(CheckClaimResult {
                claimed: true,
                data: Some(ClaimResponse {
                    device_id: device.id,
                    tenant_id: device.tenant_id,
                    mqtt_client_id: device.mac.clone(),
                    mqtt_username: device.mac.clone(),
                    mqtt_password: device.password_plain.clone().unwrap_or_default(),
                    mqtt_broker_url: mqtt_broker_url.to_string(),
                    device_name: device.name,
                }),
            }),
            None => Ok(CheckClaimResult { claimed: false, data: None }),
        }
    }

    /// The stable claim-status contract: see §4.C. `NeverExisted` must be
    /// distinguished from `NotClaimed` to avoid reporting a purged device's
    /// absence as a successful unclaimed state.
    pub async fn claim_status(&self, mac: &str) -> FabricResult<ClaimStatus> {
        let mac = normalize_mac(mac);
        match self.db.find_device_by_mac_any(&mac).await? {
            Some(device) if device.unclaimed_at.is_none() => Ok(ClaimStatus::Claimed),
            Some(device) => Ok(ClaimStatus::Gone {
                revoked_at: device.unclaimed_at.unwrap_or_else(Utc::now),
            }),
            None => match self.db.find_claiming_window(&mac).await? {
                Some(_) => Ok(ClaimStatus::NotClaimed),
                None => Ok(ClaimStatus::NeverExisted),
            },
        }
    }
}

/// Placeholder tenant-topic-name resolution. Tenant display names (not ids)
/// are not owned by this crate's data model beyond `Tenant.name`; callers
/// with the authoritative mapping should prefer `tenant_topic_name_for`.
/// Exposed for the claim handler, which only has a tenant id in hand.
fn tenant_topic_name(tenant_id: Uuid) -> String {
    tenant_id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_mac_with_separators() {
        assert_eq!(normalize_mac("aa:11:bb:22:cc:33"), "AA11BB22CC33");
        assert_eq!(normalize_mac("AA-11-BB-22-CC-33"), "AA11BB22CC33");
    }

    #[test]
    fn password_hash_is_deterministic_for_verification() {
        let h1 = hash_password("same-password");
        let h2 = hash_password("same-password");
        assert_eq!(h1, h2);
        assert_ne!(h1, hash_password("different-password"));
    }

    #[test]
    fn generated_passwords_are_unique() {
        assert_ne!(generate_password(), generate_password());
    }
}
