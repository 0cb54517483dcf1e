// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker Authority (component A): keeps the external MQTT broker's
//! credential store consistent with the device-identity table. The broker's
//! admin API is modeled abstractly as upsert/delete-by-username plus a
//! "reload now" signal, since some brokers require an explicit reload after
//! a password-file mutation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use super::refresh::with_bounded_backoff;
use crate::db::Db;
use crate::error::{FabricError, FabricResult};

const WRITE_MAX_RETRIES: u32 = 5;

/// Handle to the Broker Authority. Cloned into the Device Registry so claim,
/// rotation, migration, and revocation handlers can call it directly; the
/// actual debounced reload is serialized through a background task.
#[derive(Clone)]
pub struct BrokerAuthority {
    http: reqwest::Client,
    admin_url: Option<String>,
    reload_tx: mpsc::Sender<()>,
}

impl BrokerAuthority {
    pub fn spawn(admin_url: Option<String>, debounce: Duration) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        let (reload_tx, reload_rx) = mpsc::channel(256);

        let authority = Arc::new(Self { http, admin_url, reload_tx });
        tokio::spawn(debounce_reload_loop(Arc::clone(&authority), reload_rx, debounce));
        authority
    }

    /// Idempotent upsert of a broker credential entry, followed by a debounced
    /// reload request. Retries the write itself with bounded backoff; if every
    /// retry fails the write is logged as degraded and left for reconciliation
    /// to retry later — the caller's database transaction is not rolled back.
    pub async fn upsert_credential(&self, username: &str, password_plain: &str) {
        let Some(base) = self.admin_url.as_deref() else {
            tracing::debug!(username, "no broker admin url configured, skipping credential write");
            return;
        };
        let http = &self.http;
        let result = with_bounded_backoff(WRITE_MAX_RETRIES, || async {
            http.put(format!("{base}/credentials/{username}"))
                .json(&serde_json::json!({"password": password_plain}))
                .send()
                .await
                .and_then(|r| r.error_for_status())
        })
        .await;

        match result {
            Ok(_) => self.request_reload().await,
            Err(e) => {
                tracing::warn!(username, error = %e, "broker credential upsert degraded after retries; reconciliation will retry");
            }
        }
    }

    /// Idempotent delete of a broker credential entry, followed by a debounced reload.
    pub async fn delete_credential(&self, username: &str) {
        let Some(base) = self.admin_url.as_deref() else {
            return;
        };
        let http = &self.http;
        let result = with_bounded_backoff(WRITE_MAX_RETRIES, || async {
            http.delete(format!("{base}/credentials/{username}"))
                .send()
                .await
                .and_then(|r| r.error_for_status())
        })
        .await;

        match result {
            Ok(_) => self.request_reload().await,
            Err(e) => {
                tracing::warn!(username, error = %e, "broker credential delete degraded after retries; reconciliation will retry");
            }
        }
    }

    async fn request_reload(&self) {
        let _ = self.reload_tx.send(()).await;
    }

    /// Immediate, non-debounced reload. Used where the caller must observe the
    /// new credential before proceeding (credential rotation).
    pub async fn force_reload(&self) -> FabricResult<()> {
        let Some(base) = self.admin_url.as_deref() else {
            return Ok(());
        };
        self.http
            .post(format!("{base}/reload"))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map(|_| ())
            .map_err(|e| FabricError::Transient(e.to_string()))
    }

    async fn fetch_broker_usernames(&self) -> FabricResult<HashSet<String>> {
        let Some(base) = self.admin_url.as_deref() else {
            return Ok(HashSet::new());
        };
        let names: Vec<String> = self
            .http
            .get(format!("{base}/credentials"))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| FabricError::Transient(e.to_string()))?
            .json()
            .await
            .map_err(|e| FabricError::Transient(e.to_string()))?;
        Ok(names.into_iter().collect())
    }

    /// Reconciliation loop: every `interval`, enumerate all claimed devices,
    /// diff against the broker's credential set, upsert missing entries and
    /// delete orphans. The safety net that makes Broker Authority eventually
    /// consistent regardless of earlier degraded writes.
    pub async fn spawn_reconciliation_loop(self: Arc<Self>, db: Db, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = self.reconcile_once(&db).await {
                tracing::warn!(error = %e, "broker authority reconciliation pass failed");
            }
        }
    }

    async fn reconcile_once(&self, db: &Db) -> FabricResult<()> {
        let devices = db.all_claimed_devices().await?;
        let broker_usernames = self.fetch_broker_usernames().await?;
        let authoritative: HashSet<String> = devices.iter().map(|d| d.mac.clone()).collect();

        let mut upserted = 0u32;
        for device in &devices {
            if !broker_usernames.contains(&device.mac) {
                if let Some(plain) = &device.password_plain {
                    self.upsert_credential(&device.mac, plain).await;
                    upserted += 1;
                }
            }
        }

        let mut deleted = 0u32;
        for username in broker_usernames.difference(&authoritative) {
            self.delete_credential(username).await;
            deleted += 1;
        }

        if upserted > 0 || deleted > 0 {
            tracing::info!(upserted, deleted, "broker authority reconciliation converged drift");
        }
        Ok(())
    }
}

async fn debounce_reload_loop(
    authority: Arc<BrokerAuthority>,
    mut reload_rx: mpsc::Receiver<()>,
    debounce: Duration,
) {
    let pending = Arc::new(Mutex::new(false));
    while reload_rx.recv().await.is_some() {
        let mut flag = pending.lock().await;
        if *flag {
            // A reload is already scheduled; this signal is coalesced into it.
            continue;
        }
        *flag = true;
        drop(flag);

        let authority = Arc::clone(&authority);
        let pending = Arc::clone(&pending);
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if let Err(e) = authority.force_reload().await {
                tracing::warn!(error = %e, "debounced broker reload failed");
            }
            *pending.lock().await = false;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_and_delete_are_no_ops_without_admin_url() {
        let authority = BrokerAuthority::spawn(None, Duration::from_millis(10));
        authority.upsert_credential("AA11BB22CC33", "secret").await;
        authority.delete_credential("AA11BB22CC33").await;
        assert!(authority.force_reload().await.is_ok());
    }
}
