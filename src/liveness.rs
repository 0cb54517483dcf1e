// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device Heartbeat Map (§3): an in-memory (tenant, MAC) → deadline table.
//! A periodic sweep — not one timer task per device — marks expired entries
//! offline, mirroring the snapshot-all/iterate/act shape used elsewhere in
//! this crate for background reconciliation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::Db;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

struct HeartbeatEntry {
    device_id: Uuid,
    deadline: Instant,
}

#[derive(Clone)]
pub struct HeartbeatMap {
    entries: Arc<Mutex<HashMap<(String, String), HeartbeatEntry>>>,
    timeout: Duration,
}

impl HeartbeatMap {
    pub fn new(timeout: Duration) -> Self {
        Self { entries: Arc::new(Mutex::new(HashMap::new())), timeout }
    }

    /// Resets the deadline for (tenant, mac) to now + timeout. Called on every
    /// `status` message. The critical section here never spans I/O.
    pub async fn touch(&self, tenant: &str, mac: &str, device_id: Uuid) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            (tenant.to_string(), mac.to_string()),
            HeartbeatEntry { device_id, deadline: Instant::now() + self.timeout },
        );
    }

    pub async fn remove(&self, tenant: &str, mac: &str) {
        self.entries.lock().await.remove(&(tenant.to_string(), mac.to_string()));
    }

    pub fn spawn_sweep_loop(self, db: Db) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                let expired: Vec<Uuid> = {
                    let mut entries = self.entries.lock().await;
                    let expired_keys: Vec<_> = entries
                        .iter()
                        .filter(|(_, v)| v.deadline <= now)
                        .map(|(k, v)| (k.clone(), v.device_id))
                        .collect();
                    let mut ids = Vec::with_capacity(expired_keys.len());
                    for (key, device_id) in expired_keys {
                        entries.remove(&key);
                        ids.push(device_id);
                    }
                    ids
                };
                for device_id in expired {
                    if let Err(e) = db.mark_offline(device_id).await {
                        tracing::warn!(%device_id, error = %e, "failed to mark device offline after heartbeat expiry");
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn touch_then_remove_clears_entry() {
        let map = HeartbeatMap::new(Duration::from_secs(900));
        let id = Uuid::new_v4();
        map.touch("t1", "AA11BB22CC33", id).await;
        map.remove("t1", "AA11BB22CC33").await;
        assert!(map.entries.lock().await.is_empty());
    }
}
