// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded exponential backoff for credential-store writes. Broker Authority
//! writes are best-effort: the database transaction that triggered a write is
//! never rolled back on failure here, so this only needs to try reasonably
//! hard before giving up and letting reconciliation pick up the slack.

use std::future::Future;
use std::time::Duration;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Retries `op` with exponential backoff (starting at 1s, capped at 30s) up to
/// `max_retries` additional attempts after the first.
pub async fn with_bounded_backoff<T, E, F, Fut>(max_retries: u32, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut backoff = Duration::from_secs(1);
    for attempt in 0..=max_retries {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt == max_retries => return Err(e),
            Err(e) => {
                tracing::debug!(attempt, err = %e, backoff_secs = backoff.as_secs(), "credential write failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
    unreachable!("loop always returns on the max_retries-th iteration")
}
