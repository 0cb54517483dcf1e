// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timestamp normalization for device-reported clocks.
//!
//! Devices report either Unix seconds or Unix milliseconds; there is no
//! envelope field distinguishing the two. The magnitude test below is the
//! canonical disambiguation: any value under 10^10 is seconds (that
//! threshold is year 2286 in seconds, but only 1973 in milliseconds, so the
//! ranges the fleet will ever emit don't collide).

use chrono::{DateTime, TimeZone, Utc};

const SECONDS_MS_BOUNDARY: i64 = 10_000_000_000;

/// Normalizes a device-reported timestamp (seconds or milliseconds) to a UTC instant.
pub fn normalize_device_timestamp(raw: i64) -> DateTime<Utc> {
    let millis = if raw < SECONDS_MS_BOUNDARY { raw * 1000 } else { raw };
    Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
}
