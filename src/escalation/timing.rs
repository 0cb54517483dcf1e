// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timing tables: elapsed-time → escalation level, and level → notification
//! interval. Four presets; `custom` overrides individual thresholds and
//! falls back to `normal` for anything it doesn't specify.

use serde_json::Value;

const RELAXED: [i64; 4] = [120, 240, 480, 720];
const NORMAL: [i64; 4] = [60, 120, 240, 480];
const AGGRESSIVE: [i64; 4] = [30, 60, 120, 240];

/// Thresholds (minutes elapsed since trigger) for advancing to L2, L3, L4, L5.
pub fn thresholds_for(preset: &str, custom_levels: Option<&Value>) -> [i64; 4] {
    match preset {
        "relaxed" => RELAXED,
        "aggressive" => AGGRESSIVE,
        "custom" => custom_thresholds(custom_levels),
        _ => NORMAL,
    }
}

fn custom_thresholds(custom_levels: Option<&Value>) -> [i64; 4] {
    let mut thresholds = NORMAL;
    let Some(obj) = custom_levels.and_then(|v| v.as_object()) else {
        return thresholds;
    };
    for (key, idx) in [("l2", 0), ("l3", 1), ("l4", 2), ("l5", 3)] {
        if let Some(minutes) = obj.get(key).and_then(Value::as_i64) {
            thresholds[idx] = minutes;
        }
    }
    thresholds
}

/// Current escalation level given minutes elapsed since the alert triggered.
/// Never returns below the previous level — callers pass `prev_level` so a
/// transient clock skew can't walk the level backward.
pub fn compute_level(elapsed_minutes: i64, thresholds: &[i64; 4], prev_level: i32) -> i32 {
    let mut level = 1;
    for (i, threshold) in thresholds.iter().enumerate() {
        if elapsed_minutes >= *threshold {
            level = 2 + i as i32;
        } else {
            break;
        }
    }
    level.max(prev_level)
}

/// Re-notification interval, in minutes, once at `level`.
pub fn notification_interval_minutes(level: i32) -> i64 {
    match level {
        2 => 30,
        3 => 15,
        4 => 10,
        5.. => 5,
        _ => 30,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_preset_matches_documented_timeline() {
        let t = thresholds_for("normal", None);
        assert_eq!(compute_level(0, &t, 1), 1);
        assert_eq!(compute_level(61, &t, 1), 2);
        assert_eq!(compute_level(91, &t, 2), 2);
        assert_eq!(compute_level(121, &t, 2), 3);
    }

    #[test]
    fn custom_preset_overrides_only_given_levels() {
        let custom = serde_json::json!({"l2": 10});
        let t = thresholds_for("custom", Some(&custom));
        assert_eq!(t, [10, 120, 240, 480]);
    }

    #[test]
    fn level_never_regresses() {
        let t = thresholds_for("relaxed", None);
        assert_eq!(compute_level(0, &t, 3), 3);
    }

    #[test]
    fn interval_table_matches_spec() {
        assert_eq!(notification_interval_minutes(2), 30);
        assert_eq!(notification_interval_minutes(3), 15);
        assert_eq!(notification_interval_minutes(4), 10);
        assert_eq!(notification_interval_minutes(5), 5);
    }
}
