// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device-side signaling: the buzzer/LED pattern table published on every
//! escalation level advance or repeat.

use serde_json::{json, Value};

pub fn signal_payload(level: i32) -> Value {
    let (buzzer, led) = match level {
        1 => ("off", "solid_red"),
        2 => ("single_beep", "slow_blink"),
        3 => ("triple_beep", "fast_blink"),
        4 => ("continuous_short", "rapid_blink"),
        _ => ("continuous", "rapid_flash"),
    };
    json!({"level": level, "buzzer": buzzer, "led": led})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_five_and_above_use_the_max_pattern() {
        assert_eq!(signal_payload(5)["buzzer"], "continuous");
        assert_eq!(signal_payload(9)["buzzer"], "continuous");
    }

    #[test]
    fn level_one_is_silent() {
        assert_eq!(signal_payload(1)["buzzer"], "off");
        assert_eq!(signal_payload(1)["led"], "solid_red");
    }
}
