// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Topic grammar for the tenant/device namespace. Every publish/subscribe call in
//! the Message Fabric goes through these helpers — no inline format strings
//! elsewhere, so the `cmd` (not `command`) segment stays correct everywhere.

/// Subscription filters the Message Fabric registers on connect, paired with their QoS.
pub const SUBSCRIPTIONS: &[(&str, rumqttc::QoS)] = &[
    ("tenant/+/device/+/status", rumqttc::QoS::AtLeastOnce),
    ("tenant/+/device/+/ota/progress", rumqttc::QoS::AtMostOnce),
    ("tenant/+/device/+/camera/snapshot", rumqttc::QoS::AtMostOnce),
    ("tenant/+/device/+/alert", rumqttc::QoS::AtMostOnce),
    ("tenant/+/device/+/alert_cleared", rumqttc::QoS::AtMostOnce),
    ("tenant/+/device/+/rotation_ack", rumqttc::QoS::AtLeastOnce),
    ("tenant/+/device/+/motion", rumqttc::QoS::AtMostOnce),
];

pub fn status(tenant: &str, mac: &str) -> String {
    format!("tenant/{tenant}/device/{mac}/status")
}

pub fn ota_progress(tenant: &str, mac: &str) -> String {
    format!("tenant/{tenant}/device/{mac}/ota/progress")
}

pub fn camera_snapshot(tenant: &str, mac: &str) -> String {
    format!("tenant/{tenant}/device/{mac}/camera/snapshot")
}

pub fn alert(tenant: &str, mac: &str) -> String {
    format!("tenant/{tenant}/device/{mac}/alert")
}

pub fn alert_cleared(tenant: &str, mac: &str) -> String {
    format!("tenant/{tenant}/device/{mac}/alert_cleared")
}

pub fn rotation_ack(tenant: &str, mac: &str) -> String {
    format!("tenant/{tenant}/device/{mac}/rotation_ack")
}

pub fn motion(tenant: &str, mac: &str) -> String {
    format!("tenant/{tenant}/device/{mac}/motion")
}

/// Command topic. The segment is `cmd`, never `command` — see module docs.
pub fn cmd(tenant: &str, mac: &str, command: &str) -> String {
    format!("tenant/{tenant}/device/{mac}/cmd/{command}")
}

pub fn revoke(tenant: &str, mac: &str) -> String {
    format!("tenant/{tenant}/device/{mac}/revoke")
}

pub const SERVER_STATUS: &str = "server/status";

/// Parses a `tenant/{tenant}/device/{mac}/{rest...}` topic into its components.
/// Returns `None` for any topic that doesn't match the grammar (dashboard pings,
/// unrelated retained messages, etc. — callers log and drop on `None`).
pub fn parse_device_topic(topic: &str) -> Option<(String, String, String)> {
    let mut parts = topic.splitn(5, '/');
    if parts.next()? != "tenant" {
        return None;
    }
    let tenant = parts.next()?.to_string();
    if parts.next()? != "device" {
        return None;
    }
    let mac = parts.next()?.to_string();
    let rest = parts.next()?.to_string();
    Some((tenant, mac, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_topic_uses_cmd_segment() {
        assert_eq!(cmd("t1", "AA11BB22CC33", "reboot"), "tenant/t1/device/AA11BB22CC33/cmd/reboot");
        assert!(cmd("t1", "mac", "reboot").contains("/cmd/"));
        assert!(!cmd("t1", "mac", "reboot").contains("/command/"));
    }

    #[test]
    fn parses_device_topic() {
        let (tenant, mac, rest) = parse_device_topic("tenant/acme/device/AA11BB22CC33/alert").unwrap();
        assert_eq!(tenant, "acme");
        assert_eq!(mac, "AA11BB22CC33");
        assert_eq!(rest, "alert");
    }

    #[test]
    fn rejects_non_device_topics() {
        assert!(parse_device_topic("server/status").is_none());
        assert!(parse_device_topic("tenant/acme/firmware/latest").is_none());
    }
}
