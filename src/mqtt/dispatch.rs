// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound message schemas. The Message Fabric parses every payload into one
//! of these tagged variants before handing it to Session & Alert Core;
//! unknown `rest` segments or malformed JSON are logged and dropped here,
//! never forwarded as an opaque blob.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub tenant: String,
    pub mac: String,
    pub kind: DeviceEventKind,
}

#[derive(Debug, Clone)]
pub enum DeviceEventKind {
    Status(StatusPayload),
    OtaProgress(Value),
    CameraSnapshot(Value),
    Alert(AlertPayload),
    AlertCleared,
    RotationAck(RotationAckPayload),
    Motion(MotionPayload),
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusPayload {
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub triggered: bool,
    pub fw_version: Option<String>,
    pub fs_version: Option<String>,
    pub uptime: Option<i64>,
    pub ip: Option<String>,
    pub rssi: Option<i64>,
    /// Seconds or milliseconds; normalized via `crate::time::normalize_device_timestamp`.
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertPayload {
    pub severity: Option<String>,
    #[serde(flatten)]
    pub sensor_data: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RotationAckPayload {
    pub rotation_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotionPayload {
    pub image: String,
    pub timestamp: Option<i64>,
}

/// Parses an inbound payload for the topic segment following
/// `tenant/{tenant}/device/{mac}/`. Returns `None` for unrecognized
/// segments or payloads that fail to parse (caller logs a warning and drops).
pub fn parse_inbound(tenant: &str, mac: &str, rest: &str, payload: &[u8]) -> Option<InboundMessage> {
    let kind = match rest {
        "status" => DeviceEventKind::Status(serde_json::from_slice(payload).ok()?),
        "ota/progress" => DeviceEventKind::OtaProgress(serde_json::from_slice(payload).ok()?),
        "camera/snapshot" => DeviceEventKind::CameraSnapshot(serde_json::from_slice(payload).ok()?),
        "alert" => DeviceEventKind::Alert(serde_json::from_slice(payload).ok()?),
        "alert_cleared" => DeviceEventKind::AlertCleared,
        "rotation_ack" => DeviceEventKind::RotationAck(serde_json::from_slice(payload).ok()?),
        "motion" => DeviceEventKind::Motion(serde_json::from_slice(payload).ok()?),
        _ => return None,
    };
    Some(InboundMessage { tenant: tenant.to_string(), mac: mac.to_string(), kind })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_payload() {
        let payload = br#"{"online":true,"triggered":false,"fw_version":"1.2.3"}"#;
        let msg = parse_inbound("t1", "MAC", "status", payload).unwrap();
        let DeviceEventKind::Status(s) = msg.kind else {
            unreachable!("parse_inbound(\"status\") always yields DeviceEventKind::Status");
        };
        assert!(s.online);
        assert_eq!(s.fw_version.as_deref(), Some("1.2.3"));
    }

    #[test]
    fn unknown_segment_is_dropped() {
        assert!(parse_inbound("t1", "MAC", "unknown_kind", b"{}").is_none());
    }

    #[test]
    fn malformed_json_is_dropped() {
        assert!(parse_inbound("t1", "MAC", "status", b"not json").is_none());
    }
}
