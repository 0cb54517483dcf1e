// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Notification fan-out for a single escalation tick: push to every tenant
//! user, plus SMS/email to emergency contacts once the alert reaches L4.
//! A failure on any one channel never blocks the others or the level
//! advance — each send is fire-and-forget from the caller's perspective.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::timing::notification_interval_minutes;
use crate::db::{Alert, Db, EscalationState, NotificationPreference};
use crate::error::FabricResult;
use crate::outbound_client::{NotificationClient, Urgency};

const EMERGENCY_CONTACT_LEVEL_THRESHOLD: i32 = 4;
const SMS_RATE_LIMIT_PER_HOUR: i64 = 5;
const EMAIL_RATE_LIMIT_PER_HOUR: i64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContactNotification {
    contact_id: Uuid,
    level: i32,
}

fn urgency_for_level(level: i32) -> Urgency {
    match level {
        1 | 2 => Urgency::Normal,
        3 => Urgency::High,
        _ => Urgency::Critical,
    }
}

pub async fn notify_for_level(
    db: &Db,
    notifications: &NotificationClient,
    alert: &Alert,
    new_level: i32,
    prefs: &[NotificationPreference],
    critical_override_dnd: bool,
    prev_state: Option<&EscalationState>,
) -> FabricResult<()> {
    let urgency = urgency_for_level(new_level);
    let override_dnd = new_level >= EMERGENCY_CONTACT_LEVEL_THRESHOLD && critical_override_dnd;
    let message = format!("Alert escalated to level {new_level}");

    for pref in prefs {
        let recipient = pref.user_id.to_string();
        if let Err(e) = notifications.send_push(&recipient, &message, urgency, override_dnd).await {
            tracing::warn!(user_id = %pref.user_id, error = %e, "escalation push failed");
        }
    }

    let mut already_notified: Vec<ContactNotification> = prev_state
        .map(|s| serde_json::from_value(s.contacts_notified.clone()).unwrap_or_default())
        .unwrap_or_default();
    let dnd_overridden = prev_state.map(|s| s.dnd_overridden).unwrap_or(false) || override_dnd;

    if new_level >= EMERGENCY_CONTACT_LEVEL_THRESHOLD {
        let contacts = db.emergency_contacts_for_tenant(alert.tenant_id).await?;
        for contact in contacts {
            if contact.escalation_level > new_level {
                continue;
            }
            if already_notified
                .iter()
                .any(|n| n.contact_id == contact.id && n.level == new_level)
            {
                continue;
            }

            let sent = match contact.channel.as_str() {
                "sms" => send_rate_limited(db, &contact.address, "sms", SMS_RATE_LIMIT_PER_HOUR, |msg| {
                    notifications.send_sms(&contact.address, msg)
                }, &message)
                .await,
                "email" => send_rate_limited(
                    db,
                    &contact.address,
                    "email",
                    EMAIL_RATE_LIMIT_PER_HOUR,
                    |msg| notifications.send_email(&contact.address, msg),
                    &message,
                )
                .await,
                _ => notifications
                    .send_push(&contact.address, &message, urgency, override_dnd)
                    .await
                    .map_err(|e| e.to_string()),
            };

            match sent {
                Ok(true) => {
                    already_notified.push(ContactNotification { contact_id: contact.id, level: new_level });
                    let _ = db.log_notification(alert.tenant_id, &contact.address, &contact.channel).await;
                }
                Ok(false) => {
                    tracing::debug!(contact_id = %contact.id, channel = %contact.channel, "emergency contact notification rate-limited");
                }
                Err(e) => {
                    tracing::warn!(contact_id = %contact.id, channel = %contact.channel, error = %e, "emergency contact notification failed");
                }
            }
        }
    }

    let next_notification_at = if new_level <= 1 {
        alert.triggered_at + chrono::Duration::minutes(super::timing::thresholds_for("normal", None)[0])
    } else {
        Utc::now() + chrono::Duration::minutes(notification_interval_minutes(new_level))
    };

    let state = EscalationState {
        alert_id: alert.id,
        current_level: new_level,
        last_notification_at: Some(Utc::now()),
        next_notification_at,
        notification_count: prev_state.map(|s| s.notification_count + 1).unwrap_or(1),
        contacts_notified: serde_json::to_value(&already_notified).unwrap_or(Value::Array(vec![])),
        dnd_overridden,
    };
    db.upsert_escalation_state(&state).await?;
    Ok(())
}

/// Sends via a rate-limited channel (SMS/email). Returns `Ok(false)` — not
/// an error — when the recipient is over their hourly cap.
async fn send_rate_limited<F, Fut>(
    db: &Db,
    recipient: &str,
    channel: &str,
    limit_per_hour: i64,
    send: F,
    message: &str,
) -> Result<bool, String>
where
    F: FnOnce(&str) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let since = Utc::now() - chrono::Duration::hours(1);
    let count = db
        .notification_count_since(recipient, channel, since)
        .await
        .map_err(|e| e.to_string())?;
    if count >= limit_per_hour {
        return Ok(false);
    }
    send(message).await.map_err(|e| e.to_string())?;
    Ok(true)
}
