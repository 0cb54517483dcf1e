// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP clients for the two outbound collaborators this crate treats as
//! black boxes: the ML classification service (a blocking RPC) and the
//! push/SMS/email transports (fire-and-forget, may fail independently).

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const CLASSIFICATION_TIMEOUT: Duration = Duration::from_secs(30);
const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
struct ClassificationRequest<'a> {
    image_base64: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassificationResult {
    pub label: String,
    pub confidence: f64,
    #[serde(default)]
    pub predictions: Value,
    pub model_version: String,
    pub inference_ms: i64,
}

/// Blocking RPC client for the motion-classification service.
pub struct ClassificationClient {
    url: String,
    client: Client,
}

impl ClassificationClient {
    pub fn new(url: String) -> Self {
        let client = Client::builder()
            .timeout(CLASSIFICATION_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { url, client }
    }

    pub async fn classify(&self, image_base64: &str) -> anyhow::Result<ClassificationResult> {
        let resp = self
            .client
            .post(&self.url)
            .json(&ClassificationRequest { image_base64 })
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Normal,
    High,
    Critical,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Urgency::Normal => "normal",
            Urgency::High => "high",
            Urgency::Critical => "critical",
        }
    }
}

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    user_id: &'a str,
    message: &'a str,
    urgency: &'a str,
    override_dnd: bool,
}

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    address: &'a str,
    message: &'a str,
}

/// Fire-and-forget push/SMS/email transport. Each `send_*` call is
/// independent — a failure on one channel never aborts the others.
pub struct NotificationClient {
    push_url: Option<String>,
    sms_url: Option<String>,
    email_url: Option<String>,
    client: Client,
}

impl NotificationClient {
    pub fn new(push_url: Option<String>, sms_url: Option<String>, email_url: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(NOTIFICATION_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { push_url, sms_url, email_url, client }
    }

    pub async fn send_push(
        &self,
        user_id: &str,
        message: &str,
        urgency: Urgency,
        override_dnd: bool,
    ) -> anyhow::Result<()> {
        let Some(url) = &self.push_url else {
            anyhow::bail!("no push transport configured");
        };
        let body = PushRequest { user_id, message, urgency: urgency.as_str(), override_dnd };
        self.client.post(url).json(&body).send().await?.error_for_status()?;
        Ok(())
    }

    pub async fn send_sms(&self, address: &str, message: &str) -> anyhow::Result<()> {
        let Some(url) = &self.sms_url else {
            anyhow::bail!("no SMS transport configured");
        };
        let body = MessageRequest { address, message };
        self.client.post(url).json(&body).send().await?.error_for_status()?;
        Ok(())
    }

    pub async fn send_email(&self, address: &str, message: &str) -> anyhow::Result<()> {
        let Some(url) = &self.email_url else {
            anyhow::bail!("no email transport configured");
        };
        let body = MessageRequest { address, message };
        self.client.post(url).json(&body).send().await?.error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urgency_strings_match_wire_contract() {
        assert_eq!(Urgency::Normal.as_str(), "normal");
        assert_eq!(Urgency::High.as_str(), "high");
        assert_eq!(Urgency::Critical.as_str(), "critical");
    }
}
