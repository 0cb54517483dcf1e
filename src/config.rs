// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Which tenant user's notification preferences govern escalation timing
/// when a tenant has more than one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EscalationPolicy {
    /// Use the first user's preferences (insertion order). Matches legacy behavior.
    FirstUser,
    /// Use whichever user's preset escalates fastest.
    MostAggressive,
}

/// Configuration for the device fabric control plane.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "devicefabricd", version, about)]
pub struct AppConfig {
    /// Host to bind the device-facing HTTP surface on.
    #[arg(long, default_value = "0.0.0.0", env = "FABRIC_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8090, env = "FABRIC_PORT")]
    pub port: u16,

    /// Postgres connection string.
    #[arg(long, env = "FABRIC_DATABASE_URL")]
    pub database_url: String,

    /// MQTT broker host this process connects to as the control-plane client.
    #[arg(long, default_value = "127.0.0.1", env = "FABRIC_MQTT_HOST")]
    pub mqtt_host: String,

    /// MQTT broker port.
    #[arg(long, default_value_t = 1883, env = "FABRIC_MQTT_PORT")]
    pub mqtt_port: u16,

    /// Use TLS for the control-plane's own MQTT connection.
    #[arg(long, default_value_t = false, env = "FABRIC_MQTT_TLS")]
    pub mqtt_tls: bool,

    /// Control-plane MQTT username (distinct from any individual device's credentials).
    #[arg(long, env = "FABRIC_MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    /// Control-plane MQTT password.
    #[arg(long, env = "FABRIC_MQTT_PASSWORD")]
    pub mqtt_password: Option<String>,

    /// Base URL of the broker's abstract credential-store admin API.
    #[arg(long, env = "FABRIC_BROKER_ADMIN_URL")]
    pub broker_admin_url: Option<String>,

    /// Device heartbeat timeout in seconds. A device with no status message for this
    /// long is marked offline.
    #[arg(long, default_value_t = 900, env = "FABRIC_HEARTBEAT_TIMEOUT_SECS")]
    pub heartbeat_timeout_secs: u64,

    /// Escalation scheduler tick interval in seconds.
    #[arg(long, default_value_t = 60, env = "FABRIC_ESCALATION_TICK_SECS")]
    pub escalation_tick_secs: u64,

    /// Credential rotation ack deadline in seconds.
    #[arg(long, default_value_t = 30, env = "FABRIC_ROTATION_ACK_TIMEOUT_SECS")]
    pub rotation_ack_timeout_secs: u64,

    /// Broker Authority reconciliation loop interval in seconds.
    #[arg(long, default_value_t = 300, env = "FABRIC_RECONCILIATION_INTERVAL_SECS")]
    pub reconciliation_interval_secs: u64,

    /// Credential-write debounce window in milliseconds.
    #[arg(long, default_value_t = 2000, env = "FABRIC_CREDENTIAL_DEBOUNCE_MS")]
    pub credential_debounce_ms: u64,

    /// Motion classification service RPC base URL.
    #[arg(long, env = "FABRIC_CLASSIFICATION_URL")]
    pub classification_url: Option<String>,

    /// Push notification transport endpoint.
    #[arg(long, env = "FABRIC_PUSH_URL")]
    pub push_url: Option<String>,

    /// SMS transport endpoint.
    #[arg(long, env = "FABRIC_SMS_URL")]
    pub sms_url: Option<String>,

    /// Email transport endpoint.
    #[arg(long, env = "FABRIC_EMAIL_URL")]
    pub email_url: Option<String>,

    /// Number of workers draining the inbound device-message queue.
    #[arg(long, default_value_t = 8, env = "FABRIC_WORKER_COUNT")]
    pub worker_count: usize,

    /// Which user's preferences drive escalation timing in multi-user tenants.
    #[arg(long, value_enum, default_value_t = EscalationPolicy::FirstUser, env = "FABRIC_ESCALATION_POLICY")]
    pub escalation_policy: EscalationPolicy,

    /// Soft-deleted device purge age, in days.
    #[arg(long, default_value_t = 180, env = "FABRIC_PURGE_AFTER_DAYS")]
    pub purge_after_days: i64,
}

impl AppConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn escalation_tick_interval(&self) -> Duration {
        Duration::from_secs(self.escalation_tick_secs)
    }

    pub fn rotation_ack_timeout(&self) -> Duration {
        Duration::from_secs(self.rotation_ack_timeout_secs)
    }

    pub fn reconciliation_interval(&self) -> Duration {
        Duration::from_secs(self.reconciliation_interval_secs)
    }

    pub fn credential_debounce(&self) -> Duration {
        Duration::from_millis(self.credential_debounce_ms)
    }
}
