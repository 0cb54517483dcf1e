// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Message Fabric: a single long-lived connection to the MQTT broker,
//! a reader task draining the event loop into typed inbound messages, and
//! a pending-rotation map resolved by a dedicated ack-watching path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use serde_json::json;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::dispatch::{parse_inbound, InboundMessage};
use super::topics;
use crate::config::AppConfig;
use crate::error::{FabricError, FabricResult};

const KEEPALIVE_SECS: u64 = 30;
const RECONNECT_DELAY_CAP: Duration = Duration::from_secs(60);
const INBOUND_QUEUE_CAPACITY: usize = 4096;

/// Outcome of a credential rotation command awaiting device acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationOutcome {
    Acked,
    TimedOut,
}

struct PendingRotation {
    mac: String,
    resolver: oneshot::Sender<RotationOutcome>,
}

/// Handle to the Message Fabric, cloned into every task that needs to publish
/// or register a pending rotation. The actual broker connection is owned by
/// the reader task spawned from [`Fabric::connect`].
#[derive(Clone)]
pub struct Fabric {
    client: AsyncClient,
    pending_rotations: Arc<Mutex<HashMap<String, PendingRotation>>>,
    rotation_ack_timeout: Duration,
}

impl Fabric {
    /// Connects to the broker and spawns the reader task. Returns the handle
    /// plus the channel inbound device messages are delivered on. Fails only
    /// if `mqtt_tls` is set and the platform's native root store can't be
    /// loaded.
    pub fn connect(
        config: &AppConfig,
        shutdown: CancellationToken,
    ) -> FabricResult<(Self, mpsc::Receiver<InboundMessage>)> {
        let mut options = MqttOptions::new(
            format!("fabric-{}", Uuid::new_v4()),
            &config.mqtt_host,
            config.mqtt_port,
        );
        options.set_keep_alive(Duration::from_secs(KEEPALIVE_SECS));
        if let (Some(user), Some(pass)) = (&config.mqtt_username, &config.mqtt_password) {
            options.set_credentials(user.clone(), pass.clone());
        }
        if config.mqtt_tls {
            options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(Arc::new(
                native_roots_tls_config()?,
            ))));
        }
        options.set_last_will(rumqttc::LastWill::new(
            topics::SERVER_STATUS,
            json!({"online": false}).to_string(),
            QoS::AtLeastOnce,
            true,
        ));

        let (client, event_loop) = AsyncClient::new(options, INBOUND_QUEUE_CAPACITY);
        let pending_rotations: Arc<Mutex<HashMap<String, PendingRotation>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);

        let fabric = Self {
            client: client.clone(),
            pending_rotations: Arc::clone(&pending_rotations),
            rotation_ack_timeout: config.rotation_ack_timeout(),
        };

        tokio::spawn(reader_loop(client, event_loop, pending_rotations, inbound_tx, shutdown));

        Ok((fabric, inbound_rx))
    }

    /// Publishes `server/status = {online:true}`, retained, and subscribes to the
    /// fixed device-topic wildcard set. Called once after the first successful
    /// connect event arrives (see `reader_loop`).
    async fn on_connected(client: &AsyncClient) -> FabricResult<()> {
        client
            .publish(topics::SERVER_STATUS, QoS::AtLeastOnce, true, json!({"online": true}).to_string())
            .await
            .map_err(|e| FabricError::Transient(e.to_string()))?;
        for (filter, qos) in topics::SUBSCRIPTIONS {
            client
                .subscribe(*filter, *qos)
                .await
                .map_err(|e| FabricError::Transient(e.to_string()))?;
        }
        Ok(())
    }

    /// Publishes a device command. QoS 1, retain=false per the wire protocol.
    pub async fn publish_command(
        &self,
        tenant: &str,
        mac: &str,
        command: &str,
        payload: serde_json::Value,
    ) -> FabricResult<()> {
        self.client
            .publish(topics::cmd(tenant, mac, command), QoS::AtLeastOnce, false, payload.to_string())
            .await
            .map_err(|e| FabricError::Transient(e.to_string()))
    }

    /// Publishes the revocation message carrying the one-shot token. Non-retained
    /// per the spec's resolved open question (`GET /device/claim-status` is the
    /// belt-and-suspenders channel for offline devices).
    pub async fn publish_revoke(&self, tenant: &str, mac: &str, token: &str) -> FabricResult<()> {
        self.client
            .publish(topics::revoke(tenant, mac), QoS::AtLeastOnce, false, json!({"token": token}).to_string())
            .await
            .map_err(|e| FabricError::Transient(e.to_string()))
    }

    /// Publishes a null retained message to the device's revoke topic, clearing
    /// any stale retained instruction left over from a previous identity.
    pub async fn clear_retained_revoke(&self, tenant: &str, mac: &str) -> FabricResult<()> {
        self.client
            .publish(topics::revoke(tenant, mac), QoS::AtLeastOnce, true, Vec::<u8>::new())
            .await
            .map_err(|e| FabricError::Transient(e.to_string()))
    }

    /// Publishes a `rotate_credentials` command with a fresh rotation-id and
    /// waits up to the configured ack deadline for a matching `rotation_ack`.
    /// Invariant I4 (at most one outstanding rotation per device) is the
    /// caller's responsibility — the Device Registry serializes rotations per
    /// device via its own transaction, so only one `await_rotation_ack` call is
    /// ever in flight for a given device at a time.
    pub async fn rotate_credentials(
        &self,
        tenant: &str,
        mac: &str,
        new_password: &str,
    ) -> FabricResult<RotationOutcome> {
        let rotation_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending_rotations.lock().await;
            pending.insert(
                rotation_id.clone(),
                PendingRotation { mac: mac.to_string(), resolver: tx },
            );
        }

        let payload = json!({"password": new_password, "rotation_id": rotation_id});
        if let Err(e) = self.publish_command(tenant, mac, "rotate_credentials", payload).await {
            self.pending_rotations.lock().await.remove(&rotation_id);
            return Err(e);
        }

        match tokio::time::timeout(self.rotation_ack_timeout, rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Ok(RotationOutcome::TimedOut),
            Err(_) => {
                self.pending_rotations.lock().await.remove(&rotation_id);
                Ok(RotationOutcome::TimedOut)
            }
        }
    }
}

/// Builds a `rustls::ClientConfig` trusting the platform's native root
/// certificate store, for the control plane's own (server-to-broker) MQTT
/// connection when `mqtt_tls` is set.
fn native_roots_tls_config() -> FabricResult<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
        let _ = roots.add(cert);
    }
    Ok(rustls::ClientConfig::builder().with_root_certificates(roots).with_no_client_auth())
}

async fn reader_loop(
    client: AsyncClient,
    mut event_loop: rumqttc::EventLoop,
    pending_rotations: Arc<Mutex<HashMap<String, PendingRotation>>>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    shutdown: CancellationToken,
) {
    let mut backoff = Duration::from_secs(1);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = client
                    .publish(topics::SERVER_STATUS, QoS::AtLeastOnce, true, json!({"online": false}).to_string())
                    .await;
                let _ = client.disconnect().await;
                break;
            }
            notification = event_loop.poll() => {
                match notification {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        backoff = Duration::from_secs(1);
                        if let Err(e) = Fabric::on_connected(&client).await {
                            tracing::warn!(error = %e, "failed to complete post-connect setup");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        handle_publish(&publish, &pending_rotations, &inbound_tx).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, backoff_secs = backoff.as_secs(), "mqtt connection error, reconnecting");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(RECONNECT_DELAY_CAP);
                    }
                }
            }
        }
    }
}

async fn handle_publish(
    publish: &rumqttc::Publish,
    pending_rotations: &Arc<Mutex<HashMap<String, PendingRotation>>>,
    inbound_tx: &mpsc::Sender<InboundMessage>,
) {
    let Some((tenant, mac, rest)) = topics::parse_device_topic(&publish.topic) else {
        return;
    };

    if rest == "rotation_ack" {
        if let Ok(ack) = serde_json::from_slice::<super::dispatch::RotationAckPayload>(&publish.payload) {
            let mut pending = pending_rotations.lock().await;
            if let Some(entry) = pending.remove(&ack.rotation_id) {
                if entry.mac == mac {
                    let _ = entry.resolver.send(RotationOutcome::Acked);
                } else {
                    // rotation-id matched but MAC didn't: put it back, this ack wasn't for this claim.
                    pending.insert(ack.rotation_id, entry);
                }
            }
        }
    }

    match parse_inbound(&tenant, &mac, &rest, &publish.payload) {
        Some(msg) => {
            if inbound_tx.send(msg).await.is_err() {
                tracing::warn!("inbound channel closed, dropping message");
            }
        }
        None => {
            tracing::debug!(tenant, mac, rest, "dropped unparseable or unrecognized inbound message");
        }
    }
}
