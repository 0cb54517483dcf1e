// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests for the device-facing HTTP surface (§6), against a real
//! Postgres database per `#[sqlx::test]`. The MQTT fabric and broker admin
//! API are both pointed at addresses nothing is listening on: every publish
//! call here only needs to enqueue onto rumqttc's internal channel, never
//! actually reach a broker, so this is safe and fast.

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use devicefabric::app::FabricApp;
use devicefabric::broker_authority::BrokerAuthority;
use devicefabric::config::{AppConfig, EscalationPolicy};
use devicefabric::db::Db;
use devicefabric::escalation::EscalationEngine;
use devicefabric::mqtt::Fabric;
use devicefabric::outbound_client::NotificationClient;
use devicefabric::registry::Registry;
use devicefabric::session::SessionCore;
use devicefabric::transport::build_router;

fn test_config() -> AppConfig {
    AppConfig {
        host: "127.0.0.1".into(),
        port: 0,
        database_url: String::new(),
        mqtt_host: "127.0.0.1".into(),
        mqtt_port: 1,
        mqtt_tls: false,
        mqtt_username: None,
        mqtt_password: None,
        broker_admin_url: None,
        heartbeat_timeout_secs: 900,
        escalation_tick_secs: 60,
        rotation_ack_timeout_secs: 1,
        reconciliation_interval_secs: 300,
        credential_debounce_ms: 2000,
        classification_url: None,
        push_url: None,
        sms_url: None,
        email_url: None,
        worker_count: 1,
        escalation_policy: EscalationPolicy::FirstUser,
        purge_after_days: 180,
    }
}

fn test_app(pool: PgPool) -> Arc<FabricApp> {
    let config = test_config();
    let shutdown = CancellationToken::new();
    let db = Db { pool };
    let broker = BrokerAuthority::spawn(None, config.credential_debounce());
    let (fabric, _inbound_rx) = Fabric::connect(&config, shutdown.clone()).expect("connect fabric");
    let registry = Registry::new(db.clone(), Arc::clone(&broker), fabric.clone());
    let notifications = Arc::new(NotificationClient::new(None, None, None));
    let escalation =
        Arc::new(EscalationEngine::new(db.clone(), fabric.clone(), Arc::clone(&notifications), config.escalation_policy));
    let session = Arc::new(SessionCore::new(
        db.clone(),
        fabric,
        config.heartbeat_timeout(),
        None,
        notifications,
        Arc::clone(&escalation),
    ));
    Arc::new(FabricApp { config, db, registry, session, escalation, broker, shutdown })
}

fn test_server(pool: PgPool) -> TestServer {
    let router = build_router(test_app(pool));
    TestServer::new(router).expect("create test server")
}

async fn insert_tenant(pool: &PgPool, name: &str) -> Uuid {
    sqlx::query_scalar("INSERT INTO tenants (name) VALUES ($1) RETURNING id")
        .bind(name)
        .fetch_one(pool)
        .await
        .expect("insert tenant")
}

async fn insert_claim_code(pool: &PgPool, code: &str, tenant_id: Uuid, device_name: &str) {
    sqlx::query(
        "INSERT INTO claim_codes (code, tenant_id, device_name, expires_at) VALUES ($1, $2, $3, now() + interval '1 hour')",
    )
    .bind(code)
    .bind(tenant_id)
    .bind(device_name)
    .execute(pool)
    .await
    .expect("insert claim code");
}

// -- Claiming mode + full claim flow (S1) -------------------------------------

#[sqlx::test]
async fn claiming_mode_opens_a_window(pool: PgPool) {
    let server = test_server(pool);
    let resp = server.post("/device/claiming-mode").json(&serde_json::json!({"mac": "aa:11:bb:22:cc:33"})).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["success"], true);
    assert!(body["expiresAt"].is_string());
}

#[sqlx::test]
async fn claim_happy_path_returns_credentials(pool: PgPool) {
    let tenant_id = insert_tenant(&pool, "acme").await;
    insert_claim_code(&pool, "CODE5678", tenant_id, "front-porch").await;

    let server = test_server(pool.clone());
    server.post("/device/claiming-mode").json(&serde_json::json!({"mac": "AA11BB22CC33"})).await.assert_status_ok();

    let resp = server
        .post("/devices/claim")
        .json(&serde_json::json!({
            "claimCode": "CODE5678",
            "deviceInfo": {"macAddress": "AA11BB22CC33", "hwVersion": "rev2", "fwVersion": "1.2.0"},
        }))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["tenantId"], tenant_id.to_string());
    assert_eq!(body["deviceName"], "front-porch");
    assert!(body["mqttPassword"].as_str().unwrap().len() > 0);

    let row: (Uuid,) = sqlx::query_as("SELECT id FROM devices WHERE mac = 'AA11BB22CC33' AND unclaimed_at IS NULL")
        .fetch_one(&pool)
        .await
        .expect("device row exists");
    assert_eq!(row.0.to_string(), body["deviceId"].as_str().unwrap());

    let window: Option<(String,)> = sqlx::query_as("SELECT mac FROM device_claiming_queue WHERE mac = 'AA11BB22CC33'")
        .fetch_optional(&pool)
        .await
        .unwrap();
    assert!(window.is_none(), "claiming window should be deleted after a successful claim");
}

#[sqlx::test]
async fn claim_without_open_window_is_rejected(pool: PgPool) {
    let tenant_id = insert_tenant(&pool, "acme").await;
    insert_claim_code(&pool, "NOWINDOW", tenant_id, "device").await;

    let server = test_server(pool);
    let resp = server
        .post("/devices/claim")
        .json(&serde_json::json!({
            "claimCode": "NOWINDOW",
            "deviceInfo": {"macAddress": "AA11BB22CC33"},
        }))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
}

#[sqlx::test]
async fn check_claim_reports_claimed_after_claim(pool: PgPool) {
    let tenant_id = insert_tenant(&pool, "acme").await;
    insert_claim_code(&pool, "CODE1", tenant_id, "device").await;
    let server = test_server(pool);

    server.post("/device/claiming-mode").json(&serde_json::json!({"mac": "AABBCCDDEEFF"})).await.assert_status_ok();

    let before = server.get("/device/check-claim/AABBCCDDEEFF").await;
    before.assert_status_ok();
    assert_eq!(before.json::<serde_json::Value>()["claimed"], false);

    server
        .post("/devices/claim")
        .json(&serde_json::json!({"claimCode": "CODE1", "deviceInfo": {"macAddress": "AABBCCDDEEFF"}}))
        .await
        .assert_status_ok();

    let after = server.get("/device/check-claim/AABBCCDDEEFF").await;
    after.assert_status_ok();
    assert_eq!(after.json::<serde_json::Value>()["claimed"], true);
}

// -- Claim status's four-way outcome ------------------------------------------

#[sqlx::test]
async fn claim_status_never_existed_is_404(pool: PgPool) {
    let server = test_server(pool);
    let resp = server.get("/device/claim-status").add_query_param("mac", "000000000000").await;
    resp.assert_status(StatusCode::NOT_FOUND);
}

#[sqlx::test]
async fn claim_status_not_claimed_with_open_window(pool: PgPool) {
    let server = test_server(pool);
    server.post("/device/claiming-mode").json(&serde_json::json!({"mac": "112233445566"})).await.assert_status_ok();

    let resp = server.get("/device/claim-status").add_query_param("mac", "112233445566").await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<serde_json::Value>()["claimed"], false);
}

#[sqlx::test]
async fn claim_status_claimed(pool: PgPool) {
    let tenant_id = insert_tenant(&pool, "acme").await;
    insert_claim_code(&pool, "CODE2", tenant_id, "device").await;
    let server = test_server(pool);
    server.post("/device/claiming-mode").json(&serde_json::json!({"mac": "AABBCC112233"})).await.assert_status_ok();
    server
        .post("/devices/claim")
        .json(&serde_json::json!({"claimCode": "CODE2", "deviceInfo": {"macAddress": "AABBCC112233"}}))
        .await
        .assert_status_ok();

    let resp = server.get("/device/claim-status").add_query_param("mac", "AABBCC112233").await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<serde_json::Value>()["claimed"], true);
}

// -- Revocation with verification (S2, S3) ------------------------------------

async fn claim_a_device(server: &TestServer, pool: &PgPool, mac: &str, code: &str) -> Uuid {
    let tenant_id = insert_tenant(pool, "acme").await;
    insert_claim_code(pool, code, tenant_id, "device").await;
    server.post("/device/claiming-mode").json(&serde_json::json!({"mac": mac})).await.assert_status_ok();
    let resp = server
        .post("/devices/claim")
        .json(&serde_json::json!({"claimCode": code, "deviceInfo": {"macAddress": mac}}))
        .await;
    resp.assert_status_ok();
    resp.json::<serde_json::Value>()["deviceId"].as_str().unwrap().parse().unwrap()
}

#[sqlx::test]
async fn verify_revocation_valid_token_is_single_use(pool: PgPool) {
    let server = test_server(pool.clone());
    let device_id = claim_a_device(&server, &pool, "A1B2C3D4E5F6", "CODE3").await;

    let app = test_app(pool.clone());
    app.registry.revoke(device_id).await.expect("revoke device");

    let (token,): (String,) =
        sqlx::query_as("SELECT token FROM revocation_tokens WHERE device_id = $1").bind(device_id).fetch_one(&pool).await.unwrap();

    let first = server.post("/device/verify-revocation").json(&serde_json::json!({"mac": "A1B2C3D4E5F6", "token": token})).await;
    first.assert_status_ok();
    assert_eq!(first.json::<serde_json::Value>()["valid"], true);

    let second = server.post("/device/verify-revocation").json(&serde_json::json!({"mac": "A1B2C3D4E5F6", "token": token})).await;
    second.assert_status_ok();
    let body: serde_json::Value = second.json();
    assert_eq!(body["valid"], false);
    assert_eq!(body["reason"], "invalid_token");
}

#[sqlx::test]
async fn verify_revocation_tampered_token_leaves_device_claimed(pool: PgPool) {
    let server = test_server(pool.clone());
    let device_id = claim_a_device(&server, &pool, "FFEEDDCCBBAA", "CODE4").await;

    let app = test_app(pool.clone());
    app.registry.revoke(device_id).await.expect("revoke device");

    let resp = server
        .post("/device/verify-revocation")
        .json(&serde_json::json!({"mac": "FFEEDDCCBBAA", "token": "not-the-real-token"}))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["valid"], false);
    assert_eq!(body["reason"], "invalid_token");

    // Server state is authoritative regardless of the verify outcome: the
    // device was already revoked by the admin action above.
    let status = server.get("/device/claim-status").add_query_param("mac", "FFEEDDCCBBAA").await;
    status.assert_status(StatusCode::GONE);
    let status_body: serde_json::Value = status.json();
    assert_eq!(status_body["claimed"], false);
    assert!(status_body["revokedAt"].is_string(), "410 response carries the revocation timestamp");
}

#[sqlx::test]
async fn unclaim_notify_is_logged(pool: PgPool) {
    let server = test_server(pool.clone());
    let resp = server.post("/device/unclaim-notify").json(&serde_json::json!({"mac": "010203040506", "source": "factory_reset"})).await;
    resp.assert_status_ok();

    let count: (i64,) = sqlx::query_as("SELECT count(*) FROM device_claim_audit WHERE mac = '010203040506'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count.0, 1);
}
