// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A single coherent device lifecycle, end to end: claim, revoke, verify the
//! revocation token the device presents, purge once the revocation is old
//! enough, then reclaim the same MAC under a fresh claim code. `tests/http.rs`
//! covers each endpoint in isolation; this file checks the full story holds
//! together across requests.

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

fn test_server(app: Arc<FabricApp>) -> TestServer {
    TestServer::new(build_router(app)).expect("create test server")
}

async fn insert_tenant(pool: &PgPool, name: &str) -> Uuid {
    sqlx::query_scalar("INSERT INTO tenants (name) VALUES ($1) RETURNING id").bind(name).fetch_one(pool).await.expect("insert tenant")
}

async fn insert_claim_code(pool: &PgPool, code: &str, tenant_id: Uuid, device_name: &str) {
    sqlx::query("INSERT INTO claim_codes (code, tenant_id, device_name, expires_at) VALUES ($1, $2, $3, now() + interval '1 hour')")
        .bind(code)
        .bind(tenant_id)
        .bind(device_name)
        .execute(pool)
        .await
        .expect("insert claim code");
}

#[sqlx::test]
async fn device_lifecycle_claim_revoke_purge_reclaim(pool: PgPool) {
    const MAC: &str = "0A1B2C3D4E5F";

    let app = test_app(pool.clone());
    let server = test_server(Arc::clone(&app));

    // -- Claim --------------------------------------------------------------
    let tenant_id = insert_tenant(&pool, "acme").await;
    insert_claim_code(&pool, "LIFECYCLE1", tenant_id, "backyard").await;
    server.post("/device/claiming-mode").json(&serde_json::json!({"mac": MAC})).await.assert_status_ok();

    let claim_resp = server
        .post("/devices/claim")
        .json(&serde_json::json!({"claimCode": "LIFECYCLE1", "deviceInfo": {"macAddress": MAC}}))
        .await;
    claim_resp.assert_status_ok();
    let device_id: Uuid = claim_resp.json::<serde_json::Value>()["deviceId"].as_str().unwrap().parse().unwrap();

    server.get("/device/claim-status").add_query_param("mac", MAC).await.assert_status_ok();

    // -- Revoke ---------------------------------------------------------------
    app.registry.revoke(device_id).await.expect("revoke device");

    let status_after_revoke = server.get("/device/claim-status").add_query_param("mac", MAC).await;
    status_after_revoke.assert_status(StatusCode::GONE);

    // -- Verify revocation with the real, single-use token --------------------
    let (token,): (String,) =
        sqlx::query_as("SELECT token FROM revocation_tokens WHERE device_id = $1").bind(device_id).fetch_one(&pool).await.unwrap();
    let verify_resp = server.post("/device/verify-revocation").json(&serde_json::json!({"mac": MAC, "token": token})).await;
    verify_resp.assert_status_ok();
    assert_eq!(verify_resp.json::<serde_json::Value>()["valid"], true);

    // -- Purge ------------------------------------------------------------------
    // Backdate the revocation well past any real purge window, then run the
    // same purge the daily sweep would run.
    sqlx::query("UPDATE devices SET unclaimed_at = now() - interval '200 days' WHERE id = $1")
        .bind(device_id)
        .execute(&pool)
        .await
        .unwrap();
    let purged = app.registry.db().purge_soft_deleted_older_than(app.config.purge_after_days).await.expect("purge");
    assert_eq!(purged, 1);

    // A purged device reports as never having existed, not as revoked.
    let status_after_purge = server.get("/device/claim-status").add_query_param("mac", MAC).await;
    status_after_purge.assert_status(StatusCode::NOT_FOUND);

    // -- Reclaim the same MAC under a fresh claim code ---------------------------
    insert_claim_code(&pool, "LIFECYCLE2", tenant_id, "backyard-v2").await;
    server.post("/device/claiming-mode").json(&serde_json::json!({"mac": MAC})).await.assert_status_ok();
    let reclaim_resp = server
        .post("/devices/claim")
        .json(&serde_json::json!({"claimCode": "LIFECYCLE2", "deviceInfo": {"macAddress": MAC}}))
        .await;
    reclaim_resp.assert_status_ok();
    let reclaim_body: serde_json::Value = reclaim_resp.json();
    assert_eq!(reclaim_body["deviceName"], "backyard-v2");
    assert_ne!(
        reclaim_body["deviceId"].as_str().unwrap(),
        device_id.to_string(),
        "a purged device's identity is never resurrected; reclaiming mints a fresh one"
    );

    server.get("/device/claim-status").add_query_param("mac", MAC).await.assert_status_ok();
}
