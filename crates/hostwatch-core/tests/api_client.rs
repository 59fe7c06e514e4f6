// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

mod common;

use std::sync::Arc;

use common::MockServer;
use hostwatch_core::api::Client;
use hostwatch_core::authguard::AuthGuard;
use hostwatch_core::collection::{MetricKind, MetricSpec};
use hostwatch_core::config::AgentConfig;
use hostwatch_core::error::Error;

fn client_for(server: &MockServer) -> (Client, tokio::sync::mpsc::Receiver<()>) {
    let mut cfg = AgentConfig::default();
    cfg.api_key = "k-test".to_string();
    cfg.api_url = server.url();
    let (guard, rx) = AuthGuard::new();
    (Client::new(&cfg, Arc::new(guard)).unwrap(), rx)
}

#[tokio::test]
async fn test_check_key_accepts_2xx() {
    let server = MockServer::start_with_status(200).await;
    let (client, _rx) = client_for(&server);

    client.check_key().await.unwrap();

    let requests = server.requests_for_path("/check-key/");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].header("authorization"), Some("Api-Key k-test"));
}

#[tokio::test]
async fn test_check_key_maps_unauthorized() {
    let server = MockServer::start_with_status(401).await;
    let (client, _rx) = client_for(&server);

    assert!(matches!(
        client.check_key().await,
        Err(Error::AuthInvalid)
    ));
}

#[tokio::test]
async fn test_collection_config_fetch_uses_cache_buster() {
    let server = MockServer::start_with_status(200).await;
    let (client, _rx) = client_for(&server);

    server.queue_response(
        "/configs/",
        200,
        r#"{"metrics":[{"name":"cpu_user_ratio","type":"gauge","unit":"%","labels":{"cpu":"all"}}],"log_sources":[]}"#,
    );

    let cfg = client.get_collection_config().await.unwrap();
    assert_eq!(cfg.metrics.len(), 1);
    assert_eq!(cfg.metrics[0].name, "cpu_user_ratio");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/configs/");
    let query = requests[0].query.as_deref().unwrap();
    assert!(query.starts_with("cb="), "missing cache buster: {query}");
}

#[tokio::test]
async fn test_collection_config_non_200_is_config_fetch_error() {
    let server = MockServer::start_with_status(500).await;
    let (client, _rx) = client_for(&server);

    assert!(matches!(
        client.get_collection_config().await,
        Err(Error::ConfigFetch(_))
    ));
}

#[tokio::test]
async fn test_discovery_post_requires_201() {
    let server = MockServer::start_with_status(200).await;
    let (client, _rx) = client_for(&server);

    let specs = vec![MetricSpec {
        name: "heartbeat".into(),
        kind: MetricKind::Gauge,
        unit: String::new(),
        labels: Default::default(),
    }];

    // 200 is not good enough for discovery uploads.
    assert!(matches!(
        client.post_available_metrics(&specs).await,
        Err(Error::HttpStatus(200))
    ));

    server.queue_status("/metrics/", 201);
    client.post_available_metrics(&specs).await.unwrap();
}

#[tokio::test]
async fn test_unauthorized_control_calls_feed_the_guard() {
    let server = MockServer::start_with_status(403).await;
    let (client, mut rx) = client_for(&server);

    for _ in 0..10 {
        let _ = client.check_key().await;
    }

    rx.try_recv()
        .expect("ten 403s inside the window should request a key check");
}
