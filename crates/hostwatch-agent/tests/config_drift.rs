// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Config watcher drift detection against a mock control plane.

mod common;

use std::sync::Arc;

use tokio::sync::mpsc;

use common::MockServer;
use hostwatch_agent::config_watcher::ConfigWatcher;
use hostwatch_agent::supervisor::ControlEvent;
use hostwatch_core::api::Client;
use hostwatch_core::authguard::AuthGuard;
use hostwatch_core::collection::CollectionConfig;
use hostwatch_core::config::AgentConfig;

const EMPTY_CONFIG: &str = r#"{"metrics":[],"log_sources":[]}"#;
const CPU_CONFIG: &str =
    r#"{"metrics":[{"name":"cpu_user_ratio","type":"gauge","unit":"%","labels":{"cpu":"all"}}],"log_sources":[]}"#;

fn client_for(server: &MockServer) -> Client {
    let mut cfg = AgentConfig::default();
    cfg.api_key = "k".to_string();
    cfg.api_url = server.url();
    let (guard, _rx) = AuthGuard::new();
    Client::new(&cfg, Arc::new(guard)).unwrap()
}

fn watcher_for(server: &MockServer) -> ConfigWatcher {
    let initial: CollectionConfig = serde_json::from_str(EMPTY_CONFIG).unwrap();
    ConfigWatcher::new(client_for(server), &initial).unwrap()
}

#[tokio::test]
async fn test_unchanged_config_reports_no_drift() {
    let server = MockServer::start_with_status(500).await;
    server.queue_response("/configs/", 200, EMPTY_CONFIG);

    let watcher = watcher_for(&server);
    let (tx, mut rx) = mpsc::channel(1);

    let result = watcher.check_for_drift(&tx).await;
    // Same hash: the cycle yields the config for period adjustment.
    let cfg = result.expect("cycle ran").expect("no drift");
    assert!(cfg.is_empty());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_changed_config_raises_reload() {
    let server = MockServer::start_with_status(500).await;
    server.queue_response("/configs/", 200, CPU_CONFIG);

    let watcher = watcher_for(&server);
    let (tx, mut rx) = mpsc::channel(1);

    let result = watcher.check_for_drift(&tx).await;
    assert!(matches!(result, Some(None)));
    assert!(matches!(rx.try_recv(), Ok(ControlEvent::Reload)));
}

#[tokio::test]
async fn test_fetch_failure_skips_cycle() {
    // Default 500: every fetch fails.
    let server = MockServer::start_with_status(500).await;

    let watcher = watcher_for(&server);
    let (tx, mut rx) = mpsc::channel(1);

    assert!(watcher.check_for_drift(&tx).await.is_none());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_reordered_config_is_not_drift() {
    let server = MockServer::start_with_status(500).await;

    let two_metrics = r#"{"metrics":[
        {"name":"cpu_user_ratio","type":"gauge","unit":"%","labels":{"cpu":"0"}},
        {"name":"cpu_idle_ratio","type":"gauge","unit":"%","labels":{"cpu":"0"}}
    ],"log_sources":[]}"#;
    let reordered = r#"{"metrics":[
        {"name":"cpu_idle_ratio","type":"gauge","unit":"%","labels":{"cpu":"0"}},
        {"name":"cpu_user_ratio","type":"gauge","unit":"%","labels":{"cpu":"0"}}
    ],"log_sources":[]}"#;

    let initial: CollectionConfig = serde_json::from_str(two_metrics).unwrap();
    let watcher = ConfigWatcher::new(client_for(&server), &initial).unwrap();
    server.queue_response("/configs/", 200, reordered);

    let (tx, mut rx) = mpsc::channel(1);
    let result = watcher.check_for_drift(&tx).await;
    assert!(matches!(result, Some(Some(_))));
    assert!(rx.try_recv().is_err());
}
