#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use std::time::Duration;

use agent_realtime::error::Kind;
use agent_realtime::realtime::Manager;
use agent_realtime::ws::{Config, ConnectionStatus};
use common::{MockWsServer, RefusingServer, fast_config};
use tokio::time::sleep;

#[tokio::test]
async fn connect_creates_and_reuses_clients() {
    let server = MockWsServer::start().await;
    let manager = Manager::with_config(&server.base_url(), fast_config()).unwrap();

    let client = manager.connect("exec-1", None).await.unwrap();
    let again = manager.get_client("exec-1", None).unwrap();

    assert_eq!(client.status(), ConnectionStatus::Connected);
    assert_eq!(again.status(), ConnectionStatus::Connected);
    assert_eq!(manager.targets(), vec!["exec-1".to_owned()]);
    assert_eq!(server.paths(), vec!["/v1/ws/exec-1".to_owned()]);

    manager.disconnect_all();
}

#[tokio::test]
async fn disconnect_removes_client_and_closes_socket() {
    let server = MockWsServer::start().await;
    let manager = Manager::with_config(&server.base_url(), fast_config()).unwrap();
    let client = manager.connect("exec-1", None).await.unwrap();

    manager.disconnect("exec-1");
    manager.disconnect("exec-1");
    sleep(Duration::from_millis(200)).await;

    assert!(manager.is_empty());
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
    assert_eq!(server.accepts(), 1);
}

#[tokio::test]
async fn health_client_is_separate_and_torn_down_by_disconnect_all() {
    let server = MockWsServer::start().await;
    let manager = Manager::with_config(&server.base_url(), fast_config()).unwrap();

    manager.connect("exec-1", None).await.unwrap();
    let health = manager.connect_health(None).await.unwrap();
    let same = manager.connect_health(None).await.unwrap();

    assert_eq!(health.target(), agent_realtime::HEALTH_TARGET);
    assert_eq!(same.status(), ConnectionStatus::Connected);
    assert_eq!(manager.len(), 1, "health client is not keyed");
    assert!(server.paths().contains(&"/v1/ws/health".to_owned()));
    assert_eq!(server.accepts(), 2);

    manager.disconnect_all();

    assert!(manager.is_empty());
    assert!(manager.health_client().is_none());
    assert_eq!(health.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn connect_propagates_failures() {
    let server = RefusingServer::start().await;
    let config = Config::builder().auto_reconnect(false).build();
    let manager = Manager::with_config(&server.base_url(), config).unwrap();

    let error = manager.connect("exec-1", None).await.unwrap_err();

    assert_eq!(error.kind(), Kind::WebSocket);
    assert_eq!(manager.targets(), vec!["exec-1".to_owned()]);
    assert_eq!(server.accepts(), 1);
    manager.disconnect_all();
}
