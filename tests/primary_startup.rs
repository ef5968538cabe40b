//! Primary role startup and teardown.

use media_cluster::config::ServerConfig;
use media_cluster::lifecycle::signals::ShutdownSignal;
use media_cluster::lifecycle::startup::run_primary_until;

mod common;
use common::{cluster_config, MockSpawner};

fn config_with_admin(bind_address: String) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.cluster = cluster_config(2);
    config.admin.enabled = true;
    config.admin.bind_address = bind_address;
    config
}

#[tokio::test]
async fn admin_bind_failure_spawns_no_workers() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = taken.local_addr().unwrap().to_string();
    let spawner = MockSpawner::cooperative();

    let result = run_primary_until(
        config_with_admin(address),
        spawner.clone(),
        async { ShutdownSignal::Terminate },
    )
    .await;

    assert!(result.is_err());
    assert_eq!(spawner.spawned(), 0);
}

#[tokio::test]
async fn invalid_metrics_address_spawns_no_workers() {
    let mut config = ServerConfig::default();
    config.cluster = cluster_config(2);
    config.observability.metrics_enabled = true;
    config.observability.metrics_address = "not an address".to_string();
    let spawner = MockSpawner::cooperative();

    let result = run_primary_until(config, spawner.clone(), async { ShutdownSignal::Interrupt }).await;

    assert!(result.is_err());
    assert_eq!(spawner.spawned(), 0);
}

#[tokio::test]
async fn stop_signal_drains_the_pool() {
    let spawner = MockSpawner::cooperative();

    let code = run_primary_until(
        config_with_admin("127.0.0.1:0".to_string()),
        spawner.clone(),
        async { ShutdownSignal::Terminate },
    )
    .await
    .unwrap();

    assert_eq!(code, 0);
    let log = spawner.log();
    assert_eq!(log.spawned.len(), 2);
    assert_eq!(log.disconnected.len(), 2);
    assert!(log.killed.is_empty());
}
