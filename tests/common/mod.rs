#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use acarshub::aircraft::AircraftSummary;
use acarshub::aircraft_registry::{AircraftRegistry, RegistryHandle, spawn_registry};
use acarshub::config::RetentionConfig;
use acarshub::decoder::NoopDecoder;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Registry worker whose eviction timer never fires during a test
pub fn spawn_test_registry(cancel: CancellationToken) -> (RegistryHandle, JoinHandle<()>) {
    let retention = RetentionConfig {
        prune_interval: Duration::from_secs(3600),
        ..RetentionConfig::default()
    };
    let registry = AircraftRegistry::new(Arc::new(NoopDecoder), retention);
    spawn_registry(registry, cancel)
}

/// Poll the registry until `done` holds or five seconds pass
pub async fn wait_for_snapshot<F>(registry: &RegistryHandle, done: F) -> Vec<AircraftSummary>
where
    F: Fn(&[AircraftSummary]) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = registry.snapshot().await.unwrap();
        if done(&snapshot) || tokio::time::Instant::now() >= deadline {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
