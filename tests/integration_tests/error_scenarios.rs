//! Error scenario integration tests
//!
//! Tests failure modes of the scrape loop:
//! 1. Intel server down (HTTP 5xx on every request)
//! 2. Empty payloads on every request
//! 3. Storage failures during PERSIST

use intelwatcher::geo::TileCoord;
use intelwatcher::intel::IntelClient;
use intelwatcher::scraper::{Scheduler, SchedulerConfig, TileRegistry, MAX_FAILS, SENDS_PER_CYCLE};
use intelwatcher::storage::{MockPortalRepository, PortalSink};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{intel_config, mount_dashboard, MapResponder};

fn registry(tiles: i64) -> TileRegistry {
    let mut registry = TileRegistry::new();
    registry.extend((0..tiles).map(|x| TileCoord::new(15, 15_991 + x, 10_630)));
    registry
}

fn config() -> SchedulerConfig {
    SchedulerConfig {
        workers: 2,
        max_tiles: 100,
        tiles_per_worker: 5,
        cooldown: Duration::ZERO,
        ..Default::default()
    }
}

async fn client(server: &MockServer) -> Arc<IntelClient> {
    Arc::new(IntelClient::connect(&intel_config(server), 1000).await.unwrap())
}

// ============================================================================
// Upstream Failures
// ============================================================================

#[tokio::test]
async fn test_server_down_exhausts_tiles() {
    let server = MockServer::start().await;
    mount_dashboard(&server).await;

    // one request per transport attempt: 4 per iteration, MAX_FAILS iterations
    Mock::given(method("POST"))
        .and(path("/r/getEntities"))
        .respond_with(ResponseTemplate::new(503))
        .expect(u64::from(4 * MAX_FAILS))
        .mount(&server)
        .await;

    let sink = Arc::new(MockPortalRepository::new());
    let mut scheduler = Scheduler::new(registry(3), client(&server).await, sink.clone(), config());

    let summary = scheduler.run().await;

    assert_eq!(summary.iterations, u64::from(MAX_FAILS));
    assert_eq!(summary.exhausted, 3);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(scheduler.registry().needed_count(), 0);
    for tile in scheduler.registry().tiles() {
        assert_eq!(tile.failure_cycles(), MAX_FAILS);
    }
    assert_eq!(sink.upsert_calls(), 0);

    let stats = scheduler.stats();
    assert_eq!(stats.exhausted, 3);
}

#[tokio::test]
async fn test_empty_payloads_are_bounded_per_iteration() {
    let server = MockServer::start().await;
    mount_dashboard(&server).await;

    Mock::given(method("POST"))
        .and(path("/r/getEntities"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .expect(u64::from(SENDS_PER_CYCLE * MAX_FAILS))
        .mount(&server)
        .await;

    let sink = Arc::new(MockPortalRepository::new());
    let mut scheduler = Scheduler::new(registry(2), client(&server).await, sink, config());

    let summary = scheduler.run().await;

    assert_eq!(summary.iterations, u64::from(MAX_FAILS));
    assert_eq!(summary.strikes, 2 * MAX_FAILS as usize);
    assert_eq!(summary.exhausted, 2);
}

// ============================================================================
// Storage Failures
// ============================================================================

#[tokio::test]
async fn test_persist_failure_drops_batch_and_continues() {
    let server = MockServer::start().await;
    mount_dashboard(&server).await;

    Mock::given(method("POST"))
        .and(path("/r/getEntities"))
        .respond_with(MapResponder::new())
        .mount(&server)
        .await;

    let sink = Arc::new(MockPortalRepository::new());
    sink.fail_next_upserts(1);
    let config = SchedulerConfig {
        max_tiles: 5,
        ..config()
    };
    let mut scheduler = Scheduler::new(registry(10), client(&server).await, sink.clone(), config);

    let summary = scheduler.run().await;

    assert_eq!(summary.iterations, 2);
    assert_eq!(summary.persist_failures, 1);
    assert_eq!(summary.portals_found, 10);
    assert_eq!(summary.portals_persisted, 5);
    assert_eq!(sink.portal_count().unwrap(), 5);
    // fetched tiles stay successful even though their portals were dropped
    assert_eq!(scheduler.registry().success_count(), 10);
}
