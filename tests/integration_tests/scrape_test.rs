//! Scrape integration tests
//!
//! Tests the full path:
//! 1. Grid generation from a bounding box
//! 2. getEntities through IntelClient against wiremock
//! 3. Scheduler iterations with failure-cycle accounting
//! 4. Persistence into SQLite

use intelwatcher::geo::BoundingBox;
use intelwatcher::intel::IntelClient;
use intelwatcher::scraper::{Scheduler, SchedulerConfig, TileRegistry, SENDS_PER_CYCLE};
use intelwatcher::storage::{PortalSink, SqlitePortalRepository};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer};

use crate::common::{intel_config, mount_dashboard, MapResponder};

fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        workers: 3,
        max_tiles: 2000,
        tiles_per_worker: 15,
        cooldown: Duration::ZERO,
        ..Default::default()
    }
}

async fn client(server: &MockServer) -> Arc<IntelClient> {
    Arc::new(IntelClient::connect(&intel_config(server), 1000).await.unwrap())
}

#[tokio::test]
async fn test_london_box_scraped_in_one_iteration() {
    let server = MockServer::start().await;
    mount_dashboard(&server).await;

    let registry = TileRegistry::from_boxes(&[BoundingBox::new(-0.1, 51.5, 0.0, 51.6)]);
    assert_eq!(registry.len(), 150);
    let flaky = registry.tiles()[7].key().to_string();

    Mock::given(method("POST"))
        .and(path("/r/getEntities"))
        .respond_with(MapResponder::new().failing(&flaky, 2))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let sink = Arc::new(SqlitePortalRepository::new(temp_dir.path().join("intel.db")).unwrap());
    let mut scheduler = Scheduler::new(registry, client(&server).await, sink.clone(), scheduler_config());

    let summary = scheduler.run().await;

    assert_eq!(summary.iterations, 1);
    assert_eq!(summary.succeeded, 150);
    assert_eq!(summary.strikes, 0);
    // 10 chunks plus two re-sends of the flaky tile
    assert_eq!(summary.requests, 12);
    assert_eq!(sink.portal_count().unwrap(), 150);

    let tile = scheduler.registry().get(&flaky).unwrap();
    assert_eq!(tile.attempt_count(), 3);
    assert_eq!(tile.failure_cycles(), 0);

    let portal = sink.get_portal(&format!("{flaky}.16")).unwrap().unwrap();
    assert_eq!(portal.name, "Statue");
    assert!((portal.lon + 0.05).abs() < 1e-9);
}

#[tokio::test]
async fn test_tile_failing_whole_cycle_recovers_next_iteration() {
    let server = MockServer::start().await;
    mount_dashboard(&server).await;

    let registry = TileRegistry::from_boxes(&[BoundingBox::new(-0.1, 51.5, -0.09, 51.505)]);
    let tiles = registry.len();
    let stubborn = registry.tiles()[0].key().to_string();

    Mock::given(method("POST"))
        .and(path("/r/getEntities"))
        .respond_with(MapResponder::new().failing(&stubborn, SENDS_PER_CYCLE))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let sink = Arc::new(SqlitePortalRepository::new(temp_dir.path().join("intel.db")).unwrap());
    let mut scheduler = Scheduler::new(registry, client(&server).await, sink.clone(), scheduler_config());

    let summary = scheduler.run().await;

    assert_eq!(summary.iterations, 2);
    assert_eq!(summary.strikes, 1);
    assert_eq!(summary.succeeded, tiles);
    assert_eq!(sink.portal_count().unwrap(), tiles);

    let stats = scheduler.stats();
    assert_eq!(stats.recovered[0], 1);
    assert_eq!(stats.clean_success, tiles - 1);
    assert_eq!(
        stats.failed_total() + stats.recovered_total() + stats.clean_success,
        stats.total
    );
}

#[tokio::test]
async fn test_max_tiles_spreads_work_over_iterations() {
    let server = MockServer::start().await;
    mount_dashboard(&server).await;

    Mock::given(method("POST"))
        .and(path("/r/getEntities"))
        .respond_with(MapResponder::new())
        .mount(&server)
        .await;

    let registry = TileRegistry::from_boxes(&[BoundingBox::new(-0.1, 51.5, 0.0, 51.6)]);
    let sink = Arc::new(SqlitePortalRepository::in_memory().unwrap());
    let config = SchedulerConfig {
        max_tiles: 40,
        ..scheduler_config()
    };
    let mut scheduler = Scheduler::new(registry, client(&server).await, sink.clone(), config);

    let summary = scheduler.run().await;

    assert_eq!(summary.iterations, 4);
    assert_eq!(summary.succeeded, 150);
    assert_eq!(sink.portal_count().unwrap(), 150);
}
