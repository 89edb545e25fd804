//! Portal detail update integration tests

use intelwatcher::models::PointKind;
use intelwatcher::scraper::PortalDetailUpdater;
use intelwatcher::storage::{PortalSink, SqlitePortalRepository};
use intelwatcher::utils::retry::RetryConfig;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{intel_config, mount_dashboard};

#[tokio::test]
async fn test_update_fills_names_from_details() {
    let server = MockServer::start().await;
    mount_dashboard(&server).await;

    Mock::given(method("POST"))
        .and(path("/r/getPortalDetails"))
        .and(body_partial_json(json!({ "guid": "gym-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": ["p", "E", 51_500_000, -100_000, 8, 100, 8, "https://lh3/gym-1", "Clock Tower", []]
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/r/getPortalDetails"))
        .and(body_partial_json(json!({ "guid": "gone" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": "missing" })))
        .mount(&server)
        .await;

    let repo = Arc::new(SqlitePortalRepository::in_memory().unwrap());
    repo.add_point(PointKind::Gym, "gym-1", None).unwrap();
    repo.add_point(PointKind::Gym, "gone", None).unwrap();
    repo.add_point(PointKind::Stop, "stop-1", Some("Bench")).unwrap();

    let client = intelwatcher::intel::IntelClient::connect(&intel_config(&server), 1000)
        .await
        .unwrap();
    let updater = PortalDetailUpdater::new(Arc::new(client), repo.clone())
        .with_retry(RetryConfig::immediate(1));

    let results = updater.update_all().await;

    let (kind, gyms) = &results[0];
    let gyms = gyms.as_ref().unwrap();
    assert_eq!(*kind, PointKind::Gym);
    assert_eq!((gyms.found, gyms.updated, gyms.failed), (2, 1, 1));
    assert_eq!(results[1].1.as_ref().unwrap().found, 0);

    let missing = repo.fetch_portals_missing_name(PointKind::Gym).unwrap();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].id, "gone");
}
