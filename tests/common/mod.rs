//! Common test utilities

#![allow(dead_code)]

use intelwatcher::config::IntelConfig;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const DASHBOARD_VERSION: &str = "4f2c1a9e0b";

pub const COOKIE: &str = "csrftoken=tok123; sessionid=abc; ingress.intelmap.zoom=15;";

/// Intel page with the dashboard script tag
pub fn dashboard_html() -> String {
    format!(
        r#"<html><head><script type="text/javascript" src="/jsc/gen_dashboard_{DASHBOARD_VERSION}.js"></script></head></html>"#
    )
}

/// Intel config pointed at a mock server
pub fn intel_config(server: &MockServer) -> IntelConfig {
    IntelConfig {
        cookie: COOKIE.to_string(),
        base_url: server.uri(),
        request_timeout_secs: 5,
        ..Default::default()
    }
}

/// Serve the intel page so `IntelClient::connect` succeeds
pub async fn mount_dashboard(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/intel"))
        .respond_with(ResponseTemplate::new(200).set_body_string(dashboard_html()))
        .mount(server)
        .await;
}

/// A portal row as it appears in `gameEntities`
pub fn portal_row(guid: &str, lat_e6: i64, lng_e6: i64, name: &str) -> Value {
    json!([
        guid,
        1_700_000_000_000_i64,
        ["p", "E", lat_e6, lng_e6, 8, 100, 8, format!("https://lh3/{guid}"), name, [], false, false, null, 1_700_000_000_000_i64]
    ])
}

/// Tile keys of a `getEntities` request body
pub fn requested_keys(request: &Request) -> Vec<String> {
    let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
    body["tileKeys"]
        .as_array()
        .map(|keys| {
            keys.iter()
                .filter_map(|k| k.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// `getEntities` responder returning one portal per requested tile
///
/// A tile whose key is listed in `errors_before_success` answers with a
/// `TIMEOUT` error marker that many times first.
#[derive(Default)]
pub struct MapResponder {
    pub errors_before_success: HashMap<String, u32>,
    seen: Mutex<HashMap<String, u32>>,
}

impl MapResponder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, key: &str, times: u32) -> Self {
        self.errors_before_success.insert(key.to_string(), times);
        self
    }
}

impl Respond for MapResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut seen = self.seen.lock().unwrap();
        let mut map = serde_json::Map::new();

        for key in requested_keys(request) {
            let count = seen.entry(key.clone()).or_insert(0);
            *count += 1;

            let failures = self.errors_before_success.get(&key).copied().unwrap_or(0);
            let payload = if *count <= failures {
                json!({ "error": "TIMEOUT" })
            } else {
                json!({ "gameEntities": [portal_row(&format!("{key}.16"), 51_500_000, -50_000, "Statue")] })
            };
            map.insert(key, payload);
        }

        ResponseTemplate::new(200).set_body_json(json!({ "result": { "map": map } }))
    }
}
