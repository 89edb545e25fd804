//! Common utilities and helper functions
//!
//! This module provides shared utilities used across the application.

pub mod error;
pub mod retry;

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

/// Parse a browser cookie string (`k1=v1; k2=v2;`) into key/value pairs
///
/// Pairs must be terminated by `;`, matching what browsers export when the
/// cookie header is copied verbatim. Keys are trimmed.
pub fn parse_cookie(cookie: &str) -> BTreeMap<String, String> {
    static COOKIE_RE: OnceLock<Regex> = OnceLock::new();

    let re = COOKIE_RE.get_or_init(|| Regex::new(r"(.*?)=(.*?);").expect("Invalid regex pattern"));

    re.captures_iter(cookie)
        .map(|caps| (caps[1].trim().to_string(), caps[2].to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Format a duration as `HH:MM:SS`, rolling days into the hour count
pub fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
