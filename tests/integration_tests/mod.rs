//! Integration tests module
//!
//! End-to-end tests wiring the real `IntelClient` to a wiremock intel
//! server and running the scheduler into SQLite or the mock repository.

pub mod error_scenarios;
pub mod scrape_test;
pub mod update_test;
