//! intelwatcher - Ingress intel map portal harvester
//!
//! Splits configured areas into map tiles, fetches their entities with a
//! bounded worker pool and stores every portal found.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`geo`] - Tile grid projection and area loading
//! - [`intel`] - Intel map transport and payload decoding
//! - [`scraper`] - Tile registry, fetch workers, scheduler and progress
//! - [`storage`] - Portal persistence (SQLite)
//! - [`models`] - Core data structures and types
//! - [`metrics`] - Prometheus counters for the scrape loop
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use intelwatcher::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.toml".as_ref())?;
//!     let transport = Arc::new(IntelClient::connect(&config.intel, 10).await?);
//!     let sink = Arc::new(SqlitePortalRepository::new(&config.database.sqlite_path)?);
//!     let boxes = config.areas.bbox.as_deref().unwrap_or_default();
//!     let registry = TileRegistry::from_boxes(&intelwatcher::geo::areas::parse_bbox_list(boxes)?);
//!
//!     let mut scheduler =
//!         Scheduler::new(registry, transport, sink, SchedulerConfig::from_config(&config));
//!     scheduler.run().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod geo;
pub mod intel;
pub mod metrics;
pub mod models;
pub mod scraper;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::geo::{BoundingBox, TileCoord};
    pub use crate::intel::{IntelClient, MapTransport};
    pub use crate::models::{PointKind, PortalRecord};
    pub use crate::scraper::{Scheduler, SchedulerConfig, TileRegistry};
    pub use crate::storage::{PortalSink, SqlitePortalRepository};
}

pub use models::{PointKind, PortalDetail, PortalRecord};
