//! Intel map transport
//!
//! The scraper core only sees the [`MapTransport`] trait: an already
//! authenticated capability to fetch tile entities and portal details.
//! [`client::IntelClient`] is the HTTP implementation; tests plug in
//! scripted transports.

pub mod client;
pub mod payload;

use async_trait::async_trait;

use crate::models::PortalDetail;
use crate::utils::error::{EntitiesError, FetchError};

pub use client::IntelClient;
pub use payload::{EntityData, EntityMap, MapEntity, PortalEntity, TilePayload};

/// Authenticated access to the map service
#[async_trait]
pub trait MapTransport: Send + Sync {
    /// Issue one combined `getEntities` request for the given tile keys
    ///
    /// Makes a single attempt; retrying is the caller's decision.
    async fn fetch_entities(&self, tile_keys: &[String]) -> Result<EntityMap, EntitiesError>;

    /// Fetch name and image of a single portal
    async fn fetch_portal_detail(&self, guid: &str) -> Result<PortalDetail, FetchError>;
}
