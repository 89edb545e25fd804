//! Tile grid generation
//!
//! Converts bounding boxes into the intel map's tile coordinates. The intel
//! map does not use powers of two for its tile counts: each zoom level has a
//! fixed number of tiles per edge, looked up in [`TILES_PER_EDGE`]. Longitude
//! maps linearly onto tile-x and latitude goes through the Mercator
//! projection onto tile-y.

pub mod areas;

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Zoom level the scraper requests tiles at
pub const SCRAPE_ZOOM: u8 = 15;

/// Lowest zoom level with its own tile grid
pub const MIN_ZOOM: u8 = 3;

/// Highest zoom level with its own tile grid
pub const MAX_ZOOM: u8 = 15;

/// Tiles per edge, indexed by zoom level
pub const TILES_PER_EDGE: [u32; 16] = [
    1, 1, 1, 40, 40, 80, 80, 320, 1000, 2000, 2000, 4000, 8000, 16000, 16000, 32000,
];

/// Number of tiles along one edge of the map at `zoom`, clamped to [3, 15]
#[inline]
pub fn tiles_per_edge(zoom: u8) -> u32 {
    TILES_PER_EDGE[zoom.clamp(MIN_ZOOM, MAX_ZOOM) as usize]
}

/// Tile column containing `lon`
#[inline]
pub fn lon_to_tile(lon: f64, tiles_per_edge: u32) -> i64 {
    ((lon + 180.0) / 360.0 * tiles_per_edge as f64) as i64
}

/// Tile row containing `lat` (Mercator; undefined beyond ~±85°)
#[inline]
pub fn lat_to_tile(lat: f64, tiles_per_edge: u32) -> i64 {
    let lat_rad = lat * PI / 180.0;
    let merc = (lat_rad.tan() + 1.0 / lat_rad.cos()).ln();
    ((1.0 - merc / PI) / 2.0 * tiles_per_edge as f64) as i64
}

/// Western longitude of tile column `x`
#[inline]
pub fn tile_to_lon(x: i64, tiles_per_edge: u32) -> f64 {
    x as f64 / tiles_per_edge as f64 * 360.0 - 180.0
}

/// Northern latitude of tile row `y`
#[inline]
pub fn tile_to_lat(y: i64, tiles_per_edge: u32) -> f64 {
    let n = PI - 2.0 * PI * y as f64 / tiles_per_edge as f64;
    180.0 / PI * (0.5 * (n.exp() - (-n).exp())).atan()
}

/// Errors raised while parsing a bounding box
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BoundingBoxError {
    #[error("expected 4 comma separated numbers, got {0}")]
    WrongArity(usize),

    #[error("invalid number '{0}'")]
    InvalidNumber(String),
}

/// A geographic box given as (minLon, minLat, maxLon, maxLat)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Build from a GeoJSON-style `[minLon, minLat, maxLon, maxLat]` array
    pub fn from_slice(values: &[f64]) -> Result<Self, BoundingBoxError> {
        match values {
            [min_lon, min_lat, max_lon, max_lat] => {
                Ok(Self::new(*min_lon, *min_lat, *max_lon, *max_lat))
            }
            _ => Err(BoundingBoxError::WrongArity(values.len())),
        }
    }

    /// Tile columns covered by the box at the given edge count
    pub fn x_range(&self, tiles_per_edge: u32) -> std::ops::RangeInclusive<i64> {
        lon_to_tile(self.min_lon, tiles_per_edge)..=lon_to_tile(self.max_lon, tiles_per_edge)
    }

    /// Tile rows covered by the box; rows grow southwards so the top is `max_lat`
    pub fn y_range(&self, tiles_per_edge: u32) -> std::ops::RangeInclusive<i64> {
        lat_to_tile(self.max_lat, tiles_per_edge)..=lat_to_tile(self.min_lat, tiles_per_edge)
    }

    /// All tiles covering this box at [`SCRAPE_ZOOM`]
    pub fn tiles(&self) -> Vec<TileCoord> {
        self.tiles_at(SCRAPE_ZOOM)
    }

    /// All tiles covering this box at `zoom`, column-major
    pub fn tiles_at(&self, zoom: u8) -> Vec<TileCoord> {
        let zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        let tpe = tiles_per_edge(zoom);
        let ys = self.y_range(tpe);

        self.x_range(tpe)
            .flat_map(|x| ys.clone().map(move |y| TileCoord::new(zoom, x, y)))
            .collect()
    }

    /// Bit-exact key used to drop duplicate boxes
    pub(crate) fn dedup_key(&self) -> [u64; 4] {
        [
            self.min_lon.to_bits(),
            self.min_lat.to_bits(),
            self.max_lon.to_bits(),
            self.max_lat.to_bits(),
        ]
    }
}

impl FromStr for BoundingBox {
    type Err = BoundingBoxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .map(|part| {
                let part = part.trim();
                part.parse::<f64>()
                    .map_err(|_| BoundingBoxError::InvalidNumber(part.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_slice(&values)
    }
}

/// A tile on the intel map grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub zoom: u8,
    pub x: i64,
    pub y: i64,
}

impl TileCoord {
    pub fn new(zoom: u8, x: i64, y: i64) -> Self {
        Self { zoom, x, y }
    }

    /// Canonical tile key as understood by `getEntities`
    pub fn key(&self) -> String {
        format!("{}_{}_{}_0_8_100", self.zoom, self.x, self.y)
    }

    /// Geographic bounds of this tile
    pub fn bounds(&self) -> BoundingBox {
        let tpe = tiles_per_edge(self.zoom);
        BoundingBox::new(
            tile_to_lon(self.x, tpe),
            tile_to_lat(self.y + 1, tpe),
            tile_to_lon(self.x + 1, tpe),
            tile_to_lat(self.y, tpe),
        )
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
