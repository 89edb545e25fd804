//! Tile registry
//!
//! Holds one [`TileState`] per unique tile key across every configured area.
//! States are shared with workers through `Arc` and mutated with atomics, so
//! concurrent chunks never tear a counter update.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::geo::{BoundingBox, TileCoord};

/// Failure cycles after which a tile is never scheduled again
pub const MAX_FAILS: u32 = 8;

/// Highest attempt count at which a tile may still be sent in one cycle
pub const ATTEMPT_CAP: u32 = 7;

/// Sends a tile gets per failure cycle (attempt counts `0..=ATTEMPT_CAP`)
pub const SENDS_PER_CYCLE: u32 = ATTEMPT_CAP + 1;

/// Mutable scrape state of one tile
#[derive(Debug)]
pub struct TileState {
    coord: TileCoord,
    key: String,
    attempt_count: AtomicU32,
    failure_cycles: AtomicU32,
    success: AtomicBool,
}

impl TileState {
    pub fn new(coord: TileCoord) -> Self {
        Self {
            key: coord.key(),
            coord,
            attempt_count: AtomicU32::new(0),
            failure_cycles: AtomicU32::new(0),
            success: AtomicBool::new(false),
        }
    }

    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Attempts spent in the current failure cycle
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count.load(Ordering::Acquire)
    }

    /// Completed failed cycles
    pub fn failure_cycles(&self) -> u32 {
        self.failure_cycles.load(Ordering::Acquire)
    }

    pub fn is_success(&self) -> bool {
        self.success.load(Ordering::Acquire)
    }

    /// Whether the tile has used every attempt of the current cycle
    pub fn is_at_cap(&self) -> bool {
        self.attempt_count() > ATTEMPT_CAP
    }

    /// Whether the tile has been struck out permanently
    pub fn is_exhausted(&self) -> bool {
        self.failure_cycles() >= MAX_FAILS
    }

    /// Whether the scheduler should still select this tile
    pub fn is_needed(&self) -> bool {
        !self.is_success() && !self.is_exhausted()
    }

    /// Reserve one attempt if the cycle cap allows it
    ///
    /// A tile is sent while its count is at most [`ATTEMPT_CAP`]. Returns
    /// false, leaving the counter untouched, once the count has passed the cap
    /// or the tile has succeeded.
    pub fn try_begin_attempt(&self) -> bool {
        if self.is_success() {
            return false;
        }
        self.attempt_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n <= ATTEMPT_CAP).then_some(n + 1)
            })
            .is_ok()
    }

    pub fn mark_success(&self) {
        self.success.store(true, Ordering::Release);
    }

    /// Record a failure-cycle strike for an unsuccessful tile
    ///
    /// Resets the attempt counter. Returns false for successful tiles, which
    /// are left untouched.
    pub fn close_failed_cycle(&self) -> bool {
        if self.is_success() {
            return false;
        }
        self.attempt_count.store(0, Ordering::Release);
        self.failure_cycles.fetch_add(1, Ordering::AcqRel);
        true
    }
}

/// Deduplicated set of tiles across all areas
#[derive(Debug, Default)]
pub struct TileRegistry {
    tiles: Vec<Arc<TileState>>,
    index: HashMap<String, usize>,
    generated: usize,
}

impl TileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from the tile grids of every box
    pub fn from_boxes(boxes: &[BoundingBox]) -> Self {
        let mut registry = Self::new();
        for bbox in boxes {
            registry.extend(bbox.tiles());
        }
        registry
    }

    /// Merge coordinates, keeping the first state seen for each key
    pub fn extend(&mut self, coords: impl IntoIterator<Item = TileCoord>) {
        for coord in coords {
            self.generated += 1;
            let key = coord.key();
            if self.index.contains_key(&key) {
                continue;
            }
            self.index.insert(key, self.tiles.len());
            self.tiles.push(Arc::new(TileState::new(coord)));
        }
    }

    /// Number of unique tiles
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Coordinates merged so far, duplicates included
    pub fn generated(&self) -> usize {
        self.generated
    }

    /// Coordinates dropped as duplicates
    pub fn duplicates_removed(&self) -> usize {
        self.generated - self.tiles.len()
    }

    pub fn get(&self, key: &str) -> Option<&Arc<TileState>> {
        self.index.get(key).map(|&i| &self.tiles[i])
    }

    /// Every tile, in insertion order
    pub fn tiles(&self) -> &[Arc<TileState>] {
        &self.tiles
    }

    /// Tiles neither successful nor exhausted, in insertion order
    pub fn needed(&self) -> Vec<Arc<TileState>> {
        self.tiles
            .iter()
            .filter(|tile| tile.is_needed())
            .cloned()
            .collect()
    }

    pub fn needed_count(&self) -> usize {
        self.tiles.iter().filter(|tile| tile.is_needed()).count()
    }

    pub fn success_count(&self) -> usize {
        self.tiles.iter().filter(|tile| tile.is_success()).count()
    }

    pub fn exhausted_count(&self) -> usize {
        self.tiles
            .iter()
            .filter(|tile| !tile.is_success() && tile.is_exhausted())
            .count()
    }
}
