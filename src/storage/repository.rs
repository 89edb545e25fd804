//! Repository Pattern for portal persistence
//!
//! This module provides the [`PortalSink`] trait the scraper writes through,
//! decoupling the scrape loop from the storage backend:
//! - Easy testing with the in-memory mock, including injected failures
//! - SQLite in production
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Scheduler (PERSIST) / Detail Updater           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        PortalSink                           │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                       │
//!                    ▼                       ▼
//!          ┌─────────────────┐     ┌─────────────────┐
//!          │     SQLite      │     │      Mock       │
//!          │  Implementation │     │ Implementation  │
//!          └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use intelwatcher::storage::{PortalSink, SqlitePortalRepository};
//!
//! // Production: use SQLite
//! let repo = SqlitePortalRepository::new("data/intel.db")?;
//!
//! // Testing: use Mock
//! let mock_repo = MockPortalRepository::new();
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{PointKind, PortalRecord, UnnamedPoint};

// ============================================================================
// Repository Trait
// ============================================================================

/// Destination of scraped portals and source of points lacking names
pub trait PortalSink: Send + Sync {
    /// Insert or update portals keyed by id
    ///
    /// An existing record keeps its first-seen timestamp; its last-seen
    /// timestamp only ever moves forward.
    fn bulk_upsert_portals(&self, records: &[PortalRecord]) -> Result<usize>;

    /// Points of `kind` whose display name is missing
    fn fetch_portals_missing_name(&self, kind: PointKind) -> Result<Vec<UnnamedPoint>>;

    /// Set name and image of one point, returning whether it existed
    fn update_point_name(&self, kind: PointKind, id: &str, name: &str, image_url: &str)
        -> Result<bool>;

    /// Get portal by id
    fn get_portal(&self, id: &str) -> Result<Option<PortalRecord>>;

    /// Count stored portals
    fn portal_count(&self) -> Result<usize>;
}

fn to_timestamp(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

fn from_timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of [`PortalSink`]
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection.
pub struct SqlitePortalRepository {
    conn: Mutex<Connection>,
}

impl SqlitePortalRepository {
    /// Open (or create) the database at `path`
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite repository initialized");
        Ok(repo)
    }

    /// Create in-memory repository (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.create_schema()?;
        Ok(repo)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::other("SQLite connection lock poisoned"))
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS portals (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    url TEXT NOT NULL,
                    lat REAL NOT NULL,
                    lon REAL NOT NULL,
                    updated INTEGER NOT NULL,
                    imported INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS gym (
                    id TEXT PRIMARY KEY,
                    name TEXT,
                    url TEXT
                );

                CREATE TABLE IF NOT EXISTS pokestop (
                    id TEXT PRIMARY KEY,
                    name TEXT,
                    url TEXT
                );
                "#,
        )?;

        Ok(())
    }

    /// Register a gym or stop, optionally already named
    pub fn add_point(&self, kind: PointKind, id: &str, name: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!("INSERT OR REPLACE INTO {} (id, name) VALUES (?1, ?2)", kind.table()),
            params![id, name],
        )?;
        Ok(())
    }
}

impl PortalSink for SqlitePortalRepository {
    fn bulk_upsert_portals(&self, records: &[PortalRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                    INSERT INTO portals (id, name, url, lat, lon, updated, imported)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ON CONFLICT(id) DO UPDATE SET
                        name = excluded.name,
                        url = excluded.url,
                        lat = excluded.lat,
                        lon = excluded.lon,
                        updated = MAX(portals.updated, excluded.updated)
                    "#,
            )?;

            for record in records {
                stmt.execute(params![
                    record.id,
                    record.name,
                    record.image_url,
                    record.lat,
                    record.lon,
                    to_timestamp(record.last_seen),
                    to_timestamp(record.first_seen),
                ])?;
            }
        }
        tx.commit()?;

        Ok(records.len())
    }

    fn fetch_portals_missing_name(&self, kind: PointKind) -> Result<Vec<UnnamedPoint>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id FROM {} WHERE name IS NULL OR name = '' ORDER BY id",
            kind.table()
        ))?;

        let points = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|id| id.map(|id| UnnamedPoint { kind, id }))
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(points)
    }

    fn update_point_name(
        &self,
        kind: PointKind,
        id: &str,
        name: &str,
        image_url: &str,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            &format!("UPDATE {} SET name = ?1, url = ?2 WHERE id = ?3", kind.table()),
            params![name, image_url, id],
        )?;
        Ok(changed > 0)
    }

    fn get_portal(&self, id: &str) -> Result<Option<PortalRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT id, name, url, lat, lon, updated, imported FROM portals WHERE id = ?1",
                params![id],
                |row| {
                    Ok(PortalRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        image_url: row.get(2)?,
                        lat: row.get(3)?,
                        lon: row.get(4)?,
                        last_seen: from_timestamp(row.get(5)?),
                        first_seen: from_timestamp(row.get(6)?),
                    })
                },
            )
            .optional()?;

        Ok(record)
    }

    fn portal_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM portals", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

// ============================================================================
// Mock Implementation (for testing)
// ============================================================================

/// In-memory mock implementation of [`PortalSink`]
///
/// Useful for testing without database dependencies. Upserts can be made to
/// fail a given number of times with [`MockPortalRepository::fail_next_upserts`],
/// and listing a kind of point with [`MockPortalRepository::fail_listing`].
#[derive(Default)]
pub struct MockPortalRepository {
    portals: RwLock<HashMap<String, PortalRecord>>,
    points: RwLock<HashMap<(PointKind, String), (Option<String>, Option<String>)>>,
    failing_upserts: AtomicUsize,
    failing_listings: RwLock<HashSet<PointKind>>,
    upsert_calls: AtomicUsize,
}

impl MockPortalRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `bulk_upsert_portals` fail
    pub fn fail_next_upserts(&self, n: usize) {
        self.failing_upserts.store(n, Ordering::SeqCst);
    }

    /// Make `fetch_portals_missing_name` fail for `kind`
    pub fn fail_listing(&self, kind: PointKind) {
        if let Ok(mut kinds) = self.failing_listings.write() {
            kinds.insert(kind);
        }
    }

    /// Calls to `bulk_upsert_portals`, failed ones included
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// Register a gym or stop, optionally already named
    pub fn add_point(&self, kind: PointKind, id: &str, name: Option<&str>) {
        if let Ok(mut points) = self.points.write() {
            points.insert((kind, id.to_string()), (name.map(String::from), None));
        }
    }

    /// Name and image of a stored point
    pub fn point(&self, kind: PointKind, id: &str) -> Option<(Option<String>, Option<String>)> {
        self.points
            .read()
            .ok()?
            .get(&(kind, id.to_string()))
            .cloned()
    }

    fn read_portals(&self) -> Result<RwLockReadGuard<'_, HashMap<String, PortalRecord>>> {
        self.portals
            .read()
            .map_err(|_| Error::other("portal map lock poisoned"))
    }

    fn write_portals(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, PortalRecord>>> {
        self.portals
            .write()
            .map_err(|_| Error::other("portal map lock poisoned"))
    }
}

impl PortalSink for MockPortalRepository {
    fn bulk_upsert_portals(&self, records: &[PortalRecord]) -> Result<usize> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);

        let injected = self
            .failing_upserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::other("injected upsert failure"));
        }

        let mut portals = self.write_portals()?;
        for record in records {
            portals
                .entry(record.id.clone())
                .and_modify(|stored| {
                    stored.name = record.name.clone();
                    stored.image_url = record.image_url.clone();
                    stored.lat = record.lat;
                    stored.lon = record.lon;
                    stored.last_seen = stored.last_seen.max(record.last_seen);
                })
                .or_insert_with(|| record.clone());
        }

        Ok(records.len())
    }

    fn fetch_portals_missing_name(&self, kind: PointKind) -> Result<Vec<UnnamedPoint>> {
        let failing = self
            .failing_listings
            .read()
            .map_err(|_| Error::other("listing lock poisoned"))?
            .contains(&kind);
        if failing {
            return Err(Error::other(format!("injected listing failure for {kind}")));
        }

        let points = self
            .points
            .read()
            .map_err(|_| Error::other("point map lock poisoned"))?;

        let mut missing: Vec<UnnamedPoint> = points
            .iter()
            .filter(|((k, _), (name, _))| {
                *k == kind && name.as_deref().map_or(true, str::is_empty)
            })
            .map(|((k, id), _)| UnnamedPoint {
                kind: *k,
                id: id.clone(),
            })
            .collect();
        missing.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(missing)
    }

    fn update_point_name(
        &self,
        kind: PointKind,
        id: &str,
        name: &str,
        image_url: &str,
    ) -> Result<bool> {
        let mut points = self
            .points
            .write()
            .map_err(|_| Error::other("point map lock poisoned"))?;

        match points.get_mut(&(kind, id.to_string())) {
            Some(entry) => {
                *entry = (Some(name.to_string()), Some(image_url.to_string()));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get_portal(&self, id: &str) -> Result<Option<PortalRecord>> {
        Ok(self.read_portals()?.get(id).cloned())
    }

    fn portal_count(&self) -> Result<usize> {
        Ok(self.read_portals()?.len())
    }
}

// ============================================================================
// Shared Repository Types
// ============================================================================

/// Thread-safe shared repository wrapper
pub type SharedPortalSink = Arc<dyn PortalSink>;

/// Create a shared SQLite repository
pub fn create_sqlite_repository(path: impl AsRef<Path>) -> Result<SharedPortalSink> {
    let repo = SqlitePortalRepository::new(path)?;
    Ok(Arc::new(repo))
}

// ============================================================================
// Tests
// ============================================================================
