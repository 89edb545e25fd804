//! Portal persistence
//!
//! SQLite holds the harvested portals plus the gym/pokestop tables whose
//! missing names are filled from portal details.

pub mod repository;

pub use repository::{
    create_sqlite_repository, MockPortalRepository, PortalSink, SharedPortalSink,
    SqlitePortalRepository,
};
