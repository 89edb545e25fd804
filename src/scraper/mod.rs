//! Tile scraping engine
//!
//! The registry owns per-tile retry state, workers fetch chunks of tiles,
//! and the scheduler runs outer iterations with failure-cycle accounting
//! until every tile has either succeeded or struck out.

pub mod progress;
pub mod registry;
pub mod scheduler;
pub mod updater;
pub mod worker;

pub use progress::{EtaReport, ProgressTracker, ScrapeCycleStats};
pub use registry::{TileRegistry, TileState, ATTEMPT_CAP, MAX_FAILS, SENDS_PER_CYCLE};
pub use scheduler::{IterationReport, ScrapeSummary, Scheduler, SchedulerConfig};
pub use updater::{PortalDetailUpdater, UpdateSummary};
pub use worker::{ChunkOutcome, FetchWorker, TileOutcome, WorkerConfig};
