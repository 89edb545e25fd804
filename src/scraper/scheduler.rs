//! Scrape scheduler
//!
//! Drives outer iterations until no tile is left to work on:
//!
//! ```text
//!   ┌──────────┐   ┌──────────┐   ┌─────────┐   ┌───────────┐   ┌──────────┐
//!   │  SELECT  │──▶│ DISPATCH │──▶│ PERSIST │──▶│ RECONCILE │──▶│ COOLDOWN │──┐
//!   └──────────┘   └──────────┘   └─────────┘   └───────────┘   └──────────┘  │
//!        │ ▲                                                                   │
//!        │ └───────────────────────────────────────────────────────────────────┘
//!        ▼
//!      DONE (no needed tiles)
//! ```
//!
//! DISPATCH runs chunk fetches with bounded concurrency and merges the
//! per-chunk portal buffers once every chunk has returned. RECONCILE is the
//! only place a failure-cycle strike is recorded. Nothing in a single
//! iteration is fatal to the loop.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

use super::progress::{remaining_iterations, ProgressTracker, ScrapeCycleStats};
use super::registry::{TileRegistry, TileState};
use super::worker::{ChunkOutcome, FetchWorker, WorkerConfig};
use crate::config::Config;
use crate::error::Error;
use crate::intel::MapTransport;
use crate::metrics;
use crate::models::PortalRecord;
use crate::storage::SharedPortalSink;

/// Iterations between ETA and histogram reports
pub const REPORT_EVERY: u64 = 10;

// ============================================================================
// Configuration
// ============================================================================

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Chunks fetched concurrently
    pub workers: usize,

    /// Tiles selected per outer iteration
    pub max_tiles: usize,

    /// Tiles per chunk
    pub tiles_per_worker: usize,

    /// Pause between outer iterations
    pub cooldown: Duration,

    /// Iterations between progress reports
    pub report_every: u64,

    pub worker: WorkerConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            max_tiles: 2000,
            tiles_per_worker: 15,
            cooldown: Duration::from_secs(60),
            report_every: REPORT_EVERY,
            worker: WorkerConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.scraper.workers,
            max_tiles: config.scraper.max_tiles,
            tiles_per_worker: config.scraper.tiles_per_worker,
            cooldown: config.cooldown(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Reports
// ============================================================================

/// What happened during one outer iteration
#[derive(Debug, Clone, Default)]
pub struct IterationReport {
    pub iteration: u64,
    /// Tiles in the working set
    pub selected: usize,
    pub chunks: usize,
    pub succeeded: usize,
    pub requests: u32,
    /// Chunks abandoned after transport retries ran out
    pub aborted_chunks: usize,
    pub portals: usize,
    /// Portals accepted by the sink
    pub persisted: usize,
    pub persist_failed: bool,
    /// Failure-cycle strikes recorded in RECONCILE
    pub strikes: usize,
    /// Time spent, cooldown excluded
    pub duration: Duration,
}

/// Totals of a full scheduler run
#[derive(Debug, Clone, Default)]
pub struct ScrapeSummary {
    pub iterations: u64,
    pub tiles: usize,
    pub succeeded: usize,
    pub exhausted: usize,
    pub portals_found: usize,
    pub portals_persisted: usize,
    pub persist_failures: usize,
    pub strikes: usize,
    pub requests: u64,
    pub elapsed: Duration,
}

impl ScrapeSummary {
    fn absorb(&mut self, report: &IterationReport) {
        self.iterations = report.iteration;
        self.portals_found += report.portals;
        self.portals_persisted += report.persisted;
        self.persist_failures += usize::from(report.persist_failed);
        self.strikes += report.strikes;
        self.requests += u64::from(report.requests);
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Outer scrape loop over a [`TileRegistry`]
pub struct Scheduler {
    registry: TileRegistry,
    worker: FetchWorker,
    sink: SharedPortalSink,
    config: SchedulerConfig,
    progress: ProgressTracker,
}

impl Scheduler {
    pub fn new(
        registry: TileRegistry,
        transport: Arc<dyn MapTransport>,
        sink: SharedPortalSink,
        config: SchedulerConfig,
    ) -> Self {
        let worker = FetchWorker::new(transport, config.worker.clone());
        Self {
            registry,
            worker,
            sink,
            config,
            progress: ProgressTracker::new(),
        }
    }

    pub fn registry(&self) -> &TileRegistry {
        &self.registry
    }

    /// Snapshot of the failure histogram
    pub fn stats(&self) -> ScrapeCycleStats {
        ScrapeCycleStats::from_tiles(self.registry.tiles())
    }

    /// Run until no tile is needed
    pub async fn run(&mut self) -> ScrapeSummary {
        let started = Instant::now();
        let mut summary = ScrapeSummary {
            tiles: self.registry.len(),
            ..Default::default()
        };
        let mut iteration = 0u64;

        tracing::info!(
            tiles = self.registry.len(),
            needed = self.registry.needed_count(),
            workers = self.config.workers,
            max_tiles = self.config.max_tiles,
            tiles_per_worker = self.config.tiles_per_worker,
            "Starting scrape"
        );

        loop {
            // SELECT
            let needed = self.registry.needed();
            if needed.is_empty() {
                break;
            }
            iteration += 1;

            let span = tracing::info_span!("iteration", iteration);
            let report = self.run_iteration(iteration, needed).instrument(span).await;

            self.progress.record(report.duration);
            metrics::record_iteration(report.duration);
            summary.absorb(&report);

            let remaining = self.registry.needed_count();
            metrics::set_needed_tiles(remaining);

            tracing::info!(
                iteration,
                tiles = report.selected,
                succeeded = report.succeeded,
                failed = report.strikes,
                portals = report.portals,
                requests = report.requests,
                remaining,
                duration_secs = report.duration.as_secs_f64(),
                "Iteration finished"
            );

            // COOLDOWN
            if remaining == 0 {
                break;
            }
            if self.config.report_every > 0 && iteration % self.config.report_every == 0 {
                self.report_progress(iteration, remaining);
            }
            if !self.config.cooldown.is_zero() {
                tracing::info!(
                    cooldown_secs = self.config.cooldown.as_secs(),
                    "Cooling down before next iteration"
                );
                tokio::time::sleep(self.config.cooldown).await;
            }
        }

        // DONE
        summary.succeeded = self.registry.success_count();
        summary.exhausted = self.registry.exhausted_count();
        summary.elapsed = started.elapsed();

        let stats = self.stats();
        tracing::info!(
            iterations = summary.iterations,
            succeeded = summary.succeeded,
            exhausted = summary.exhausted,
            portals = summary.portals_persisted,
            "Scrape finished: {}",
            stats
        );
        tracing::info!("{}", stats.failed_line());
        tracing::info!("{}", stats.recovered_line());

        summary
    }

    /// One DISPATCH, PERSIST and RECONCILE pass over the selected tiles
    async fn run_iteration(&self, iteration: u64, needed: Vec<Arc<TileState>>) -> IterationReport {
        let started = Instant::now();
        let working: Vec<Arc<TileState>> = needed.into_iter().take(self.config.max_tiles).collect();
        let chunk_size = self.config.tiles_per_worker.max(1);

        let mut report = IterationReport {
            iteration,
            selected: working.len(),
            chunks: working.len().div_ceil(chunk_size),
            ..Default::default()
        };

        // DISPATCH
        let outcomes: Vec<ChunkOutcome> = stream::iter(working.chunks(chunk_size))
            .map(|chunk| self.worker.scrape_chunk(chunk))
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await;

        let mut batch: Vec<PortalRecord> = Vec::new();
        for outcome in outcomes {
            report.succeeded += outcome.succeeded;
            report.requests += outcome.requests;
            report.aborted_chunks += usize::from(outcome.aborted);
            batch.extend(outcome.portals);
        }
        report.portals = batch.len();

        // PERSIST
        if !batch.is_empty() {
            match self.persist(batch).await {
                Ok(count) => {
                    report.persisted = count;
                    metrics::record_portals_upserted(count);
                    tracing::info!(portals = count, "Updated portals");
                }
                Err(e) => {
                    report.persist_failed = true;
                    metrics::record_persist_failure();
                    tracing::error!(
                        portals = report.portals,
                        category = e.category().as_str(),
                        error = %e,
                        "Failed to persist portals, dropping batch"
                    );
                }
            }
        }

        // RECONCILE
        report.strikes = working.iter().filter(|tile| tile.close_failed_cycle()).count();
        metrics::record_strikes(report.strikes);

        if report.aborted_chunks > 0 {
            tracing::warn!(
                aborted = report.aborted_chunks,
                chunks = report.chunks,
                "Chunks abandoned after transport failures"
            );
        }

        report.duration = started.elapsed();
        report
    }

    /// Upsert a batch on the blocking pool
    async fn persist(&self, batch: Vec<PortalRecord>) -> crate::error::Result<usize> {
        let sink = Arc::clone(&self.sink);
        tokio::task::spawn_blocking(move || sink.bulk_upsert_portals(&batch))
            .await
            .unwrap_or_else(|e| Err(Error::other(format!("persist task failed: {e}"))))
    }

    fn report_progress(&self, iteration: u64, remaining: usize) {
        let left = remaining_iterations(remaining, self.config.max_tiles);
        if let Some(eta) = self.progress.eta(iteration, left) {
            tracing::info!("{}", eta);
        }

        let stats = self.stats();
        tracing::info!("{}", stats);
        tracing::info!("{}", stats.failed_line());
        tracing::info!("{}", stats.recovered_line());
    }
}
