//! Progress estimation and failure histograms
//!
//! The ETA is a moving average over the last [`ETA_WINDOW`] iteration
//! durations multiplied by the iterations still expected. The histogram
//! buckets tiles by how many failure cycles they went through, split into
//! tiles still failing and tiles that recovered.

use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::registry::{TileState, MAX_FAILS};
use crate::utils::format_hms;

/// Number of recent iterations averaged for the ETA
pub const ETA_WINDOW: usize = 100;

/// Histogram buckets: failure cycle counts 1..MAX_FAILS-1
const BUCKETS: usize = (MAX_FAILS - 1) as usize;

/// Iterations needed to drain `needed` tiles at `max_tiles` per iteration
pub fn remaining_iterations(needed: usize, max_tiles: usize) -> u64 {
    if max_tiles == 0 {
        return 0;
    }
    needed.div_ceil(max_tiles) as u64
}

/// Moving-average progress tracker
#[derive(Debug)]
pub struct ProgressTracker {
    started: Instant,
    durations: VecDeque<Duration>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    pub fn started_at(started: Instant) -> Self {
        Self {
            started,
            durations: VecDeque::with_capacity(ETA_WINDOW),
        }
    }

    /// Record one iteration's duration, keeping only the last [`ETA_WINDOW`]
    pub fn record(&mut self, duration: Duration) {
        if self.durations.len() == ETA_WINDOW {
            self.durations.pop_front();
        }
        self.durations.push_back(duration);
    }

    /// Average of the recorded durations
    pub fn average(&self) -> Option<Duration> {
        if self.durations.is_empty() {
            return None;
        }
        let total: Duration = self.durations.iter().sum();
        Some(total / self.durations.len() as u32)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Estimate the time left, or `None` before any iteration was recorded
    pub fn eta(&self, iteration: u64, remaining_iterations: u64) -> Option<EtaReport> {
        let average = self.average()?;
        let eta = average.saturating_mul(remaining_iterations.min(u32::MAX as u64) as u32);
        let target = Local::now()
            + chrono::Duration::from_std(eta).unwrap_or_else(|_| chrono::Duration::zero());

        Some(EtaReport {
            iteration,
            remaining_iterations,
            average,
            eta,
            elapsed: self.elapsed(),
            target,
        })
    }
}

/// One ETA estimate
#[derive(Debug, Clone)]
pub struct EtaReport {
    pub iteration: u64,
    pub remaining_iterations: u64,
    pub average: Duration,
    pub eta: Duration,
    pub elapsed: Duration,
    pub target: DateTime<Local>,
}

impl fmt::Display for EtaReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Iteration: {}/{} ETA: {}s Elapsed: {} Target: {}",
            self.iteration,
            self.iteration + self.remaining_iterations,
            self.eta.as_secs(),
            format_hms(self.elapsed),
            self.target.format("%Y-%m-%d %H:%M:%S"),
        )
    }
}

/// Snapshot of tile outcomes by failure cycle count
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapeCycleStats {
    pub total: usize,
    pub succeeded: usize,
    /// Successful without ever being struck
    pub clean_success: usize,
    /// Unsuccessful and never struck yet
    pub pending: usize,
    /// Struck out at [`MAX_FAILS`]
    pub exhausted: usize,
    /// `failed[n - 1]`: unsuccessful tiles with `n` failure cycles
    pub failed: [usize; BUCKETS],
    /// `recovered[n - 1]`: successful tiles with `n` failure cycles
    pub recovered: [usize; BUCKETS],
}

impl ScrapeCycleStats {
    pub fn from_tiles(tiles: &[Arc<TileState>]) -> Self {
        let mut stats = Self {
            total: tiles.len(),
            ..Default::default()
        };

        for tile in tiles {
            let cycles = tile.failure_cycles() as usize;
            let success = tile.is_success();
            if success {
                stats.succeeded += 1;
            }

            match (success, cycles) {
                (true, 0) => stats.clean_success += 1,
                (false, 0) => stats.pending += 1,
                (_, n) if n > BUCKETS => stats.exhausted += 1,
                (true, n) => stats.recovered[n - 1] += 1,
                (false, n) => stats.failed[n - 1] += 1,
            }
        }

        stats
    }

    pub fn failed_total(&self) -> usize {
        self.failed.iter().sum()
    }

    pub fn recovered_total(&self) -> usize {
        self.recovered.iter().sum()
    }

    fn format_buckets(buckets: &[usize; BUCKETS]) -> String {
        buckets
            .iter()
            .enumerate()
            .map(|(i, count)| format!("{} = {count:<8}", i + 1))
            .collect::<Vec<_>>()
            .join(" | ")
    }

    /// `Failed: 1 = n | 2 = n ...`
    pub fn failed_line(&self) -> String {
        format!("Failed: {}", Self::format_buckets(&self.failed))
    }

    /// `Recovered: 1 = n | 2 = n ...`
    pub fn recovered_line(&self) -> String {
        format!("Recovered: {}", Self::format_buckets(&self.recovered))
    }
}

impl fmt::Display for ScrapeCycleStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total: {} Success: {} Pending: {} Exhausted: {}",
            self.total, self.succeeded, self.pending, self.exhausted
        )
    }
}
