//! Fetch worker
//!
//! Processes one chunk of tiles: sends a combined `getEntities` request,
//! classifies every tile of the answer and re-sends the failed ones until
//! they succeed, hit the attempt cap, or the round limit is reached.
//!
//! ```text
//!  pending ──▶ reserve attempt ──▶ getEntities ──┬─ transport error (after retries) ──▶ abort
//!     ▲        (skip tiles at cap)               ├─ payload error ──▶ pending unchanged
//!     │                                          └─ map ──▶ classify each tile
//!     │                                                        │
//!     └──────────────── soft failures ◀────────────────────────┘
//! ```
//!
//! Tiles left unsuccessful are not touched here; the scheduler closes their
//! cycle once every chunk has finished.

use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::registry::{TileState, SENDS_PER_CYCLE};
use crate::error::Error;
use crate::intel::{MapTransport, TilePayload};
use crate::metrics;
use crate::models::PortalRecord;
use crate::utils::error::EntitiesError;
use crate::utils::retry::{with_retry_if, RetryConfig};

/// Worker tuning
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Transport retries per request (immediate, no backoff)
    pub transport_retry: RetryConfig,

    /// Requests per chunk call before giving up on the remaining tiles
    pub max_rounds: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            transport_retry: RetryConfig::immediate(3),
            max_rounds: SENDS_PER_CYCLE,
        }
    }
}

/// How a single tile of a response was classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileOutcome {
    /// Tile had entities; carries the number of portals extracted
    Success(usize),
    /// Tile key absent from the response map
    Missing,
    /// Tile carried an explicit error marker
    Error(String),
    /// Tile had no entities
    Empty,
    /// An entity row could not be decoded
    Malformed(String),
}

impl TileOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Counters and output of one chunk call
#[derive(Debug, Default)]
pub struct ChunkOutcome {
    /// Portals extracted from successful tiles
    pub portals: Vec<PortalRecord>,
    /// Tiles marked successful
    pub succeeded: usize,
    /// HTTP requests issued, transport retries included
    pub requests: u32,
    /// Rounds (distinct tile sets sent)
    pub rounds: u32,
    /// Responses that were empty or unparsable
    pub payload_errors: u32,
    /// Tiles missing, erroring or empty
    pub tile_errors: u32,
    /// Tiles with undecodable entity rows
    pub malformed: u32,
    /// Transport failed on every retry and the chunk was abandoned
    pub aborted: bool,
}

/// Fetches chunks of tiles through a [`MapTransport`]
#[derive(Clone)]
pub struct FetchWorker {
    transport: Arc<dyn MapTransport>,
    config: WorkerConfig,
}

impl FetchWorker {
    pub fn new(transport: Arc<dyn MapTransport>, config: WorkerConfig) -> Self {
        Self { transport, config }
    }

    /// Run one fetch cycle over `tiles`
    pub async fn scrape_chunk(&self, tiles: &[Arc<TileState>]) -> ChunkOutcome {
        let mut outcome = ChunkOutcome::default();
        let mut pending: Vec<Arc<TileState>> = tiles.to_vec();

        while !pending.is_empty() {
            if outcome.rounds >= self.config.max_rounds {
                tracing::debug!(
                    remaining = pending.len(),
                    rounds = outcome.rounds,
                    "Round limit reached, leaving tiles for reconciliation"
                );
                break;
            }

            let sending: Vec<Arc<TileState>> = pending
                .into_iter()
                .filter(|tile| tile.try_begin_attempt())
                .collect();
            if sending.is_empty() {
                break;
            }
            outcome.rounds += 1;

            let keys: Vec<String> = sending.iter().map(|t| t.key().to_string()).collect();
            let requests = AtomicU32::new(0);
            let (transport, keys_ref, counter) = (self.transport.as_ref(), &keys, &requests);

            let result = with_retry_if(
                &self.config.transport_retry,
                move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                    transport.fetch_entities(keys_ref)
                },
                |e| matches!(e, EntitiesError::Transport(_)),
            )
            .await;
            outcome.requests += requests.into_inner();

            let map = match result {
                Ok(map) => map,
                Err(EntitiesError::Payload(e)) => {
                    metrics::record_fetch("payload_error");
                    tracing::debug!(tiles = sending.len(), error = %e, "Re-sending tile set");
                    outcome.payload_errors += 1;
                    pending = sending;
                    continue;
                }
                Err(e) => {
                    let e = Error::from(e);
                    metrics::record_fetch("transport_error");
                    tracing::warn!(
                        tiles = sending.len(),
                        attempts = self.config.transport_retry.max_attempts(),
                        category = e.category().as_str(),
                        error = %e,
                        "Transport failed, abandoning chunk"
                    );
                    outcome.aborted = true;
                    break;
                }
            };
            metrics::record_fetch("ok");

            let seen_at = Utc::now();
            let mut errors = Vec::new();

            for tile in sending {
                let result = classify_tile(map.get(tile.key()), seen_at, &mut outcome.portals);
                match result {
                    TileOutcome::Success(_) => {
                        tile.mark_success();
                        outcome.succeeded += 1;
                    }
                    TileOutcome::Malformed(reason) => {
                        tracing::debug!(tile = %tile.key(), reason = %reason, "Malformed tile");
                        outcome.malformed += 1;
                        errors.push(tile);
                    }
                    TileOutcome::Missing | TileOutcome::Error(_) | TileOutcome::Empty => {
                        outcome.tile_errors += 1;
                        errors.push(tile);
                    }
                }
            }

            pending = errors;
        }

        metrics::record_tiles_succeeded(outcome.succeeded);
        outcome
    }
}

/// Classify one tile's payload, appending its portals to `portals` on success
pub fn classify_tile(
    payload: Option<&TilePayload>,
    seen_at: chrono::DateTime<Utc>,
    portals: &mut Vec<PortalRecord>,
) -> TileOutcome {
    match payload {
        None => TileOutcome::Missing,
        Some(TilePayload::Error(message)) => TileOutcome::Error(message.clone()),
        Some(TilePayload::Malformed(reason)) => TileOutcome::Malformed(reason.clone()),
        Some(TilePayload::Entities(entities)) if entities.is_empty() => TileOutcome::Empty,
        Some(TilePayload::Entities(entities)) => {
            let before = portals.len();
            portals.extend(entities.iter().filter_map(|entity| {
                entity.as_portal().map(|portal| {
                    PortalRecord::new(
                        entity.guid.clone(),
                        portal.name.clone(),
                        portal.image_url.clone(),
                        portal.lat(),
                        portal.lon(),
                        seen_at,
                    )
                })
            }));
            TileOutcome::Success(portals.len() - before)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::TileCoord;
    use crate::intel::{EntityData, EntityMap, MapEntity, PortalEntity};
    use crate::models::PortalDetail;
    use crate::scraper::registry::ATTEMPT_CAP;
    use crate::utils::error::{FetchError, PayloadError};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    type Reply = Result<EntityMap, EntitiesError>;

    /// Transport replaying a fixed script, then falling back to a closure
    struct Scripted {
        replies: Mutex<VecDeque<Reply>>,
        fallback: Box<dyn Fn(&[String]) -> Reply + Send + Sync>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(
            replies: Vec<Reply>,
            fallback: impl Fn(&[String]) -> Reply + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                fallback: Box::new(fallback),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MapTransport for Scripted {
        async fn fetch_entities(&self, keys: &[String]) -> Result<EntityMap, EntitiesError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.replies.lock().unwrap().pop_front();
            next.unwrap_or_else(|| (self.fallback)(keys))
        }

        async fn fetch_portal_detail(&self, _guid: &str) -> Result<PortalDetail, FetchError> {
            Err(FetchError::Timeout)
        }
    }

    fn portal(guid: &str) -> MapEntity {
        MapEntity {
            guid: guid.to_string(),
            timestamp: None,
            data: EntityData::Portal(PortalEntity {
                lat_e6: 51_500_000,
                lng_e6: -100_000,
                name: format!("Portal {guid}"),
                image_url: String::new(),
            }),
        }
    }

    fn tiles(n: i64) -> Vec<Arc<TileState>> {
        (0..n)
            .map(|x| Arc::new(TileState::new(TileCoord::new(15, x, 0))))
            .collect()
    }

    fn transport_error() -> Reply {
        Err(EntitiesError::Transport(FetchError::ServerError(503)))
    }

    fn empty_tiles(keys: &[String]) -> Reply {
        Ok(keys
            .iter()
            .map(|k| (k.clone(), TilePayload::Entities(Vec::new())))
            .collect())
    }

    #[test]
    fn test_classify_tile_extracts_only_portals() {
        let mut portals = Vec::new();
        let payload = TilePayload::Entities(vec![
            portal("a"),
            MapEntity {
                guid: "link".to_string(),
                timestamp: None,
                data: EntityData::Other("e".to_string()),
            },
            portal("b"),
        ]);

        let outcome = classify_tile(Some(&payload), Utc::now(), &mut portals);
        assert_eq!(outcome, TileOutcome::Success(2));
        assert_eq!(portals[0].id, "a");
        assert!((portals[1].lat - 51.5).abs() < 1e-9);
        assert!((portals[1].lon + 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_classify_soft_failures() {
        let mut portals = Vec::new();
        let now = Utc::now();
        assert_eq!(classify_tile(None, now, &mut portals), TileOutcome::Missing);
        assert_eq!(
            classify_tile(Some(&TilePayload::Entities(vec![])), now, &mut portals),
            TileOutcome::Empty
        );
        assert!(matches!(
            classify_tile(Some(&TilePayload::Error("TIMEOUT".into())), now, &mut portals),
            TileOutcome::Error(_)
        ));
        assert!(!TileOutcome::Empty.is_success());
        assert!(portals.is_empty());
    }

    #[tokio::test]
    async fn test_success_after_k_attempts() {
        let chunk = tiles(1);
        let key = chunk[0].key().to_string();
        let script = vec![
            Ok([(key.clone(), TilePayload::Error("TIMEOUT".into()))].into()),
            Ok(EntityMap::new()),
            Ok([(key.clone(), TilePayload::Entities(vec![portal("p1")]))].into()),
        ];
        let transport = Scripted::new(script, empty_tiles);
        let worker = FetchWorker::new(transport.clone(), WorkerConfig::default());

        let outcome = worker.scrape_chunk(&chunk).await;

        assert!(chunk[0].is_success());
        assert_eq!(chunk[0].attempt_count(), 3);
        assert_eq!(chunk[0].failure_cycles(), 0);
        assert_eq!(outcome.portals.len(), 1);
        assert_eq!(outcome.tile_errors, 2);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_transport_failures_then_mixed_response() {
        let chunk = tiles(3);
        let keys: Vec<String> = chunk.iter().map(|t| t.key().to_string()).collect();
        let mixed: EntityMap = [
            (
                keys[0].clone(),
                TilePayload::Entities(vec![portal("p1"), portal("p2")]),
            ),
            (keys[1].clone(), TilePayload::Entities(vec![])),
            (keys[2].clone(), TilePayload::Entities(vec![])),
        ]
        .into();
        let script = vec![transport_error(), transport_error(), transport_error(), Ok(mixed)];
        let transport = Scripted::new(script, empty_tiles);
        let worker = FetchWorker::new(transport.clone(), WorkerConfig::default());

        let outcome = worker.scrape_chunk(&chunk).await;

        assert!(chunk[0].is_success());
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.portals.len(), 2);
        assert!(!outcome.aborted);
        for tile in &chunk[1..] {
            assert!(!tile.is_success());
            assert_eq!(tile.attempt_count(), SENDS_PER_CYCLE);
            assert!(tile.is_at_cap());
        }
        // 4 requests for the first round, then one per round for the empty pair
        assert_eq!(transport.calls(), 4 + (SENDS_PER_CYCLE - 1));
        assert_eq!(outcome.rounds, SENDS_PER_CYCLE);
    }

    #[tokio::test]
    async fn test_transport_exhaustion_aborts_chunk() {
        let chunk = tiles(2);
        let transport = Scripted::new(Vec::new(), |_| transport_error());
        let worker = FetchWorker::new(transport.clone(), WorkerConfig::default());

        let outcome = worker.scrape_chunk(&chunk).await;

        assert!(outcome.aborted);
        assert_eq!(outcome.requests, 4);
        assert_eq!(transport.calls(), 4);
        for tile in &chunk {
            assert_eq!(tile.attempt_count(), 1);
            assert!(!tile.is_success());
        }
    }

    #[tokio::test]
    async fn test_payload_errors_are_bounded() {
        let chunk = tiles(2);
        let transport = Scripted::new(Vec::new(), |_| {
            Err(EntitiesError::Payload(PayloadError::Empty))
        });
        let worker = FetchWorker::new(transport.clone(), WorkerConfig::default());

        let outcome = worker.scrape_chunk(&chunk).await;

        assert_eq!(outcome.payload_errors, SENDS_PER_CYCLE);
        assert_eq!(transport.calls(), SENDS_PER_CYCLE);
        assert!(chunk.iter().all(|t| t.attempt_count() == SENDS_PER_CYCLE));
    }

    #[tokio::test]
    async fn test_empty_tile_sent_through_attempt_cap() {
        let chunk = tiles(1);
        let transport = Scripted::new(Vec::new(), empty_tiles);
        let worker = FetchWorker::new(transport.clone(), WorkerConfig::default());

        let outcome = worker.scrape_chunk(&chunk).await;

        // attempt counts 0 through ATTEMPT_CAP each get one send
        assert_eq!(transport.calls(), ATTEMPT_CAP + 1);
        assert_eq!(outcome.tile_errors, ATTEMPT_CAP + 1);
        assert_eq!(chunk[0].attempt_count(), ATTEMPT_CAP + 1);
        assert!(!chunk[0].is_success());
    }

    #[tokio::test]
    async fn test_round_limit_stops_before_cap() {
        let chunk = tiles(1);
        let transport = Scripted::new(Vec::new(), empty_tiles);
        let config = WorkerConfig {
            max_rounds: 2,
            ..Default::default()
        };
        let worker = FetchWorker::new(transport.clone(), config);

        worker.scrape_chunk(&chunk).await;

        assert_eq!(transport.calls(), 2);
        assert_eq!(chunk[0].attempt_count(), 2);
    }

    #[tokio::test]
    async fn test_tiles_at_cap_are_skipped() {
        let chunk = tiles(1);
        while chunk[0].try_begin_attempt() {}
        let transport = Scripted::new(Vec::new(), empty_tiles);
        let worker = FetchWorker::new(transport.clone(), WorkerConfig::default());

        let outcome = worker.scrape_chunk(&chunk).await;

        assert_eq!(transport.calls(), 0);
        assert_eq!(outcome.rounds, 0);
    }
}
