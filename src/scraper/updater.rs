//! Portal detail updater
//!
//! Fills in the names and images of gyms and stops that were imported
//! without them, one `getPortalDetails` request at a time.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::intel::MapTransport;
use crate::metrics;
use crate::models::PointKind;
use crate::storage::SharedPortalSink;
use crate::utils::retry::{with_retry_if, RetryConfig};

/// Counts for one kind of point
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub found: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Sequential detail lookups for unnamed points
pub struct PortalDetailUpdater {
    transport: Arc<dyn MapTransport>,
    sink: SharedPortalSink,
    retry: RetryConfig,
}

impl PortalDetailUpdater {
    pub fn new(transport: Arc<dyn MapTransport>, sink: SharedPortalSink) -> Self {
        Self {
            transport,
            sink,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Update every unnamed point of `kind`
    ///
    /// Only listing the points can fail; errors on single points are logged
    /// and counted.
    pub async fn update_missing(&self, kind: PointKind) -> Result<UpdateSummary> {
        let points = self.sink.fetch_portals_missing_name(kind)?;
        let mut summary = UpdateSummary {
            found: points.len(),
            ..Default::default()
        };
        tracing::info!(kind = %kind, count = points.len(), "Found points without a name");

        for point in points {
            let detail = with_retry_if(
                &self.retry,
                || self.transport.fetch_portal_detail(&point.id),
                |e| e.is_recoverable(),
            )
            .await;

            let detail = match detail {
                Ok(detail) => detail,
                Err(e) => {
                    let e = Error::from(e);
                    tracing::warn!(
                        kind = %kind,
                        id = %point.id,
                        category = e.category().as_str(),
                        error = %e,
                        "Couldn't get portal info"
                    );
                    metrics::record_detail("failed");
                    summary.failed += 1;
                    continue;
                }
            };

            match self
                .sink
                .update_point_name(kind, &point.id, &detail.name, &detail.image_url)
            {
                Ok(_) => {
                    tracing::info!(kind = %kind, id = %point.id, name = %detail.name, "Updated point");
                    metrics::record_detail("updated");
                    summary.updated += 1;
                }
                Err(e) => {
                    tracing::error!(kind = %kind, id = %point.id, error = %e, "Could not update point");
                    metrics::record_detail("failed");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            kind = %kind,
            updated = summary.updated,
            failed = summary.failed,
            "Finished updating points"
        );
        Ok(summary)
    }

    /// Update gyms, then stops
    ///
    /// A kind whose points cannot be listed is logged and skipped; the next
    /// kind still runs.
    pub async fn update_all(&self) -> Vec<(PointKind, Result<UpdateSummary>)> {
        let mut results = Vec::with_capacity(2);
        for kind in PointKind::all() {
            let result = self.update_missing(kind).await;
            if let Err(e) = &result {
                tracing::error!(kind = %kind, error = %e, "Could not list points, skipping");
            }
            results.push((kind, result));
        }
        results
    }
}
