//! # Shared State Management
//!
//! State shared by every task of a sync pass: the cancellation token and the running report.

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::crawling::report::{ListingFailure, MediaStats, PassReport};
use crate::domain::EntityKind;
use crate::infrastructure::entity_store::UpsertOutcome;

/// Thread-safe shared state for one sync pass
#[derive(Debug)]
pub struct SharedState {
    /// Cancellation token for graceful shutdown
    pub cancellation_token: CancellationToken,

    report: RwLock<PassReport>,
}

impl SharedState {
    #[must_use]
    pub fn new(cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            report: RwLock::new(PassReport::default()),
        }
    }

    /// Starts a fresh report for `pass_id`.
    pub async fn begin_pass(&self, pass_id: Uuid) {
        *self.report.write().await = PassReport::new(pass_id);
    }

    pub async fn record_outcome(&self, kind: EntityKind, outcome: UpsertOutcome) {
        self.report.write().await.counts_mut(kind).record(outcome);
    }

    pub async fn record_rejection(&self, kind: EntityKind) {
        self.report.write().await.counts_mut(kind).rejected += 1;
    }

    pub async fn record_store_error(&self, kind: EntityKind) {
        self.report.write().await.counts_mut(kind).store_errors += 1;
    }

    pub async fn record_listing_failure(&self, listing: &str, error: &str) {
        self.report.write().await.listing_failures.push(ListingFailure {
            listing: listing.to_string(),
            error: error.to_string(),
        });
    }

    pub async fn record_series_skipped(&self) {
        self.report.write().await.series_skipped += 1;
    }

    pub async fn record_frame_listing_skipped(&self) {
        self.report.write().await.frame_listings_skipped += 1;
    }

    pub async fn add_media_stats(&self, stats: MediaStats) {
        self.report.write().await.media += stats;
    }

    /// Applies `finish` to the report and returns a copy of the result.
    pub async fn finish_pass(&self, finish: impl FnOnce(&mut PassReport) + Send) -> PassReport {
        let mut report = self.report.write().await;
        finish(&mut report);
        report.cancelled = self.cancellation_token.is_cancelled();
        report.finished_at = Some(chrono::Utc::now());
        report.clone()
    }

    pub async fn snapshot(&self) -> PassReport {
        self.report.read().await.clone()
    }
}
