//! # Pass Report
//!
//! Per-pass counters for every entity type and for the media pipeline, plus the panorama
//! completeness check run against the store at the end of a pass.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::AddAssign;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::EntityKind;
use crate::infrastructure::entity_store::{FrameSetSummary, UpsertOutcome};

/// Upsert outcomes and skipped records for one entity type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Records whose key could not be resolved.
    pub rejected: u64,
    /// Records the store failed to write.
    pub store_errors: u64,
}

impl EntityCounts {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }

    #[must_use]
    pub const fn written(&self) -> u64 {
        self.inserted + self.updated
    }

    #[must_use]
    pub const fn skipped(&self) -> u64 {
        self.rejected + self.store_errors
    }
}

/// Media pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStats {
    pub downloaded: u64,
    pub bytes: u64,
    pub cache_hits: u64,
    /// Transient failures that exhausted their retries; retried next pass.
    pub deferred: u64,
    pub failed: u64,
    /// Assets not attempted because the pass was cancelled.
    pub cancelled: u64,
}

impl AddAssign for MediaStats {
    fn add_assign(&mut self, other: Self) {
        self.downloaded += other.downloaded;
        self.bytes += other.bytes;
        self.cache_hits += other.cache_hits;
        self.deferred += other.deferred;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
    }
}

/// A listing call that failed and took its branch with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingFailure {
    pub listing: String,
    pub error: String,
}

/// A stored panorama frame set that is not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error(
    "panorama spec {spec_id} color {color_id} is partial: {frame_count} frames, {missing_frames} gaps, {without_local_path} not downloaded"
)]
pub struct PartialPanoramaError {
    pub spec_id: i64,
    pub color_id: i64,
    pub frame_count: i64,
    /// Sequence numbers absent below the highest stored one.
    pub missing_frames: i64,
    pub without_local_path: i64,
}

/// Frame sets with sequence gaps or frames still lacking a local file.
///
/// A color with no stored frames at all is not reported: its listing may legitimately be empty.
#[must_use]
pub fn completeness_report(summaries: &[FrameSetSummary]) -> Vec<PartialPanoramaError> {
    summaries
        .iter()
        .filter_map(|summary| {
            let max_seq = summary.max_seq?;
            let missing_frames = (max_seq + 1 - summary.frame_count).max(0);
            (missing_frames > 0 || summary.without_local_path > 0).then(|| PartialPanoramaError {
                spec_id: summary.spec_id,
                color_id: summary.color_id,
                frame_count: summary.frame_count,
                missing_frames,
                without_local_path: summary.without_local_path,
            })
        })
        .collect()
}

/// End-of-pass summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassReport {
    pub pass_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub entities: BTreeMap<EntityKind, EntityCounts>,
    pub media: MediaStats,
    pub listing_failures: Vec<ListingFailure>,
    /// Series left alone because they already had specifications.
    pub series_skipped: u64,
    /// Panorama colors whose frame listing was skipped on an unchanged `ext_id`.
    pub frame_listings_skipped: u64,
    pub partial_panoramas: Vec<PartialPanoramaError>,
    pub cancelled: bool,
}

impl Default for PassReport {
    fn default() -> Self {
        Self::new(Uuid::nil())
    }
}

impl PassReport {
    #[must_use]
    pub fn new(pass_id: Uuid) -> Self {
        Self {
            pass_id,
            started_at: Utc::now(),
            finished_at: None,
            entities: BTreeMap::new(),
            media: MediaStats::default(),
            listing_failures: Vec::new(),
            series_skipped: 0,
            frame_listings_skipped: 0,
            partial_panoramas: Vec::new(),
            cancelled: false,
        }
    }

    pub fn counts_mut(&mut self, kind: EntityKind) -> &mut EntityCounts {
        self.entities.entry(kind).or_default()
    }

    #[must_use]
    pub fn counts(&self, kind: EntityKind) -> EntityCounts {
        self.entities.get(&kind).copied().unwrap_or_default()
    }

    /// Records written (inserted or updated) across all entity types.
    #[must_use]
    pub fn total_written(&self) -> u64 {
        self.entities.values().map(EntityCounts::written).sum()
    }

    /// Records skipped through key rejection or store failure.
    #[must_use]
    pub fn total_skipped(&self) -> u64 {
        self.entities.values().map(EntityCounts::skipped).sum()
    }

    #[must_use]
    pub fn total_unchanged(&self) -> u64 {
        self.entities.values().map(|c| c.unchanged).sum()
    }
}

impl fmt::Display for PassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pass {}", self.pass_id)?;
        for (kind, counts) in &self.entities {
            writeln!(
                f,
                "  {kind:<16} inserted {:>6}  updated {:>6}  unchanged {:>6}  rejected {:>4}  store errors {:>4}",
                counts.inserted,
                counts.updated,
                counts.unchanged,
                counts.rejected,
                counts.store_errors
            )?;
        }
        writeln!(
            f,
            "  media            downloaded {} ({} bytes), cache hits {}, deferred {}, failed {}, cancelled {}",
            self.media.downloaded,
            self.media.bytes,
            self.media.cache_hits,
            self.media.deferred,
            self.media.failed,
            self.media.cancelled
        )?;
        writeln!(
            f,
            "  skipped          {} series, {} frame listings",
            self.series_skipped, self.frame_listings_skipped
        )?;
        for failure in &self.listing_failures {
            writeln!(f, "  listing failed   {}: {}", failure.listing, failure.error)?;
        }
        for partial in &self.partial_panoramas {
            writeln!(f, "  {partial}")?;
        }
        if self.cancelled {
            writeln!(f, "  pass was cancelled")?;
        }
        Ok(())
    }
}
