//! # Sync Orchestrator
//!
//! Walks brand → series → specification and sequences the reconciler and the download queue.
//! A parent is always stored before any listing of its children starts, so an interrupted pass
//! leaves the store referentially consistent. A failed listing abandons only its own branch.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::crawling::media_fetcher::{MediaDownloader, MediaFetcher};
use crate::crawling::queues::{DownloadQueue, QueueError};
use crate::crawling::reconciler::Reconciler;
use crate::crawling::report::{PassReport, completeness_report};
use crate::crawling::retry::RetryPolicy;
use crate::crawling::state::SharedState;
use crate::domain::keys::{RawPanoramaColor, RawSeries};
use crate::domain::{
    AssetKey, ColorType, MediaRecord, PanoramaColor, PhotoCategory, PhotoColor, Series,
    Specification,
};
use crate::infrastructure::config::{AppConfig, MediaConfig, SyncConfig};
use crate::infrastructure::entity_store::{EntityStore, StoreError};
use crate::infrastructure::feed_client::{FeedSource, PhotoListing};
use crate::infrastructure::http_client::FetchError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Download queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Series-scoped context shared by its specifications.
struct SeriesContext {
    series: Series,
    photo_colors: Vec<PhotoColor>,
    photo_categories: Vec<PhotoCategory>,
}

pub struct SyncOrchestrator {
    feed: Arc<dyn FeedSource>,
    store: EntityStore,
    reconciler: Reconciler,
    fetcher: Arc<MediaFetcher>,
    state: Arc<SharedState>,
    retry: RetryPolicy,
    sync: SyncConfig,
    media: MediaConfig,
}

impl SyncOrchestrator {
    #[must_use]
    pub fn new(
        feed: Arc<dyn FeedSource>,
        store: EntityStore,
        downloader: Arc<dyn MediaDownloader>,
        config: &AppConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        let state = Arc::new(SharedState::new(cancellation_token.clone()));
        let retry = RetryPolicy::from_config(&config.retry);
        let fetcher = Arc::new(MediaFetcher::new(
            store.clone(),
            downloader,
            &config.media,
            retry.clone(),
            cancellation_token,
        ));
        Self {
            feed,
            reconciler: Reconciler::new(store.clone(), Arc::clone(&state)),
            store,
            fetcher,
            state,
            retry,
            sync: config.sync.clone(),
            media: config.media.clone(),
        }
    }

    #[must_use]
    pub fn shared_state(&self) -> Arc<SharedState> {
        Arc::clone(&self.state)
    }

    fn token(&self) -> &CancellationToken {
        &self.state.cancellation_token
    }

    /// Runs one full pass and returns its report.
    ///
    /// Listing and per-record failures end up in the report; only store failures while
    /// building the completeness report and worker panics are returned as errors.
    pub async fn run_pass(&self) -> Result<PassReport, SyncError> {
        let pass_id = Uuid::new_v4();
        self.state.begin_pass(pass_id).await;

        async {
            info!("🚀 Sync pass started");
            let queue = DownloadQueue::start(
                Arc::clone(&self.fetcher),
                self.media.workers,
                self.media.backpressure_threshold,
            );

            self.sync_brands(&queue).await;

            let media = queue.finish().await?;
            self.state.add_media_stats(media).await;

            let partial = completeness_report(&self.store.frame_set_summaries().await?);
            for gap in &partial {
                debug!("{}", gap);
            }
            let report = self
                .state
                .finish_pass(|report| report.partial_panoramas = partial)
                .await;

            info!(
                "✅ Sync pass finished: {} written, {} unchanged, {} skipped, {} downloads, {} deferred{}",
                report.total_written(),
                report.total_unchanged(),
                report.total_skipped(),
                report.media.downloaded,
                report.media.deferred,
                if report.cancelled { " (cancelled)" } else { "" }
            );
            Ok::<PassReport, SyncError>(report)
        }
        .instrument(info_span!("sync_pass", %pass_id))
        .await
    }

    /// Calls a listing with retries. `None` means the branch is abandoned.
    async fn list<T, F, Fut>(&self, listing: &str, call: F) -> Option<Vec<T>>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<Vec<T>, FetchError>> + Send,
    {
        if self.token().is_cancelled() {
            return None;
        }
        match self.retry.run(listing, self.token(), call).await {
            Ok(items) => Some(items),
            Err(FetchError::Cancelled) => None,
            Err(e) => {
                error!("❌ Listing {} failed: {}", listing, e);
                self.state
                    .record_listing_failure(listing, &e.to_string())
                    .await;
                None
            }
        }
    }

    async fn sync_brands(&self, queue: &DownloadQueue) {
        let Some(mut brands) = self.list("brands", || self.feed.list_brands()).await else {
            return;
        };
        if self.sync.brand_limit > 0 {
            brands.truncate(self.sync.brand_limit);
        }
        info!("Syncing {} brands", brands.len());

        for raw in brands {
            if self.token().is_cancelled() {
                break;
            }
            let Some(brand) = self.reconciler.reconcile(raw).await else {
                continue;
            };
            let brand_id = brand.record.id;

            let listing = format!("series of brand {brand_id}");
            let Some(series) = self
                .list(&listing, || self.feed.list_series(brand_id))
                .await
            else {
                continue;
            };

            stream::iter(series)
                .map(|raw| self.sync_series(raw, queue))
                .buffer_unordered(self.sync.metadata_concurrency.max(1))
                .collect::<Vec<()>>()
                .instrument(info_span!("brand", brand_id))
                .await;
        }
    }

    async fn sync_series(&self, raw: RawSeries, queue: &DownloadQueue) {
        if self.token().is_cancelled() {
            return;
        }
        let Some(series) = self.reconciler.reconcile(raw).await else {
            return;
        };
        let series = series.record;
        let series_id = series.id;

        async {
            if !self.sync.force_resync {
                match self.store.series_has_specifications(series_id).await {
                    Ok(true) => {
                        debug!("Series {} already synced, skipping", series_id);
                        self.state.record_series_skipped().await;
                        self.resume_pending_assets(series_id, queue).await;
                        return;
                    }
                    Ok(false) => {}
                    Err(e) => warn!("Could not check series {}: {}", series_id, e),
                }
            }

            let Some(specifications) = self
                .list(&format!("specifications of series {series_id}"), || {
                    self.feed.list_specifications(series_id)
                })
                .await
            else {
                return;
            };
            let specifications = self.reconciler.reconcile_all(specifications).await;

            if let Some(titles) = self
                .list(&format!("param titles of series {series_id}"), || {
                    self.feed.list_param_titles(series_id)
                })
                .await
            {
                self.reconciler.reconcile_all(titles).await;
            }

            let (photo_colors, photo_categories) = if self.sync.sync_photos {
                self.sync_photo_palette(series_id).await
            } else {
                (Vec::new(), Vec::new())
            };

            let context = SeriesContext {
                series,
                photo_colors,
                photo_categories,
            };
            let mut combinations_left = match self.sync.max_photo_combinations {
                0 => usize::MAX,
                cap => cap,
            };

            for specification in &specifications {
                if self.token().is_cancelled() {
                    break;
                }
                self.sync_specification(&context, specification, &mut combinations_left, queue)
                    .instrument(info_span!("specification", spec_id = specification.id))
                    .await;
            }
        }
        .instrument(info_span!("series", series_id))
        .await;
    }

    async fn sync_photo_palette(&self, series_id: i64) -> (Vec<PhotoColor>, Vec<PhotoCategory>) {
        let colors = match self
            .list(&format!("photo colors of series {series_id}"), || {
                self.feed.list_photo_colors(series_id)
            })
            .await
        {
            Some(colors) => self.reconciler.reconcile_all(colors).await,
            None => Vec::new(),
        };
        let categories = match self
            .list(&format!("photo categories of series {series_id}"), || {
                self.feed.list_photo_categories(series_id)
            })
            .await
        {
            Some(categories) => self.reconciler.reconcile_all(categories).await,
            None => Vec::new(),
        };
        (colors, categories)
    }

    async fn sync_specification(
        &self,
        context: &SeriesContext,
        specification: &Specification,
        combinations_left: &mut usize,
        queue: &DownloadQueue,
    ) {
        let series_id = context.series.id;
        let spec_id = specification.id;

        if let Some(values) = self
            .list(&format!("param values of spec {spec_id}"), || {
                self.feed.list_param_values(series_id, spec_id)
            })
            .await
        {
            self.reconciler.reconcile_all(values).await;
        }

        if self.sync.sync_photos {
            self.sync_photos(context, spec_id, combinations_left, queue)
                .await;
        }

        if self.sync.sync_panoramas {
            self.sync_panoramas(spec_id, queue).await;
        }
    }

    /// The (color, category) listings for one specification: exterior palette first.
    fn photo_listings(&self, context: &SeriesContext, spec_id: i64) -> Vec<PhotoListing> {
        let limit = match self.sync.max_colors {
            0 => usize::MAX,
            n => n,
        };
        let palette = |color_type: ColorType| {
            context
                .photo_colors
                .iter()
                .filter(move |color| color.color_type == color_type)
                .take(limit)
        };
        let categories: Vec<&PhotoCategory> = context
            .photo_categories
            .iter()
            .filter(|category| {
                self.sync.photo_categories.is_empty()
                    || self.sync.photo_categories.contains(&category.category_id)
            })
            .collect();

        palette(ColorType::Exterior)
            .chain(palette(ColorType::Interior))
            .flat_map(|color| {
                categories.iter().map(move |category| PhotoListing {
                    series_id: context.series.id,
                    spec_id,
                    category_id: category.category_id,
                    color_id: color.id,
                    is_interior: color.color_type.is_interior(),
                    page_size: self.sync.photo_page_size,
                })
            })
            .collect()
    }

    async fn sync_photos(
        &self,
        context: &SeriesContext,
        spec_id: i64,
        combinations_left: &mut usize,
        queue: &DownloadQueue,
    ) {
        for listing in self.photo_listings(context, spec_id) {
            if *combinations_left == 0 {
                debug!("Photo listing cap reached for series {}", context.series.id);
                return;
            }
            *combinations_left -= 1;

            let name = format!(
                "photos of spec {} category {} color {}",
                spec_id, listing.category_id, listing.color_id
            );
            let Some(photos) = self.list(&name, || self.feed.list_photos(&listing)).await else {
                continue;
            };
            for photo in self.reconciler.reconcile_all(photos).await {
                if self.media.download_photos
                    && photo.remote_url.is_some()
                    && !self.enqueue(photo.asset_key(), queue).await
                {
                    return;
                }
            }
        }
    }

    async fn sync_panoramas(&self, spec_id: i64, queue: &DownloadQueue) {
        let Some(colors) = self
            .list(&format!("panorama colors of spec {spec_id}"), || {
                self.feed.list_panorama_colors(spec_id)
            })
            .await
        else {
            return;
        };

        for raw in colors {
            if self.token().is_cancelled() {
                return;
            }
            self.sync_panorama_color(raw, queue).await;
        }
    }

    /// The color's `ext_id` is the watermark for its frame set. It is committed only after the
    /// frames it describes are stored, so an interrupted listing is repeated on the next pass.
    async fn sync_panorama_color(&self, raw: RawPanoramaColor, queue: &DownloadQueue) {
        let Some(staged) = self
            .reconciler
            .stage(raw, |held: &mut PanoramaColor, stored: Option<&PanoramaColor>| {
                held.ext_id = stored.and_then(|color| color.ext_id);
            })
            .await
        else {
            return;
        };
        let color: &PanoramaColor = staged.observed();
        let (spec_id, color_id) = (color.spec_id, color.color_id);

        let watermark_unchanged = matches!(
            (staged.previous.as_ref().and_then(|p| p.ext_id), color.ext_id),
            (Some(stored), Some(seen)) if stored == seen
        );

        if watermark_unchanged {
            match self.store.panorama_frames(spec_id, color_id).await {
                Ok(frames) if is_contiguous(frames.iter().map(|f| f.seq)) => {
                    debug!(
                        "Panorama {} color {} unchanged, verifying {} stored frames",
                        spec_id,
                        color_id,
                        frames.len()
                    );
                    self.reconciler.commit(staged).await;
                    self.state.record_frame_listing_skipped().await;
                    if self.media.download_panoramas {
                        for frame in frames {
                            if frame.remote_url.is_some()
                                && !self.enqueue(frame.asset_key(), queue).await
                            {
                                return;
                            }
                        }
                    }
                    return;
                }
                Ok(_) => debug!(
                    "Panorama {} color {} has a partial frame set, listing again",
                    spec_id, color_id
                ),
                Err(e) => warn!("Could not read frames of {} {}: {}", spec_id, color_id, e),
            }
        }

        let listing = format!("panorama frames of spec {spec_id} color {color_id}");
        let Some(frames) = self
            .list(&listing, || self.feed.list_panorama_frames(spec_id, color_id))
            .await
        else {
            self.reconciler.abandon(staged).await;
            return;
        };
        let frames = self.reconciler.reconcile_all(frames).await;
        self.reconciler.commit(staged).await;

        for frame in frames {
            if self.media.download_panoramas
                && frame.remote_url.is_some()
                && !self.enqueue(frame.asset_key(), queue).await
            {
                return;
            }
        }
    }

    /// Queues the stored assets of a skipped series that are not yet local.
    async fn resume_pending_assets(&self, series_id: i64, queue: &DownloadQueue) {
        let pending = match self.store.pending_assets(series_id).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!("Could not read pending assets of series {}: {}", series_id, e);
                return;
            }
        };
        let pending: Vec<AssetKey> = pending
            .into_iter()
            .filter(|asset| match asset {
                AssetKey::Photo(_) => self.media.download_photos,
                AssetKey::PanoramaFrame(_) => self.media.download_panoramas,
            })
            .collect();
        if pending.is_empty() {
            return;
        }

        info!("Resuming {} pending assets of series {}", pending.len(), series_id);
        for asset in pending {
            if !self.enqueue(asset, queue).await {
                return;
            }
        }
    }

    /// `false` once the queue no longer accepts work.
    async fn enqueue(&self, asset: AssetKey, queue: &DownloadQueue) -> bool {
        match queue.submit(asset).await {
            Ok(()) => true,
            Err(QueueError::Cancelled) => false,
            Err(e) => {
                warn!("Download queue rejected asset: {}", e);
                false
            }
        }
    }
}

/// Sequence numbers form `0..N` with `N > 0`. Expects ascending input.
fn is_contiguous(seqs: impl Iterator<Item = i64>) -> bool {
    let mut expected = 0;
    for seq in seqs {
        if seq != expected {
            return false;
        }
        expected += 1;
    }
    expected > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_contiguous() {
        assert!(is_contiguous([0, 1, 2].into_iter()));
        assert!(!is_contiguous([0, 2, 3].into_iter()));
        assert!(!is_contiguous([1, 2].into_iter()));
        assert!(!is_contiguous(std::iter::empty()));
    }
}
