//! Shared fixtures: an in-memory catalog feed and a counting media downloader.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use autocat_sync::crawling::{MediaDownloader, PassReport, SyncOrchestrator};
use autocat_sync::domain::ColorType;
use autocat_sync::domain::keys::{
    RawBrand, RawPanoramaColor, RawPanoramaFrame, RawParamTitle, RawParamValue, RawPhoto,
    RawPhotoCategory, RawPhotoColor, RawSeries, RawSpecification,
};
use autocat_sync::infrastructure::config::{AppConfig, DatabaseConfig, RetryConfig};
use autocat_sync::infrastructure::entity_store::EntityStore;
use autocat_sync::infrastructure::feed_client::{FeedSource, PhotoListing};
use autocat_sync::infrastructure::http_client::FetchError;

pub const AUDI: i64 = 33;
pub const BMW: i64 = 15;
pub const SERIES_A: i64 = 3895;
pub const SERIES_B: i64 = 4100;
pub const SPEC_A1: i64 = 51234;
pub const SPEC_A2: i64 = 51235;
pub const SPEC_B1: i64 = 60001;
pub const WHITE: i64 = 9;
pub const BLACK_INTERIOR: i64 = 21;
pub const BLUE: i64 = 31;
pub const EXTERIOR: i64 = 1;
pub const DASHBOARD: i64 = 10;
pub const PANORAMA_COLOR: i64 = 501;
pub const PANORAMA_EXT_ID: i64 = 9001;
pub const FRAME_COUNT: i64 = 4;

/// Everything the fake feed returns, editable between passes.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub brands: Vec<RawBrand>,
    pub series: HashMap<i64, Vec<RawSeries>>,
    pub specifications: HashMap<i64, Vec<RawSpecification>>,
    pub titles: HashMap<i64, Vec<RawParamTitle>>,
    pub values: HashMap<i64, Vec<RawParamValue>>,
    pub colors: HashMap<i64, Vec<RawPhotoColor>>,
    pub categories: HashMap<i64, Vec<RawPhotoCategory>>,
    /// Keyed by (spec id, category id, color id).
    pub photos: HashMap<(i64, i64, i64), Vec<RawPhoto>>,
    pub panorama_colors: HashMap<i64, Vec<RawPanoramaColor>>,
    pub frames: HashMap<(i64, i64), Vec<RawPanoramaFrame>>,
}

fn brand(id: i64, name: &str) -> RawBrand {
    RawBrand {
        id: Some(id),
        name: Some(name.into()),
        logo_url: Some(format!("//car2.autoimg.cn/logo/{id}.png")),
    }
}

fn series(brand_id: i64, id: i64, name: &str) -> RawSeries {
    RawSeries {
        brand_id,
        id: Some(id),
        name: Some(name.into()),
        is_new_energy: Some(false),
    }
}

fn specification(series_id: i64, id: i64, name: &str, min_price: &str) -> RawSpecification {
    RawSpecification {
        series_id,
        id: Some(id),
        name: Some(name.into()),
        min_price: Some(min_price.into()),
    }
}

fn title(series_id: i64, title_id: i64, item_name: &str) -> RawParamTitle {
    RawParamTitle {
        series_id,
        title_id: Some(title_id),
        item_name: Some(item_name.into()),
        group_name: Some("基本参数".into()),
        item_type: None,
    }
}

fn value(
    series_id: i64,
    spec_id: i64,
    title_id: i64,
    item_name: &str,
    sub_name: Option<&str>,
    value: &str,
) -> RawParamValue {
    RawParamValue {
        series_id,
        spec_id,
        title_id: Some(title_id),
        item_name: Some(item_name.into()),
        sub_name: sub_name.map(String::from),
        value: Some(value.into()),
    }
}

fn color(series_id: i64, color_type: ColorType, id: i64, name: &str) -> RawPhotoColor {
    RawPhotoColor {
        series_id,
        color_type,
        id: Some(id),
        name: Some(name.into()),
        value: Some("#FFFFFF".into()),
        is_on_sale: Some(true),
    }
}

fn category(series_id: i64, id: i64, name: &str) -> RawPhotoCategory {
    RawPhotoCategory {
        series_id,
        id: Some(id),
        name: Some(name.into()),
    }
}

pub fn photo(series_id: i64, spec_id: i64, category_id: i64, color_id: i64, id: &str) -> RawPhoto {
    RawPhoto {
        series_id,
        spec_id,
        category_id,
        color_id: Some(color_id),
        id: Some(id.into()),
        remote_url: Some(format!("//car3.autoimg.cn/cardfs/{id}.jpg")),
        spec_name: None,
    }
}

pub fn frame(spec_id: i64, color_id: i64, seq: i64) -> RawPanoramaFrame {
    RawPanoramaFrame {
        spec_id,
        color_id,
        seq: Some(seq),
        remote_url: Some(format!(
            "https://panovr.autoimg.cn/pano/{spec_id}/{color_id}/{seq}.jpg"
        )),
    }
}

impl Catalog {
    /// Two brands, two series that both use title id 7 for different parameters, one
    /// panorama set.
    pub fn sample() -> Self {
        let mut catalog = Self {
            brands: vec![brand(AUDI, "奥迪"), brand(BMW, "宝马")],
            ..Self::default()
        };
        catalog
            .series
            .insert(AUDI, vec![series(AUDI, SERIES_A, "奥迪A4L")]);
        catalog
            .series
            .insert(BMW, vec![series(BMW, SERIES_B, "宝马i3")]);

        catalog.specifications.insert(
            SERIES_A,
            vec![
                specification(SERIES_A, SPEC_A1, "2024款 40 TFSI", "32.18万"),
                specification(SERIES_A, SPEC_A2, "2024款 45 TFSI", "暂无报价"),
            ],
        );
        catalog.specifications.insert(
            SERIES_B,
            vec![specification(SERIES_B, SPEC_B1, "2024款 eDrive35L", "35.39万")],
        );

        catalog.titles.insert(
            SERIES_A,
            vec![title(SERIES_A, 7, "排量(L)"), title(SERIES_A, 8, "变速箱")],
        );
        catalog
            .titles
            .insert(SERIES_B, vec![title(SERIES_B, 7, "净重(kg)")]);

        catalog.values.insert(
            SPEC_A1,
            vec![
                value(SERIES_A, SPEC_A1, 7, "排量(L)", None, "2.0"),
                value(SERIES_A, SPEC_A1, 8, "变速箱", Some(""), "7挡双离合"),
                value(SERIES_A, SPEC_A1, 8, "变速箱", Some("挡位数"), "7"),
            ],
        );
        catalog.values.insert(
            SPEC_A2,
            vec![value(SERIES_A, SPEC_A2, 7, "排量(L)", None, "")],
        );
        catalog.values.insert(
            SPEC_B1,
            vec![value(SERIES_B, SPEC_B1, 7, "净重(kg)", None, "1650")],
        );

        catalog.colors.insert(
            SERIES_A,
            vec![
                color(SERIES_A, ColorType::Exterior, WHITE, "冰川白"),
                color(SERIES_A, ColorType::Interior, BLACK_INTERIOR, "黑色"),
            ],
        );
        catalog
            .colors
            .insert(SERIES_B, vec![color(SERIES_B, ColorType::Exterior, BLUE, "蓝色")]);

        catalog.categories.insert(
            SERIES_A,
            vec![
                category(SERIES_A, EXTERIOR, "外观"),
                category(SERIES_A, DASHBOARD, "中控"),
            ],
        );
        catalog
            .categories
            .insert(SERIES_B, vec![category(SERIES_B, EXTERIOR, "外观")]);

        catalog.photos.insert(
            (SPEC_A1, EXTERIOR, WHITE),
            vec![
                photo(SERIES_A, SPEC_A1, EXTERIOR, WHITE, "p-a1-1"),
                photo(SERIES_A, SPEC_A1, EXTERIOR, WHITE, "p-a1-2"),
            ],
        );
        catalog.photos.insert(
            (SPEC_A2, DASHBOARD, BLACK_INTERIOR),
            vec![photo(SERIES_A, SPEC_A2, DASHBOARD, BLACK_INTERIOR, "p-a2-1")],
        );
        catalog.photos.insert(
            (SPEC_B1, EXTERIOR, BLUE),
            vec![photo(SERIES_B, SPEC_B1, EXTERIOR, BLUE, "p-b1-1")],
        );

        catalog.panorama_colors.insert(
            SPEC_A1,
            vec![RawPanoramaColor {
                spec_id: SPEC_A1,
                id: Some(PANORAMA_COLOR),
                ext_id: Some(PANORAMA_EXT_ID),
                base_color_name: Some("白色".into()),
                color_name: Some("冰川白".into()),
                color_value: Some("#F1F1F1".into()),
                color_id: Some(WHITE),
            }],
        );
        catalog.frames.insert(
            (SPEC_A1, WHITE),
            (0..FRAME_COUNT).map(|seq| frame(SPEC_A1, WHITE, seq)).collect(),
        );
        catalog
    }

    pub const PHOTO_COUNT: usize = 4;
}

/// In-memory [`FeedSource`] with per-listing call counters.
#[derive(Default)]
pub struct FakeFeed {
    pub catalog: Mutex<Catalog>,
    calls: Mutex<HashMap<&'static str, usize>>,
    total_calls: AtomicUsize,
    failing: Mutex<HashSet<&'static str>>,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
}

impl FakeFeed {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog: Mutex::new(catalog),
            ..Self::default()
        }
    }

    pub fn calls(&self, listing: &str) -> usize {
        self.calls.lock().unwrap().get(listing).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
        self.total_calls.store(0, Ordering::SeqCst);
    }

    /// Makes every call of `listing` fail with HTTP 404.
    pub fn fail(&self, listing: &'static str) {
        self.failing.lock().unwrap().insert(listing);
    }

    pub fn recover(&self, listing: &'static str) {
        self.failing.lock().unwrap().remove(listing);
    }

    /// Cancels `token` once `calls` listing calls have been answered.
    pub fn cancel_after(&self, calls: usize, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((calls, token));
    }

    pub fn edit(&self, edit: impl FnOnce(&mut Catalog)) {
        edit(&mut self.catalog.lock().unwrap());
    }

    fn answer<T: Clone>(
        &self,
        listing: &'static str,
        select: impl FnOnce(&Catalog) -> Option<&Vec<T>>,
    ) -> Result<Vec<T>, FetchError> {
        *self.calls.lock().unwrap().entry(listing).or_default() += 1;
        let total = self.total_calls.fetch_add(1, Ordering::SeqCst) + 1;

        if self.failing.lock().unwrap().contains(listing) {
            return Err(FetchError::Status {
                url: format!("fake://{listing}"),
                status: 404,
            });
        }
        let items = select(&self.catalog.lock().unwrap())
            .cloned()
            .unwrap_or_default();

        if let Some((after, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if total >= *after {
                token.cancel();
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl FeedSource for FakeFeed {
    async fn list_brands(&self) -> Result<Vec<RawBrand>, FetchError> {
        self.answer("brands", |c| Some(&c.brands))
    }

    async fn list_series(&self, brand_id: i64) -> Result<Vec<RawSeries>, FetchError> {
        self.answer("series", |c| c.series.get(&brand_id))
    }

    async fn list_specifications(
        &self,
        series_id: i64,
    ) -> Result<Vec<RawSpecification>, FetchError> {
        self.answer("specifications", |c| c.specifications.get(&series_id))
    }

    async fn list_param_titles(&self, series_id: i64) -> Result<Vec<RawParamTitle>, FetchError> {
        self.answer("param_titles", |c| c.titles.get(&series_id))
    }

    async fn list_param_values(
        &self,
        _series_id: i64,
        spec_id: i64,
    ) -> Result<Vec<RawParamValue>, FetchError> {
        self.answer("param_values", |c| c.values.get(&spec_id))
    }

    async fn list_photo_colors(&self, series_id: i64) -> Result<Vec<RawPhotoColor>, FetchError> {
        self.answer("photo_colors", |c| c.colors.get(&series_id))
    }

    async fn list_photo_categories(
        &self,
        series_id: i64,
    ) -> Result<Vec<RawPhotoCategory>, FetchError> {
        self.answer("photo_categories", |c| c.categories.get(&series_id))
    }

    async fn list_photos(&self, listing: &PhotoListing) -> Result<Vec<RawPhoto>, FetchError> {
        let key = (listing.spec_id, listing.category_id, listing.color_id);
        self.answer("photos", |c| c.photos.get(&key))
    }

    async fn list_panorama_colors(
        &self,
        spec_id: i64,
    ) -> Result<Vec<RawPanoramaColor>, FetchError> {
        self.answer("panorama_colors", |c| c.panorama_colors.get(&spec_id))
    }

    async fn list_panorama_frames(
        &self,
        spec_id: i64,
        color_id: i64,
    ) -> Result<Vec<RawPanoramaFrame>, FetchError> {
        self.answer("panorama_frames", |c| c.frames.get(&(spec_id, color_id)))
    }
}

/// Writes a few bytes for every URL and counts the calls.
#[derive(Default)]
pub struct FakeDownloader {
    pub urls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeDownloader {
    pub fn calls(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    pub fn downloaded(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.urls.lock().unwrap().clear();
    }

    /// Every download of a URL containing `fragment` times out.
    pub fn time_out(&self, fragment: &str) {
        self.failing.lock().unwrap().insert(fragment.to_string());
    }

    pub fn recover(&self) {
        self.failing.lock().unwrap().clear();
    }
}

#[async_trait]
impl MediaDownloader for FakeDownloader {
    async fn download(
        &self,
        url: &str,
        destination: &Path,
        cancellation_token: &CancellationToken,
    ) -> Result<u64, FetchError> {
        if cancellation_token.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        self.urls.lock().unwrap().push(url.to_string());
        let times_out = self
            .failing
            .lock()
            .unwrap()
            .iter()
            .any(|fragment| url.contains(fragment.as_str()));

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if times_out {
            tokio::fs::write(destination, b"trunc").await?;
            return Err(FetchError::Timeout {
                url: url.to_string(),
            });
        }
        let body = format!("bytes of {url}");
        tokio::fs::write(destination, body.as_bytes()).await?;
        Ok(body.len() as u64)
    }
}

/// A store and media root inside one temporary directory.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub store: EntityStore,
    pub config: AppConfig,
    pub feed: Arc<FakeFeed>,
    pub downloader: Arc<FakeDownloader>,
}

impl Harness {
    pub async fn new(catalog: Catalog) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.database = DatabaseConfig {
            url: format!("sqlite://{}/catalog.db", dir.path().display()),
            ..DatabaseConfig::default()
        };
        config.media.root_dir = dir.path().join("media");
        config.media.workers = 2;
        config.media.backpressure_threshold = 4;
        config.retry = RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 1.0,
            jitter_ms: 0,
        };

        let store = EntityStore::open(&config.database).await.unwrap();
        Self {
            dir,
            store,
            config,
            feed: Arc::new(FakeFeed::new(catalog)),
            downloader: Arc::new(FakeDownloader::default()),
        }
    }

    pub fn media_root(&self) -> PathBuf {
        self.config.media.root_dir.clone()
    }

    pub fn orchestrator(&self, token: CancellationToken) -> SyncOrchestrator {
        let feed: Arc<dyn FeedSource> = self.feed.clone();
        let downloader: Arc<dyn MediaDownloader> = self.downloader.clone();
        SyncOrchestrator::new(feed, self.store.clone(), downloader, &self.config, token)
    }

    pub async fn pass(&self) -> PassReport {
        self.orchestrator(CancellationToken::new())
            .run_pass()
            .await
            .unwrap()
    }

    /// Rows violating a declared foreign key.
    pub async fn foreign_key_violations(&self) -> usize {
        let rows: Vec<(String, Option<i64>, String, i64)> =
            sqlx::query_as("PRAGMA foreign_key_check")
            .fetch_all(self.store.pool())
            .await
            .unwrap();
        rows.len()
    }
}
