//! Catalog feed listings
//!
//! [`FeedSource`] is the inbound seam: one listing call per entity type and parent. The HTTP
//! implementation maps those calls onto the feed's few large payloads and caches each payload
//! for the listings that share it.

pub mod parsers;

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::keys::{
    RawBrand, RawPanoramaColor, RawPanoramaFrame, RawParamTitle, RawParamValue, RawPhoto,
    RawPhotoCategory, RawPhotoColor, RawSeries, RawSpecification,
};
use crate::infrastructure::config::FeedConfig;
use crate::infrastructure::http_client::{FetchError, HttpClient};

use parsers::{PanoramaInfo, ParamConf, PhotoInfo, TreeMenu};

/// One photo query: a specification's pictures of one category in one color.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhotoListing {
    pub series_id: i64,
    pub spec_id: i64,
    pub category_id: i64,
    pub color_id: i64,
    pub is_interior: bool,
    pub page_size: u32,
}

/// Listing API of the catalog feed.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn list_brands(&self) -> Result<Vec<RawBrand>, FetchError>;

    async fn list_series(&self, brand_id: i64) -> Result<Vec<RawSeries>, FetchError>;

    async fn list_specifications(&self, series_id: i64)
    -> Result<Vec<RawSpecification>, FetchError>;

    async fn list_param_titles(&self, series_id: i64) -> Result<Vec<RawParamTitle>, FetchError>;

    async fn list_param_values(
        &self,
        series_id: i64,
        spec_id: i64,
    ) -> Result<Vec<RawParamValue>, FetchError>;

    async fn list_photo_colors(&self, series_id: i64) -> Result<Vec<RawPhotoColor>, FetchError>;

    async fn list_photo_categories(
        &self,
        series_id: i64,
    ) -> Result<Vec<RawPhotoCategory>, FetchError>;

    async fn list_photos(&self, listing: &PhotoListing) -> Result<Vec<RawPhoto>, FetchError>;

    async fn list_panorama_colors(&self, spec_id: i64)
    -> Result<Vec<RawPanoramaColor>, FetchError>;

    async fn list_panorama_frames(
        &self,
        spec_id: i64,
        color_id: i64,
    ) -> Result<Vec<RawPanoramaFrame>, FetchError>;
}

/// Substitutes `{name}` placeholders in an endpoint template.
#[must_use]
pub fn fill_template(template: &str, params: &[(&str, String)]) -> String {
    params.iter().fold(template.to_string(), |url, (name, value)| {
        url.replace(&format!("{{{name}}}"), value)
    })
}

const PAYLOAD_CACHE_CAPACITY: usize = 64;

/// Small per-id payload cache; cleared wholesale when full.
struct PayloadCache<K, V> {
    entries: Mutex<HashMap<K, Arc<V>>>,
}

impl<K: Eq + Hash, V> PayloadCache<K, V> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn insert(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= PAYLOAD_CACHE_CAPACITY {
            entries.clear();
        }
        entries.insert(key, Arc::clone(&value));
        value
    }
}

/// [`FeedSource`] over the public catalog endpoints.
pub struct HttpFeed {
    client: Arc<HttpClient>,
    config: FeedConfig,
    cancellation_token: CancellationToken,
    tree_menu: OnceCell<Arc<TreeMenu>>,
    param_confs: PayloadCache<i64, ParamConf>,
    photo_infos: PayloadCache<i64, PhotoInfo>,
    panoramas: PayloadCache<i64, PanoramaInfo>,
}

impl HttpFeed {
    #[must_use]
    pub fn new(
        client: Arc<HttpClient>,
        config: FeedConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            client,
            config,
            cancellation_token,
            tree_menu: OnceCell::new(),
            param_confs: PayloadCache::new(),
            photo_infos: PayloadCache::new(),
            panoramas: PayloadCache::new(),
        }
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        self.client.get_json(url, &self.cancellation_token).await
    }

    async fn tree_menu(&self) -> Result<Arc<TreeMenu>, FetchError> {
        self.tree_menu
            .get_or_try_init(|| async {
                let payload = self.get_json(&self.config.tree_menu_url).await?;
                let tree = parsers::parse_tree_menu(&payload);
                debug!("Tree menu: {} brands", tree.len());
                Ok(Arc::new(tree))
            })
            .await
            .cloned()
    }

    async fn param_conf(&self, series_id: i64) -> Result<Arc<ParamConf>, FetchError> {
        if let Some(conf) = self.param_confs.get(&series_id) {
            return Ok(conf);
        }
        let url = fill_template(
            &self.config.param_conf_url,
            &[("series_id", series_id.to_string())],
        );
        let payload = self.get_json(&url).await?;
        Ok(self
            .param_confs
            .insert(series_id, parsers::parse_param_conf(&payload, series_id)))
    }

    async fn photo_info(&self, series_id: i64) -> Result<Arc<PhotoInfo>, FetchError> {
        if let Some(info) = self.photo_infos.get(&series_id) {
            return Ok(info);
        }
        let url = fill_template(
            &self.config.photo_info_url,
            &[("series_id", series_id.to_string())],
        );
        let payload = self.get_json(&url).await?;
        Ok(self
            .photo_infos
            .insert(series_id, parsers::parse_photo_info(&payload, series_id)))
    }

    async fn fetch_panorama(
        &self,
        ext_id: i64,
        spec_id: i64,
    ) -> Result<Option<PanoramaInfo>, FetchError> {
        let url = fill_template(
            &self.config.panorama_info_url,
            &[("ext_id", ext_id.to_string()), ("spec_id", spec_id.to_string())],
        );
        match self.get_json(&url).await {
            Ok(payload) => Ok(Some(parsers::parse_pano_baseinfo(
                &payload,
                spec_id,
                &self.config.panorama_image_root,
            ))),
            // no panorama set under this id
            Err(FetchError::Status { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The panorama set id is usually the spec id; otherwise the payload names the real one.
    async fn panorama(&self, spec_id: i64) -> Result<Arc<PanoramaInfo>, FetchError> {
        if let Some(info) = self.panoramas.get(&spec_id) {
            return Ok(info);
        }

        let mut found = PanoramaInfo::default();
        if let Some(info) = self.fetch_panorama(spec_id, spec_id).await? {
            if info.ext_spec_id == Some(spec_id) {
                found = info;
            } else if let Some(ext_id) = info.ext_id.filter(|&id| id != spec_id) {
                if let Some(redirected) = self.fetch_panorama(ext_id, spec_id).await? {
                    if redirected.ext_spec_id == Some(spec_id) {
                        found = redirected;
                    }
                }
            }
        }

        if found.colors.is_empty() {
            debug!("No panorama set for spec {}", spec_id);
        }
        Ok(self.panoramas.insert(spec_id, found))
    }
}

#[async_trait]
impl FeedSource for HttpFeed {
    async fn list_brands(&self) -> Result<Vec<RawBrand>, FetchError> {
        Ok(self
            .tree_menu()
            .await?
            .iter()
            .map(|(brand, _)| brand.clone())
            .collect())
    }

    async fn list_series(&self, brand_id: i64) -> Result<Vec<RawSeries>, FetchError> {
        Ok(self
            .tree_menu()
            .await?
            .iter()
            .find(|(brand, _)| brand.id == Some(brand_id))
            .map(|(_, series)| series.clone())
            .unwrap_or_default())
    }

    async fn list_specifications(
        &self,
        series_id: i64,
    ) -> Result<Vec<RawSpecification>, FetchError> {
        Ok(self.param_conf(series_id).await?.specifications.clone())
    }

    async fn list_param_titles(&self, series_id: i64) -> Result<Vec<RawParamTitle>, FetchError> {
        Ok(self.param_conf(series_id).await?.titles.clone())
    }

    async fn list_param_values(
        &self,
        series_id: i64,
        spec_id: i64,
    ) -> Result<Vec<RawParamValue>, FetchError> {
        Ok(self
            .param_conf(series_id)
            .await?
            .values
            .get(&spec_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_photo_colors(&self, series_id: i64) -> Result<Vec<RawPhotoColor>, FetchError> {
        Ok(self.photo_info(series_id).await?.colors.clone())
    }

    async fn list_photo_categories(
        &self,
        series_id: i64,
    ) -> Result<Vec<RawPhotoCategory>, FetchError> {
        Ok(self.photo_info(series_id).await?.categories.clone())
    }

    async fn list_photos(&self, listing: &PhotoListing) -> Result<Vec<RawPhoto>, FetchError> {
        let url = fill_template(
            &self.config.photo_list_url,
            &[
                ("series_id", listing.series_id.to_string()),
                ("spec_id", listing.spec_id.to_string()),
                ("category_id", listing.category_id.to_string()),
                ("color_id", listing.color_id.to_string()),
                ("is_interior", u8::from(listing.is_interior).to_string()),
                ("page_size", listing.page_size.to_string()),
            ],
        );
        let payload = self.get_json(&url).await?;
        Ok(parsers::parse_pic_list(&payload, listing))
    }

    async fn list_panorama_colors(
        &self,
        spec_id: i64,
    ) -> Result<Vec<RawPanoramaColor>, FetchError> {
        Ok(self.panorama(spec_id).await?.colors.clone())
    }

    async fn list_panorama_frames(
        &self,
        spec_id: i64,
        color_id: i64,
    ) -> Result<Vec<RawPanoramaFrame>, FetchError> {
        let panorama = self.panorama(spec_id).await?;
        if let Some(frames) = panorama.frames.get(&color_id) {
            return Ok(frames.clone());
        }
        if self.config.panorama_frames_url.is_empty() {
            return Ok(Vec::new());
        }

        let url = fill_template(
            &self.config.panorama_frames_url,
            &[
                ("spec_id", spec_id.to_string()),
                ("color_id", color_id.to_string()),
                ("ext_id", panorama.ext_id.unwrap_or(spec_id).to_string()),
            ],
        );
        let payload = self.get_json(&url).await?;
        Ok(parsers::parse_vr_info(
            &payload,
            spec_id,
            color_id,
            &panorama.image_root,
        ))
    }
}
