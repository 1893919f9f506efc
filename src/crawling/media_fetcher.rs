//! # Media Fetcher
//!
//! Makes a stored photo or panorama frame local exactly once. The stored asset state is the
//! source of truth: `local` with a path is a cache hit, anything else is downloaded to a `.part`
//! file, renamed into place, and only then recorded as `local`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::crawling::retry::RetryPolicy;
use crate::domain::{AssetKey, AssetState, MediaRecord, PanoramaPhoto, Photo};
use crate::infrastructure::config::MediaConfig;
use crate::infrastructure::entity_store::{EntityStore, StoreError};
use crate::infrastructure::http_client::{FetchError, HttpClient};
use crate::infrastructure::keyed_lock::KeyedLocks;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("No stored record for asset {0}")]
    UnknownAsset(AssetKey),

    #[error("Asset {0} has no remote URL")]
    NoRemoteUrl(AssetKey),

    #[error("Download of {key} deferred after {attempts} attempts: {source}")]
    Deferred {
        key: AssetKey,
        attempts: u32,
        #[source]
        source: FetchError,
    },

    #[error("Download of {key} failed: {source}")]
    Failed {
        key: AssetKey,
        #[source]
        source: FetchError,
    },

    #[error("Download of {0} cancelled")]
    Cancelled(AssetKey),

    #[error("Asset {0} changed while it was being fetched")]
    Superseded(AssetKey),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Transport for media bytes.
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    /// Writes the body of `url` to `destination`, returning the byte count.
    async fn download(
        &self,
        url: &str,
        destination: &Path,
        cancellation_token: &CancellationToken,
    ) -> Result<u64, FetchError>;
}

#[async_trait]
impl MediaDownloader for HttpClient {
    async fn download(
        &self,
        url: &str,
        destination: &Path,
        cancellation_token: &CancellationToken,
    ) -> Result<u64, FetchError> {
        self.download_to(url, destination, cancellation_token).await
    }
}

/// What [`MediaFetcher::ensure_local`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    CacheHit { local_path: String },
    Downloaded { local_path: String, bytes: u64 },
}

impl Fetched {
    #[must_use]
    pub fn local_path(&self) -> &str {
        match self {
            Self::CacheHit { local_path } | Self::Downloaded { local_path, .. } => local_path,
        }
    }
}

pub struct MediaFetcher {
    store: EntityStore,
    downloader: Arc<dyn MediaDownloader>,
    root: PathBuf,
    verify_on_disk: bool,
    retry: RetryPolicy,
    locks: KeyedLocks,
    cancellation_token: CancellationToken,
}

impl MediaFetcher {
    #[must_use]
    pub fn new(
        store: EntityStore,
        downloader: Arc<dyn MediaDownloader>,
        config: &MediaConfig,
        retry: RetryPolicy,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            store,
            downloader,
            root: config.root_dir.clone(),
            verify_on_disk: config.verify_on_disk,
            retry,
            locks: KeyedLocks::new(),
            cancellation_token,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Returns the asset's local path, downloading it unless the store already has it.
    ///
    /// Calls for the same key are serialized, so a second caller sees the first one's result
    /// as a cache hit.
    pub async fn ensure_local(&self, asset: &AssetKey) -> Result<Fetched, MediaError> {
        let _guard = self.locks.lock(&asset.lock_token()).await;
        match asset {
            AssetKey::Photo(key) => {
                let record = self.store.lookup::<Photo>(key).await?;
                self.ensure_record(asset, record).await
            }
            AssetKey::PanoramaFrame(key) => {
                let record = self.store.lookup::<PanoramaPhoto>(key).await?;
                self.ensure_record(asset, record).await
            }
        }
    }

    async fn ensure_record<R: MediaRecord>(
        &self,
        asset: &AssetKey,
        record: Option<R>,
    ) -> Result<Fetched, MediaError> {
        let record = record.ok_or_else(|| MediaError::UnknownAsset(asset.clone()))?;

        if let Some(local_path) = self.cached_path(&record).await {
            debug!("Cache hit for {}: {}", asset, local_path);
            return Ok(Fetched::CacheHit { local_path });
        }

        let stored_url = record
            .remote_url()
            .ok_or_else(|| MediaError::NoRemoteUrl(asset.clone()))?;
        let url = absolute_url(stored_url);
        let key = record.key();
        let relative = record.relative_path();
        let destination = self.root.join(&relative);
        let partial = partial_path(&destination);

        if !self
            .store
            .set_asset_state::<R>(&key, stored_url, AssetState::Downloading, None)
            .await?
        {
            return Err(MediaError::Superseded(asset.clone()));
        }

        match self.transfer(&url, &partial, &destination).await {
            Ok(bytes) => {
                let recorded = self
                    .store
                    .set_asset_state::<R>(&key, stored_url, AssetState::Local, Some(relative.as_str()))
                    .await?;
                if !recorded {
                    info!("{} changed while downloading; left for the next pass", asset);
                    return Err(MediaError::Superseded(asset.clone()));
                }
                debug!("Downloaded {} ({} bytes) to {}", asset, bytes, relative);
                Ok(Fetched::Downloaded {
                    local_path: relative,
                    bytes,
                })
            }
            Err(error) => {
                remove_partial(&partial).await;
                self.store
                    .set_asset_state::<R>(&key, stored_url, AssetState::Pending, None)
                    .await?;
                Err(self.classify(asset, error))
            }
        }
    }

    /// The stored local path, if the record is local and (when verifying) its file exists.
    async fn cached_path<R: MediaRecord>(&self, record: &R) -> Option<String> {
        if record.asset_state() != AssetState::Local {
            return None;
        }
        let local_path = record.local_path().filter(|p| !p.is_empty())?;
        if self.verify_on_disk {
            let exists = tokio::fs::try_exists(self.root.join(local_path))
                .await
                .unwrap_or(false);
            if !exists {
                info!(
                    "Local file for {} {} vanished; downloading again",
                    R::KIND,
                    record.key()
                );
                return None;
            }
        }
        Some(local_path.to_string())
    }

    async fn transfer(
        &self,
        url: &str,
        partial: &Path,
        destination: &Path,
    ) -> Result<u64, FetchError> {
        let bytes = self
            .retry
            .run(url, &self.cancellation_token, || {
                self.downloader
                    .download(url, partial, &self.cancellation_token)
            })
            .await?;
        tokio::fs::rename(partial, destination).await?;
        Ok(bytes)
    }

    fn classify(&self, asset: &AssetKey, error: FetchError) -> MediaError {
        match error {
            FetchError::Cancelled => MediaError::Cancelled(asset.clone()),
            error if error.is_transient() => {
                warn!("⏸️ Deferring {}: {}", asset, error);
                MediaError::Deferred {
                    key: asset.clone(),
                    attempts: self.retry.max_attempts,
                    source: error,
                }
            }
            error => {
                warn!("❌ Download of {} failed: {}", asset, error);
                MediaError::Failed {
                    key: asset.clone(),
                    source: error,
                }
            }
        }
    }
}

/// Protocol-relative feed URLs are fetched over HTTPS.
fn absolute_url(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{url}")
    } else {
        url.to_string()
    }
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut partial = destination.as_os_str().to_os_string();
    partial.push(".part");
    PathBuf::from(partial)
}

async fn remove_partial(partial: &Path) {
    match tokio::fs::remove_file(partial).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", partial.display(), e),
    }
}
