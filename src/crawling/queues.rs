//! # Download Queue
//!
//! Bounded channel feeding a fixed pool of download workers. Once `capacity` assets are waiting,
//! [`DownloadQueue::submit`] waits for a free slot, so the metadata walk slows to the pace of
//! the downloads.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::crawling::media_fetcher::{Fetched, MediaError, MediaFetcher};
use crate::crawling::report::MediaStats;
use crate::domain::AssetKey;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue is closed")]
    Closed,

    #[error("Queue operation cancelled")]
    Cancelled,

    #[error("Download worker failed: {0}")]
    Worker(String),
}

pub struct DownloadQueue {
    sender: mpsc::Sender<AssetKey>,
    workers: Vec<JoinHandle<MediaStats>>,
    fetcher: Arc<MediaFetcher>,
}

impl DownloadQueue {
    /// Spawns `workers` download workers behind a queue of `capacity` slots.
    #[must_use]
    pub fn start(fetcher: Arc<MediaFetcher>, workers: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..workers.max(1))
            .map(|worker_id| {
                let fetcher = Arc::clone(&fetcher);
                let receiver = Arc::clone(&receiver);
                tokio::spawn(run_worker(worker_id, fetcher, receiver))
            })
            .collect();

        Self {
            sender,
            workers,
            fetcher,
        }
    }

    /// Enqueues an asset, waiting while the queue is full.
    pub async fn submit(&self, asset: AssetKey) -> Result<(), QueueError> {
        tokio::select! {
            result = self.sender.send(asset) => result.map_err(|_| QueueError::Closed),
            () = self.fetcher.cancellation_token().cancelled() => Err(QueueError::Cancelled),
        }
    }

    /// Closes the queue, waits for the workers to drain it, and sums their statistics.
    pub async fn finish(self) -> Result<MediaStats, QueueError> {
        let Self {
            sender, workers, ..
        } = self;
        drop(sender);

        let mut total = MediaStats::default();
        for worker in workers {
            total += worker
                .await
                .map_err(|e| QueueError::Worker(e.to_string()))?;
        }
        Ok(total)
    }
}

async fn run_worker(
    worker_id: usize,
    fetcher: Arc<MediaFetcher>,
    receiver: Arc<Mutex<mpsc::Receiver<AssetKey>>>,
) -> MediaStats {
    let mut stats = MediaStats::default();
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(asset) = next else { break };

        if fetcher.cancellation_token().is_cancelled() {
            stats.cancelled += 1;
            continue;
        }

        match fetcher.ensure_local(&asset).await {
            Ok(Fetched::CacheHit { .. }) => stats.cache_hits += 1,
            Ok(Fetched::Downloaded { bytes, .. }) => {
                stats.downloaded += 1;
                stats.bytes += bytes;
            }
            Err(MediaError::Deferred { .. } | MediaError::Superseded(_)) => stats.deferred += 1,
            Err(MediaError::Cancelled(_)) => stats.cancelled += 1,
            Err(e) => {
                warn!("Worker {} could not fetch {}: {}", worker_id, asset, e);
                stats.failed += 1;
            }
        }
    }
    debug!("Download worker {} finished: {:?}", worker_id, stats);
    stats
}
