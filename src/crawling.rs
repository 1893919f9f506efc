//! # Sync Engine
//!
//! - `reconciler`: raw records to idempotent upserts
//! - `media_fetcher`: download-once media cache
//! - `queues`: bounded download queue and worker pool
//! - `orchestrator`: the top-down traversal of one pass

pub mod media_fetcher;
pub mod orchestrator;
pub mod queues;
pub mod reconciler;
pub mod report;
pub mod retry;
pub mod state;

pub use media_fetcher::{Fetched, MediaDownloader, MediaError, MediaFetcher};
pub use orchestrator::{SyncError, SyncOrchestrator};
pub use queues::{DownloadQueue, QueueError};
pub use reconciler::{Reconciler, Staged};
pub use report::{EntityCounts, MediaStats, PartialPanoramaError, PassReport};
pub use retry::RetryPolicy;
pub use state::SharedState;
