//! Per-key async mutex registry
//!
//! Work on the same key is serialized, work on different keys proceeds in parallel. Entries are
//! held weakly and dropped once no task holds or waits for them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const MIN_PRUNE_THRESHOLD: usize = 64;

#[derive(Default)]
struct Registry {
    entries: HashMap<String, Weak<AsyncMutex<()>>>,
    prune_at: usize,
}

#[derive(Default)]
pub struct KeyedLocks {
    registry: Mutex<Registry>,
}

impl KeyedLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other holder of `token` remains.
    pub async fn lock(&self, token: &str) -> OwnedMutexGuard<()> {
        self.entry(token).lock_owned().await
    }

    fn entry(&self, token: &str) -> Arc<AsyncMutex<()>> {
        let mut registry = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = registry.entries.get(token).and_then(Weak::upgrade) {
            return existing;
        }

        let mutex = Arc::new(AsyncMutex::new(()));
        registry
            .entries
            .insert(token.to_string(), Arc::downgrade(&mutex));

        if registry.entries.len() > registry.prune_at.max(MIN_PRUNE_THRESHOLD) {
            registry.entries.retain(|_, entry| entry.strong_count() > 0);
            registry.prune_at = registry.entries.len() * 2;
        }

        mutex
    }
}
