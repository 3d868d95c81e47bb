//! In-process idempotency guard for charge submission.
//!
//! Each key owns a slot holding the last successful response. The slot mutex
//! is held across the guarded operation, so two callers racing on the same
//! key serialize: the first runs the charge, the second finds the stored
//! response and returns it without touching the provider. Entries expire
//! after a TTL and are swept by [`IdempotencyGuard::purge_expired`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

use crate::error::AppResult;

struct Slot<T> {
    created_at: Instant,
    stored: Option<(Instant, T)>,
}

pub struct IdempotencyGuard<T> {
    ttl: Duration,
    slots: RwLock<HashMap<String, Arc<Mutex<Slot<T>>>>>,
}

impl<T: Clone> IdempotencyGuard<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Run `op` under the key's slot lock, replaying a cached response when
    /// one is fresh. Only successful responses are stored; a failed attempt
    /// leaves the slot empty so a retry with the same key runs again.
    pub async fn run<F, Fut>(&self, key: &str, op: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let slot = {
            let mut slots = self.slots.write().await;
            slots
                .entry(key.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(Slot {
                        created_at: Instant::now(),
                        stored: None,
                    }))
                })
                .clone()
        };

        let mut guard = slot.lock().await;
        if let Some((stored_at, value)) = &guard.stored {
            if stored_at.elapsed() < self.ttl {
                debug!(key, "replaying idempotent response");
                return Ok(value.clone());
            }
            guard.stored = None;
        }

        let result = op().await;
        if let Ok(value) = &result {
            guard.stored = Some((Instant::now(), value.clone()));
        }
        result
    }

    /// Drop expired entries. Slots whose mutex is currently held belong to
    /// an in-flight operation and are kept.
    pub async fn purge_expired(&self) {
        let ttl = self.ttl;
        let mut slots = self.slots.write().await;
        let before = slots.len();
        slots.retain(|_, slot| match slot.try_lock() {
            Ok(guard) => match &guard.stored {
                Some((stored_at, _)) => stored_at.elapsed() < ttl,
                None => guard.created_at.elapsed() < ttl,
            },
            Err(_) => true,
        });
        let purged = before - slots.len();
        if purged > 0 {
            debug!(purged, remaining = slots.len(), "purged idempotency entries");
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.slots.read().await.len()
    }
}
