//! Per-key serialization of transcript writes.
//!
//! One `tokio::sync::Mutex<()>` per key, created on first use and kept for the life of the
//! process. The registry is never evicted; it grows with the number of distinct conversations.

use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of serialization units keyed by `K`.
pub struct KeyedGuard<K> {
    units: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> KeyedGuard<K> {
    pub fn new() -> Self {
        Self {
            units: DashMap::new(),
        }
    }

    /// The unit for `key`, inserted atomically on first reference.
    fn unit(&self, key: &K) -> Arc<Mutex<()>> {
        if let Some(unit) = self.units.get(key) {
            return Arc::clone(unit.value());
        }

        // The shard lock taken by `entry` is released at the end of this statement,
        // before anything awaits.
        Arc::clone(
            self.units
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Wait for exclusive access to `key`. Waiters are served in request order.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        self.unit(key).lock_owned().await
    }

    /// Run `action` while holding `key`.
    ///
    /// The unit is released on every exit path: normal return, an `Err` result, a panic, or the
    /// returned future being dropped part-way.
    pub async fn with_lock<F, Fut, T>(&self, key: &K, action: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _held = self.lock(key).await;
        action().await
    }

    /// Number of units created so far.
    pub fn units(&self) -> usize {
        self.units.len()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedGuard<K> {
    fn default() -> Self {
        Self::new()
    }
}
