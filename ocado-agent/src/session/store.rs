//! Atomic token pair storage.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use super::types::TokenPair;

/// Holds the authoritative current [`TokenPair`].
///
/// Reads are non-blocking snapshots; writes go through compare-and-swap
/// keyed on the snapshot the writer based its decision on, so two
/// concurrent refreshes can never both install. Every successful install
/// is broadcast to watch subscribers in order.
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    current: RwLock<Arc<TokenPair>>,
    changes: watch::Sender<Arc<TokenPair>>,
}

impl TokenStore {
    pub fn new(initial: TokenPair) -> Self {
        let initial = Arc::new(initial);
        let (changes, _) = watch::channel(initial.clone());
        Self {
            inner: Arc::new(StoreInner {
                current: RwLock::new(initial),
                changes,
            }),
        }
    }

    /// Snapshot of the current pair.
    pub fn current(&self) -> Arc<TokenPair> {
        self.inner.current.read().clone()
    }

    /// Install `next` if and only if `expected` is still the current pair.
    ///
    /// # Returns
    /// * `Ok(installed)` - the swap applied; `installed` is the new pair.
    /// * `Err(winner)` - another writer advanced the pair first; the caller
    ///   should re-read and treat its own result as already resolved.
    pub fn swap(
        &self,
        expected: &Arc<TokenPair>,
        next: TokenPair,
    ) -> Result<Arc<TokenPair>, Arc<TokenPair>> {
        let mut current = self.inner.current.write();
        if !Arc::ptr_eq(&current, expected) {
            return Err(current.clone());
        }
        let next = Arc::new(next);
        *current = next.clone();
        // Notify while still holding the write lock so observers see swaps
        // in install order.
        let _ = self.inner.changes.send_replace(next.clone());
        Ok(next)
    }

    /// Install `next` unconditionally. Used only by the external re-auth
    /// reset path.
    pub fn replace(&self, next: TokenPair) -> Arc<TokenPair> {
        let mut current = self.inner.current.write();
        let next = Arc::new(next);
        *current = next.clone();
        let _ = self.inner.changes.send_replace(next.clone());
        next
    }

    /// Subscribe to pair changes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<TokenPair>> {
        self.inner.changes.subscribe()
    }
}
