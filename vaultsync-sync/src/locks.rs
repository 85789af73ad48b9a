//! Keyed locks and batch throttling.
//!
//! Mutation paths serialize per logical resource: one key per document
//! and per bundle. The store as a whole is guarded by a reader/writer
//! lock: every writer holds it shared, the garbage collector holds it
//! exclusively and so observes no in-flight writes. Background work
//! takes the non-blocking variant and skips when busy rather than
//! piling up behind interactive operations.

use crate::error::{SyncError, SyncResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{
    Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, OwnedSemaphorePermit,
    RwLock, Semaphore,
};
use vaultsync_types::DocId;

/// Default number of concurrently processed batch operations.
pub const DEFAULT_BATCH_PERMITS: usize = 6;

/// A typed lock address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    /// Lock covering one document's mutations.
    pub fn document(id: &DocId) -> Self {
        Self(format!("doc/{id}"))
    }

    /// Lock covering one bundle's sub-file list.
    pub fn bundle(name: &str) -> Self {
        Self(format!("bundle/{name}"))
    }
}

/// A map of named async mutexes, a store-wide reader/writer lock, and a
/// batch-throttle semaphore.
pub struct KeyedLocks {
    locks: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
    store: Arc<RwLock<()>>,
    batch: Arc<Semaphore>,
}

impl KeyedLocks {
    /// Creates the lock set with the default batch width.
    pub fn new() -> Self {
        Self::with_permits(DEFAULT_BATCH_PERMITS)
    }

    /// Creates the lock set with a custom batch width.
    pub fn with_permits(permits: usize) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            store: Arc::new(RwLock::new(())),
            batch: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Shared store access, held by every writing path for the duration
    /// of its mutation. Blocks only while the garbage collector holds
    /// the store exclusively. Never nest two shared guards in one task;
    /// a queued writer would wedge between them.
    pub async fn store_shared(&self) -> OwnedRwLockReadGuard<()> {
        self.store.clone().read_owned().await
    }

    /// Exclusive store access for garbage collection: waits for every
    /// in-flight writer to drain and holds new ones off until dropped.
    pub async fn store_exclusive(&self) -> OwnedRwLockWriteGuard<()> {
        self.store.clone().write_owned().await
    }

    async fn handle(&self, key: &LockKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquires the lock, waiting as long as it takes.
    pub async fn acquire(&self, key: &LockKey) -> OwnedMutexGuard<()> {
        self.handle(key).await.lock_owned().await
    }

    /// Acquires the lock only if free; busy is a typed, non-fatal skip.
    pub async fn try_acquire(&self, key: &LockKey) -> SyncResult<OwnedMutexGuard<()>> {
        self.handle(key)
            .await
            .try_lock_owned()
            .map_err(|_| SyncError::Busy)
    }

    /// Runs `fut` while holding the lock.
    pub async fn run<F, T>(&self, key: &LockKey, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.acquire(key).await;
        fut.await
    }

    /// Runs `fut` while holding the lock, or skips with `Busy`.
    pub async fn try_run<F, T>(&self, key: &LockKey, fut: F) -> SyncResult<T>
    where
        F: Future<Output = T>,
    {
        let _guard = self.try_acquire(key).await?;
        Ok(fut.await)
    }

    /// Takes one batch-throttle permit; held for the duration of one
    /// batched operation.
    pub async fn throttle(&self) -> SyncResult<OwnedSemaphorePermit> {
        self.batch
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SyncError::Transient("batch semaphore closed".into()))
    }
}

impl Default for KeyedLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = KeyedLocks::new();
        let key = LockKey::bundle("plugin-a");
        let _held = locks.acquire(&key).await;
        assert!(matches!(
            locks.try_acquire(&key).await,
            Err(SyncError::Busy)
        ));
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let locks = KeyedLocks::new();
        let _a = locks.acquire(&LockKey::document(&DocId::new("a.md"))).await;
        assert!(locks
            .try_acquire(&LockKey::document(&DocId::new("b.md")))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn lock_releases_after_run() {
        let locks = KeyedLocks::new();
        let key = LockKey::bundle("plugin-a");
        let value = locks.run(&key, async { 7 }).await;
        assert_eq!(value, 7);
        assert!(locks.try_acquire(&key).await.is_ok());
    }

    #[tokio::test]
    async fn collector_waits_for_writers_to_drain() {
        let locks = KeyedLocks::new();

        let writer = locks.store_shared().await;
        let blocked =
            tokio::time::timeout(Duration::from_millis(10), locks.store_exclusive()).await;
        assert!(blocked.is_err(), "exclusive lock must wait for writers");

        drop(writer);
        let exclusive = locks.store_exclusive().await;
        let held_off =
            tokio::time::timeout(Duration::from_millis(10), locks.store_shared()).await;
        assert!(held_off.is_err(), "writers must wait for the collector");
        drop(exclusive);
    }
}
