use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use courier_common::MailId;
use tokio::sync::Notify;

use super::memory::MemoryBackend;
use crate::{
    error::{PersistenceError, Result},
    repository::RepositoryBackend,
};

#[derive(Debug, Default)]
struct Faults {
    store: AtomicBool,
    retrieve: AtomicBool,
    remove: AtomicBool,
    list: AtomicBool,
    store_countdown: AtomicUsize,
    remove_countdown: AtomicUsize,
}

/// Testing utilities for repository backends
///
/// Wraps a [`MemoryBackend`], wakes waiters on every write and can be told to
/// fail individual operations to exercise error handling further up.
#[derive(Debug, Clone, Default)]
pub struct TestBackend {
    inner: MemoryBackend,
    notify: Arc<Notify>,
    faults: Arc<Faults>,
}

impl TestBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `store` fail until turned off again
    pub fn fail_stores(&self, fail: bool) {
        self.faults.store.store(fail, Ordering::SeqCst);
    }

    /// Make `retrieve` fail until turned off again
    pub fn fail_retrieves(&self, fail: bool) {
        self.faults.retrieve.store(fail, Ordering::SeqCst);
    }

    /// Make `remove` fail until turned off again
    pub fn fail_removes(&self, fail: bool) {
        self.faults.remove.store(fail, Ordering::SeqCst);
    }

    /// Let the next `successes` stores through, then fail exactly one
    pub fn fail_store_after(&self, successes: usize) {
        self.faults
            .store_countdown
            .store(successes.saturating_add(1), Ordering::SeqCst);
    }

    /// Let the next `successes` removes through, then fail exactly one
    pub fn fail_remove_after(&self, successes: usize) {
        self.faults
            .remove_countdown
            .store(successes.saturating_add(1), Ordering::SeqCst);
    }

    /// Make every operation fail until turned off again
    pub fn fail_all(&self, fail: bool) {
        self.fail_stores(fail);
        self.fail_retrieves(fail);
        self.fail_removes(fail);
        self.faults.list.store(fail, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, operation: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            Err(PersistenceError::Unavailable(format!(
                "injected {operation} failure"
            )))
        } else {
            Ok(())
        }
    }

    fn count_down(counter: &AtomicUsize, operation: &str) -> Result<()> {
        match counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1)) {
            Ok(1) => Err(PersistenceError::Unavailable(format!(
                "injected {operation} failure"
            ))),
            _ => Ok(()),
        }
    }

    /// Wait for the next record to be stored
    pub async fn wait_for_store(&self) {
        self.notify.notified().await;
    }

    /// Wait until at least `expected` records are held, with timeout
    ///
    /// # Errors
    /// Returns an error if the timeout is reached before the expected count
    pub async fn wait_for_count(&self, expected: usize, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.inner.len() >= expected {
                    return;
                }
                notified.await;
            }
        })
        .await
        .map_err(|e| PersistenceError::Unavailable(format!("Timeout waiting for records: {e}")))
    }

    /// Remove every record
    pub fn clear(&self) {
        self.inner.records.clear();
    }

    /// Number of records held
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.inner.len()
    }

    /// Whether a record is held for `id`
    #[must_use]
    pub fn contains(&self, id: &MailId) -> bool {
        self.inner.records.contains_key(id)
    }
}

#[async_trait]
impl RepositoryBackend for TestBackend {
    async fn store(&self, id: &MailId, bytes: &[u8]) -> Result<()> {
        Self::check(&self.faults.store, "store")?;
        Self::count_down(&self.faults.store_countdown, "store")?;
        self.inner.store(id, bytes).await?;
        self.notify.notify_waiters();
        Ok(())
    }

    async fn retrieve(&self, id: &MailId) -> Result<Vec<u8>> {
        Self::check(&self.faults.retrieve, "retrieve")?;
        self.inner.retrieve(id).await
    }

    async fn remove(&self, id: &MailId) -> Result<()> {
        Self::check(&self.faults.remove, "remove")?;
        Self::count_down(&self.faults.remove_countdown, "remove")?;
        self.inner.remove(id).await
    }

    async fn list(&self) -> Result<Vec<MailId>> {
        Self::check(&self.faults.list, "list")?;
        self.inner.list().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failure_injection() {
        let backend = TestBackend::new();
        let id = MailId::new();

        backend.fail_stores(true);
        assert!(matches!(
            backend.store(&id, b"x").await,
            Err(PersistenceError::Unavailable(_))
        ));
        assert_eq!(backend.record_count(), 0);

        backend.fail_stores(false);
        backend.store(&id, b"x").await.unwrap();
        assert!(backend.contains(&id));

        backend.fail_all(true);
        assert!(backend.retrieve(&id).await.is_err());
        assert!(backend.list().await.is_err());
        backend.fail_all(false);
        assert_eq!(backend.retrieve(&id).await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_single_injected_failure() {
        let backend = TestBackend::new();
        let ids: Vec<MailId> = (0..4).map(|_| MailId::new()).collect();

        backend.fail_store_after(2);
        backend.store(&ids[0], b"x").await.unwrap();
        backend.store(&ids[1], b"x").await.unwrap();
        assert!(backend.store(&ids[2], b"x").await.is_err());
        backend.store(&ids[3], b"x").await.unwrap();
        assert_eq!(backend.record_count(), 3);

        backend.fail_remove_after(0);
        assert!(backend.remove(&ids[0]).await.is_err());
        backend.remove(&ids[0]).await.unwrap();
        assert!(!backend.contains(&ids[0]));
    }

    #[tokio::test]
    async fn test_wait_for_count() {
        let backend = TestBackend::new();
        let writer = backend.clone();

        let handle = tokio::spawn(async move {
            for _ in 0..3 {
                writer.store(&MailId::new(), b"x").await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        backend
            .wait_for_count(3, Duration::from_secs(5))
            .await
            .expect("records should arrive");
        handle.await.unwrap();

        assert!(
            backend
                .wait_for_count(4, Duration::from_millis(20))
                .await
                .is_err()
        );
    }
}
