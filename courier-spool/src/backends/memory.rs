use std::sync::Arc;

use async_trait::async_trait;
use courier_common::MailId;
use dashmap::DashMap;

use crate::{
    error::{PersistenceError, Result},
    repository::RepositoryBackend,
};

/// In-memory repository backend
///
/// Records live in a `DashMap`, so concurrent workers touching different mails
/// never contend on a single lock. Nothing survives a restart.
///
/// # Capacity Management
/// An optional capacity bounds the number of records; storing a new id once
/// the limit is reached fails with [`PersistenceError::CapacityExceeded`].
/// Overwriting an existing id is always allowed.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    pub(crate) records: Arc<DashMap<MailId, Vec<u8>>>,
    capacity: Option<usize>,
}

impl MemoryBackend {
    /// Create a new empty backend with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new backend holding at most `capacity` records
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Arc::default(),
            capacity: Some(capacity),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

#[async_trait]
impl RepositoryBackend for MemoryBackend {
    async fn store(&self, id: &MailId, bytes: &[u8]) -> Result<()> {
        if let Some(capacity) = self.capacity
            && !self.records.contains_key(id)
            && self.records.len() >= capacity
        {
            return Err(PersistenceError::CapacityExceeded {
                len: self.records.len(),
                capacity,
            });
        }

        self.records.insert(*id, bytes.to_vec());
        Ok(())
    }

    async fn retrieve(&self, id: &MailId) -> Result<Vec<u8>> {
        self.records
            .get(id)
            .map(|record| record.value().clone())
            .ok_or(PersistenceError::NotFound(*id))
    }

    async fn remove(&self, id: &MailId) -> Result<()> {
        self.records
            .remove(id)
            .map(|_| ())
            .ok_or(PersistenceError::NotFound(*id))
    }

    async fn list(&self) -> Result<Vec<MailId>> {
        let mut ids: Vec<_> = self.records.iter().map(|entry| *entry.key()).collect();

        // ULIDs sort by creation time
        ids.sort();

        Ok(ids)
    }
}
