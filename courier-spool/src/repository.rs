use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use courier_common::{Mail, MailId, internal};
use courier_tracing::traced;

use crate::error::{PersistenceError, Result, SerializationError};

/// Keyed blob storage for serialized mail.
///
/// Implementations must be safe to share between tasks. Writes are
/// last-write-wins; `remove` of an absent id reports
/// [`PersistenceError::NotFound`].
#[async_trait]
pub trait RepositoryBackend: Send + Sync + Debug {
    /// Store `bytes` under `id`, replacing any previous record
    ///
    /// # Errors
    /// If the record cannot be durably written
    async fn store(&self, id: &MailId, bytes: &[u8]) -> Result<()>;

    /// Fetch the record stored under `id`
    ///
    /// # Errors
    /// [`PersistenceError::NotFound`] when there is no such record, or any
    /// storage failure
    async fn retrieve(&self, id: &MailId) -> Result<Vec<u8>>;

    /// Delete the record stored under `id`
    ///
    /// # Errors
    /// [`PersistenceError::NotFound`] when there is no such record, or any
    /// storage failure
    async fn remove(&self, id: &MailId) -> Result<()>;

    /// Every stored id, sorted
    ///
    /// # Errors
    /// If the backend cannot be enumerated
    async fn list(&self) -> Result<Vec<MailId>>;
}

/// A named repository of [`Mail`], encoding records with bincode.
#[derive(Debug, Clone)]
pub struct MailRepository {
    name: Arc<str>,
    backend: Arc<dyn RepositoryBackend>,
}

impl MailRepository {
    pub fn new(name: impl Into<Arc<str>>, backend: Arc<dyn RepositoryBackend>) -> Self {
        Self {
            name: name.into(),
            backend,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn backend(&self) -> &Arc<dyn RepositoryBackend> {
        &self.backend
    }

    fn encode(mail: &Mail) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(mail, bincode::config::standard())
            .map_err(|err| PersistenceError::Serialization(SerializationError::Encode(err)))
    }

    fn decode(bytes: &[u8]) -> Result<Mail> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(mail, _)| mail)
            .map_err(|err| PersistenceError::Serialization(SerializationError::Decode(err)))
    }

    #[traced(instrument(level = tracing::Level::TRACE, skip(self, mail), fields(repository = %self.name, id = %mail.id())), timing(precision = "us"))]
    pub async fn store(&self, mail: &Mail) -> Result<()> {
        let bytes = Self::encode(mail)?;
        self.backend.store(mail.id(), &bytes).await
    }

    #[traced(instrument(level = tracing::Level::TRACE, skip(self), fields(repository = %self.name, id = %id)), timing(precision = "us"))]
    pub async fn retrieve(&self, id: &MailId) -> Result<Mail> {
        let bytes = self.backend.retrieve(id).await?;
        Self::decode(&bytes)
    }

    pub async fn remove(&self, id: &MailId) -> Result<()> {
        self.backend.remove(id).await
    }

    /// Removes `id` if present, treating a missing record as success.
    ///
    /// Returns whether a record was actually removed.
    pub async fn remove_if_present(&self, id: &MailId) -> Result<bool> {
        match self.backend.remove(id).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_not_found() => {
                internal!(
                    level = DEBUG,
                    "{id} already absent from repository {}",
                    self.name
                );
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn list(&self) -> Result<Vec<MailId>> {
        self.backend.list().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use courier_common::{MailAddress, State};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::backends::MemoryBackend;

    fn mail() -> Mail {
        let mut mail = Mail::new(
            MailAddress::parse("sender@example.com").ok(),
            vec![MailAddress::parse("rcpt@example.com").unwrap()],
            b"Subject: hi\r\n\r\nhello".to_vec(),
            State::root(),
        );
        mail.set_attribute("courier.test", 42_i64);
        mail
    }

    #[tokio::test]
    async fn test_store_retrieve_remove() {
        let repository = MailRepository::new("spool", Arc::new(MemoryBackend::new()));
        let mail = mail();

        repository.store(&mail).await.unwrap();
        assert_eq!(repository.list().await.unwrap(), vec![*mail.id()]);

        let retrieved = repository.retrieve(mail.id()).await.unwrap();
        assert_eq!(retrieved, mail);

        repository.remove(mail.id()).await.unwrap();
        assert!(repository.retrieve(mail.id()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_remove_if_present_is_idempotent() {
        let repository = MailRepository::new("spool", Arc::new(MemoryBackend::new()));
        let mail = mail();
        repository.store(&mail).await.unwrap();

        assert!(repository.remove_if_present(mail.id()).await.unwrap());
        assert!(!repository.remove_if_present(mail.id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_a_serialization_error() {
        let backend = Arc::new(MemoryBackend::new());
        let repository = MailRepository::new("spool", backend.clone());
        let id = MailId::new();
        backend.store(&id, &[0xff, 0xff, 0xff]).await.unwrap();

        let err = repository.retrieve(&id).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Serialization(_)));
    }
}
