use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use courier_common::{Mail, MailId, internal, outgoing};
use courier_pipeline::{MailetContext, MailetError, ProcessorRegistry};
use courier_queue::MailQueue;
use courier_spool::RepositoryStore;

use crate::error::{ManagerError, Result};

/// Everything the running core shares: the queue, the named repositories and
/// the processors.
///
/// Built once at startup and handed to the spool manager, the ingestion port
/// and the management API. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct SpoolContext {
    queue: MailQueue,
    repositories: Arc<RepositoryStore>,
    processors: Arc<ProcessorRegistry>,
}

impl SpoolContext {
    pub fn new(
        queue: MailQueue,
        repositories: Arc<RepositoryStore>,
        processors: Arc<ProcessorRegistry>,
    ) -> Self {
        Self {
            queue,
            repositories,
            processors,
        }
    }

    #[inline]
    pub const fn queue(&self) -> &MailQueue {
        &self.queue
    }

    #[inline]
    pub fn repositories(&self) -> &RepositoryStore {
        &self.repositories
    }

    #[inline]
    pub fn processors(&self) -> &ProcessorRegistry {
        &self.processors
    }

    /// Queue `mail` as new work from the initial state
    ///
    /// # Errors
    /// If the mail cannot be stored
    pub async fn submit(&self, mut mail: Mail) -> Result<MailId> {
        mail.set_state(self.processors.initial_state().clone());
        mail.reset_hops();

        self.queue.enqueue(&mail, Duration::ZERO).await?;
        Ok(*mail.id())
    }

    /// Keep `mail` in the dead-letter repository, with `reason` added to its
    /// error message
    ///
    /// # Errors
    /// If the dead-letter repository cannot store it
    pub async fn dead_letter(&self, mut mail: Mail, reason: &str) -> Result<()> {
        mail.append_error_message(reason);

        let id = *mail.id();
        self.repositories
            .dead_letter()
            .store(&mail)
            .await
            .map_err(|source| ManagerError::DeadLetter { id, source })?;

        outgoing!(level = ERROR, "Dead-lettered {id}: {reason}");
        Ok(())
    }
}

#[async_trait]
impl MailetContext for SpoolContext {
    async fn store(&self, repository: &str, mail: &Mail) -> Result<(), MailetError> {
        self.repositories.get(repository)?.store(mail).await?;
        Ok(())
    }

    async fn submit(&self, mail: Mail) -> Result<MailId, MailetError> {
        let id = Self::submit(self, mail)
            .await
            .map_err(|err| MailetError::Submit(err.to_string()))?;

        internal!(level = DEBUG, "Mailet submitted new mail {id}");
        Ok(id)
    }
}
