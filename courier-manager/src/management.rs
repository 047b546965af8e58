//! Operational API over the queue and the named repositories.
//!
//! Queue counts follow the convention of returning `-1` when the backing
//! repository is unavailable, so callers can report rather than propagate.

use std::time::{Duration, SystemTime};

use courier_common::{Mail, MailId, incoming, internal};
use courier_queue::{MatchKind, QueueError, QueueStats};
use serde::{Deserialize, Serialize};

use crate::{
    context::SpoolContext,
    error::{ManagerError, Result},
    worker::LOOP_DETECTED,
};

/// A stored mail, without its content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailSummary {
    pub id: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub state: String,
    pub error_message: Option<String>,
    pub hop_count: u32,
    pub size: usize,
    pub last_updated: SystemTime,
}

impl From<&Mail> for MailSummary {
    fn from(mail: &Mail) -> Self {
        Self {
            id: mail.id().to_string(),
            sender: mail.sender_display(),
            recipients: mail.recipients().iter().map(ToString::to_string).collect(),
            state: mail.state().to_string(),
            error_message: mail.error_message().map(str::to_string),
            hop_count: mail.hop_count(),
            size: mail.content().len(),
            last_updated: mail.last_updated(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Management {
    context: SpoolContext,
}

fn saturating(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

fn count(result: std::result::Result<usize, QueueError>, operation: &str) -> i64 {
    match result {
        Ok(count) => saturating(count),
        Err(err) => {
            internal!(level = ERROR, "Queue {operation} failed: {err}");
            -1
        }
    }
}

impl Management {
    pub const fn new(context: SpoolContext) -> Self {
        Self { context }
    }

    #[must_use]
    pub fn queue_size(&self) -> i64 {
        saturating(self.context.queue().size())
    }

    #[must_use]
    pub fn queue_stats(&self) -> QueueStats {
        self.context.queue().stats()
    }

    /// Remove every queued mail not currently being processed
    ///
    /// Leased mail is left to the worker holding it, which settles it as
    /// usual. Returns `-1` if the spool repository fails, in which case the
    /// mail not yet removed stays queued.
    pub async fn clear(&self) -> i64 {
        count(self.context.queue().clear().await, "clear")
    }

    /// Make every delayed mail visible now
    #[must_use]
    pub fn flush(&self) -> i64 {
        saturating(self.context.queue().flush())
    }

    pub async fn remove_by_name(&self, name: &str) -> i64 {
        self.remove(MatchKind::Name, name).await
    }

    pub async fn remove_by_sender(&self, sender: &str) -> i64 {
        self.remove(MatchKind::Sender, sender).await
    }

    pub async fn remove_by_recipient(&self, recipient: &str) -> i64 {
        self.remove(MatchKind::Recipient, recipient).await
    }

    async fn remove(&self, kind: MatchKind, value: &str) -> i64 {
        count(self.context.queue().remove(kind, value).await, "remove")
    }

    /// Names of the configured repositories
    #[must_use]
    pub fn repositories(&self) -> Vec<String> {
        self.context
            .repositories()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Summaries of every mail held in `repository`
    ///
    /// # Errors
    /// If the repository is unknown or cannot be read
    pub async fn list(&self, repository: &str) -> Result<Vec<MailSummary>> {
        let repository = self.context.repositories().get(repository)?;

        let mut summaries = Vec::new();
        for id in repository.list().await? {
            match repository.retrieve(&id).await {
                Ok(mail) => summaries.push(MailSummary::from(&mail)),
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }

        Ok(summaries)
    }

    /// The full mail `id` held in `repository`
    ///
    /// # Errors
    /// If the repository is unknown, the id is malformed or the mail is not
    /// there
    pub async fn view(&self, repository: &str, id: &str) -> Result<Mail> {
        let id = parse_id(id)?;
        Ok(self.context.repositories().get(repository)?.retrieve(&id).await?)
    }

    ///
    /// Put a mail held in `repository` back into the queue at the initial
    /// state, with its hop count, error message and loop marker cleared, and
    /// remove it from the repository
    ///
    /// # Errors
    /// If the mail cannot be found, queued or removed
    ///
    pub async fn replay(&self, repository: &str, id: &str) -> Result<MailId> {
        let id = parse_id(id)?;
        let repository = self.context.repositories().get(repository)?;
        let mut mail = repository.retrieve(&id).await?;

        mail.clear_error_message();
        mail.remove_attribute(LOOP_DETECTED);
        mail.reset_hops();
        mail.set_state(self.context.processors().initial_state().clone());

        self.context.queue().enqueue(&mail, Duration::ZERO).await?;

        // Same id: removing from the spool repository would drop what was
        // just queued
        if repository.name() != self.context.queue().repository().name() {
            repository.remove_if_present(&id).await?;
        }

        incoming!(
            level = INFO,
            "Replayed {id} from repository '{}'",
            repository.name()
        );
        Ok(id)
    }
}

fn parse_id(id: &str) -> Result<MailId> {
    id.trim()
        .parse()
        .map_err(|_| ManagerError::InvalidId(id.to_string()))
}
