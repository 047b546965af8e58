//! Typed errors for queue operations.

use courier_common::MailId;
use courier_spool::PersistenceError;
use thiserror::Error;

/// A mail could not be placed on the queue.
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// The mail may not be queued in its current form (e.g. it is a ghost).
    #[error("Mail {id} cannot be enqueued: {reason}")]
    Invalid { id: MailId, reason: String },

    /// The mail could not be written to the backing repository.
    #[error("Failed to persist mail: {0}")]
    Persistence(#[from] PersistenceError),
}

/// The queue could not hand out a mail.
#[derive(Debug, Error)]
pub enum DequeueError {
    /// The repository failed while loading a leased mail. The lease was
    /// released again, so the mail stays queued.
    #[error("Repository failure while loading {id}: {source}")]
    Backend {
        id: MailId,
        #[source]
        source: PersistenceError,
    },
}

/// An operation on a lease or on the queue as a whole failed.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The lease expired and the mail was handed to another worker.
    #[error("Lease on {0} was lost")]
    LeaseLost(MailId),

    /// The backing repository failed.
    #[error("Repository failure: {0}")]
    Persistence(#[from] PersistenceError),
}

impl QueueError {
    #[must_use]
    pub const fn is_lease_lost(&self) -> bool {
        matches!(self, Self::LeaseLost(_))
    }
}
