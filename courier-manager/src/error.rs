use courier_common::AddressError;
use courier_queue::{EnqueueError, QueueError};
use courier_spool::PersistenceError;
use thiserror::Error;

/// Why the ingestion port refused a message
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("Invalid sender '{address}': {source}")]
    InvalidSender {
        address: String,
        #[source]
        source: AddressError,
    },

    #[error("Invalid recipient '{address}': {source}")]
    InvalidRecipient {
        address: String,
        #[source]
        source: AddressError,
    },

    #[error("Message has no recipients")]
    NoRecipients,

    #[error("Message of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("Unable to queue message: {0}")]
    Enqueue(#[from] EnqueueError),
}

impl Rejection {
    /// Whether sending the same message again could succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Enqueue(EnqueueError::Persistence(_)))
    }
}

/// Failures of the spool manager and the management API
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Enqueue(#[from] EnqueueError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Invalid mail id '{0}'")]
    InvalidId(String),

    #[error("Unable to dead-letter {id}: {source}")]
    DeadLetter {
        id: courier_common::MailId,
        #[source]
        source: PersistenceError,
    },
}

pub type Result<T, E = ManagerError> = std::result::Result<T, E>;
