use courier_common::{AddressError, ContentError, MailId, StateError};
use courier_spool::PersistenceError;
use thiserror::Error;

/// A matcher could not decide.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Content(#[from] ContentError),
}

/// A mailet could not finish its action.
#[derive(Debug, Error)]
pub enum MailetError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Unable to submit mail: {0}")]
    Submit(String),
}

/// The pipeline configuration cannot be turned into processors.
///
/// Raised once at load time; a running pipeline never produces it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Unknown matcher '{0}'")]
    UnknownMatcher(String),

    #[error("Unknown mailet '{0}'")]
    UnknownMailet(String),

    #[error("{component}: {reason}")]
    InvalidArgument { component: String, reason: String },

    #[error("Matcher '{0}' has a condition both inline and in 'condition'")]
    ConflictingCondition(String),

    #[error("No processor is configured for the required state '{0}'")]
    MissingProcessor(String),

    #[error("Processor '{0}' is configured more than once")]
    DuplicateProcessor(String),

    #[error("'{0}' is reserved and cannot name a processor")]
    ReservedName(String),

    #[error("Processor '{processor}' routes to '{target}', which is not a processor")]
    UnknownTarget { processor: String, target: String },

    #[error("Processor '{processor}' stores into '{repository}', which is not a repository")]
    UnknownRepository {
        processor: String,
        repository: String,
    },

    #[error("Processor '{0}' cannot fall through to itself")]
    SelfFallthrough(String),

    #[error("max_hops must be at least 1")]
    InvalidMaxHops,

    #[error(transparent)]
    State(#[from] StateError),
}

impl ConfigurationError {
    pub fn invalid(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            component: component.into(),
            reason: reason.into(),
        }
    }
}

/// Reasons a mail cannot continue through the pipeline at all.
///
/// These end in the error processor or, when that is no longer possible, in
/// the dead-letter repository.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProcessingError {
    #[error("processing loop detected after {hops} hops")]
    LoopDetected { id: MailId, hops: u32 },

    #[error("no processor configured for state '{state}'")]
    UnknownState { id: MailId, state: String },
}
