//! The spool queue: references to stored mail, each visible from a ready
//! time onwards and handed out under an exclusive, expiring lease.

pub mod config;
pub mod error;
pub mod lease;
pub mod management;
pub mod queue;
pub mod retry;

pub use config::QueueConfig;
pub use error::{DequeueError, EnqueueError, QueueError};
pub use lease::Lease;
pub use management::{MatchKind, QueueStats};
pub use queue::MailQueue;
pub use retry::RetryPolicy;
