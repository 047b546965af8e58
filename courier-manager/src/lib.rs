//! The spool manager: a pool of workers that lease mail from the queue, run it
//! through the processor for its state and queue whatever comes out, plus the
//! ingestion port and the management API sharing the same [`SpoolContext`].

pub mod config;
pub mod context;
pub mod error;
pub mod ingest;
pub mod management;
pub mod manager;
mod worker;

pub use config::ManagerConfig;
pub use context::SpoolContext;
pub use error::{ManagerError, Rejection, Result};
pub use ingest::{Ingest, IngestConfig};
pub use management::{MailSummary, Management};
pub use manager::SpoolManager;
pub use worker::LOOP_DETECTED;
