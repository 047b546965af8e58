//! Shared types for the courier mail processing core.
//!
//! - [`mail`]: the [`Mail`] entity that flows through queue and pipeline
//! - [`address`], [`attribute`], [`content`], [`state`]: its building blocks
//! - [`logging`]: subscriber setup and the `internal!`/`incoming!`/`outgoing!` macros

pub mod address;
pub mod attribute;
pub mod content;
pub mod error;
pub mod logging;
pub mod mail;
pub mod state;

pub use address::MailAddress;
pub use attribute::{AttributeValue, Attributes};
pub use content::Content;
pub use error::{AddressError, ContentError, StateError};
pub use mail::{Mail, MailId, Recipients};
pub use state::State;
pub use tracing;

/// Lifecycle signal broadcast to every long-running task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Stop taking new work, finish what is in flight
    Shutdown,
    /// Everything has stopped
    Finalised,
}
