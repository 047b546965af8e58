//! Control protocol for managing a running courier instance
//!
//! Requests travel over a Unix domain socket as length-prefixed bincode
//! frames. The commands cover the queue (size, stats, clear, flush, removal)
//! and the named repositories (list, view and replay held mail).

pub mod auth;
pub mod client;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod server;

pub use auth::ControlAuthConfig;
pub use client::ControlClient;
pub use error::{ControlError, Result};
pub use protocol::{
    PROTOCOL_VERSION, QueueCommand, RepositoryCommand, Request, RequestCommand, Response,
    ResponseData, ResponsePayload, SystemCommand,
};
pub use server::{CommandHandler, ControlServer};

/// Default path for the control socket
pub const DEFAULT_CONTROL_SOCKET: &str = "/tmp/courier.sock";
