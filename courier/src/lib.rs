//! A mail processing core: a durable spool queue feeding a matcher/mailet
//! pipeline, driven by a pool of spool manager workers and managed over a
//! local control socket.

pub mod control_handler;
pub mod controller;

pub use controller::{ControlConfig, Courier, Running};
