//! Storage backends for mail repositories
//!
//! - `file`: one file per mail, for production use
//! - `memory`: in-memory storage for tests and transient repositories
//! - `test`: memory storage with synchronisation and failure injection

pub mod file;
pub mod memory;
pub mod test;

pub use file::{FileBackend, FileBackendBuilder};
pub use memory::MemoryBackend;
pub use test::TestBackend;
