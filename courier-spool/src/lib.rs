pub mod backends;
pub mod config;
pub mod error;
pub mod repository;
pub mod store;

pub use backends::{FileBackend, FileBackendBuilder, MemoryBackend, TestBackend};
pub use config::RepositoryConfig;
pub use error::{PersistenceError, Result, SerializationError, ValidationError};
pub use repository::{MailRepository, RepositoryBackend};
pub use store::{DEAD_LETTER, RepositoryStore};
