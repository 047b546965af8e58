use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{
    backends::{FileBackend, MemoryBackend},
    error::Result,
    repository::{MailRepository, RepositoryBackend},
};

/// Configuration for a repository backend
///
/// File-backed repository in RON config:
/// ```ron
/// spool: File(
///     path: "/var/spool/courier",
/// ),
/// ```
///
/// Memory-backed repository, optionally bounded:
/// ```ron
/// repositories: {
///     "quarantine": Memory(capacity: Some(1000)),
/// },
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum RepositoryConfig {
    /// One file per mail under `path`
    File { path: PathBuf },
    /// Non-durable, in-process storage
    Memory {
        #[serde(default)]
        capacity: Option<usize>,
    },
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self::File {
            path: PathBuf::from("/var/spool/courier"),
        }
    }
}

impl RepositoryConfig {
    /// An unbounded memory repository
    #[must_use]
    pub const fn memory() -> Self {
        Self::Memory { capacity: None }
    }

    /// Build and initialise the configured backend
    ///
    /// # Errors
    /// If the file path is invalid or cannot be prepared
    pub fn into_backend(self) -> Result<Arc<dyn RepositoryBackend>> {
        match self {
            Self::File { path } => {
                let backend = FileBackend::builder().path(path).build()?;
                backend.init()?;
                Ok(Arc::new(backend))
            }
            Self::Memory { capacity } => Ok(capacity.map_or_else(
                || Arc::new(MemoryBackend::new()) as Arc<dyn RepositoryBackend>,
                |capacity| Arc::new(MemoryBackend::with_capacity(capacity)),
            )),
        }
    }

    /// Build the backend and wrap it as a repository called `name`
    ///
    /// # Errors
    /// See [`RepositoryConfig::into_backend`]
    pub fn into_repository(self, name: &str) -> Result<MailRepository> {
        Ok(MailRepository::new(name, self.into_backend()?))
    }
}
