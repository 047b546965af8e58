use std::sync::Arc;

use ahash::AHashMap;
use courier_common::internal;

use crate::{
    config::RepositoryConfig,
    error::{PersistenceError, Result},
    repository::{MailRepository, RepositoryBackend},
};

/// Name of the repository holding mail that could not be processed
pub const DEAD_LETTER: &str = "dead-letter";

/// The named repositories mailets and the spool manager can write to.
///
/// A `dead-letter` repository always exists; when none is configured it is
/// held in memory.
#[derive(Debug, Clone)]
pub struct RepositoryStore {
    repositories: AHashMap<String, MailRepository>,
}

impl Default for RepositoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RepositoryStore {
    #[must_use]
    pub fn new() -> Self {
        let mut repositories = AHashMap::new();
        repositories.insert(
            DEAD_LETTER.to_string(),
            MailRepository::new(DEAD_LETTER, Arc::new(crate::MemoryBackend::new())),
        );
        Self { repositories }
    }

    /// Build every configured repository
    ///
    /// # Errors
    /// If any backend fails to initialise
    pub fn from_config(configs: AHashMap<String, RepositoryConfig>) -> Result<Self> {
        if !configs.contains_key(DEAD_LETTER) {
            internal!(
                level = WARN,
                "No '{DEAD_LETTER}' repository configured, dead letters are kept in memory"
            );
        }

        let mut store = Self::new();
        for (name, config) in configs {
            internal!(level = DEBUG, "Building repository {name}: {config:?}");
            let repository = config.into_repository(&name)?;
            store.repositories.insert(name, repository);
        }

        Ok(store)
    }

    /// Register (or replace) a repository
    pub fn insert(&mut self, name: impl Into<String>, backend: Arc<dyn RepositoryBackend>) {
        let name = name.into();
        let repository = MailRepository::new(name.as_str(), backend);
        self.repositories.insert(name, repository);
    }

    /// # Errors
    /// [`PersistenceError::UnknownRepository`] when no repository has this name
    pub fn get(&self, name: &str) -> Result<&MailRepository> {
        self.repositories
            .get(name)
            .ok_or_else(|| PersistenceError::UnknownRepository(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.repositories.contains_key(name)
    }

    #[must_use]
    pub fn dead_letter(&self) -> &MailRepository {
        // Present from construction and never removed
        &self.repositories[DEAD_LETTER]
    }

    /// Repository names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.repositories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_dead_letter_always_present() {
        let store = RepositoryStore::new();
        assert_eq!(store.dead_letter().name(), DEAD_LETTER);
        assert_eq!(store.names(), vec![DEAD_LETTER]);
    }

    #[test]
    fn test_from_config() {
        let mut configs = AHashMap::new();
        configs.insert("error".to_string(), RepositoryConfig::memory());
        configs.insert(
            "relay".to_string(),
            RepositoryConfig::Memory { capacity: Some(5) },
        );

        let store = RepositoryStore::from_config(configs).unwrap();
        assert_eq!(store.names(), vec!["dead-letter", "error", "relay"]);
        assert!(store.contains("relay"));
        assert!(matches!(
            store.get("missing"),
            Err(PersistenceError::UnknownRepository(name)) if name == "missing"
        ));
    }
}
