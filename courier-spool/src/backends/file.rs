use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use courier_common::{MailId, internal};
use courier_tracing::traced;
use tokio::fs;

use crate::{
    error::{PersistenceError, Result, ValidationError},
    repository::RepositoryBackend,
};

const EXTENSION: &str = ".mail";
const TEMP_PREFIX: &str = ".tmp_";
const DELETED_SUFFIX: &str = ".deleted";

const SYSTEM_DIRECTORIES: [&str; 9] = [
    "/etc",
    "/bin",
    "/sbin",
    "/usr/bin",
    "/usr/sbin",
    "/boot",
    "/sys",
    "/proc",
    "/dev",
];

/// Parse a mail id from a record filename like `01ARZ3NDEKTSV4RRFFQ69G5FAV.mail`
///
/// Anything with a path separator, a `..`, the wrong extension or an invalid id
/// is rejected, so a hostile directory entry can never name a path outside the
/// repository.
fn id_from_filename(filename: &str) -> Option<MailId> {
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        return None;
    }

    filename.strip_suffix(EXTENSION)?.parse().ok()
}

/// File-based repository backend
///
/// Each mail is a single file `{id}.mail` holding its bincode record. Forked
/// mails use their full id, so `ROOT.BRANCH.mail` sits next to `ROOT.mail`.
///
/// # Atomicity
/// Writes go to `.tmp_{id}.mail` and are renamed into place, so a crash never
/// leaves a half-written record visible. Deletes first rename the record to
/// `{id}.mail.deleted` and then unlink it; leftovers of either kind are swept
/// by [`FileBackend::init`].
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Validate a repository path
    ///
    /// Rejects `..` components, relative paths and paths inside system
    /// directories.
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    pub fn validate_path(path: &Path) -> std::result::Result<(), ValidationError> {
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(ValidationError::ParentComponent(path.display().to_string()));
        }

        if !path.is_absolute() {
            return Err(ValidationError::NotAbsolute(path.display().to_string()));
        }

        if let Some(prefix) = SYSTEM_DIRECTORIES
            .iter()
            .find(|prefix| path.starts_with(prefix))
        {
            return Err(ValidationError::SystemDirectory {
                prefix: (*prefix).to_string(),
                path: path.display().to_string(),
            });
        }

        Ok(())
    }

    #[must_use]
    pub fn builder() -> FileBackendBuilder {
        FileBackendBuilder::default()
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record_path(&self, id: &MailId) -> PathBuf {
        self.path.join(format!("{id}{EXTENSION}"))
    }

    /// Prepare the repository directory
    ///
    /// Creates the directory if needed, checks it really is a directory and
    /// removes leftovers of interrupted writes and deletes.
    ///
    /// # Errors
    /// - If the path cannot be created
    /// - If the path exists but is not a directory
    pub fn init(&self) -> Result<()> {
        internal!("Initialising repository at {} ...", self.path.display());

        if !self.path.try_exists()? {
            internal!("{} does not exist, creating...", self.path.display());
            std::fs::create_dir_all(&self.path)?;
        } else if !self.path.is_dir() {
            return Err(ValidationError::NotDirectory(self.path.display().to_string()).into());
        }

        self.cleanup_orphans()
    }

    fn cleanup_orphans(&self) -> Result<()> {
        let mut cleaned = 0;

        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if filename.ends_with(DELETED_SUFFIX) || filename.starts_with(TEMP_PREFIX) {
                std::fs::remove_file(entry.path())?;
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} orphaned files from {}",
                self.path.display()
            );
        }

        Ok(())
    }
}

#[async_trait]
impl RepositoryBackend for FileBackend {
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self, bytes), fields(id = %id)), timing(precision = "ms"))]
    async fn store(&self, id: &MailId, bytes: &[u8]) -> Result<()> {
        let path = self.record_path(id);
        let temp = self.path.join(format!("{TEMP_PREFIX}{id}{EXTENSION}"));

        fs::write(&temp, bytes).await?;
        fs::rename(&temp, &path).await?;

        internal!(level = DEBUG, "Stored {id} at {}", path.display());

        Ok(())
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip(self), fields(id = %id)), timing(precision = "ms"))]
    async fn retrieve(&self, id: &MailId) -> Result<Vec<u8>> {
        match fs::read(self.record_path(id)).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(PersistenceError::NotFound(*id)),
            Err(err) => Err(err.into()),
        }
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip(self), fields(id = %id)), timing(precision = "ms"))]
    async fn remove(&self, id: &MailId) -> Result<()> {
        let path = self.record_path(id);
        let deleted = self.path.join(format!("{id}{EXTENSION}{DELETED_SUFFIX}"));

        match fs::rename(&path, &deleted).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(PersistenceError::NotFound(*id));
            }
            Err(err) => return Err(err.into()),
        }

        // A crash here leaves a .deleted file for init() to sweep
        fs::remove_file(&deleted).await?;

        internal!(level = DEBUG, "Removed {id} from {}", self.path.display());

        Ok(())
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip(self)), timing(precision = "ms"))]
    async fn list(&self) -> Result<Vec<MailId>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if !filename.starts_with(TEMP_PREFIX)
                && let Some(id) = id_from_filename(&filename)
            {
                ids.push(id);
            }
        }

        ids.sort();

        internal!(
            level = DEBUG,
            "Found {} records in {}",
            ids.len(),
            self.path.display()
        );

        Ok(ids)
    }
}

/// Builder for [`FileBackend`]
#[derive(Debug, Default)]
pub struct FileBackendBuilder {
    path: PathBuf,
}

impl FileBackendBuilder {
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Build the final [`FileBackend`]
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    pub fn build(self) -> std::result::Result<FileBackend, ValidationError> {
        FileBackend::validate_path(&self.path)?;
        Ok(FileBackend { path: self.path })
    }
}
