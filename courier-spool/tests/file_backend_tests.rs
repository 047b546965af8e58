#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{path::PathBuf, sync::Arc};

use courier_common::{Mail, MailAddress, MailId, State};
use courier_spool::{FileBackend, MailRepository, RepositoryBackend};

fn backend(dir: &tempfile::TempDir) -> FileBackend {
    let backend = FileBackend::builder()
        .path(dir.path())
        .build()
        .expect("tempdir should be a valid repository path");
    backend.init().expect("init should succeed");
    backend
}

#[test]
fn test_path_validation_rejects_parent_dir() {
    let result = FileBackend::builder()
        .path(PathBuf::from("/var/spool/../etc/passwd"))
        .build();

    assert!(
        result
            .unwrap_err()
            .to_string()
            .contains("cannot contain '..'")
    );
}

#[test]
fn test_path_validation_rejects_relative_paths() {
    let result = FileBackend::builder()
        .path(PathBuf::from("relative/path"))
        .build();

    assert!(result.unwrap_err().to_string().contains("must be absolute"));
}

#[test]
#[cfg(unix)]
fn test_path_validation_rejects_unix_system_directories() {
    for path in [
        "/etc/spool",
        "/bin/messages",
        "/sbin/mail",
        "/usr/bin/data",
        "/boot/spool",
        "/sys/messages",
        "/proc/mail",
        "/dev/spool",
    ] {
        let result = FileBackend::builder().path(PathBuf::from(path)).build();

        assert!(result.is_err(), "Path {path} should be rejected but wasn't");
        assert!(
            result.unwrap_err().to_string().contains("system directory"),
            "Wrong error for path {path}"
        );
    }
}

#[test]
#[cfg(unix)]
fn test_path_validation_accepts_valid_unix_paths() {
    for path in [
        "/var/spool/courier",
        "/home/user/mail",
        "/opt/courier/spool",
        "/tmp/test-spool",
    ] {
        let result = FileBackend::builder().path(PathBuf::from(path)).build();
        assert!(result.is_ok(), "Valid path {path} was rejected: {result:?}");
    }
}

#[tokio::test]
async fn test_store_is_atomic_and_last_write_wins() {
    let dir = tempfile::tempdir().unwrap();
    let backend = backend(&dir);
    let id = MailId::new();

    backend.store(&id, b"first").await.unwrap();
    backend.store(&id, b"second").await.unwrap();

    assert_eq!(backend.retrieve(&id).await.unwrap(), b"second");

    let names: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec![format!("{id}.mail")]);
}

#[tokio::test]
async fn test_remove_and_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let backend = backend(&dir);
    let id = MailId::new();

    assert!(backend.retrieve(&id).await.unwrap_err().is_not_found());
    assert!(backend.remove(&id).await.unwrap_err().is_not_found());

    backend.store(&id, b"x").await.unwrap();
    backend.remove(&id).await.unwrap();

    assert!(backend.list().await.unwrap().is_empty());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_list_skips_foreign_and_partial_files() {
    let dir = tempfile::tempdir().unwrap();
    let backend = backend(&dir);
    let id = MailId::new();
    let branch = id.fork(b"0");

    backend.store(&id, b"root").await.unwrap();
    backend.store(&branch, b"branch").await.unwrap();

    std::fs::write(dir.path().join(format!(".tmp_{}.mail", MailId::new())), b"partial").unwrap();
    std::fs::write(dir.path().join(format!("{}.mail.deleted", MailId::new())), b"gone").unwrap();
    std::fs::write(dir.path().join("README"), b"not a record").unwrap();
    std::fs::write(dir.path().join("garbage.mail"), b"bad name").unwrap();

    let mut expected = vec![id, branch];
    expected.sort();
    assert_eq!(backend.list().await.unwrap(), expected);
}

#[tokio::test]
async fn test_init_sweeps_orphans() {
    let dir = tempfile::tempdir().unwrap();
    let id = MailId::new();

    std::fs::write(dir.path().join(format!(".tmp_{id}.mail")), b"partial").unwrap();
    std::fs::write(dir.path().join(format!("{id}.mail.deleted")), b"gone").unwrap();
    std::fs::write(dir.path().join(format!("{id}.mail")), b"kept").unwrap();

    let backend = backend(&dir);

    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    assert_eq!(backend.list().await.unwrap(), vec![id]);
}

#[test]
fn test_init_rejects_a_file_path() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("not-a-dir");
    std::fs::write(&file, b"").unwrap();

    let backend = FileBackend::builder().path(file).build().unwrap();
    assert!(backend.init().unwrap_err().to_string().contains("not a directory"));
}

#[tokio::test]
async fn test_mail_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut mail = Mail::new(
        None,
        vec![MailAddress::parse("postmaster@example.com").unwrap()],
        b"Subject: bounce\r\n\r\nundeliverable".to_vec(),
        State::new("transport").unwrap(),
    );
    mail.set_error_message("550 no such user");

    {
        let repository = MailRepository::new("spool", Arc::new(backend(&dir)));
        repository.store(&mail).await.unwrap();
    }

    let reopened = MailRepository::new("spool", Arc::new(backend(&dir)));
    let ids = reopened.list().await.unwrap();
    assert_eq!(ids, vec![*mail.id()]);

    let restored = reopened.retrieve(mail.id()).await.unwrap();
    assert_eq!(restored, mail);
    assert_eq!(restored.content().header("subject").unwrap(), Some("bounce"));
}
