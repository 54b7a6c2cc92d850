//! Snapshot and restore of the working file around mutating stages

use std::ffi::OsString;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;

use crate::error::Error;
use crate::error::Result;
use crate::scratch::AttemptPaths;
use crate::working_file::WorkingFile;
use crate::working_file::write_synced;

/// Proof that a snapshot of `working` was written to `backup`.
///
/// Only [`BackupManager::snapshot`] creates one, so a restore always has a
/// snapshot behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupHandle {
    working: PathBuf,
    backup:  PathBuf,
}

impl BackupHandle {
    pub fn backup_path(&self) -> &Path {
        &self.backup
    }
}

/// Owns the backup and debug locations of one attempt
#[derive(Debug, Clone)]
pub struct BackupManager {
    backup_path: PathBuf,
    debug_path:  PathBuf,
}

impl BackupManager {
    pub fn new(paths: &AttemptPaths) -> Self {
        Self {
            backup_path: paths.backup.clone(),
            debug_path:  paths.debug.clone(),
        }
    }

    pub fn debug_path(&self) -> &Path {
        &self.debug_path
    }

    /// Copy `working` to the backup location, replacing any earlier backup.
    ///
    /// The copy is written to a side file, flushed, then renamed into place,
    /// so the backup path never holds a partial copy.
    pub fn snapshot(&self, working: &Path) -> Result<BackupHandle> {
        copy_complete(working, &self.backup_path)
            .attach(format!("Snapshot of {}", working.display()))?;
        tracing::debug!(
            "Snapshot {} -> {}",
            working.display(),
            self.backup_path.display()
        );
        Ok(BackupHandle {
            working: working.to_path_buf(),
            backup:  self.backup_path.clone(),
        })
    }

    /// Put the snapshot back over the working file.
    ///
    /// The failed state is copied to the debug location first. The working
    /// file's in-memory view is marked stale.
    pub fn restore(&self, handle: &BackupHandle, working: &mut WorkingFile) -> Result<()> {
        if handle.working != working.path() {
            return Err(Report::new(Error::BackupCorruption(format!(
                "snapshot of {} cannot restore {}",
                handle.working.display(),
                working.path().display()
            ))));
        }
        if !handle.backup.is_file() {
            return Err(Report::new(Error::BackupCorruption(format!(
                "backup {} is gone",
                handle.backup.display()
            ))));
        }

        if handle.working.is_file() {
            copy_complete(&handle.working, &self.debug_path)
                .attach("Saving failed state for postmortem")?;
            tracing::info!("Failed state saved to {}", self.debug_path.display());
        }

        let bytes = std::fs::read(&handle.backup)
            .change_context(Error::io_failed("read backup", &handle.backup, "unreadable"))?;
        write_synced(&handle.working, &bytes).attach("Restoring working file from backup")?;
        working.mark_stale();

        tracing::info!(
            "Restored {} from {}",
            handle.working.display(),
            handle.backup.display()
        );
        Ok(())
    }
}

/// Copy `source` to `destination` through a flushed side file and a rename
fn copy_complete(source: &Path, destination: &Path) -> Result<()> {
    let bytes = std::fs::read(source)
        .change_context(Error::io_failed("read", source, "unreadable"))?;

    let mut partial: OsString = destination.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    let mut file = File::create(&partial)
        .change_context(Error::io_failed("create", &partial, "cannot create"))?;
    file.write_all(&bytes)
        .change_context(Error::io_failed("write", &partial, "short write"))?;
    file.sync_all()
        .change_context(Error::io_failed("sync", &partial, "fsync failed"))?;
    drop(file);

    std::fs::rename(&partial, destination)
        .change_context(Error::io_failed("rename", &partial, "rename failed"))
        .attach(format!("Destination: {}", destination.display()))?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, reason = "tests")]
mod tests {
    use super::*;

    struct Fixture {
        _dir:    tempfile::TempDir,
        working: PathBuf,
        manager: BackupManager,
    }

    fn fixture(text: &str) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let working = dir.path().join("main.rs");
        std::fs::write(&working, text).expect("write");
        let scratch = dir.path().join("scratch");
        std::fs::create_dir(&scratch).expect("mkdir");
        let manager = BackupManager::new(&AttemptPaths::in_scratch(&scratch, &working));
        Fixture {
            _dir: dir,
            working,
            manager,
        }
    }

    #[test]
    fn test_restore_brings_back_snapshot_and_keeps_debug_copy() {
        let f = fixture("fn before() {}");
        let handle = f.manager.snapshot(&f.working).expect("snapshot");
        std::fs::write(&f.working, "fn broken(").expect("tool rewrite");

        let mut working = WorkingFile::open(&f.working);
        working.contents().expect("cache the broken text");
        f.manager.restore(&handle, &mut working).expect("restore");

        assert_eq!(std::fs::read_to_string(&f.working).expect("read"), "fn before() {}");
        assert_eq!(
            std::fs::read_to_string(f.manager.debug_path()).expect("debug copy"),
            "fn broken("
        );
        assert_eq!(working.contents().expect("fresh view"), "fn before() {}");
    }

    #[test]
    fn test_restore_is_idempotent() {
        let f = fixture("original");
        let handle = f.manager.snapshot(&f.working).expect("snapshot");
        std::fs::write(&f.working, "mangled").expect("tool rewrite");

        let mut working = WorkingFile::open(&f.working);
        f.manager.restore(&handle, &mut working).expect("first restore");
        let first = std::fs::read(&f.working).expect("read");
        f.manager.restore(&handle, &mut working).expect("second restore");
        let second = std::fs::read(&f.working).expect("read");

        assert_eq!(first, second);
        assert_eq!(first, b"original");
    }

    #[test]
    fn test_later_snapshot_overwrites_backup() {
        let f = fixture("one");
        f.manager.snapshot(&f.working).expect("first");
        std::fs::write(&f.working, "two").expect("write");
        let handle = f.manager.snapshot(&f.working).expect("second");

        assert_eq!(std::fs::read_to_string(handle.backup_path()).expect("backup"), "two");
        let mut partial = handle.backup_path().as_os_str().to_owned();
        partial.push(".partial");
        assert!(!PathBuf::from(partial).exists());
    }

    #[test]
    fn test_restore_without_backup_file_is_corruption() {
        let f = fixture("text");
        let handle = f.manager.snapshot(&f.working).expect("snapshot");
        std::fs::remove_file(handle.backup_path()).expect("remove backup");

        let mut working = WorkingFile::open(&f.working);
        let error = f
            .manager
            .restore(&handle, &mut working)
            .expect_err("no backup");
        assert!(matches!(error.current_context(), Error::BackupCorruption(_)));
    }

    #[test]
    fn test_restore_into_other_file_is_corruption() {
        let f = fixture("text");
        let handle = f.manager.snapshot(&f.working).expect("snapshot");
        let mut other = WorkingFile::open(f.working.with_file_name("other.rs"));
        let error = f.manager.restore(&handle, &mut other).expect_err("mismatch");
        assert!(matches!(error.current_context(), Error::BackupCorruption(_)));
    }

    #[test]
    fn test_snapshot_of_missing_file_fails() {
        let f = fixture("text");
        let error = f
            .manager
            .snapshot(&f.working.with_file_name("absent.rs"))
            .expect_err("missing");
        assert!(matches!(error.current_context(), Error::FileOperation(_)));
    }
}
