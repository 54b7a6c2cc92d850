//! In-memory view of the file being repaired.
//!
//! External tools rewrite the file on disk behind our back, so the view is a
//! cache that the pipeline marks stale after every tool run or restore.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use error_stack::ResultExt;

use crate::error::Error;
use crate::error::Result;

#[derive(Debug)]
pub struct WorkingFile {
    path:    PathBuf,
    view:    Option<String>,
    /// The view holds a candidate that has not been written to disk yet
    pending: bool,
}

impl WorkingFile {
    /// View of the file as it currently is on disk
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path:    path.into(),
            view:    None,
            pending: false,
        }
    }

    /// View holding an extraction candidate that replaces the on-disk text on `commit`
    pub fn with_candidate(path: impl Into<PathBuf>, candidate: String) -> Self {
        Self {
            path:    path.into(),
            view:    Some(candidate),
            pending: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn has_pending_candidate(&self) -> bool {
        self.pending
    }

    /// Current text, read from disk when the view is stale
    pub fn contents(&mut self) -> Result<&str> {
        if self.view.is_none() {
            let text = std::fs::read_to_string(&self.path)
                .change_context(Error::io_failed("read", &self.path, "unreadable"))?;
            self.view = Some(text);
        }
        Ok(self.view.as_deref().unwrap_or_default())
    }

    /// Write a pending candidate to disk. Returns whether anything was written.
    pub fn commit(&mut self) -> Result<bool> {
        if !self.pending {
            return Ok(false);
        }
        let text = self.view.clone().unwrap_or_default();
        write_synced(&self.path, text.as_bytes())?;
        self.pending = false;
        tracing::debug!("Committed extraction candidate to {}", self.path.display());
        Ok(true)
    }

    /// Replace the file's text on disk and in the view
    pub fn replace(&mut self, text: String) -> Result<()> {
        write_synced(&self.path, text.as_bytes())?;
        self.view = Some(text);
        self.pending = false;
        Ok(())
    }

    /// Forget the cached view; the next read goes to disk
    pub fn mark_stale(&mut self) {
        self.view = None;
        self.pending = false;
    }
}

/// Overwrite `path` in place and flush it to disk
pub fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .change_context(Error::io_failed("open", path, "cannot open for writing"))?;
    file.write_all(bytes)
        .change_context(Error::io_failed("write", path, "short write"))?;
    file.sync_all()
        .change_context(Error::io_failed("sync", path, "fsync failed"))?;
    Ok(())
}
