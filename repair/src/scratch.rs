//! Per-attempt scratch space and the one-attempt-per-file lock.
//!
//! Every artifact an attempt hands to external tools (backup, mutability
//! artifact, debug copy, standalone lifetime units) lives in a directory created
//! for that attempt, so two attempts never share a hand-off path.

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;
use sysinfo::Pid;
use sysinfo::ProcessStatus;
use sysinfo::ProcessesToUpdate;
use sysinfo::System;
use uuid::Uuid;

use crate::error::Error;
use crate::error::Result;
use crate::manifest::safe_canonicalize;

const MUTABILITY_ARTIFACT_NAME: &str = "method_call_mutability.txt";
const STANDALONE_INPUT_NAME: &str = "pre_repair_extract.rs";
const STANDALONE_OUTPUT_NAME: &str = "post_repair_extract.rs";

/// Where one attempt reads and writes its artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptPaths {
    pub backup:              PathBuf,
    pub debug:               PathBuf,
    pub mutability_artifact: PathBuf,
    pub standalone_input:    PathBuf,
    pub standalone_output:   PathBuf,
}

impl AttemptPaths {
    /// Layout inside a per-attempt scratch directory
    pub fn in_scratch(scratch: &Path, working_file: &Path) -> Self {
        let name = file_name_of(working_file);
        Self {
            backup:              scratch.join(format!("{name}-extract.bk")),
            debug:               scratch.join(format!("{name}-debug-repair")),
            mutability_artifact: scratch.join(MUTABILITY_ARTIFACT_NAME),
            standalone_input:    scratch.join(STANDALONE_INPUT_NAME),
            standalone_output:   scratch.join(STANDALONE_OUTPUT_NAME),
        }
    }

    /// Dump mode layout: artifacts sit next to the working file for inspection
    pub fn beside(working_file: &Path) -> Self {
        Self {
            backup:              with_suffix(working_file, "_ORIGINAL"),
            debug:               with_suffix(working_file, "_DEBUG"),
            mutability_artifact: with_suffix(working_file, "_MUTABLE_METHOD_CALLS"),
            standalone_input:    with_suffix(working_file, "_PRE_REPAIR"),
            standalone_output:   with_suffix(working_file, "_POST_REPAIR"),
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name().map_or_else(
        || "working-file".to_string(),
        |name| name.to_string_lossy().into_owned(),
    )
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Scratch directory owned by one attempt
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Create `<root>/<file-stem>-<uuid>`
    pub fn create(root: &Path, working_file: &Path) -> Result<Self> {
        let stem = working_file
            .file_stem()
            .map_or_else(|| "attempt".to_string(), |s| s.to_string_lossy().into_owned());
        let path = root.join(format!("{stem}-{}", Uuid::new_v4().simple()));

        std::fs::create_dir_all(&path)
            .change_context(Error::failed_to("create scratch directory", path.display()))?;
        tracing::debug!("Scratch directory: {}", path.display());

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory and everything in it
    pub fn discard(self) -> Result<()> {
        std::fs::remove_dir_all(&self.path)
            .change_context(Error::failed_to("remove scratch directory", self.path.display()))?;
        tracing::debug!("Removed scratch directory {}", self.path.display());
        Ok(())
    }
}

/// Exclusive claim on a working file for the duration of one attempt.
///
/// Released on drop. A lock left behind by a process that no longer exists is
/// reclaimed.
#[derive(Debug)]
pub struct AttemptLock {
    path: PathBuf,
}

impl AttemptLock {
    pub fn acquire(root: &Path, working_file: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .change_context(Error::failed_to("create scratch root", root.display()))?;

        let path = root.join(lock_file_name(working_file));
        match Self::try_create(&path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let owner = read_owner(&path);
                match owner {
                    Some(pid) if !process_alive(pid) => {
                        tracing::warn!(
                            "Reclaiming stale attempt lock {} left by PID {pid}",
                            path.display()
                        );
                        std::fs::remove_file(&path).change_context(Error::failed_to(
                            "remove stale lock",
                            path.display(),
                        ))?;
                        Self::try_create(&path)
                            .change_context(Error::failed_to("create lock", path.display()))
                    }
                    _ => Err(Report::new(Error::AttemptInProgress(format!(
                        "{} is locked by {}",
                        working_file.display(),
                        owner.map_or_else(|| "an unknown process".to_string(), |pid| format!("PID {pid}"))
                    )))
                    .attach(format!("Lock file: {}", path.display()))),
                }
            }
            Err(e) => Err(Report::new(e)
                .change_context(Error::failed_to("create lock", path.display()))),
        }
    }

    fn try_create(path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(file, "{}", std::process::id())?;
        file.sync_all()?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for AttemptLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!("Failed to release lock {}: {e}", self.path.display());
        }
    }
}

fn lock_file_name(working_file: &Path) -> String {
    let canonical = safe_canonicalize(working_file);
    // Name-based uuid so every build agrees on the lock for a path
    let key = Uuid::new_v5(&Uuid::NAMESPACE_URL, canonical.as_os_str().as_encoded_bytes());
    format!("{}-{}.lock", file_name_of(working_file), key.simple())
}

fn read_owner(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system
        .process(pid)
        .is_some_and(|process| !matches!(process.status(), ProcessStatus::Zombie))
}
