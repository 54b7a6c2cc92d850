//! Upward manifest search, bounded by the project root

use std::path::Path;
use std::path::PathBuf;

use cargo_metadata::MetadataCommand;
use serde::Serialize;
use tracing::debug;

/// Helper function to safely canonicalize a path
/// Returns the canonicalized path if successful, otherwise returns the original path
pub fn safe_canonicalize(path: &Path) -> PathBuf {
    match path.canonicalize() {
        Ok(canonical) => canonical,
        Err(e) => {
            debug!("Failed to canonicalize path '{}': {}", path.display(), e);
            path.to_path_buf()
        }
    }
}

/// Result of a manifest search
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ManifestLocation {
    /// Absolute path to the nearest enclosing manifest
    Found { manifest_path: PathBuf },
    /// Nothing between the file and the project root
    NotFound { searched_up_to: PathBuf },
}

impl ManifestLocation {
    pub fn manifest_path(&self) -> Option<&Path> {
        match self {
            Self::Found { manifest_path } => Some(manifest_path),
            Self::NotFound { .. } => None,
        }
    }
}

/// A location plus how many directories were probed to find it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestSearch {
    pub location: ManifestLocation,
    pub probes:   usize,
}

/// Walks from a file's directory up to (and including) the project root
#[derive(Debug, Clone)]
pub struct ManifestLocator {
    project_root:  PathBuf,
    manifest_name: String,
}

impl ManifestLocator {
    pub fn new(project_root: impl AsRef<Path>, manifest_name: impl Into<String>) -> Self {
        Self {
            project_root:  safe_canonicalize(project_root.as_ref()),
            manifest_name: manifest_name.into(),
        }
    }

    /// Find the manifest nearest to `file`.
    ///
    /// Probes the containing directory, then each parent, stopping after the
    /// project root. A file outside the project root is never searched.
    pub fn locate(&self, file: &Path) -> ManifestSearch {
        let file = safe_canonicalize(file);
        let not_found = |probes| ManifestSearch {
            location: ManifestLocation::NotFound {
                searched_up_to: self.project_root.clone(),
            },
            probes,
        };

        let Some(start) = file.parent() else {
            return not_found(0);
        };
        if !start.starts_with(&self.project_root) {
            tracing::warn!(
                "{} is outside project root {}, skipping manifest search",
                file.display(),
                self.project_root.display()
            );
            return not_found(0);
        }

        let mut probes = 0;
        let mut here = start;
        loop {
            probes += 1;
            let candidate = here.join(&self.manifest_name);
            if candidate.is_file() {
                debug!("Found manifest {} after {probes} probes", candidate.display());
                return ManifestSearch {
                    location: ManifestLocation::Found {
                        manifest_path: candidate,
                    },
                    probes,
                };
            }
            if here == self.project_root {
                break;
            }
            match here.parent() {
                Some(parent) => here = parent,
                None => break,
            }
        }

        debug!(
            "No {} between {} and {} ({probes} probes)",
            self.manifest_name,
            file.display(),
            self.project_root.display()
        );
        not_found(probes)
    }
}

/// Workspace root cargo reports for the directory holding `file`
pub fn detect_workspace_root(file: &Path) -> Option<PathBuf> {
    let dir = safe_canonicalize(file).parent()?.to_path_buf();
    match MetadataCommand::new().current_dir(&dir).no_deps().exec() {
        Ok(metadata) => Some(metadata.workspace_root.into_std_path_buf()),
        Err(e) => {
            debug!("cargo metadata failed in {}: {e}", dir.display());
            None
        }
    }
}
