use std::path::Path;
use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;
use crate::manifest::safe_canonicalize;

/// What was extracted, and where. Fixed for the whole attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionContext {
    file:         PathBuf,
    new_fn:       String,
    parent_fn:    String,
    is_async:     bool,
    project_root: PathBuf,
    #[serde(skip)]
    candidate:    Option<String>,
}

impl ExtractionContext {
    /// Both names must be plain identifiers; the file must exist
    pub fn new(file: impl AsRef<Path>, new_fn: &str, parent_fn: &str) -> Result<Self> {
        let file = file.as_ref();
        if !file.is_file() {
            return Err(Report::new(Error::invalid(
                "target file",
                format!("{} is not a file", file.display()),
            )));
        }
        validate_identifier("new function name", new_fn)?;
        validate_identifier("parent function name", parent_fn)?;
        if new_fn == parent_fn {
            return Err(Report::new(Error::cannot(
                "extract a function into itself",
                format!("both names are `{new_fn}`"),
            )));
        }

        let file = safe_canonicalize(file);
        let project_root = file
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Ok(Self {
            file,
            new_fn: new_fn.to_string(),
            parent_fn: parent_fn.to_string(),
            is_async: false,
            project_root,
            candidate: None,
        })
    }

    /// The call site of the new function awaits it
    #[must_use]
    pub fn with_async(mut self, is_async: bool) -> Self {
        self.is_async = is_async;
        self
    }

    /// Upper bound of the manifest search and working directory of the
    /// manifest-scoped repairer. Defaults to the file's directory.
    #[must_use]
    pub fn with_project_root(mut self, root: impl AsRef<Path>) -> Self {
        self.project_root = safe_canonicalize(root.as_ref());
        self
    }

    /// Extraction output that has not been written to the file yet
    #[must_use]
    pub fn with_candidate(mut self, candidate: String) -> Self {
        self.candidate = Some(candidate);
        self
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn new_fn(&self) -> &str {
        &self.new_fn
    }

    pub fn parent_fn(&self) -> &str {
        &self.parent_fn
    }

    pub const fn is_async(&self) -> bool {
        self.is_async
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn candidate(&self) -> Option<&str> {
        self.candidate.as_deref()
    }
}

fn validate_identifier(what: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Report::new(Error::missing(what)));
    }
    syn::parse_str::<syn::Ident>(name)
        .change_context(Error::invalid(what, format!("`{name}` is not an identifier")))?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, reason = "tests")]
mod tests {
    use super::*;

    fn target() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("lib.rs");
        std::fs::write(&file, "fn a() {}").expect("write");
        (dir, file)
    }

    #[test]
    fn test_defaults_project_root_to_file_directory() {
        let (dir, file) = target();
        let context = ExtractionContext::new(&file, "helper", "caller").expect("valid");
        assert_eq!(context.project_root(), safe_canonicalize(dir.path()));
        assert!(!context.is_async());
        assert!(context.candidate().is_none());
    }

    #[test]
    fn test_rejects_non_identifiers() {
        let (_dir, file) = target();
        for bad in ["", "two words", "fn", "1st"] {
            let error = ExtractionContext::new(&file, bad, "caller").expect_err(bad);
            assert!(matches!(error.current_context(), Error::InvalidArgument(_)));
        }
    }

    #[test]
    fn test_rejects_same_names_and_missing_file() {
        let (dir, file) = target();
        assert!(ExtractionContext::new(&file, "same", "same").is_err());
        assert!(ExtractionContext::new(dir.path().join("absent.rs"), "a", "b").is_err());
    }
}
