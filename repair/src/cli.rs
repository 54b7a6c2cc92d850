use std::path::Path;
use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use error_stack::ResultExt;

use crate::error::Error;
use crate::error::Result;
use crate::log_tools::TracingLevel;
use crate::manifest::detect_workspace_root;
use crate::pipeline::Decision;
use crate::pipeline::EscalationHandler;
use crate::pipeline::ExtractionContext;
use crate::pipeline::FixedDecision;
use crate::pipeline::PromptHandler;

#[derive(Parser, Debug)]
#[command(name = "rem-repair")]
#[command(about = "Repair borrow, control-flow and lifetime fallout of an extracted function", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "REM_REPAIR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level: error, warn, info, debug or trace (`RUST_LOG` overrides)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: TracingLevel,

    /// Directory for rotated log files
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run every repair stage on an extracted function
    Run {
        #[command(flatten)]
        target: Target,

        /// Upper bound of the manifest search (defaults to the cargo workspace root)
        #[arg(long)]
        project_root: Option<PathBuf>,

        /// The call site awaits the new function
        #[arg(long)]
        is_async: bool,

        /// What to do when lifetimes cannot be verified
        #[arg(long, value_enum, default_value_t = OnUnverified::Prompt)]
        on_unverified: OnUnverified,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record mutable receiver calls only, keeping the original and the
    /// artifact next to the file
    Dump {
        #[command(flatten)]
        target: Target,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show which manifest lifetime repair would use for a file
    LocateManifest {
        /// Source file
        file: PathBuf,

        /// Upper bound of the search (defaults to the cargo workspace root)
        #[arg(long)]
        project_root: Option<PathBuf>,
    },
}

/// The extraction to repair
#[derive(Args, Debug)]
pub struct Target {
    /// File holding the extracted function
    pub file: PathBuf,

    /// Name of the extracted function
    #[arg(long)]
    pub new_fn: String,

    /// Name of the function it was extracted from
    #[arg(long)]
    pub parent_fn: String,

    /// Extraction output to apply, when the file still holds the original code
    #[arg(long)]
    pub candidate: Option<PathBuf>,
}

impl Target {
    pub fn context(&self, project_root: Option<PathBuf>) -> Result<ExtractionContext> {
        let mut context = ExtractionContext::new(&self.file, &self.new_fn, &self.parent_fn)?
            .with_project_root(resolve_project_root(&self.file, project_root));

        if let Some(path) = &self.candidate {
            let text = std::fs::read_to_string(path)
                .change_context(Error::io_failed("read candidate", path, "unreadable"))?;
            context = context.with_candidate(text);
        }
        Ok(context)
    }
}

/// Explicit root, else the cargo workspace root, else the file's directory
pub fn resolve_project_root(file: &Path, explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| detect_workspace_root(file))
        .or_else(|| file.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnUnverified {
    /// Ask on the terminal
    #[default]
    Prompt,
    /// Keep the unverified result
    Proceed,
    /// Roll back
    Abort,
}

impl OnUnverified {
    pub fn handler(self) -> Box<dyn EscalationHandler> {
        match self {
            Self::Prompt => Box::new(PromptHandler),
            Self::Proceed => Box::new(FixedDecision(Decision::Proceed)),
            Self::Abort => Box::new(FixedDecision(Decision::Abort)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::panic, reason = "tests")]
mod tests {
    use super::*;

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "rem-repair",
            "--log-level",
            "debug",
            "run",
            "src/main.rs",
            "--new-fn",
            "extracted",
            "--parent-fn",
            "collect",
            "--on-unverified",
            "abort",
            "--json",
        ])
        .expect("valid arguments");

        assert_eq!(cli.log_level, TracingLevel::Debug);
        let Command::Run {
            target,
            on_unverified,
            json,
            is_async,
            ..
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(target.file, PathBuf::from("src/main.rs"));
        assert_eq!(target.new_fn, "extracted");
        assert_eq!(on_unverified, OnUnverified::Abort);
        assert!(json);
        assert!(!is_async);
    }

    #[test]
    fn test_names_are_required() {
        assert!(Cli::try_parse_from(["rem-repair", "dump", "src/main.rs"]).is_err());
    }

    #[test]
    fn test_explicit_project_root_wins() {
        let root = resolve_project_root(Path::new("/nowhere/src/lib.rs"), Some(PathBuf::from("/p")));
        assert_eq!(root, PathBuf::from("/p"));
    }

    #[test]
    fn test_candidate_is_read_into_context() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("lib.rs");
        let candidate = dir.path().join("candidate.rs");
        std::fs::write(&file, "fn a() {}").expect("write");
        std::fs::write(&candidate, "fn a() { b() }\nfn b() {}").expect("write");

        let target = Target {
            file,
            new_fn: "b".to_string(),
            parent_fn: "a".to_string(),
            candidate: Some(candidate),
        };
        let context = target
            .context(Some(dir.path().to_path_buf()))
            .expect("context");
        assert_eq!(context.candidate(), Some("fn a() { b() }\nfn b() {}"));
    }
}
