//! Staged repair of an extracted function.
//!
//! `MutabilityDump -> ControlFlowRepair -> BorrowRepair -> LifetimeRepair`, in
//! that order, stopping at the first failure. Every stage that can change the
//! working file runs with a snapshot behind it, and a failure restores that
//! snapshot, so an attempt ends either repaired or byte-for-byte as it began.
//!
//! Lifetime repair may need a human: when no manifest is found, or the
//! repairer fails, [`RepairPipeline::run`] returns [`Progress::Suspended`] and
//! the caller answers through [`RepairPipeline::resume`].

mod context;
mod escalation;
mod lifetime;
mod stage;
mod tools;

use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use error_stack::Report;
use error_stack::ResultExt;
use serde::Serialize;
use strum::Display;

pub use self::context::ExtractionContext;
pub use self::escalation::Decision;
pub use self::escalation::Escalation;
pub use self::escalation::EscalationHandler;
pub use self::escalation::FixedDecision;
pub use self::escalation::PromptHandler;
pub use self::stage::Stage;
pub use self::stage::StageRecord;
use self::stage::StageResult;
use self::tools::RepairTools;
use crate::backup::BackupHandle;
use crate::backup::BackupManager;
use crate::config::LifetimeStrategy;
use crate::config::RepairConfig;
use crate::error::Error;
use crate::error::Result;
use crate::manifest::ManifestLocation;
use crate::manifest::ManifestLocator;
use crate::mutability;
use crate::process::CommandRunner;
use crate::process::ToolInvocation;
use crate::scratch::AttemptLock;
use crate::scratch::AttemptPaths;
use crate::scratch::ScratchDir;
use crate::working_file::WorkingFile;
use crate::working_file::write_synced;

/// Full repair, or the mutability analysis alone with its artifacts kept
/// next to the file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum PipelineMode {
    #[default]
    Repair,
    Dump,
}

/// Whether lifetime repair confirmed the result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    Verified,
    /// Kept on the user's word after lifetime repair could not run or failed
    Unverified,
}

/// Terminal state of an attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Done {
        verification: Verification,
    },
    RolledBack {
        failed_stage: Stage,
        /// Copy of the file as the failed stage left it
        debug_copy:   PathBuf,
    },
    Dumped {
        artifact: PathBuf,
        calls:    usize,
    },
}

/// What happened during one attempt
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub context:       ExtractionContext,
    pub mode:          PipelineMode,
    #[serde(flatten)]
    pub outcome:       PipelineOutcome,
    pub stages:        Vec<StageRecord>,
    pub mutable_calls: Vec<String>,
    /// Scratch directory left behind, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir:   Option<PathBuf>,
}

impl RunReport {
    pub const fn is_success(&self) -> bool {
        !matches!(self.outcome, PipelineOutcome::RolledBack { .. })
    }
}

/// Result of driving the pipeline as far as it can go on its own
#[derive(Debug)]
pub enum Progress {
    Finished(Box<RunReport>),
    Suspended(Escalation),
}

/// Everything one attempt holds on to until it ends
#[derive(Debug)]
struct Attempt {
    _lock:   AttemptLock,
    scratch: Option<ScratchDir>,
    paths:   AttemptPaths,
    backups: BackupManager,
    backup:  Option<BackupHandle>,
    working: WorkingFile,
}

#[derive(Debug)]
enum Phase {
    Ready,
    Suspended {
        attempt:    Attempt,
        escalation: Escalation,
        /// Lifetime stage time spent before suspending
        elapsed:    Duration,
    },
    Finished,
}

/// Drives one extract-and-repair attempt on one file
pub struct RepairPipeline<R: CommandRunner> {
    context:       ExtractionContext,
    config:        RepairConfig,
    runner:        R,
    tools:         RepairTools,
    mode:          PipelineMode,
    phase:         Phase,
    stages:        Vec<StageRecord>,
    mutable_calls: Vec<String>,
}

impl<R: CommandRunner> RepairPipeline<R> {
    pub fn new(context: ExtractionContext, config: RepairConfig, runner: R) -> Self {
        let tools = RepairTools::new(config.programs.clone(), config.lifetime.bounds);
        Self {
            context,
            config,
            runner,
            tools,
            mode: PipelineMode::Repair,
            phase: Phase::Ready,
            stages: Vec::new(),
            mutable_calls: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: PipelineMode) -> Self {
        self.mode = mode;
        self
    }

    /// Run until the attempt finishes or needs a decision
    pub async fn run(&mut self) -> Result<Progress> {
        if !matches!(self.phase, Phase::Ready) {
            return Err(Report::new(Error::cannot(
                "run the pipeline",
                "this attempt has already started",
            )));
        }
        self.phase = Phase::Finished;

        tracing::info!(
            "{} `{}` extracted from `{}` in {} (awaited: {})",
            self.mode,
            self.context.new_fn(),
            self.context.parent_fn(),
            self.context.file().display(),
            self.context.is_async()
        );

        let attempt = self.begin()?;
        match self.mode {
            PipelineMode::Repair => self.repair(attempt).await,
            PipelineMode::Dump => Ok(Progress::Finished(Box::new(self.dump(attempt)?))),
        }
    }

    /// Answer a pending escalation
    pub fn resume(&mut self, decision: Decision) -> Result<Progress> {
        let (attempt, escalation, elapsed) =
            match std::mem::replace(&mut self.phase, Phase::Finished) {
                Phase::Suspended {
                    attempt,
                    escalation,
                    elapsed,
                } => (attempt, escalation, elapsed),
                other => {
                    self.phase = other;
                    return Err(Report::new(Error::cannot("resume", "no decision is pending")));
                }
            };

        tracing::info!("Decision on {}: {decision}", escalation.as_error());
        match decision {
            Decision::Proceed => {
                self.stages.push(
                    StageRecord::new(Stage::LifetimeRepair, &StageResult::Success, elapsed)
                        .with_detail(format!("unverified: {}", escalation.as_error())),
                );
                self.complete(attempt, Verification::Unverified)
            }
            Decision::Abort => {
                let result = StageResult::Failure(Report::new(escalation.as_error()));
                self.stages
                    .push(StageRecord::new(Stage::LifetimeRepair, &result, elapsed));
                Ok(Progress::Finished(Box::new(
                    self.roll_back(attempt, Stage::LifetimeRepair)?,
                )))
            }
        }
    }

    /// Run, asking `handler` at every escalation. A handler that cannot
    /// answer counts as an abort.
    pub async fn run_to_completion(&mut self, handler: &dyn EscalationHandler) -> Result<RunReport> {
        let mut progress = self.run().await?;
        loop {
            match progress {
                Progress::Finished(report) => return Ok(*report),
                Progress::Suspended(escalation) => {
                    let decision = handler.decide(&escalation).unwrap_or_else(|report| {
                        tracing::warn!("No decision available, rolling back: {report:?}");
                        Decision::Abort
                    });
                    progress = self.resume(decision)?;
                }
            }
        }
    }

    fn begin(&self) -> Result<Attempt> {
        let file = self.context.file();
        let lock = AttemptLock::acquire(&self.config.scratch_root, file)?;

        let (scratch, paths) = match self.mode {
            PipelineMode::Repair => {
                let scratch = ScratchDir::create(&self.config.scratch_root, file)?;
                let paths = AttemptPaths::in_scratch(scratch.path(), file);
                (Some(scratch), paths)
            }
            PipelineMode::Dump => (None, AttemptPaths::beside(file)),
        };

        let working = match self.context.candidate() {
            Some(candidate) => WorkingFile::with_candidate(file, candidate.to_string()),
            None => WorkingFile::open(file),
        };
        if working.has_pending_candidate() {
            tracing::debug!("Extraction candidate held until control-flow repair");
        }

        Ok(Attempt {
            _lock: lock,
            scratch,
            backups: BackupManager::new(&paths),
            paths,
            backup: None,
            working,
        })
    }

    async fn repair(&mut self, mut attempt: Attempt) -> Result<Progress> {
        let started = Instant::now();
        attempt.backup = Some(attempt.backups.snapshot(self.context.file())?);
        let result = self.mutability_dump(&mut attempt);
        if self.finish_stage(Stage::MutabilityDump, result, started) {
            return self.failed(attempt, Stage::MutabilityDump);
        }

        let started = Instant::now();
        let result = self.control_flow(&mut attempt).await;
        if self.finish_stage(Stage::ControlFlowRepair, result, started) {
            return self.failed(attempt, Stage::ControlFlowRepair);
        }

        let started = Instant::now();
        let result = self.borrow(&mut attempt).await;
        if self.finish_stage(Stage::BorrowRepair, result, started) {
            return self.failed(attempt, Stage::BorrowRepair);
        }

        self.lifetime(attempt).await
    }

    fn dump(&mut self, mut attempt: Attempt) -> Result<RunReport> {
        let started = Instant::now();
        attempt.backup = Some(attempt.backups.snapshot(self.context.file())?);
        let result = self.mutability_dump(&mut attempt);
        if let StageResult::Failure(report) = &result {
            tracing::error!("Mutability dump failed, nothing is rolled back in dump mode: {report:?}");
        }
        self.finish_stage(Stage::MutabilityDump, result, started);
        self.skip_after(Stage::MutabilityDump);

        // The extraction stays applied, as it would in an editor
        if let Err(report) = attempt.working.commit() {
            tracing::warn!("Could not write extraction candidate: {report:?}");
        }

        let artifact = attempt.paths.mutability_artifact.clone();
        tracing::info!(
            "Original kept at {}, mutable calls at {}",
            attempt.paths.backup.display(),
            artifact.display()
        );
        Ok(self.report(
            PipelineOutcome::Dumped {
                artifact,
                calls: self.mutable_calls.len(),
            },
            None,
        ))
    }

    fn mutability_dump(&mut self, attempt: &mut Attempt) -> StageResult {
        let new_fn = self.context.new_fn();
        let artifact = &attempt.paths.mutability_artifact;
        let record = attempt
            .working
            .contents()
            .and_then(|source| mutability::analyze(source, new_fn, artifact));
        match record {
            Ok(record) => {
                if record.is_empty() {
                    tracing::info!("No mutable receiver calls in `{new_fn}`");
                }
                self.mutable_calls = record.calls;
                StageResult::Success
            }
            Err(report) => StageResult::Failure(report),
        }
    }

    async fn control_flow(&self, attempt: &mut Attempt) -> StageResult {
        let file = self.context.file();
        match attempt.backups.snapshot(file) {
            Ok(handle) => attempt.backup = Some(handle),
            Err(report) => return StageResult::Failure(report),
        }
        if let Err(report) = attempt.working.commit() {
            return StageResult::Failure(report.attach("Writing extraction candidate"));
        }

        let invocation =
            self.tools
                .control_flow(file, self.context.parent_fn(), self.context.new_fn());
        self.run_tool(&invocation, &mut attempt.working).await
    }

    async fn borrow(&self, attempt: &mut Attempt) -> StageResult {
        let Some(backup) = &attempt.backup else {
            return StageResult::Failure(Report::new(Error::BackupCorruption(
                "borrow repair reached without a snapshot".to_string(),
            )));
        };
        let invocation = self.tools.borrow(
            self.context.file(),
            &attempt.paths.mutability_artifact,
            self.context.parent_fn(),
            self.context.new_fn(),
            backup.backup_path(),
        );
        self.run_tool(&invocation, &mut attempt.working).await
    }

    async fn lifetime(&mut self, mut attempt: Attempt) -> Result<Progress> {
        let started = Instant::now();

        if self.config.lifetime.strategy == LifetimeStrategy::StandaloneFirst {
            match self.standalone_lifetime(&mut attempt).await {
                Ok(()) => {
                    self.stages.push(
                        StageRecord::new(
                            Stage::LifetimeRepair,
                            &StageResult::Success,
                            started.elapsed(),
                        )
                        .with_detail("standalone unit"),
                    );
                    tracing::info!(
                        "{} succeeded on the standalone unit in {} ms",
                        Stage::LifetimeRepair,
                        started.elapsed().as_millis()
                    );
                    return self.complete(attempt, Verification::Verified);
                }
                Err(report) => tracing::warn!(
                    "Standalone lifetime repair failed, trying the manifest-scoped repairer: {report:?}"
                ),
            }
        }

        let locator = ManifestLocator::new(
            self.context.project_root(),
            self.config.manifest_file_name.as_str(),
        );
        let search = locator.locate(self.context.file());
        let escalation = match search.location {
            ManifestLocation::NotFound { searched_up_to } => {
                tracing::warn!(
                    "No {} found after {} probes",
                    self.config.manifest_file_name,
                    search.probes
                );
                Escalation::ManifestNotFound { searched_up_to }
            }
            ManifestLocation::Found { manifest_path } => {
                tracing::info!("Using manifest {}", manifest_path.display());
                let invocation = self.tools.lifetime_manifest(
                    self.context.file(),
                    &manifest_path,
                    self.context.new_fn(),
                    self.context.project_root(),
                );
                match self.run_tool(&invocation, &mut attempt.working).await {
                    StageResult::Failure(report) => Escalation::RepairUnconfirmed {
                        outcome: report.current_context().to_string(),
                    },
                    StageResult::Success | StageResult::Skipped => {
                        self.finish_stage(Stage::LifetimeRepair, StageResult::Success, started);
                        return self.complete(attempt, Verification::Verified);
                    }
                }
            }
        };

        tracing::warn!(
            "{} needs a decision: {}",
            Stage::LifetimeRepair,
            escalation.as_error()
        );
        self.phase = Phase::Suspended {
            attempt,
            escalation: escalation.clone(),
            elapsed: started.elapsed(),
        };
        Ok(Progress::Suspended(escalation))
    }

    /// Repair a minimal unit holding just the two functions, then splice the
    /// repaired functions back into the working file
    async fn standalone_lifetime(&self, attempt: &mut Attempt) -> Result<()> {
        let parent_fn = self.context.parent_fn();
        let new_fn = self.context.new_fn();
        let input = &attempt.paths.standalone_input;
        let output = &attempt.paths.standalone_output;

        let source = attempt.working.contents()?.to_string();
        let unit = lifetime::build_unit(&source, parent_fn, new_fn)?;
        write_synced(input, unit.as_bytes())?;

        let invocation = self.tools.lifetime_standalone(new_fn, input, output);
        let outcome = self.runner.run(&invocation).await?;
        if !outcome.is_success() {
            return Err(Report::new(Error::process_failed(
                "run",
                &invocation.program,
                outcome,
            )));
        }

        let repaired = std::fs::read_to_string(output)
            .change_context(Error::io_failed("read", output, "no repaired unit"))?;
        let spliced = lifetime::splice(&source, &repaired, parent_fn, new_fn)?;
        attempt.working.replace(spliced)
    }

    async fn run_tool(&self, invocation: &ToolInvocation, working: &mut WorkingFile) -> StageResult {
        let outcome = self.runner.run(invocation).await;
        working.mark_stale();
        match outcome {
            Ok(outcome) if outcome.is_success() => StageResult::Success,
            Ok(outcome) => StageResult::Failure(
                Report::new(Error::process_failed("run", &invocation.program, outcome))
                    .attach(format!("Command: {invocation}")),
            ),
            Err(report) => StageResult::Failure(report),
        }
    }

    /// Log and record a finished stage. Returns whether it failed.
    fn finish_stage(&mut self, stage: Stage, result: StageResult, started: Instant) -> bool {
        let record = StageRecord::new(stage, &result, started.elapsed());
        match &result {
            StageResult::Success => {
                tracing::info!("{stage} succeeded in {} ms", record.elapsed_ms);
            }
            StageResult::Failure(report) => {
                tracing::warn!("{stage} failed in {} ms: {report:?}", record.elapsed_ms);
            }
            StageResult::Skipped => tracing::debug!("{stage} skipped"),
        }
        self.stages.push(record);
        result.is_failure()
    }

    fn skip_after(&mut self, stage: Stage) {
        for later in stage.following() {
            self.finish_stage(later, StageResult::Skipped, Instant::now());
        }
    }

    fn failed(&mut self, attempt: Attempt, stage: Stage) -> Result<Progress> {
        self.skip_after(stage);
        Ok(Progress::Finished(Box::new(self.roll_back(attempt, stage)?)))
    }

    fn roll_back(&mut self, mut attempt: Attempt, failed_stage: Stage) -> Result<RunReport> {
        let handle = attempt.backup.clone().ok_or_else(|| {
            Report::new(Error::BackupCorruption(format!(
                "{failed_stage} failed before any snapshot was taken"
            )))
        })?;
        attempt
            .backups
            .restore(&handle, &mut attempt.working)
            .attach(format!("Rolling back after {failed_stage}"))?;

        let debug_copy = attempt.backups.debug_path().to_path_buf();
        tracing::warn!(
            "Rolled back {} after {failed_stage} failed, failed state kept at {}",
            self.context.file().display(),
            debug_copy.display()
        );
        let scratch_dir = self.release(attempt, false);
        Ok(self.report(
            PipelineOutcome::RolledBack {
                failed_stage,
                debug_copy,
            },
            scratch_dir,
        ))
    }

    fn complete(&mut self, attempt: Attempt, verification: Verification) -> Result<Progress> {
        tracing::info!(
            "Repair of `{}` done ({verification})",
            self.context.new_fn()
        );
        let scratch_dir = self.release(attempt, true);
        Ok(Progress::Finished(Box::new(self.report(
            PipelineOutcome::Done { verification },
            scratch_dir,
        ))))
    }

    /// End the attempt, dropping its lock. Returns the scratch directory if it
    /// is kept.
    fn release(&self, attempt: Attempt, succeeded: bool) -> Option<PathBuf> {
        let scratch = attempt.scratch?;
        if succeeded && !self.config.keep_scratch {
            let path = scratch.path().to_path_buf();
            if let Err(report) = scratch.discard() {
                tracing::warn!("Scratch directory left behind: {report:?}");
                return Some(path);
            }
            return None;
        }
        Some(scratch.path().to_path_buf())
    }

    fn report(&self, outcome: PipelineOutcome, scratch_dir: Option<PathBuf>) -> RunReport {
        RunReport {
            context: self.context.clone(),
            mode: self.mode,
            outcome,
            stages: self.stages.clone(),
            mutable_calls: self.mutable_calls.clone(),
            scratch_dir,
        }
    }
}
