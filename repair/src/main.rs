//! # rem-repair
//!
//! Repairs a Rust source file after an extract-function refactoring.
//!
//! The extracted function is analyzed for calls that need a mutable receiver,
//! then handed to the control-flow, borrow and lifetime repairers in turn. The
//! file is backed up first and restored when any stage fails, so an attempt
//! either completes or leaves the file as it was before the extraction.

use std::process::ExitCode;

use clap::Parser;
use error_stack::ResultExt;

use crate::cli::Cli;
use crate::cli::Command;
use crate::config::RepairConfig;
use crate::error::Error;
use crate::error::Result;
use crate::manifest::ManifestLocator;
use crate::pipeline::PipelineMode;
use crate::pipeline::PipelineOutcome;
use crate::pipeline::RepairPipeline;
use crate::pipeline::RunReport;
use crate::process::ProcessRunner;

mod backup;
mod cli;
mod config;
mod error;
mod log_tools;
mod manifest;
mod mutability;
mod pipeline;
mod process;
mod scratch;
mod syntax;
mod working_file;

const EXIT_ROLLED_BACK: u8 = 1;
const EXIT_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_dir = cli
        .log_dir
        .clone()
        .unwrap_or_else(log_tools::default_log_dir);
    // Keeps the file writer flushing until exit
    let guard = match cli.log_level.init(&log_dir) {
        Ok(guard) => Some(guard),
        Err(report) => {
            eprintln!("Logging disabled: {report:?}");
            None
        }
    };

    match execute(cli).await {
        Ok(code) => code,
        Err(report) => {
            if guard.is_some() {
                tracing::error!("{report:?}");
            } else {
                eprintln!("{report:?}");
            }
            ExitCode::from(EXIT_ERROR)
        }
    }
}

async fn execute(cli: Cli) -> Result<ExitCode> {
    let config = RepairConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run {
            target,
            project_root,
            is_async,
            on_unverified,
            json,
        } => {
            let context = target.context(project_root)?.with_async(is_async);
            let runner = ProcessRunner::new(config.timeout());
            let report = RepairPipeline::new(context, config, runner)
                .run_to_completion(on_unverified.handler().as_ref())
                .await?;
            print_report(&report, json)
        }
        Command::Dump { target, json } => {
            let context = target.context(None)?;
            let runner = ProcessRunner::new(config.timeout());
            let report = RepairPipeline::new(context, config, runner)
                .with_mode(PipelineMode::Dump)
                .run_to_completion(cli::OnUnverified::Abort.handler().as_ref())
                .await?;
            print_report(&report, json)
        }
        Command::LocateManifest { file, project_root } => {
            let root = cli::resolve_project_root(&file, project_root);
            let search =
                ManifestLocator::new(&root, config.manifest_file_name.as_str()).locate(&file);
            let rendered = serde_json::to_string_pretty(&search)
                .change_context(Error::failed_to("serialize", "manifest search"))?;
            println!("{rendered}");
            Ok(if search.location.manifest_path().is_some() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_ROLLED_BACK)
            })
        }
    }
}

fn print_report(report: &RunReport, json: bool) -> Result<ExitCode> {
    if json {
        let rendered = serde_json::to_string_pretty(report)
            .change_context(Error::failed_to("serialize", "run report"))?;
        println!("{rendered}");
    } else {
        let file = report.context.file().display();
        match &report.outcome {
            PipelineOutcome::Done { verification } => {
                println!("{file}: repaired ({verification})");
            }
            PipelineOutcome::RolledBack {
                failed_stage,
                debug_copy,
            } => {
                println!(
                    "{file}: {failed_stage} failed, original restored (failed state kept at {})",
                    debug_copy.display()
                );
            }
            PipelineOutcome::Dumped { artifact, calls } => {
                println!(
                    "{file}: {calls} mutable receiver call(s) written to {}",
                    artifact.display()
                );
            }
        }
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_ROLLED_BACK)
    })
}
