use std::time::Duration;

use error_stack::Report;
use serde::Serialize;
use strum::Display;

use crate::error::Error;

/// Pipeline steps, in the only order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    MutabilityDump,
    ControlFlowRepair,
    BorrowRepair,
    LifetimeRepair,
}

impl Stage {
    pub const ORDER: [Self; 4] = [
        Self::MutabilityDump,
        Self::ControlFlowRepair,
        Self::BorrowRepair,
        Self::LifetimeRepair,
    ];

    /// Stages that run after this one
    pub fn following(self) -> impl Iterator<Item = Self> {
        Self::ORDER.into_iter().skip_while(move |stage| *stage != self).skip(1)
    }
}

/// How one stage ended
#[derive(Debug)]
pub enum StageResult {
    Success,
    Failure(Report<Error>),
    Skipped,
}

impl StageResult {
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Failure,
    Skipped,
}

/// One line of the run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub stage:      Stage,
    pub status:     StageStatus,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail:     Option<String>,
}

impl StageRecord {
    pub fn new(stage: Stage, result: &StageResult, elapsed: Duration) -> Self {
        let (status, detail) = match result {
            StageResult::Success => (StageStatus::Success, None),
            StageResult::Failure(report) => {
                (StageStatus::Failure, Some(report.current_context().to_string()))
            }
            StageResult::Skipped => (StageStatus::Skipped, None),
        };
        Self {
            stage,
            status,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            detail,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
