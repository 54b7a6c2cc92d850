//! Points where the pipeline stops and asks whether to keep an unverified result

use std::path::PathBuf;

use dialoguer::Confirm;
use error_stack::ResultExt;
use serde::Serialize;
use strum::Display;
use strum::EnumString;

use crate::error::Error;
use crate::error::Result;

/// Why lifetime repair could not confirm the result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Escalation {
    /// No manifest between the file and the project root
    ManifestNotFound { searched_up_to: PathBuf },
    /// The repairer ran and did not succeed
    RepairUnconfirmed { outcome: String },
}

impl Escalation {
    pub fn question(&self) -> String {
        match self {
            Self::ManifestNotFound { searched_up_to } => format!(
                "No build manifest was found (searched up to {}), so lifetimes were not repaired. \
                 Proceed with possibly incorrect lifetimes?",
                searched_up_to.display()
            ),
            Self::RepairUnconfirmed { outcome } => format!(
                "Automatic lifetime repair failed ({outcome}). \
                 Proceed with possibly incorrect lifetimes?"
            ),
        }
    }

    pub fn as_error(&self) -> Error {
        match self {
            Self::ManifestNotFound { searched_up_to } => {
                Error::ManifestNotFound(format!("searched up to {}", searched_up_to.display()))
            }
            Self::RepairUnconfirmed { outcome } => Error::RepairUnconfirmed(outcome.clone()),
        }
    }
}

/// Answer to an [`Escalation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Keep the file as the borrow fixer left it
    Proceed,
    /// Roll the file back
    Abort,
}

/// Decides escalations for [`super::RepairPipeline::run_to_completion`]
pub trait EscalationHandler: Send + Sync {
    fn decide(&self, escalation: &Escalation) -> Result<Decision>;
}

/// Always gives the same answer
#[derive(Debug, Clone, Copy)]
pub struct FixedDecision(pub Decision);

impl EscalationHandler for FixedDecision {
    fn decide(&self, escalation: &Escalation) -> Result<Decision> {
        tracing::info!("{} -> {}", escalation.as_error(), self.0);
        Ok(self.0)
    }
}

/// Asks on the terminal. Declining, or no answer, means abort.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptHandler;

impl EscalationHandler for PromptHandler {
    fn decide(&self, escalation: &Escalation) -> Result<Decision> {
        let proceed = Confirm::new()
            .with_prompt(escalation.question())
            .default(false)
            .interact()
            .change_context(Error::cannot("ask for a decision", "no interactive terminal"))
            .attach("Pass --on-unverified proceed|abort to decide non-interactively")?;
        Ok(if proceed { Decision::Proceed } else { Decision::Abort })
    }
}
