//! Formula validation against a live spreadsheet session.
//!
//! A candidate formula goes `Pending -> Parsing -> Evaluating -> {Valid, Invalid}`.
//! Parsing is a local structural check. Evaluating writes the formula into the
//! session's scratch cell, reads the result back and always clears the cell
//! again, whatever the outcome.

pub mod analysis;
pub mod session;
pub mod syntax;

use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::telemetry;
use crate::types::{ColumnContext, GenerationResult, ValidationOutcome};
use crate::{FormulaError, Result};

pub use analysis::{complexity_score, function_usage, suggest_improvements};
pub use session::{CellValue, HeaderInfo, SpreadsheetSession, column_letter, context_from_headers, smart_tag};
pub use syntax::{check_syntax, is_known_function};

/// Where a validation call currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationPhase {
    Pending,
    Parsing,
    Evaluating,
    Valid,
    Invalid,
}

impl fmt::Display for ValidationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationPhase::Pending => "pending",
            ValidationPhase::Parsing => "parsing",
            ValidationPhase::Evaluating => "evaluating",
            ValidationPhase::Valid => "valid",
            ValidationPhase::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// Checks candidate formulas against one spreadsheet session.
///
/// Scratch-cell writes are serialized: at most one evaluation runs against
/// the session at a time. Clones share the session and the lock.
#[derive(Clone)]
pub struct FormulaValidator {
    session: Arc<dyn SpreadsheetSession>,
    scratch: Arc<Mutex<()>>,
}

impl FormulaValidator {
    pub fn new(session: Arc<dyn SpreadsheetSession>) -> Self {
        Self {
            session,
            scratch: Arc::new(Mutex::new(())),
        }
    }

    pub fn session(&self) -> &Arc<dyn SpreadsheetSession> {
        &self.session
    }

    /// Validate `formula`.
    ///
    /// Returns `Ok` with a Valid or Invalid verdict when the formula was
    /// judged, and `Err` when it could not be: [`FormulaError::SessionDisconnected`]
    /// if the spreadsheet is gone, [`FormulaError::Session`] for any other
    /// session failure. Connectivity problems are never reported as Invalid.
    pub async fn validate(&self, formula: &str) -> Result<ValidationOutcome> {
        let formula = formula.trim().to_string();
        debug!(formula = %formula, phase = %ValidationPhase::Parsing, "validating formula");

        if let Err(message) = check_syntax(&formula) {
            debug!(phase = %ValidationPhase::Invalid, error = %message, "syntax check failed");
            metrics::counter!(telemetry::VALIDATIONS_TOTAL, "outcome" => "invalid").increment(1);
            return Ok(ValidationOutcome::syntax_error(message));
        }

        if !self.session.is_connected().await {
            metrics::counter!(telemetry::VALIDATIONS_TOTAL, "outcome" => "error").increment(1);
            return Err(FormulaError::SessionDisconnected);
        }

        // Evaluation runs on its own task so a caller that stops waiting
        // cannot skip the scratch cleanup.
        let session = Arc::clone(&self.session);
        let scratch = Arc::clone(&self.scratch);
        let task = tokio::spawn(async move {
            let _guard = scratch.lock_owned().await;
            debug!(phase = %ValidationPhase::Evaluating, "writing scratch cell");
            // A panic inside the session must not skip the cleanup below.
            let write = {
                let session = Arc::clone(&session);
                let formula = formula.clone();
                tokio::spawn(async move { session.write_scratch(&formula).await })
            };
            let written = write.await.unwrap_or_else(|e| {
                Err(FormulaError::Session(format!("scratch write failed: {e}")))
            });
            let cleared = session.clear_scratch().await;
            if let Err(e) = &cleared {
                warn!(error = %e, "failed to clear scratch cell");
            }
            (formula, written, cleared)
        });

        let (formula, written, cleared) = task
            .await
            .map_err(|e| FormulaError::Session(format!("validation task failed: {e}")))?;

        let verdict = match written {
            Ok(CellValue::Value(value)) => {
                let outcome =
                    ValidationOutcome::valid(value).with_suggestions(suggest_improvements(&formula));
                cleared.map(|_| outcome)
            }
            Ok(CellValue::Error(message)) => {
                cleared.map(|_| ValidationOutcome::evaluation_error(message))
            }
            Err(e) => Err(e),
        };

        match &verdict {
            Ok(outcome) if outcome.ok => {
                info!(
                    phase = %ValidationPhase::Valid,
                    value = outcome.evaluated_value.as_deref().unwrap_or(""),
                    "formula is valid"
                );
                metrics::counter!(telemetry::VALIDATIONS_TOTAL, "outcome" => "valid").increment(1);
            }
            Ok(outcome) => {
                info!(
                    phase = %ValidationPhase::Invalid,
                    error = outcome.error_message.as_deref().unwrap_or(""),
                    "formula failed to evaluate"
                );
                metrics::counter!(telemetry::VALIDATIONS_TOTAL, "outcome" => "invalid").increment(1);
            }
            Err(e) => {
                warn!(error = %e, "validation could not complete");
                metrics::counter!(telemetry::VALIDATIONS_TOTAL, "outcome" => "error").increment(1);
            }
        }
        verdict
    }

    /// Validate a generation result's formula and attach the verdict.
    pub async fn validate_result(&self, result: GenerationResult) -> Result<GenerationResult> {
        let outcome = self.validate(&result.formula).await?;
        Ok(result.with_validation(outcome))
    }

    /// Request context for `sheet`, built from its header row.
    pub async fn sheet_context(&self, sheet: &str) -> Result<Vec<ColumnContext>> {
        if !self.session.is_connected().await {
            return Err(FormulaError::SessionDisconnected);
        }
        let headers = self.session.get_headers(sheet).await?;
        Ok(context_from_headers(&headers))
    }
}

impl fmt::Debug for FormulaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormulaValidator").finish_non_exhaustive()
    }
}
