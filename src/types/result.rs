//! Generation and validation outcomes.

use serde::{Deserialize, Serialize};

/// Where a generated formula came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Cache,
    Model,
}

/// Formula produced for a request.
///
/// `validation` is only filled in when the caller runs the validator; the
/// coordinator never validates implicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub formula: String,
    pub source: ResultSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationOutcome>,
}

impl GenerationResult {
    pub fn from_cache(formula: impl Into<String>) -> Self {
        Self {
            formula: formula.into(),
            source: ResultSource::Cache,
            validation: None,
        }
    }

    pub fn from_model(formula: impl Into<String>) -> Self {
        Self {
            formula: formula.into(),
            source: ResultSource::Model,
            validation: None,
        }
    }

    /// Attach a validation outcome.
    pub fn with_validation(mut self, outcome: ValidationOutcome) -> Self {
        self.validation = Some(outcome);
        self
    }

    /// Whether the formula has been validated and found usable.
    pub fn is_ready(&self) -> bool {
        self.validation.as_ref().is_some_and(|v| v.ok)
    }
}

/// Stage at which a formula was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationFailure {
    Syntax,
    Evaluation,
}

/// Verdict of one validation call. Never cached: it depends on sheet state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ValidationFailure>,
    /// Error text, verbatim from the spreadsheet engine for evaluation failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Value the formula produced in the scratch cell.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluated_value: Option<String>,
    /// Non-blocking hints about the formula.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl ValidationOutcome {
    pub fn valid(evaluated_value: impl Into<String>) -> Self {
        Self {
            ok: true,
            failure: None,
            error_message: None,
            evaluated_value: Some(evaluated_value.into()),
            suggestions: Vec::new(),
        }
    }

    pub fn syntax_error(message: impl Into<String>) -> Self {
        Self::invalid(ValidationFailure::Syntax, message)
    }

    pub fn evaluation_error(message: impl Into<String>) -> Self {
        Self::invalid(ValidationFailure::Evaluation, message)
    }

    fn invalid(failure: ValidationFailure, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            failure: Some(failure),
            error_message: Some(message.into()),
            evaluated_value: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    /// Convert an invalid verdict into the matching formula error.
    pub fn into_result(self) -> crate::Result<Self> {
        let message = self.error_message.clone().unwrap_or_default();
        match self.failure {
            None => Ok(self),
            Some(ValidationFailure::Syntax) => Err(crate::FormulaError::FormulaSyntax(message)),
            Some(ValidationFailure::Evaluation) => {
                Err(crate::FormulaError::FormulaEvaluation(message))
            }
        }
    }
}
