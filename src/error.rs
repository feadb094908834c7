//! FormulaSpark error types

/// FormulaSpark error types
///
/// Every variant is `Clone`: a single in-flight generation delivers the same
/// outcome to all of its waiters.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FormulaError {
    // Model endpoint errors
    #[error("network error: {0}")]
    TransientNetwork(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("model endpoint error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("request rejected ({status}): {message}")]
    ClientRequest { status: u16, message: String },

    #[error("model endpoint is offline: {0}")]
    EndpointUnreachable(String),

    #[error("gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: Box<FormulaError>,
    },

    #[error("empty response from model")]
    EmptyResponse,

    // Validator errors
    #[error("formula syntax error: {0}")]
    FormulaSyntax(String),

    #[error("formula evaluation error: {0}")]
    FormulaEvaluation(String),

    #[error("spreadsheet session disconnected")]
    SessionDisconnected,

    #[error("spreadsheet session failure: {0}")]
    Session(String),

    // Cache errors
    #[error("cache persistence error: {0}")]
    CachePersistence(String),

    // Data errors
    #[error("JSON error: {0}")]
    Json(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    // Coordination errors
    #[error("request cancelled")]
    Cancelled,

    #[error("generation task failed: {0}")]
    TaskFailed(String),
}

impl FormulaError {
    /// Whether the error is worth retrying within the model client's budget.
    ///
    /// Timeouts, connection failures and 5xx responses are transient. Client
    /// errors (4xx, malformed requests) and everything outside the network
    /// path are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            FormulaError::TransientNetwork(_) | FormulaError::Timeout(_) => true,
            FormulaError::Server { status, .. } => (500..600).contains(status),
            _ => false,
        }
    }

    /// Whether the error describes a defect in the formula itself, as opposed
    /// to a connectivity or infrastructure problem.
    pub fn is_formula_defect(&self) -> bool {
        matches!(
            self,
            FormulaError::FormulaSyntax(_) | FormulaError::FormulaEvaluation(_)
        )
    }

    /// Stable category label for the presentation layer.
    pub fn category(&self) -> &'static str {
        match self {
            FormulaError::TransientNetwork(_)
            | FormulaError::Timeout(_)
            | FormulaError::Server { .. }
            | FormulaError::RetriesExhausted { .. } => "network",
            FormulaError::ClientRequest { .. } | FormulaError::InvalidInput(_) => "request",
            FormulaError::EndpointUnreachable(_) => "offline",
            FormulaError::EmptyResponse => "empty_response",
            FormulaError::FormulaSyntax(_) => "syntax",
            FormulaError::FormulaEvaluation(_) => "evaluation",
            FormulaError::SessionDisconnected | FormulaError::Session(_) => "session",
            FormulaError::CachePersistence(_) => "cache",
            FormulaError::Json(_) => "data",
            FormulaError::Configuration(_) => "configuration",
            FormulaError::Cancelled => "cancelled",
            FormulaError::TaskFailed(_) => "internal",
        }
    }

    /// The underlying cause when retries were exhausted, otherwise `self`.
    pub fn root_cause(&self) -> &FormulaError {
        match self {
            FormulaError::RetriesExhausted { last_error, .. } => last_error.root_cause(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for FormulaError {
    fn from(err: serde_json::Error) -> Self {
        FormulaError::Json(err.to_string())
    }
}

impl From<reqwest::Error> for FormulaError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            let code = status.as_u16();
            return if status.is_server_error() {
                FormulaError::Server {
                    status: code,
                    message: err.to_string(),
                }
            } else {
                FormulaError::ClientRequest {
                    status: code,
                    message: err.to_string(),
                }
            };
        }
        if err.is_builder() {
            FormulaError::ClientRequest {
                status: 0,
                message: err.to_string(),
            }
        } else if err.is_decode() {
            FormulaError::Json(err.to_string())
        } else {
            // connect, timeout, body and redirect failures
            FormulaError::TransientNetwork(err.to_string())
        }
    }
}

/// Result type alias for FormulaSpark operations
pub type Result<T> = std::result::Result<T, FormulaError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn transient_classification() {
        assert!(FormulaError::TransientNetwork("refused".into()).is_transient());
        assert!(FormulaError::Timeout(Duration::from_secs(90)).is_transient());
        assert!(
            FormulaError::Server {
                status: 503,
                message: "busy".into()
            }
            .is_transient()
        );
        assert!(
            !FormulaError::ClientRequest {
                status: 400,
                message: "bad".into()
            }
            .is_transient()
        );
        assert!(!FormulaError::EndpointUnreachable("down".into()).is_transient());
        assert!(!FormulaError::SessionDisconnected.is_transient());
    }

    #[test]
    fn formula_defects_are_not_connectivity() {
        assert!(FormulaError::FormulaSyntax("x".into()).is_formula_defect());
        assert!(FormulaError::FormulaEvaluation("#NAME?".into()).is_formula_defect());
        assert!(!FormulaError::SessionDisconnected.is_formula_defect());
        assert_eq!(FormulaError::SessionDisconnected.category(), "session");
        assert_eq!(FormulaError::EndpointUnreachable("x".into()).category(), "offline");
    }

    #[test]
    fn root_cause_unwraps_exhausted_retries() {
        let err = FormulaError::RetriesExhausted {
            attempts: 3,
            last_error: Box::new(FormulaError::Timeout(Duration::from_secs(1))),
        };
        assert!(matches!(err.root_cause(), FormulaError::Timeout(_)));
        assert_eq!(err.category(), "network");
        assert!(err.to_string().contains("3 attempts"));
    }
}
