//! Error types for reconciliation and case operations.
//!
//! Errors are classified by recoverability:
//! - Retryable: upstream extraction failures, database lock contention
//! - NonRetryable: storage faults, corrupt rows, configuration errors
//! - RequiresUserAction: invalid manual edits, unknown ids

use thiserror::Error;

use crate::db::DbError;
use crate::extraction::ExtractionError;
use crate::types::StatusPendencia;

/// Orchestrator step, carried by persistence failures for diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Identificacao,
    Vinculos,
    Competencias,
    Remuneracao,
    Comparacao,
    RunLog,
    Manual,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Identificacao => "identificacao",
            Phase::Vinculos => "vinculos",
            Phase::Competencias => "competencias",
            Phase::Remuneracao => "remuneracao",
            Phase::Comparacao => "comparacao",
            Phase::RunLog => "run_log",
            Phase::Manual => "manual",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("Case {caso_id}: persistence failed during {phase}: {source}")]
    Persistence {
        caso_id: String,
        phase: Phase,
        #[source]
        source: DbError,
    },

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Case not found: {0}")]
    CaseNotFound(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: StatusPendencia,
        to: StatusPendencia,
    },

    #[error("Pendency type \"{0}\" is reserved for automatic reconciliation")]
    ReservedTipo(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ReconcileError {
    /// Wrap a storage failure with the case and orchestrator step it hit.
    pub fn persistence(caso_id: &str, phase: Phase) -> impl FnOnce(DbError) -> Self + '_ {
        move |source| ReconcileError::Persistence {
            caso_id: caso_id.to_string(),
            phase,
            source,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Extraction(e) => e.is_retryable(),
            ReconcileError::Persistence { source, .. } => source.is_busy(),
            ReconcileError::Db(e) => e.is_busy(),
            _ => false,
        }
    }

    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            ReconcileError::CaseNotFound(_)
                | ReconcileError::NotFound { .. }
                | ReconcileError::InvalidTransition { .. }
                | ReconcileError::ReservedTipo(_)
                | ReconcileError::InvalidInput(_)
                | ReconcileError::Configuration(_)
        ) || matches!(
            self,
            ReconcileError::Extraction(e) if !e.is_retryable()
        )
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            ReconcileError::Extraction(ExtractionError::Upstream(_)) => {
                "Document extraction failed. Try the upload again."
            }
            ReconcileError::Extraction(_) => {
                "The extracted document is malformed. Check the extraction output."
            }
            ReconcileError::Persistence { .. } | ReconcileError::Db(_) if self.is_retryable() => {
                "The database is busy. Try again in a moment."
            }
            ReconcileError::Persistence { .. } | ReconcileError::Db(_) => {
                "Nothing was changed. Check the logs for the failing phase."
            }
            ReconcileError::CaseNotFound(_) | ReconcileError::NotFound { .. } => {
                "Check the id and try again."
            }
            ReconcileError::InvalidTransition { .. } => {
                "Reopen the pendency before moving it back to pending."
            }
            ReconcileError::ReservedTipo(_) => "Choose a different pendency type.",
            ReconcileError::InvalidInput(_) => "Correct the input and try again.",
            ReconcileError::Configuration(_) => "Check ~/.prevdesk/config.json.",
        }
    }
}

/// Serializable error for the presentation layer.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Retryable,
    NonRetryable,
    RequiresUserAction,
}

impl From<&ReconcileError> for ErrorPayload {
    fn from(err: &ReconcileError) -> Self {
        let error_type = if err.is_retryable() {
            ErrorType::Retryable
        } else if err.requires_user_action() {
            ErrorType::RequiresUserAction
        } else {
            ErrorType::NonRetryable
        };

        ErrorPayload {
            message: err.to_string(),
            error_type,
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_extraction_is_retryable() {
        let err = ReconcileError::from(ExtractionError::Upstream("timeout".into()));
        assert!(err.is_retryable());
        let payload = ErrorPayload::from(&err);
        assert_eq!(payload.error_type, ErrorType::Retryable);
        assert!(payload.can_retry);
    }

    #[test]
    fn test_invalid_transition_requires_user_action() {
        let err = ReconcileError::InvalidTransition {
            from: StatusPendencia::Resolvida,
            to: StatusPendencia::Pendente,
        };
        assert!(!err.is_retryable());
        let payload = ErrorPayload::from(&err);
        assert_eq!(payload.error_type, ErrorType::RequiresUserAction);
        assert_eq!(payload.message, "Invalid status transition: resolvida -> pendente");
    }

    #[test]
    fn test_persistence_error_carries_case_and_phase() {
        let wrap = ReconcileError::persistence("caso-1", Phase::Competencias);
        let err = wrap(DbError::Migration("boom".into()));
        let msg = err.to_string();
        assert!(msg.contains("caso-1"));
        assert!(msg.contains("competencias"));
        assert_eq!(ErrorPayload::from(&err).error_type, ErrorType::NonRetryable);
    }

    #[test]
    fn test_payload_serializes_camel_case() {
        let err = ReconcileError::CaseNotFound("x".into());
        let json = serde_json::to_value(ErrorPayload::from(&err)).unwrap();
        assert_eq!(json["errorType"], "requires_user_action");
        assert_eq!(json["canRetry"], false);
    }
}
