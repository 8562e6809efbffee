use thiserror::Error;
use tracing::error;

use crate::types::SubjectId;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("update {update_id} has no subject")]
    UnresolvedSubject { update_id: i64 },
    #[error("action '{node}' failed for subject {subject}: {error:#}")]
    Action {
        subject: SubjectId,
        node: String,
        error: anyhow::Error,
    },
    #[error("action panicked while handling update {update_id} for subject {subject}: {message}")]
    Panicked {
        update_id: i64,
        subject: SubjectId,
        message: String,
    },
}

impl DispatchError {
    pub fn subject(&self) -> Option<SubjectId> {
        match self {
            DispatchError::UnresolvedSubject { .. } => None,
            DispatchError::Action { subject, .. } | DispatchError::Panicked { subject, .. } => {
                Some(*subject)
            }
        }
    }
}

/// Receives failures from background dispatch, where there is no caller
/// to return them to.
pub trait ErrorSink: Send + Sync {
    fn report(&self, error: &DispatchError);
}

/// Default sink: log and move on.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingErrorSink;

impl ErrorSink for LoggingErrorSink {
    fn report(&self, error: &DispatchError) {
        error!("Dispatch failed: {}", error);
    }
}
