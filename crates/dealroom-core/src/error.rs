use serde::Serialize;
use thiserror::Error;

/// Dealroom core errors.
#[derive(Debug, Error)]
pub enum DealError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Payee '{0}' has no registered payout handle")]
    MissingPayoutHandle(String),

    #[error("Invalid payment proof: {0}")]
    InvalidProof(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("An offer is already outstanding on connection '{0}'")]
    AlreadyProposed(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Transaction '{0}' is already completed")]
    AlreadyCompleted(String),

    #[error("Stale state: {0}")]
    StaleState(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Blob storage error: {0}")]
    Blob(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Caller-facing classification of [`DealError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    StateConflict,
    Authorization,
    NotFound,
    DependencyFailure,
}

impl DealError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAmount(_)
            | Self::MissingPayoutHandle(_)
            | Self::InvalidProof(_)
            | Self::InvalidInput(_) => ErrorKind::Validation,
            Self::AlreadyProposed(_)
            | Self::InvalidState(_)
            | Self::AlreadyCompleted(_)
            | Self::StaleState(_) => ErrorKind::StateConflict,
            Self::NotAuthorized(_) => ErrorKind::Authorization,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Store(_) | Self::Blob(_) | Self::Notification(_) | Self::Serialization(_) => {
                ErrorKind::DependencyFailure
            }
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn transition_violation(operation: &str, expected: &str, actual: &str) -> Self {
        Self::InvalidState(format!(
            "{operation} requires '{expected}', connection is '{actual}'"
        ))
    }
}

impl From<serde_json::Error> for DealError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_taxonomy() {
        assert_eq!(
            DealError::InvalidAmount("0".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            DealError::MissingPayoutHandle("u".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            DealError::AlreadyCompleted("t".into()).kind(),
            ErrorKind::StateConflict
        );
        assert_eq!(
            DealError::NotAuthorized("x".into()).kind(),
            ErrorKind::Authorization
        );
        assert_eq!(
            DealError::Store("down".into()).kind(),
            ErrorKind::DependencyFailure
        );
    }

    #[test]
    fn transition_violation_names_both_states() {
        let err = DealError::transition_violation("accept_proposal", "proposed", "none");
        assert!(err
            .to_string()
            .contains("accept_proposal requires 'proposed', connection is 'none'"));
    }
}
