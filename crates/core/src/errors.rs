use thiserror::Error;

use crate::domain::budget::BudgetStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("invalid budget transition from {from:?} to {to:?}")]
    InvalidBudgetTransition { from: BudgetStatus, to: BudgetStatus },
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation failed: {0}")]
    Validation(String),
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            Self::Domain(error) => Some(error),
            _ => None,
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Rejected { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

/// Errors as seen by the conversation channel. `message` carries operator detail for logs;
/// only `user_message` is ever sent back to the chat user.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("rejected: {message}")]
    Rejected { message: String, reason: RejectionReason, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectionReason {
    InvalidState,
    Conflict,
    Validation,
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "I could not find that record. Check the code or number and try again.",
            Self::Rejected { reason: RejectionReason::InvalidState, .. } => {
                "That action is not allowed in the document's current status."
            }
            Self::Rejected { reason: RejectionReason::Conflict, .. } => {
                "That code is already in use. Choose a different one."
            }
            Self::Rejected { reason: RejectionReason::Validation, .. } => {
                "The values sent are not valid (check quantities, amounts and available stock)."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::NotFound { correlation_id, .. }
            | Self::Rejected { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(error) => {
                let message = error.to_string();
                match error {
                    DomainError::NotFound { .. } => Self::NotFound { message, correlation_id },
                    DomainError::InvalidBudgetTransition { .. } | DomainError::InvalidState(_) => {
                        Self::Rejected {
                            message,
                            reason: RejectionReason::InvalidState,
                            correlation_id,
                        }
                    }
                    DomainError::Conflict(_) => {
                        Self::Rejected { message, reason: RejectionReason::Conflict, correlation_id }
                    }
                    DomainError::Validation(_) => Self::Rejected {
                        message,
                        reason: RejectionReason::Validation,
                        correlation_id,
                    },
                }
            }
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
