use thiserror::Error;

use crate::domain::change_request::ChangeRequestStatus;
use crate::workflow::WorkflowAction;

/// Failures detectable from the operation inputs and the request's current
/// state alone. Every variant is checked before any write is committed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed for `{field}`: {message}")]
    Validation { field: &'static str, message: String },
    #[error("cannot {action} a change request in status {status:?}")]
    InvalidTransition { status: ChangeRequestStatus, action: WorkflowAction },
    #[error("actor `{actor_id}` may not {action}: {reason}")]
    Forbidden { actor_id: String, action: WorkflowAction, reason: String },
}

impl DomainError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation { field, message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::DomainError;
    use crate::domain::change_request::ChangeRequestStatus;
    use crate::workflow::WorkflowAction;

    #[test]
    fn invalid_transition_message_names_status_and_action() {
        let error = DomainError::InvalidTransition {
            status: ChangeRequestStatus::Draft,
            action: WorkflowAction::Approve,
        };
        let message = error.to_string();
        assert!(message.contains("approve"));
        assert!(message.contains("Draft"));
    }

    #[test]
    fn validation_message_names_the_offending_field() {
        let error = DomainError::validation("comments", "required when rejecting");
        assert!(error.to_string().contains("`comments`"));
    }
}
