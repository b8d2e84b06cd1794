//! Transition guard table for the change request lifecycle.
//!
//! Guards are pure functions of the request's current status, the requested
//! action, and the acting principal. The engine checks them before touching
//! storage, so a failed guard never leaves partial state behind.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::change_request::{
    Category, ChangeRequest, ChangeRequestStatus, ImpactLevel, Priority,
};
use crate::domain::impact::{ImpactArea, Severity};
use crate::domain::principal::{Principal, Role};
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowAction {
    Submit,
    Approve,
    Reject,
    Implement,
    Edit,
    Delete,
}

impl WorkflowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Implement => "implement",
            Self::Edit => "edit",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status the request moves to when `action` is applied in `current`.
///
/// Edit and Delete keep the current status; they are still guarded here so
/// every action shares one transition table. `rejected` is terminal: the
/// observed surface offers no resubmit, re-raising means a new request.
pub fn target_status(
    current: ChangeRequestStatus,
    action: WorkflowAction,
) -> Result<ChangeRequestStatus, DomainError> {
    use ChangeRequestStatus::{Approved, Draft, Implemented, Rejected, Submitted};
    use WorkflowAction::{Approve, Delete, Edit, Implement, Reject, Submit};

    match (current, action) {
        (Draft, Submit) => Ok(Submitted),
        (Submitted, Approve) => Ok(Approved),
        (Submitted, Reject) => Ok(Rejected),
        (Approved, Implement) => Ok(Implemented),
        (Draft, Edit) | (Draft, Delete) => Ok(Draft),
        (Submitted | Approved | Rejected | Implemented, Edit | Delete)
        | (Submitted | Approved | Rejected | Implemented, Submit)
        | (Draft | Approved | Rejected | Implemented, Approve | Reject)
        | (Draft | Submitted | Rejected | Implemented, Implement) => {
            Err(DomainError::InvalidTransition { status: current, action })
        }
    }
}

/// Authorization gate: owner-only for submit/edit, owner-or-admin for delete,
/// role-gated for approve/reject/implement.
pub fn authorize(
    action: WorkflowAction,
    actor: &Principal,
    request: &ChangeRequest,
) -> Result<(), DomainError> {
    let forbidden = |reason: &str| DomainError::Forbidden {
        actor_id: actor.id.clone(),
        action,
        reason: reason.to_string(),
    };

    match action {
        WorkflowAction::Submit | WorkflowAction::Edit => {
            if actor.id == request.requested_by_id {
                Ok(())
            } else {
                Err(forbidden("only the requester may do this"))
            }
        }
        WorkflowAction::Delete => {
            if actor.id == request.requested_by_id || actor.role == Role::Admin {
                Ok(())
            } else {
                Err(forbidden("only the requester or an admin may delete"))
            }
        }
        WorkflowAction::Approve | WorkflowAction::Reject => {
            if actor.role.satisfies(Role::Approver) {
                Ok(())
            } else {
                Err(forbidden("approver role required"))
            }
        }
        WorkflowAction::Implement => {
            if actor.role.satisfies(Role::Implementer) {
                Ok(())
            } else {
                Err(forbidden("implementer role required"))
            }
        }
    }
}

/// Validated input for creating a draft change request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChangeRequest {
    pub title: String,
    pub description: String,
    pub category: Category,
    pub priority: Priority,
    pub impact_level: ImpactLevel,
    pub justification: Option<String>,
    pub proposed_solution: Option<String>,
    pub estimated_effort: Option<String>,
    pub estimated_cost: Option<String>,
    pub target_implementation_date: Option<NaiveDate>,
    #[serde(default)]
    pub impacts: Vec<NewImpact>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewImpact {
    pub impact_area: ImpactArea,
    pub description: String,
    pub severity: Severity,
}

impl NewChangeRequest {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.title.trim().is_empty() {
            return Err(DomainError::validation("title", "must not be empty"));
        }
        if self.description.trim().is_empty() {
            return Err(DomainError::validation("description", "must not be empty"));
        }
        for impact in &self.impacts {
            impact.validate()?;
        }
        Ok(())
    }
}

impl NewImpact {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.description.trim().is_empty() {
            return Err(DomainError::validation("impacts.description", "must not be empty"));
        }
        Ok(())
    }
}

/// Partial update applied to a draft; absent fields stay unchanged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<Category>,
    pub priority: Option<Priority>,
    pub impact_level: Option<ImpactLevel>,
    pub justification: Option<String>,
    pub proposed_solution: Option<String>,
    pub estimated_effort: Option<String>,
    pub estimated_cost: Option<String>,
    pub target_implementation_date: Option<NaiveDate>,
}

impl DraftPatch {
    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err(DomainError::validation("title", "must not be empty"));
            }
        }
        if let Some(description) = &self.description {
            if description.trim().is_empty() {
                return Err(DomainError::validation("description", "must not be empty"));
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Rejections carry the reviewer's reasoning into the ledger; approvals may
/// leave comments empty.
pub fn validate_decision_comments(
    decision_is_reject: bool,
    comments: Option<&str>,
) -> Result<(), DomainError> {
    if decision_is_reject && comments.map(str::trim).filter(|c| !c.is_empty()).is_none() {
        return Err(DomainError::validation("comments", "required when rejecting"));
    }
    Ok(())
}
