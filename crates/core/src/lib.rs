pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod workflow;

pub use audit::{AuditEvent, AuditOutcome, AuditSink};
pub use domain::approval::{Approval, ApprovalId, Decision};
pub use domain::change_request::{
    Category, ChangeRequest, ChangeRequestId, ChangeRequestStatus, ImpactLevel, Priority,
    ProjectId, RequestNumber,
};
pub use domain::comment::{Comment, CommentId};
pub use domain::impact::{Impact, ImpactArea, ImpactId, Severity};
pub use domain::principal::{Principal, Role};
pub use errors::DomainError;
pub use workflow::{DraftPatch, NewChangeRequest, NewImpact, WorkflowAction};
