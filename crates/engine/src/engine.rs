//! Orchestration layer for the change request lifecycle.
//!
//! Every operation runs the pure guards first (transition table, authorization,
//! input validation), then hands the write to the repositories. The guarded
//! SQL writes are what make concurrent callers safe; the engine translates a
//! lost race back into the error the caller would have seen had it read the
//! fresh state.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use changeflow_core::audit::{AuditEvent, AuditOutcome, AuditSink};
use changeflow_core::domain::approval::{Approval, Decision};
use changeflow_core::domain::change_request::{
    ChangeRequest, ChangeRequestId, ChangeRequestStatus, ProjectId,
};
use changeflow_core::domain::comment::{Comment, CommentId};
use changeflow_core::domain::impact::{Impact, ImpactId};
use changeflow_core::domain::principal::Principal;
use changeflow_core::errors::DomainError;
use changeflow_core::workflow::{
    authorize, target_status, validate_decision_comments, DraftPatch, NewChangeRequest, NewImpact,
    WorkflowAction,
};
use changeflow_db::repositories::approval::NewDecision;
use changeflow_db::repositories::{
    ApprovalRepository, ChangeRequestRepository, CommentRepository, CreateChangeRequest,
    DecisionOutcome, ImpactRepository, RepositoryError, RequestFilter, SqlApprovalRepository,
    SqlChangeRequestRepository, SqlCommentRepository, SqlImpactRepository, TransitionOutcome,
};
use changeflow_db::DbPool;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("change request `{0}` not found")]
    NotFound(ChangeRequestId),
    #[error("change request `{id}` was already decided; status is {status:?}")]
    AlreadyDecided { id: ChangeRequestId, status: ChangeRequestStatus },
    #[error(transparent)]
    Storage(#[from] RepositoryError),
}

/// A request together with its side records, as returned by detail reads.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequestDetail {
    pub request: ChangeRequest,
    pub impacts: Vec<Impact>,
    pub approvals: Vec<Approval>,
    pub comments: Vec<Comment>,
}

pub struct WorkflowEngine {
    requests: Arc<dyn ChangeRequestRepository>,
    approvals: Arc<dyn ApprovalRepository>,
    impacts: Arc<dyn ImpactRepository>,
    comments: Arc<dyn CommentRepository>,
    audit: Arc<dyn AuditSink>,
}

impl WorkflowEngine {
    pub fn new(pool: DbPool, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            requests: Arc::new(SqlChangeRequestRepository::new(pool.clone())),
            approvals: Arc::new(SqlApprovalRepository::new(pool.clone())),
            impacts: Arc::new(SqlImpactRepository::new(pool.clone())),
            comments: Arc::new(SqlCommentRepository::new(pool)),
            audit,
        }
    }

    pub async fn create_request(
        &self,
        project_id: ProjectId,
        input: NewChangeRequest,
        actor: &Principal,
    ) -> Result<ChangeRequest, EngineError> {
        input.validate()?;

        let created = self
            .requests
            .create(CreateChangeRequest {
                project_id,
                input,
                requested_by_id: actor.id.clone(),
                requested_by_name: actor.name.clone(),
            })
            .await?;

        self.audit.emit(
            AuditEvent::new(
                Some(created.id.clone()),
                Uuid::new_v4().to_string(),
                "workflow.draft_created",
                actor.id.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("request_number", created.request_number.as_str()),
        );

        Ok(created)
    }

    pub async fn update_draft(
        &self,
        id: &ChangeRequestId,
        patch: DraftPatch,
        actor: &Principal,
    ) -> Result<ChangeRequest, EngineError> {
        patch.validate()?;
        if patch.is_empty() {
            return Err(DomainError::validation("patch", "no fields to update").into());
        }

        let current = self.load(id).await?;
        self.guard(WorkflowAction::Edit, actor, &current)?;

        match self.requests.update_draft(id, &patch, Utc::now()).await? {
            TransitionOutcome::Applied(request) => Ok(request),
            TransitionOutcome::Stale => Err(self.stale(id, WorkflowAction::Edit, actor).await?),
        }
    }

    pub async fn submit(
        &self,
        id: &ChangeRequestId,
        actor: &Principal,
    ) -> Result<ChangeRequest, EngineError> {
        let current = self.load(id).await?;
        self.guard(WorkflowAction::Submit, actor, &current)?;

        match self.requests.mark_submitted(id, Utc::now()).await? {
            TransitionOutcome::Applied(request) => {
                self.audit_transition(&request, WorkflowAction::Submit, actor, current.status);
                Ok(request)
            }
            TransitionOutcome::Stale => Err(self.stale(id, WorkflowAction::Submit, actor).await?),
        }
    }

    pub async fn approve(
        &self,
        id: &ChangeRequestId,
        actor: &Principal,
        comments: Option<String>,
    ) -> Result<ChangeRequest, EngineError> {
        self.decide(id, actor, Decision::Approved, comments).await
    }

    pub async fn reject(
        &self,
        id: &ChangeRequestId,
        actor: &Principal,
        comments: Option<String>,
    ) -> Result<ChangeRequest, EngineError> {
        self.decide(id, actor, Decision::Rejected, comments).await
    }

    pub async fn implement(
        &self,
        id: &ChangeRequestId,
        actor: &Principal,
    ) -> Result<ChangeRequest, EngineError> {
        let current = self.load(id).await?;
        self.guard(WorkflowAction::Implement, actor, &current)?;

        match self.requests.mark_implemented(id, Utc::now()).await? {
            TransitionOutcome::Applied(request) => {
                self.audit_transition(&request, WorkflowAction::Implement, actor, current.status);
                Ok(request)
            }
            TransitionOutcome::Stale => {
                Err(self.stale(id, WorkflowAction::Implement, actor).await?)
            }
        }
    }

    pub async fn delete(
        &self,
        id: &ChangeRequestId,
        actor: &Principal,
    ) -> Result<(), EngineError> {
        let current = self.load(id).await?;
        self.guard(WorkflowAction::Delete, actor, &current)?;

        if self.requests.delete_draft(id).await? {
            self.audit.emit(
                AuditEvent::new(
                    Some(id.clone()),
                    Uuid::new_v4().to_string(),
                    "workflow.draft_deleted",
                    actor.id.clone(),
                    AuditOutcome::Success,
                )
                .with_metadata("request_number", current.request_number.as_str()),
            );
            Ok(())
        } else {
            Err(self.stale(id, WorkflowAction::Delete, actor).await?)
        }
    }

    pub async fn get(&self, id: &ChangeRequestId) -> Result<ChangeRequestDetail, EngineError> {
        let request = self.load(id).await?;
        let impacts = self.impacts.list_for_request(id).await?;
        let approvals = self.approvals.list_for_request(id).await?;
        let comments = self.comments.list_for_request(id).await?;
        Ok(ChangeRequestDetail { request, impacts, approvals, comments })
    }

    pub async fn list(
        &self,
        project_id: &ProjectId,
        filter: &RequestFilter,
    ) -> Result<Vec<ChangeRequest>, EngineError> {
        Ok(self.requests.list(project_id, filter).await?)
    }

    pub async fn stats(
        &self,
        project_id: &ProjectId,
    ) -> Result<crate::stats::ChangeRequestStats, EngineError> {
        crate::stats::project_stats(self.requests.as_ref(), project_id).await
    }

    pub async fn add_comment(
        &self,
        id: &ChangeRequestId,
        actor: &Principal,
        content: String,
    ) -> Result<Comment, EngineError> {
        if content.trim().is_empty() {
            return Err(DomainError::validation("content", "must not be empty").into());
        }
        // Comments are allowed in every lifecycle state; only existence is
        // checked here.
        self.load(id).await?;

        let comment = Comment {
            id: CommentId(Uuid::new_v4().to_string()),
            change_request_id: id.clone(),
            author_id: actor.id.clone(),
            author_name: actor.name.clone(),
            content,
            created_at: Utc::now(),
        };
        self.comments.append(comment.clone()).await?;
        Ok(comment)
    }

    pub async fn list_comments(&self, id: &ChangeRequestId) -> Result<Vec<Comment>, EngineError> {
        self.load(id).await?;
        Ok(self.comments.list_for_request(id).await?)
    }

    /// Impacts may be authored after creation only while the request is still
    /// a draft; they share the edit guard.
    pub async fn add_impact(
        &self,
        id: &ChangeRequestId,
        actor: &Principal,
        input: NewImpact,
    ) -> Result<Impact, EngineError> {
        input.validate()?;
        let current = self.load(id).await?;
        self.guard(WorkflowAction::Edit, actor, &current)?;

        let impact = Impact {
            id: ImpactId(Uuid::new_v4().to_string()),
            change_request_id: id.clone(),
            impact_area: input.impact_area,
            description: input.description,
            severity: input.severity,
            created_at: Utc::now(),
        };
        self.impacts.append(impact.clone()).await?;
        Ok(impact)
    }

    async fn decide(
        &self,
        id: &ChangeRequestId,
        actor: &Principal,
        decision: Decision,
        comments: Option<String>,
    ) -> Result<ChangeRequest, EngineError> {
        let action = match decision {
            Decision::Approved => WorkflowAction::Approve,
            Decision::Rejected => WorkflowAction::Reject,
        };
        validate_decision_comments(decision == Decision::Rejected, comments.as_deref())?;

        let current = self.load(id).await?;
        if let Err(error) = target_status(current.status, action) {
            self.audit_rejected(id, action, actor, current.status);
            // A request that already left `submitted` through a decision
            // reports the decision conflict, not a generic transition error.
            return Err(match current.status {
                ChangeRequestStatus::Approved | ChangeRequestStatus::Rejected => {
                    EngineError::AlreadyDecided { id: id.clone(), status: current.status }
                }
                _ => error.into(),
            });
        }
        authorize(action, actor, &current)?;

        let outcome = self
            .approvals
            .record_decision(NewDecision {
                change_request_id: id.clone(),
                approver_id: actor.id.clone(),
                approver_name: actor.name.clone(),
                approver_role: actor.role.as_str().to_string(),
                decision,
                comments,
                decided_at: Utc::now(),
            })
            .await?;

        match outcome {
            DecisionOutcome::Recorded(_) => {
                let request = self.load(id).await?;
                self.audit_transition(&request, action, actor, current.status);
                Ok(request)
            }
            DecisionOutcome::NotPending => {
                let fresh = self.load(id).await?;
                self.audit_rejected(id, action, actor, fresh.status);
                Err(EngineError::AlreadyDecided { id: id.clone(), status: fresh.status })
            }
        }
    }

    async fn load(&self, id: &ChangeRequestId) -> Result<ChangeRequest, EngineError> {
        self.requests
            .find_by_id(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.clone()))
    }

    fn guard(
        &self,
        action: WorkflowAction,
        actor: &Principal,
        request: &ChangeRequest,
    ) -> Result<(), EngineError> {
        if let Err(error) = target_status(request.status, action) {
            self.audit_rejected(&request.id, action, actor, request.status);
            return Err(error.into());
        }
        authorize(action, actor, request)?;
        Ok(())
    }

    /// Convert a lost compare-and-swap into the error a fresh read would have
    /// produced. Always returns Ok(error) so the caller can `Err(...?)`.
    async fn stale(
        &self,
        id: &ChangeRequestId,
        action: WorkflowAction,
        actor: &Principal,
    ) -> Result<EngineError, EngineError> {
        match self.requests.find_by_id(id).await? {
            None => Ok(EngineError::NotFound(id.clone())),
            Some(fresh) => {
                self.audit_rejected(id, action, actor, fresh.status);
                Ok(DomainError::InvalidTransition { status: fresh.status, action }.into())
            }
        }
    }

    fn audit_transition(
        &self,
        request: &ChangeRequest,
        action: WorkflowAction,
        actor: &Principal,
        from: ChangeRequestStatus,
    ) {
        self.audit.emit(
            AuditEvent::new(
                Some(request.id.clone()),
                Uuid::new_v4().to_string(),
                "workflow.transition_applied",
                actor.id.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("action", action.as_str())
            .with_metadata("from", from.as_str())
            .with_metadata("to", request.status.as_str()),
        );
    }

    fn audit_rejected(
        &self,
        id: &ChangeRequestId,
        action: WorkflowAction,
        actor: &Principal,
        status: ChangeRequestStatus,
    ) {
        self.audit.emit(
            AuditEvent::new(
                Some(id.clone()),
                Uuid::new_v4().to_string(),
                "workflow.transition_rejected",
                actor.id.clone(),
                AuditOutcome::Rejected,
            )
            .with_metadata("action", action.as_str())
            .with_metadata("status", status.as_str()),
        );
    }
}
