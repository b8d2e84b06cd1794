use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use changeflow_core::domain::approval::Approval;
use changeflow_core::domain::change_request::{
    Category, ChangeRequest, ChangeRequestId, ChangeRequestStatus, Priority, ProjectId,
};
use changeflow_core::domain::comment::Comment;
use changeflow_core::domain::impact::Impact;

pub mod approval;
pub mod change_request;
pub mod comment;
pub mod impact;

pub use approval::SqlApprovalRepository;
pub use change_request::{
    CreateChangeRequest, GroupedCounts, RequestFilter, SqlChangeRequestRepository,
};
pub use comment::SqlCommentRepository;
pub use impact::SqlImpactRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Outcome of a guarded status transition. `Stale` means the row was not in
/// the expected prior status when the write ran; nothing was changed.
#[derive(Clone, Debug, PartialEq)]
pub enum TransitionOutcome {
    Applied(ChangeRequest),
    Stale,
}

/// Outcome of recording an approve/reject decision.
#[derive(Clone, Debug, PartialEq)]
pub enum DecisionOutcome {
    Recorded(Approval),
    NotPending,
}

#[async_trait]
pub trait ChangeRequestRepository: Send + Sync {
    /// Insert a draft, allocating its request number atomically within the
    /// same transaction.
    async fn create(&self, record: CreateChangeRequest) -> Result<ChangeRequest, RepositoryError>;

    async fn find_by_id(&self, id: &ChangeRequestId)
        -> Result<Option<ChangeRequest>, RepositoryError>;

    async fn list(
        &self,
        project_id: &ProjectId,
        filter: &RequestFilter,
    ) -> Result<Vec<ChangeRequest>, RepositoryError>;

    /// Apply a draft field patch; compare-and-swap on `status = 'draft'`.
    async fn update_draft(
        &self,
        id: &ChangeRequestId,
        patch: &changeflow_core::workflow::DraftPatch,
        updated_at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RepositoryError>;

    /// draft -> submitted; sets `submitted_at` exactly once.
    async fn mark_submitted(
        &self,
        id: &ChangeRequestId,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RepositoryError>;

    /// approved -> implemented; sets `implemented_at` and the actual date.
    async fn mark_implemented(
        &self,
        id: &ChangeRequestId,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RepositoryError>;

    /// Permanent removal, drafts only; cascades to impacts and comments.
    async fn delete_draft(&self, id: &ChangeRequestId) -> Result<bool, RepositoryError>;

    async fn group_counts(&self, project_id: &ProjectId) -> Result<GroupedCounts, RepositoryError>;

    async fn recent(
        &self,
        project_id: &ProjectId,
        limit: u32,
    ) -> Result<Vec<ChangeRequest>, RepositoryError>;
}

/// Append-only ledger of approve/reject decisions. The decision write and the
/// request's status flip happen in one transaction so a lost race can never
/// leave a second ledger row behind.
#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn record_decision(
        &self,
        record: approval::NewDecision,
    ) -> Result<DecisionOutcome, RepositoryError>;

    async fn list_for_request(
        &self,
        id: &ChangeRequestId,
    ) -> Result<Vec<Approval>, RepositoryError>;
}

#[async_trait]
pub trait ImpactRepository: Send + Sync {
    async fn append(&self, impact: Impact) -> Result<(), RepositoryError>;
    async fn list_for_request(&self, id: &ChangeRequestId) -> Result<Vec<Impact>, RepositoryError>;
}

#[async_trait]
pub trait CommentRepository: Send + Sync {
    async fn append(&self, comment: Comment) -> Result<(), RepositoryError>;
    /// Oldest first; re-querying returns the same prefix plus newer entries.
    async fn list_for_request(&self, id: &ChangeRequestId)
        -> Result<Vec<Comment>, RepositoryError>;
}

pub(crate) fn decode_status(raw: &str) -> Result<ChangeRequestStatus, RepositoryError> {
    ChangeRequestStatus::parse(raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown status `{raw}`")))
}

pub(crate) fn decode_category(raw: &str) -> Result<Category, RepositoryError> {
    Category::parse(raw).ok_or_else(|| RepositoryError::Decode(format!("unknown category `{raw}`")))
}

pub(crate) fn decode_priority(raw: &str) -> Result<Priority, RepositoryError> {
    Priority::parse(raw).ok_or_else(|| RepositoryError::Decode(format!("unknown priority `{raw}`")))
}

pub(crate) fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| RepositoryError::Decode(format!("invalid timestamp `{raw}`: {err}")))
}

pub(crate) fn decode_opt_timestamp(
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.as_deref().map(decode_timestamp).transpose()
}
