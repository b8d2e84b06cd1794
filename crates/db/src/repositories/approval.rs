use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use changeflow_core::domain::approval::{Approval, ApprovalId, Decision};
use changeflow_core::domain::change_request::ChangeRequestId;

use super::{decode_timestamp, ApprovalRepository, DecisionOutcome, RepositoryError};
use crate::DbPool;

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[derive(Clone, Debug)]
pub struct NewDecision {
    pub change_request_id: ChangeRequestId,
    pub approver_id: String,
    pub approver_name: String,
    pub approver_role: String,
    pub decision: Decision,
    pub comments: Option<String>,
    pub decided_at: DateTime<Utc>,
}

fn decode_decision(raw: &str) -> Result<Decision, RepositoryError> {
    Decision::parse(raw).ok_or_else(|| RepositoryError::Decode(format!("unknown decision `{raw}`")))
}

fn row_to_approval(row: &sqlx::sqlite::SqliteRow) -> Result<Approval, RepositoryError> {
    let get = |name: &str| -> Result<String, RepositoryError> {
        row.try_get::<String, _>(name).map_err(|e| RepositoryError::Decode(e.to_string()))
    };

    Ok(Approval {
        id: ApprovalId(get("id")?),
        change_request_id: ChangeRequestId(get("change_request_id")?),
        approver_id: get("approver_id")?,
        approver_name: get("approver_name")?,
        approver_role: get("approver_role")?,
        decision: decode_decision(&get("decision")?)?,
        comments: row
            .try_get::<Option<String>, _>("comments")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        decided_at: decode_timestamp(&get("decided_at")?)?,
        created_at: decode_timestamp(&get("created_at")?)?,
    })
}

#[async_trait]
impl ApprovalRepository for SqlApprovalRepository {
    async fn record_decision(
        &self,
        record: NewDecision,
    ) -> Result<DecisionOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Status flip and ledger insert commit together. The compare-and-swap
        // on `submitted` makes the second of two racing deciders a no-op, and
        // the unique index on approval.change_request_id backstops the ledger.
        let flipped = sqlx::query(
            "UPDATE change_request
             SET status = ?, decided_at = ?, updated_at = ?
             WHERE id = ? AND status = 'submitted'",
        )
        .bind(record.decision.as_str())
        .bind(record.decided_at.to_rfc3339())
        .bind(record.decided_at.to_rfc3339())
        .bind(&record.change_request_id.0)
        .execute(&mut *tx)
        .await?;

        if flipped.rows_affected() == 0 {
            return Ok(DecisionOutcome::NotPending);
        }

        let approval = Approval {
            id: ApprovalId(Uuid::new_v4().to_string()),
            change_request_id: record.change_request_id,
            approver_id: record.approver_id,
            approver_name: record.approver_name,
            approver_role: record.approver_role,
            decision: record.decision,
            comments: record.comments,
            decided_at: record.decided_at,
            created_at: record.decided_at,
        };

        sqlx::query(
            "INSERT INTO approval (id, change_request_id, approver_id, approver_name,
                 approver_role, decision, comments, decided_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&approval.id.0)
        .bind(&approval.change_request_id.0)
        .bind(&approval.approver_id)
        .bind(&approval.approver_name)
        .bind(&approval.approver_role)
        .bind(approval.decision.as_str())
        .bind(&approval.comments)
        .bind(approval.decided_at.to_rfc3339())
        .bind(approval.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(DecisionOutcome::Recorded(approval))
    }

    async fn list_for_request(
        &self,
        id: &ChangeRequestId,
    ) -> Result<Vec<Approval>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, change_request_id, approver_id, approver_name, approver_role,
                 decision, comments, decided_at, created_at
             FROM approval WHERE change_request_id = ?
             ORDER BY created_at ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_approval).collect()
    }
}

#[cfg(test)]
mod tests {
    use changeflow_core::domain::approval::Decision;
    use changeflow_core::domain::change_request::{
        Category, ChangeRequestStatus, ImpactLevel, Priority, ProjectId,
    };
    use changeflow_core::workflow::NewChangeRequest;
    use chrono::Utc;

    use super::{NewDecision, SqlApprovalRepository};
    use crate::repositories::change_request::{CreateChangeRequest, SqlChangeRequestRepository};
    use crate::repositories::{
        ApprovalRepository, ChangeRequestRepository, DecisionOutcome, TransitionOutcome,
    };
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    async fn submitted_request(pool: &sqlx::SqlitePool) -> changeflow_core::domain::change_request::ChangeRequest {
        let repo = SqlChangeRequestRepository::new(pool.clone());
        let created = repo
            .create(CreateChangeRequest {
                project_id: ProjectId("proj-a".to_string()),
                input: NewChangeRequest {
                    title: "Extend go-live support".to_string(),
                    description: "Add two weeks of at-elbow support".to_string(),
                    category: Category::Timeline,
                    priority: Priority::High,
                    impact_level: ImpactLevel::Moderate,
                    justification: None,
                    proposed_solution: None,
                    estimated_effort: None,
                    estimated_cost: None,
                    target_implementation_date: None,
                    impacts: Vec::new(),
                },
                requested_by_id: "u-req".to_string(),
                requested_by_name: "Avery Chen".to_string(),
            })
            .await
            .expect("create");
        match repo.mark_submitted(&created.id, Utc::now()).await.expect("submit") {
            TransitionOutcome::Applied(request) => request,
            TransitionOutcome::Stale => panic!("fresh draft should submit"),
        }
    }

    fn decision_for(
        request: &changeflow_core::domain::change_request::ChangeRequest,
        decision: Decision,
        comments: Option<&str>,
    ) -> NewDecision {
        NewDecision {
            change_request_id: request.id.clone(),
            approver_id: "u-approver".to_string(),
            approver_name: "Jordan Wells".to_string(),
            approver_role: "approver".to_string(),
            decision,
            comments: comments.map(str::to_string),
            decided_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn first_decision_flips_status_and_writes_one_ledger_row() {
        let pool = setup().await;
        let request = submitted_request(&pool).await;
        let approvals = SqlApprovalRepository::new(pool.clone());

        let outcome = approvals
            .record_decision(decision_for(&request, Decision::Approved, None))
            .await
            .expect("record");
        let DecisionOutcome::Recorded(approval) = outcome else {
            panic!("submitted request should accept a decision");
        };
        assert_eq!(approval.decision, Decision::Approved);

        let requests = SqlChangeRequestRepository::new(pool.clone());
        let reloaded = requests.find_by_id(&request.id).await.expect("find").expect("exists");
        assert_eq!(reloaded.status, ChangeRequestStatus::Approved);
        assert!(reloaded.decided_at.is_some());

        let ledger = approvals.list_for_request(&request.id).await.expect("ledger");
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn second_decision_is_rejected_as_not_pending() {
        let pool = setup().await;
        let request = submitted_request(&pool).await;
        let approvals = SqlApprovalRepository::new(pool.clone());

        approvals
            .record_decision(decision_for(&request, Decision::Approved, None))
            .await
            .expect("first decision");

        let second = approvals
            .record_decision(decision_for(&request, Decision::Rejected, Some("too costly")))
            .await
            .expect("second decision call");
        assert_eq!(second, DecisionOutcome::NotPending);

        let ledger = approvals.list_for_request(&request.id).await.expect("ledger");
        assert_eq!(ledger.len(), 1, "losing decision must not add a ledger row");
    }

    #[tokio::test]
    async fn decision_against_draft_is_not_pending() {
        let pool = setup().await;
        let requests = SqlChangeRequestRepository::new(pool.clone());
        let created = requests
            .create(CreateChangeRequest {
                project_id: ProjectId("proj-a".to_string()),
                input: NewChangeRequest {
                    title: "Still a draft".to_string(),
                    description: "Not yet submitted".to_string(),
                    category: Category::Others,
                    priority: Priority::Low,
                    impact_level: ImpactLevel::Minor,
                    justification: None,
                    proposed_solution: None,
                    estimated_effort: None,
                    estimated_cost: None,
                    target_implementation_date: None,
                    impacts: Vec::new(),
                },
                requested_by_id: "u-req".to_string(),
                requested_by_name: "Avery Chen".to_string(),
            })
            .await
            .expect("create");

        let approvals = SqlApprovalRepository::new(pool);
        let outcome = approvals
            .record_decision(decision_for(&created, Decision::Approved, None))
            .await
            .expect("record call");
        assert_eq!(outcome, DecisionOutcome::NotPending);
    }

    #[tokio::test]
    async fn rejection_comments_survive_the_round_trip() {
        let pool = setup().await;
        let request = submitted_request(&pool).await;
        let approvals = SqlApprovalRepository::new(pool);

        approvals
            .record_decision(decision_for(&request, Decision::Rejected, Some("budget exhausted")))
            .await
            .expect("record");

        let ledger = approvals.list_for_request(&request.id).await.expect("ledger");
        assert_eq!(ledger[0].comments.as_deref(), Some("budget exhausted"));
        assert_eq!(ledger[0].decision, Decision::Rejected);
    }
}
