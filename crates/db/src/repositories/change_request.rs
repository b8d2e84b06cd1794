use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sqlx::{QueryBuilder, Row};
use uuid::Uuid;

use changeflow_core::domain::change_request::{
    Category, ChangeRequest, ChangeRequestId, ChangeRequestStatus, ImpactLevel, Priority,
    ProjectId, RequestNumber,
};
use changeflow_core::workflow::{DraftPatch, NewChangeRequest};

use super::{
    decode_category, decode_opt_timestamp, decode_priority, decode_status, decode_timestamp,
    ChangeRequestRepository, RepositoryError, TransitionOutcome,
};
use crate::DbPool;

const SELECT_COLUMNS: &str = "id, project_id, request_number, category, priority, impact_level, \
     title, description, justification, proposed_solution, estimated_effort, estimated_cost, \
     target_implementation_date, requested_by_id, requested_by_name, status, created_at, \
     updated_at, submitted_at, decided_at, implemented_at, actual_implementation_date";

pub struct SqlChangeRequestRepository {
    pool: DbPool,
}

impl SqlChangeRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[derive(Clone, Debug)]
pub struct CreateChangeRequest {
    pub project_id: ProjectId,
    pub input: NewChangeRequest,
    pub requested_by_id: String,
    pub requested_by_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestFilter {
    pub status: Option<ChangeRequestStatus>,
    pub category: Option<Category>,
    pub priority: Option<Priority>,
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupedCounts {
    pub by_status: Vec<(ChangeRequestStatus, i64)>,
    pub by_priority: Vec<(Priority, i64)>,
    pub by_category: Vec<(Category, i64)>,
}

fn decode_impact_level(raw: &str) -> Result<ImpactLevel, RepositoryError> {
    ImpactLevel::parse(raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown impact level `{raw}`")))
}

fn decode_date(raw: &str) -> Result<NaiveDate, RepositoryError> {
    raw.parse::<NaiveDate>()
        .map_err(|err| RepositoryError::Decode(format!("invalid date `{raw}`: {err}")))
}

fn decode_opt_date(raw: Option<String>) -> Result<Option<NaiveDate>, RepositoryError> {
    raw.as_deref().map(decode_date).transpose()
}

fn column<T>(row: &sqlx::sqlite::SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get::<T, _>(name).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Result<ChangeRequest, RepositoryError> {
    Ok(ChangeRequest {
        id: ChangeRequestId(column(row, "id")?),
        project_id: ProjectId(column(row, "project_id")?),
        request_number: RequestNumber(column(row, "request_number")?),
        category: decode_category(&column::<String>(row, "category")?)?,
        priority: decode_priority(&column::<String>(row, "priority")?)?,
        impact_level: decode_impact_level(&column::<String>(row, "impact_level")?)?,
        title: column(row, "title")?,
        description: column(row, "description")?,
        justification: column(row, "justification")?,
        proposed_solution: column(row, "proposed_solution")?,
        estimated_effort: column(row, "estimated_effort")?,
        estimated_cost: column(row, "estimated_cost")?,
        target_implementation_date: decode_opt_date(column(row, "target_implementation_date")?)?,
        requested_by_id: column(row, "requested_by_id")?,
        requested_by_name: column(row, "requested_by_name")?,
        status: decode_status(&column::<String>(row, "status")?)?,
        created_at: decode_timestamp(&column::<String>(row, "created_at")?)?,
        updated_at: decode_timestamp(&column::<String>(row, "updated_at")?)?,
        submitted_at: decode_opt_timestamp(column(row, "submitted_at")?)?,
        decided_at: decode_opt_timestamp(column(row, "decided_at")?)?,
        implemented_at: decode_opt_timestamp(column(row, "implemented_at")?)?,
        actual_implementation_date: decode_opt_date(column(row, "actual_implementation_date")?)?,
    })
}

impl SqlChangeRequestRepository {
    async fn fetch(&self, id: &ChangeRequestId) -> Result<Option<ChangeRequest>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM change_request WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_request(r)?)),
            None => Ok(None),
        }
    }

    async fn fetch_applied(
        &self,
        id: &ChangeRequestId,
        rows_affected: u64,
    ) -> Result<TransitionOutcome, RepositoryError> {
        if rows_affected == 0 {
            return Ok(TransitionOutcome::Stale);
        }
        match self.fetch(id).await? {
            Some(request) => Ok(TransitionOutcome::Applied(request)),
            // The row was updated and then deleted by a concurrent caller;
            // report stale so the engine re-reads and surfaces NotFound.
            None => Ok(TransitionOutcome::Stale),
        }
    }
}

#[async_trait]
impl ChangeRequestRepository for SqlChangeRequestRepository {
    async fn create(&self, record: CreateChangeRequest) -> Result<ChangeRequest, RepositoryError> {
        let now = Utc::now();
        let year = now.year();
        let id = ChangeRequestId(Uuid::new_v4().to_string());

        let mut tx = self.pool.begin().await?;

        // Counter bump and request insert share the transaction, so two
        // concurrent creates can never observe the same sequence value.
        let sequence: i64 = sqlx::query_scalar(
            "INSERT INTO request_counter (project_id, year, next_seq) VALUES (?, ?, 1)
             ON CONFLICT(project_id, year) DO UPDATE SET next_seq = next_seq + 1
             RETURNING next_seq",
        )
        .bind(&record.project_id.0)
        .bind(year)
        .fetch_one(&mut *tx)
        .await?;

        let number = RequestNumber::format(year, sequence as u32);
        let input = &record.input;

        sqlx::query(
            "INSERT INTO change_request (id, project_id, request_number, category, priority,
                 impact_level, title, description, justification, proposed_solution,
                 estimated_effort, estimated_cost, target_implementation_date,
                 requested_by_id, requested_by_name, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'draft', ?, ?)",
        )
        .bind(&id.0)
        .bind(&record.project_id.0)
        .bind(number.as_str())
        .bind(input.category.as_str())
        .bind(input.priority.as_str())
        .bind(input.impact_level.as_str())
        .bind(&input.title)
        .bind(&input.description)
        .bind(&input.justification)
        .bind(&input.proposed_solution)
        .bind(&input.estimated_effort)
        .bind(&input.estimated_cost)
        .bind(input.target_implementation_date.map(|d| d.to_string()))
        .bind(&record.requested_by_id)
        .bind(&record.requested_by_name)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for impact in &input.impacts {
            sqlx::query(
                "INSERT INTO impact (id, change_request_id, impact_area, description, severity,
                     created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&id.0)
            .bind(impact.impact_area.as_str())
            .bind(&impact.description)
            .bind(impact.severity.as_str())
            .bind(now.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(ChangeRequest {
            id,
            project_id: record.project_id,
            request_number: number,
            category: input.category,
            priority: input.priority,
            impact_level: input.impact_level,
            title: input.title.clone(),
            description: input.description.clone(),
            justification: input.justification.clone(),
            proposed_solution: input.proposed_solution.clone(),
            estimated_effort: input.estimated_effort.clone(),
            estimated_cost: input.estimated_cost.clone(),
            target_implementation_date: input.target_implementation_date,
            requested_by_id: record.requested_by_id,
            requested_by_name: record.requested_by_name,
            status: ChangeRequestStatus::Draft,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            decided_at: None,
            implemented_at: None,
            actual_implementation_date: None,
        })
    }

    async fn find_by_id(
        &self,
        id: &ChangeRequestId,
    ) -> Result<Option<ChangeRequest>, RepositoryError> {
        self.fetch(id).await
    }

    async fn list(
        &self,
        project_id: &ProjectId,
        filter: &RequestFilter,
    ) -> Result<Vec<ChangeRequest>, RepositoryError> {
        let mut builder = QueryBuilder::new(format!(
            "SELECT {SELECT_COLUMNS} FROM change_request WHERE project_id = "
        ));
        builder.push_bind(&project_id.0);

        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(category) = filter.category {
            builder.push(" AND category = ").push_bind(category.as_str());
        }
        if let Some(priority) = filter.priority {
            builder.push(" AND priority = ").push_bind(priority.as_str());
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", search.replace('%', "\\%").replace('_', "\\_"));
            builder
                .push(" AND (title LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR description LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }

        builder.push(" ORDER BY created_at DESC, request_number DESC");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(i64::from(limit));
            if let Some(offset) = filter.offset {
                builder.push(" OFFSET ").push_bind(i64::from(offset));
            }
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_request).collect()
    }

    async fn update_draft(
        &self,
        id: &ChangeRequestId,
        patch: &DraftPatch,
        updated_at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RepositoryError> {
        let mut builder = QueryBuilder::new("UPDATE change_request SET updated_at = ");
        builder.push_bind(updated_at.to_rfc3339());

        if let Some(title) = &patch.title {
            builder.push(", title = ").push_bind(title);
        }
        if let Some(description) = &patch.description {
            builder.push(", description = ").push_bind(description);
        }
        if let Some(category) = patch.category {
            builder.push(", category = ").push_bind(category.as_str());
        }
        if let Some(priority) = patch.priority {
            builder.push(", priority = ").push_bind(priority.as_str());
        }
        if let Some(impact_level) = patch.impact_level {
            builder.push(", impact_level = ").push_bind(impact_level.as_str());
        }
        if let Some(justification) = &patch.justification {
            builder.push(", justification = ").push_bind(justification);
        }
        if let Some(proposed_solution) = &patch.proposed_solution {
            builder.push(", proposed_solution = ").push_bind(proposed_solution);
        }
        if let Some(estimated_effort) = &patch.estimated_effort {
            builder.push(", estimated_effort = ").push_bind(estimated_effort);
        }
        if let Some(estimated_cost) = &patch.estimated_cost {
            builder.push(", estimated_cost = ").push_bind(estimated_cost);
        }
        if let Some(date) = patch.target_implementation_date {
            builder.push(", target_implementation_date = ").push_bind(date.to_string());
        }

        builder.push(" WHERE id = ").push_bind(&id.0).push(" AND status = 'draft'");

        let result = builder.build().execute(&self.pool).await?;
        self.fetch_applied(id, result.rows_affected()).await
    }

    async fn mark_submitted(
        &self,
        id: &ChangeRequestId,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RepositoryError> {
        let result = sqlx::query(
            "UPDATE change_request
             SET status = 'submitted', submitted_at = ?, updated_at = ?
             WHERE id = ? AND status = 'draft'",
        )
        .bind(at.to_rfc3339())
        .bind(at.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        self.fetch_applied(id, result.rows_affected()).await
    }

    async fn mark_implemented(
        &self,
        id: &ChangeRequestId,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RepositoryError> {
        let result = sqlx::query(
            "UPDATE change_request
             SET status = 'implemented', implemented_at = ?,
                 actual_implementation_date = ?, updated_at = ?
             WHERE id = ? AND status = 'approved'",
        )
        .bind(at.to_rfc3339())
        .bind(at.date_naive().to_string())
        .bind(at.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        self.fetch_applied(id, result.rows_affected()).await
    }

    async fn delete_draft(&self, id: &ChangeRequestId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM change_request WHERE id = ? AND status = 'draft'")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn group_counts(&self, project_id: &ProjectId) -> Result<GroupedCounts, RepositoryError> {
        let status_rows = sqlx::query(
            "SELECT status AS value, COUNT(*) AS count
             FROM change_request WHERE project_id = ? GROUP BY status",
        )
        .bind(&project_id.0)
        .fetch_all(&self.pool)
        .await?;

        let priority_rows = sqlx::query(
            "SELECT priority AS value, COUNT(*) AS count
             FROM change_request WHERE project_id = ? GROUP BY priority",
        )
        .bind(&project_id.0)
        .fetch_all(&self.pool)
        .await?;

        let category_rows = sqlx::query(
            "SELECT category AS value, COUNT(*) AS count
             FROM change_request WHERE project_id = ? GROUP BY category",
        )
        .bind(&project_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = GroupedCounts::default();
        for row in &status_rows {
            let value: String = column(row, "value")?;
            counts.by_status.push((decode_status(&value)?, column(row, "count")?));
        }
        for row in &priority_rows {
            let value: String = column(row, "value")?;
            counts.by_priority.push((decode_priority(&value)?, column(row, "count")?));
        }
        for row in &category_rows {
            let value: String = column(row, "value")?;
            counts.by_category.push((decode_category(&value)?, column(row, "count")?));
        }

        Ok(counts)
    }

    async fn recent(
        &self,
        project_id: &ProjectId,
        limit: u32,
    ) -> Result<Vec<ChangeRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM change_request
             WHERE project_id = ?
             ORDER BY updated_at DESC, request_number DESC
             LIMIT ?",
        ))
        .bind(&project_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_request).collect()
    }
}

#[cfg(test)]
mod tests {
    use changeflow_core::domain::change_request::{
        Category, ChangeRequestId, ChangeRequestStatus, ImpactLevel, Priority, ProjectId,
    };
    use changeflow_core::domain::impact::{ImpactArea, Severity};
    use changeflow_core::workflow::{DraftPatch, NewChangeRequest, NewImpact};
    use chrono::{Datelike, Utc};

    use super::{CreateChangeRequest, RequestFilter, SqlChangeRequestRepository};
    use crate::repositories::{ChangeRequestRepository, TransitionOutcome};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_input(title: &str) -> NewChangeRequest {
        NewChangeRequest {
            title: title.to_string(),
            description: "Request to add clinical documentation training module".to_string(),
            category: Category::Training,
            priority: Priority::High,
            impact_level: ImpactLevel::Moderate,
            justification: Some("go-live readiness".to_string()),
            proposed_solution: None,
            estimated_effort: Some("2 weeks".to_string()),
            estimated_cost: Some("USD 12,000".to_string()),
            target_implementation_date: None,
            impacts: Vec::new(),
        }
    }

    fn create_record(project: &str, title: &str) -> CreateChangeRequest {
        CreateChangeRequest {
            project_id: ProjectId(project.to_string()),
            input: sample_input(title),
            requested_by_id: "u-req".to_string(),
            requested_by_name: "Avery Chen".to_string(),
        }
    }

    #[tokio::test]
    async fn create_allocates_sequential_numbers_per_project_and_year() {
        let pool = setup().await;
        let repo = SqlChangeRequestRepository::new(pool);
        let year = Utc::now().year();

        let first = repo.create(create_record("proj-a", "First")).await.expect("create first");
        let second = repo.create(create_record("proj-a", "Second")).await.expect("create second");
        let other = repo.create(create_record("proj-b", "Other")).await.expect("create other");

        assert_eq!(first.request_number.as_str(), format!("CR-{year}-0001"));
        assert_eq!(second.request_number.as_str(), format!("CR-{year}-0002"));
        assert_eq!(other.request_number.as_str(), format!("CR-{year}-0001"));
        assert_eq!(first.status, ChangeRequestStatus::Draft);
        assert!(first.submitted_at.is_none());
    }

    #[tokio::test]
    async fn deleted_numbers_are_never_reused() {
        let pool = setup().await;
        let repo = SqlChangeRequestRepository::new(pool);
        let year = Utc::now().year();

        let first = repo.create(create_record("proj-a", "First")).await.expect("create");
        assert!(repo.delete_draft(&first.id).await.expect("delete"));

        let second = repo.create(create_record("proj-a", "Second")).await.expect("create");
        assert_eq!(second.request_number.as_str(), format!("CR-{year}-0002"));
    }

    #[tokio::test]
    async fn inline_impacts_are_persisted_with_the_draft() {
        let pool = setup().await;
        let repo = SqlChangeRequestRepository::new(pool.clone());

        let mut record = create_record("proj-a", "With impacts");
        record.input.impacts.push(NewImpact {
            impact_area: ImpactArea::Schedule,
            description: "Two week slip".to_string(),
            severity: Severity::Medium,
        });
        let created = repo.create(record).await.expect("create");

        let impact_repo = crate::repositories::SqlImpactRepository::new(pool);
        let impacts = crate::repositories::ImpactRepository::list_for_request(
            &impact_repo,
            &created.id,
        )
        .await
        .expect("list impacts");
        assert_eq!(impacts.len(), 1);
        assert_eq!(impacts[0].impact_area, ImpactArea::Schedule);
    }

    #[tokio::test]
    async fn list_filters_combine_with_and_semantics() {
        let pool = setup().await;
        let repo = SqlChangeRequestRepository::new(pool);
        let project = ProjectId("proj-a".to_string());

        repo.create(create_record("proj-a", "Training rollout")).await.expect("create");
        let mut record = create_record("proj-a", "Budget adjustment");
        record.input.category = Category::Budget;
        record.input.priority = Priority::Low;
        repo.create(record).await.expect("create");

        let all = repo.list(&project, &RequestFilter::default()).await.expect("list");
        assert_eq!(all.len(), 2);

        let filtered = repo
            .list(
                &project,
                &RequestFilter {
                    category: Some(Category::Budget),
                    priority: Some(Priority::Low),
                    ..RequestFilter::default()
                },
            )
            .await
            .expect("filtered list");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].title, "Budget adjustment");

        let mismatched = repo
            .list(
                &project,
                &RequestFilter {
                    category: Some(Category::Budget),
                    priority: Some(Priority::High),
                    ..RequestFilter::default()
                },
            )
            .await
            .expect("mismatched filters");
        assert!(mismatched.is_empty());
    }

    #[tokio::test]
    async fn search_matches_title_and_description() {
        let pool = setup().await;
        let repo = SqlChangeRequestRepository::new(pool);
        let project = ProjectId("proj-a".to_string());

        repo.create(create_record("proj-a", "Training rollout")).await.expect("create");

        let by_title = repo
            .list(
                &project,
                &RequestFilter { search: Some("rollout".to_string()), ..RequestFilter::default() },
            )
            .await
            .expect("search title");
        assert_eq!(by_title.len(), 1);

        let by_description = repo
            .list(
                &project,
                &RequestFilter {
                    search: Some("clinical documentation".to_string()),
                    ..RequestFilter::default()
                },
            )
            .await
            .expect("search description");
        assert_eq!(by_description.len(), 1);

        let no_match = repo
            .list(
                &project,
                &RequestFilter { search: Some("unrelated".to_string()), ..RequestFilter::default() },
            )
            .await
            .expect("search miss");
        assert!(no_match.is_empty());
    }

    #[tokio::test]
    async fn mark_submitted_is_a_compare_and_swap() {
        let pool = setup().await;
        let repo = SqlChangeRequestRepository::new(pool);

        let created = repo.create(create_record("proj-a", "CAS test")).await.expect("create");

        let first = repo.mark_submitted(&created.id, Utc::now()).await.expect("submit");
        let TransitionOutcome::Applied(submitted) = first else {
            panic!("first submit should apply");
        };
        assert_eq!(submitted.status, ChangeRequestStatus::Submitted);
        assert!(submitted.submitted_at.is_some());

        let second = repo.mark_submitted(&created.id, Utc::now()).await.expect("second submit");
        assert_eq!(second, TransitionOutcome::Stale);
    }

    #[tokio::test]
    async fn update_draft_refuses_non_draft_rows() {
        let pool = setup().await;
        let repo = SqlChangeRequestRepository::new(pool);

        let created = repo.create(create_record("proj-a", "Patch me")).await.expect("create");
        repo.mark_submitted(&created.id, Utc::now()).await.expect("submit");

        let patch =
            DraftPatch { title: Some("New title".to_string()), ..DraftPatch::default() };
        let outcome = repo.update_draft(&created.id, &patch, Utc::now()).await.expect("patch");
        assert_eq!(outcome, TransitionOutcome::Stale);
    }

    #[tokio::test]
    async fn delete_is_guarded_to_draft_status() {
        let pool = setup().await;
        let repo = SqlChangeRequestRepository::new(pool);

        let created = repo.create(create_record("proj-a", "Keep me")).await.expect("create");
        repo.mark_submitted(&created.id, Utc::now()).await.expect("submit");

        assert!(!repo.delete_draft(&created.id).await.expect("guarded delete"));
        let still_there = repo.find_by_id(&created.id).await.expect("find");
        assert!(still_there.is_some());
    }

    #[tokio::test]
    async fn find_by_id_returns_none_for_unknown_request() {
        let pool = setup().await;
        let repo = SqlChangeRequestRepository::new(pool);

        let missing = repo
            .find_by_id(&ChangeRequestId("does-not-exist".to_string()))
            .await
            .expect("lookup");
        assert!(missing.is_none());
    }
}
