use async_trait::async_trait;
use sqlx::Row;

use changeflow_core::domain::change_request::ChangeRequestId;
use changeflow_core::domain::impact::{Impact, ImpactArea, ImpactId, Severity};

use super::{decode_timestamp, ImpactRepository, RepositoryError};
use crate::DbPool;

pub struct SqlImpactRepository {
    pool: DbPool,
}

impl SqlImpactRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_impact(row: &sqlx::sqlite::SqliteRow) -> Result<Impact, RepositoryError> {
    let get = |name: &str| -> Result<String, RepositoryError> {
        row.try_get::<String, _>(name).map_err(|e| RepositoryError::Decode(e.to_string()))
    };

    let area_raw = get("impact_area")?;
    let severity_raw = get("severity")?;

    Ok(Impact {
        id: ImpactId(get("id")?),
        change_request_id: ChangeRequestId(get("change_request_id")?),
        impact_area: ImpactArea::parse(&area_raw)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown impact area `{area_raw}`")))?,
        description: get("description")?,
        severity: Severity::parse(&severity_raw)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown severity `{severity_raw}`")))?,
        created_at: decode_timestamp(&get("created_at")?)?,
    })
}

#[async_trait]
impl ImpactRepository for SqlImpactRepository {
    async fn append(&self, impact: Impact) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO impact (id, change_request_id, impact_area, description, severity,
                 created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&impact.id.0)
        .bind(&impact.change_request_id.0)
        .bind(impact.impact_area.as_str())
        .bind(&impact.description)
        .bind(impact.severity.as_str())
        .bind(impact.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_request(&self, id: &ChangeRequestId) -> Result<Vec<Impact>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, change_request_id, impact_area, description, severity, created_at
             FROM impact WHERE change_request_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_impact).collect()
    }
}

#[cfg(test)]
mod tests {
    use changeflow_core::domain::change_request::{
        Category, ChangeRequestId, ImpactLevel, Priority, ProjectId,
    };
    use changeflow_core::domain::impact::{Impact, ImpactArea, ImpactId, Severity};
    use changeflow_core::workflow::NewChangeRequest;
    use chrono::Utc;
    use uuid::Uuid;

    use super::SqlImpactRepository;
    use crate::repositories::change_request::{CreateChangeRequest, SqlChangeRequestRepository};
    use crate::repositories::{ChangeRequestRepository, ImpactRepository};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    async fn parent_request(pool: &sqlx::SqlitePool) -> ChangeRequestId {
        let repo = SqlChangeRequestRepository::new(pool.clone());
        let created = repo
            .create(CreateChangeRequest {
                project_id: ProjectId("proj-a".to_string()),
                input: NewChangeRequest {
                    title: "Parent request".to_string(),
                    description: "Holds impacts".to_string(),
                    category: Category::Technical,
                    priority: Priority::Medium,
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
            .expect("create parent");
        created.id
    }

    fn impact(request_id: &ChangeRequestId, area: ImpactArea, description: &str) -> Impact {
        Impact {
            id: ImpactId(Uuid::new_v4().to_string()),
            change_request_id: request_id.clone(),
            impact_area: area,
            description: description.to_string(),
            severity: Severity::Medium,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn append_and_list_round_trip() {
        let pool = setup().await;
        let request_id = parent_request(&pool).await;
        let repo = SqlImpactRepository::new(pool);

        repo.append(impact(&request_id, ImpactArea::Schedule, "Two week slip"))
            .await
            .expect("append first");
        repo.append(impact(&request_id, ImpactArea::Budget, "Extra licence cost"))
            .await
            .expect("append second");

        let impacts = repo.list_for_request(&request_id).await.expect("list");
        assert_eq!(impacts.len(), 2);
        assert_eq!(impacts[0].description, "Two week slip");
    }

    #[tokio::test]
    async fn deleting_the_draft_cascades_to_impacts() {
        let pool = setup().await;
        let request_id = parent_request(&pool).await;
        let repo = SqlImpactRepository::new(pool.clone());

        repo.append(impact(&request_id, ImpactArea::Scope, "New module")).await.expect("append");

        let requests = SqlChangeRequestRepository::new(pool);
        assert!(requests.delete_draft(&request_id).await.expect("delete"));

        let impacts = repo.list_for_request(&request_id).await.expect("list");
        assert!(impacts.is_empty());
    }
}
