use async_trait::async_trait;
use sqlx::Row;

use changeflow_core::domain::change_request::ChangeRequestId;
use changeflow_core::domain::comment::{Comment, CommentId};

use super::{decode_timestamp, CommentRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCommentRepository {
    pool: DbPool,
}

impl SqlCommentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_comment(row: &sqlx::sqlite::SqliteRow) -> Result<Comment, RepositoryError> {
    let get = |name: &str| -> Result<String, RepositoryError> {
        row.try_get::<String, _>(name).map_err(|e| RepositoryError::Decode(e.to_string()))
    };

    Ok(Comment {
        id: CommentId(get("id")?),
        change_request_id: ChangeRequestId(get("change_request_id")?),
        author_id: get("author_id")?,
        author_name: get("author_name")?,
        content: get("content")?,
        created_at: decode_timestamp(&get("created_at")?)?,
    })
}

#[async_trait]
impl CommentRepository for SqlCommentRepository {
    async fn append(&self, comment: Comment) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO comment (id, change_request_id, author_id, author_name, content,
                 created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&comment.id.0)
        .bind(&comment.change_request_id.0)
        .bind(&comment.author_id)
        .bind(&comment.author_name)
        .bind(&comment.content)
        .bind(comment.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_request(
        &self,
        id: &ChangeRequestId,
    ) -> Result<Vec<Comment>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, change_request_id, author_id, author_name, content, created_at
             FROM comment WHERE change_request_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_comment).collect()
    }
}
