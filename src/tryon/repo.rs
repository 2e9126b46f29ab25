use anyhow::Context;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    error::map_constraint,
    tryon::{
        repo_types::{NewSession, SessionRow, TryOnSession},
        status::SessionStatus,
    },
};

pub const SOURCE_IMAGE_GONE: &str = "Model or garment image was deleted";

const SESSION_COLUMNS: &str = "id, session_id, owner_id, model_image_id, garment_image_id, \
                               result_image_id, status, error_message, created_at, \
                               processing_started_at, processing_completed_at";

/// Persistence for try-on sessions. The `mark_*` methods are conditional on the
/// current status and report whether the transition was applied.
#[async_trait::async_trait]
pub trait SessionRepo: Send + Sync {
    async fn insert(&self, new: NewSession) -> anyhow::Result<TryOnSession>;
    /// pending -> processing
    async fn mark_processing(&self, id: Uuid, at: OffsetDateTime) -> anyhow::Result<bool>;
    /// processing -> completed
    async fn mark_completed(
        &self,
        id: Uuid,
        result_image_id: Uuid,
        at: OffsetDateTime,
    ) -> anyhow::Result<bool>;
    /// processing -> failed
    async fn mark_failed(&self, id: Uuid, message: &str, at: OffsetDateTime)
        -> anyhow::Result<bool>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<TryOnSession>>;
    /// Looks up by public `session_id`, scoped to the owner.
    async fn find_owned(
        &self,
        session_id: Uuid,
        owner_id: Uuid,
    ) -> anyhow::Result<Option<TryOnSession>>;
    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        status: Option<SessionStatus>,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<TryOnSession>>;
    async fn count_by_owner(
        &self,
        owner_id: Uuid,
        status: Option<SessionStatus>,
    ) -> anyhow::Result<i64>;
    async fn list_created_before(&self, cutoff: OffsetDateTime)
        -> anyhow::Result<Vec<TryOnSession>>;
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
    /// Whether any session points at the image as model, garment or result.
    async fn references_image(&self, image_id: Uuid) -> anyhow::Result<bool>;
}

pub struct PgSessionRepo {
    db: PgPool,
}

impl PgSessionRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn into_sessions(rows: Vec<SessionRow>) -> anyhow::Result<Vec<TryOnSession>> {
    rows.into_iter().map(TryOnSession::try_from).collect()
}

#[async_trait::async_trait]
impl SessionRepo for PgSessionRepo {
    async fn insert(&self, new: NewSession) -> anyhow::Result<TryOnSession> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            INSERT INTO tryon_sessions (session_id, owner_id, model_image_id, garment_image_id, status)
            VALUES ($1, $2, $3, $4, 'pending')
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(new.session_id)
        .bind(new.owner_id)
        .bind(new.model_image_id)
        .bind(new.garment_image_id)
        .fetch_one(&self.db)
        .await
        .map_err(|e| map_constraint(e, SOURCE_IMAGE_GONE, "insert session"))?;
        TryOnSession::try_from(row)
    }

    async fn mark_processing(&self, id: Uuid, at: OffsetDateTime) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE tryon_sessions
               SET status = 'processing', processing_started_at = $2
             WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.db)
        .await
        .context("mark session processing")?;
        Ok(res.rows_affected() == 1)
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        result_image_id: Uuid,
        at: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE tryon_sessions
               SET status = 'completed', result_image_id = $2, processing_completed_at = $3
             WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(result_image_id)
        .bind(at)
        .execute(&self.db)
        .await
        .context("mark session completed")?;
        Ok(res.rows_affected() == 1)
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        message: &str,
        at: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE tryon_sessions
               SET status = 'failed', error_message = $2, processing_completed_at = $3
             WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(message)
        .bind(at)
        .execute(&self.db)
        .await
        .context("mark session failed")?;
        Ok(res.rows_affected() == 1)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<TryOnSession>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM tryon_sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find session")?;
        row.map(TryOnSession::try_from).transpose()
    }

    async fn find_owned(
        &self,
        session_id: Uuid,
        owner_id: Uuid,
    ) -> anyhow::Result<Option<TryOnSession>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM tryon_sessions WHERE session_id = $1 AND owner_id = $2"
        ))
        .bind(session_id)
        .bind(owner_id)
        .fetch_optional(&self.db)
        .await
        .context("find owned session")?;
        row.map(TryOnSession::try_from).transpose()
    }

    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        status: Option<SessionStatus>,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<TryOnSession>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
              FROM tryon_sessions
             WHERE owner_id = $1
               AND ($2::text IS NULL OR status = $2)
             ORDER BY created_at DESC
             LIMIT $3 OFFSET $4
            "#
        ))
        .bind(owner_id)
        .bind(status.map(SessionStatus::as_str))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await
        .context("list sessions")?;
        into_sessions(rows)
    }

    async fn count_by_owner(
        &self,
        owner_id: Uuid,
        status: Option<SessionStatus>,
    ) -> anyhow::Result<i64> {
        let (n,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
              FROM tryon_sessions
             WHERE owner_id = $1
               AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(owner_id)
        .bind(status.map(SessionStatus::as_str))
        .fetch_one(&self.db)
        .await
        .context("count sessions")?;
        Ok(n)
    }

    async fn list_created_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> anyhow::Result<Vec<TryOnSession>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM tryon_sessions WHERE created_at < $1 ORDER BY created_at"
        ))
        .bind(cutoff)
        .fetch_all(&self.db)
        .await
        .context("list expired sessions")?;
        into_sessions(rows)
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM tryon_sessions WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete session")?;
        Ok(res.rows_affected() > 0)
    }

    async fn references_image(&self, image_id: Uuid) -> anyhow::Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM tryon_sessions
                 WHERE model_image_id = $1 OR garment_image_id = $1 OR result_image_id = $1
            )
            "#,
        )
        .bind(image_id)
        .fetch_one(&self.db)
        .await
        .context("check image references")?;
        Ok(exists)
    }
}
