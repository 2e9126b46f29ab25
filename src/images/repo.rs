use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::map_constraint,
    images::repo_types::{Image, ImageCategory, ImageRow, NewImage},
};

pub const IMAGE_IN_USE: &str = "Image is used by a try-on session; delete the session first";

const IMAGE_COLUMNS: &str = "id, owner_id, filename, original_name, storage_key, content_type, \
                             size_bytes, category, created_at";

#[async_trait::async_trait]
pub trait ImageRepo: Send + Sync {
    async fn insert(&self, new: NewImage) -> anyhow::Result<Image>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Image>>;
    /// Image `id` only if it belongs to `owner_id`.
    async fn find_owned(&self, id: Uuid, owner_id: Uuid) -> anyhow::Result<Option<Image>>;
    async fn find_many(&self, ids: &[Uuid]) -> anyhow::Result<Vec<Image>>;
    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        category: Option<ImageCategory>,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Image>>;
    async fn count_by_owner(
        &self,
        owner_id: Uuid,
        category: Option<ImageCategory>,
    ) -> anyhow::Result<i64>;
    /// Returns whether a row was deleted.
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
}

pub struct PgImageRepo {
    db: PgPool,
}

impl PgImageRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn into_images(rows: Vec<ImageRow>) -> anyhow::Result<Vec<Image>> {
    rows.into_iter().map(Image::try_from).collect()
}

#[async_trait::async_trait]
impl ImageRepo for PgImageRepo {
    async fn insert(&self, new: NewImage) -> anyhow::Result<Image> {
        let row = sqlx::query_as::<_, ImageRow>(&format!(
            r#"
            INSERT INTO images (id, owner_id, filename, original_name, storage_key,
                                content_type, size_bytes, category)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {IMAGE_COLUMNS}
            "#
        ))
        .bind(new.id)
        .bind(new.owner_id)
        .bind(&new.filename)
        .bind(&new.original_name)
        .bind(&new.storage_key)
        .bind(&new.content_type)
        .bind(new.size_bytes)
        .bind(new.category.as_str())
        .fetch_one(&self.db)
        .await
        .context("insert image")?;
        Image::try_from(row)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Image>> {
        let row = sqlx::query_as::<_, ImageRow>(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find image")?;
        row.map(Image::try_from).transpose()
    }

    async fn find_owned(&self, id: Uuid, owner_id: Uuid) -> anyhow::Result<Option<Image>> {
        let row = sqlx::query_as::<_, ImageRow>(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images WHERE id = $1 AND owner_id = $2"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.db)
        .await
        .context("find owned image")?;
        row.map(Image::try_from).transpose()
    }

    async fn find_many(&self, ids: &[Uuid]) -> anyhow::Result<Vec<Image>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, ImageRow>(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.db)
        .await
        .context("find images")?;
        into_images(rows)
    }

    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        category: Option<ImageCategory>,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Image>> {
        let rows = sqlx::query_as::<_, ImageRow>(&format!(
            r#"
            SELECT {IMAGE_COLUMNS}
              FROM images
             WHERE owner_id = $1
               AND ($2::text IS NULL OR category = $2)
             ORDER BY created_at DESC
             LIMIT $3 OFFSET $4
            "#
        ))
        .bind(owner_id)
        .bind(category.map(ImageCategory::as_str))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await
        .context("list images")?;
        into_images(rows)
    }

    async fn count_by_owner(
        &self,
        owner_id: Uuid,
        category: Option<ImageCategory>,
    ) -> anyhow::Result<i64> {
        let (n,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
              FROM images
             WHERE owner_id = $1
               AND ($2::text IS NULL OR category = $2)
            "#,
        )
        .bind(owner_id)
        .bind(category.map(ImageCategory::as_str))
        .fetch_one(&self.db)
        .await
        .context("count images")?;
        Ok(n)
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM images WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(|e| map_constraint(e, IMAGE_IN_USE, "delete image"))?;
        Ok(res.rows_affected() > 0)
    }
}
