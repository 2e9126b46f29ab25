use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageCategory {
    Model,
    #[serde(alias = "dress")]
    Garment,
    Result,
}

impl ImageCategory {
    pub const ALL: [ImageCategory; 3] = [
        ImageCategory::Model,
        ImageCategory::Garment,
        ImageCategory::Result,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ImageCategory::Model => "model",
            ImageCategory::Garment => "garment",
            ImageCategory::Result => "result",
        }
    }

    /// Result images are only ever produced by the try-on pipeline.
    pub fn is_uploadable(self) -> bool {
        !matches!(self, ImageCategory::Result)
    }
}

impl fmt::Display for ImageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "model" => Ok(ImageCategory::Model),
            "garment" | "dress" => Ok(ImageCategory::Garment),
            "result" => Ok(ImageCategory::Result),
            other => anyhow::bail!("unknown image category {:?}", other),
        }
    }
}

/// Raw `images` row.
#[derive(Debug, Clone, FromRow)]
pub struct ImageRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub filename: String,
    pub original_name: String,
    pub storage_key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub category: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct Image {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub filename: String,
    pub original_name: String,
    pub storage_key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub category: ImageCategory,
    pub created_at: OffsetDateTime,
}

impl TryFrom<ImageRow> for Image {
    type Error = anyhow::Error;

    fn try_from(r: ImageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            owner_id: r.owner_id,
            filename: r.filename,
            original_name: r.original_name,
            storage_key: r.storage_key,
            content_type: r.content_type,
            size_bytes: r.size_bytes,
            category: r.category.parse()?,
            created_at: r.created_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewImage {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub filename: String,
    pub original_name: String,
    pub storage_key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub category: ImageCategory,
}
