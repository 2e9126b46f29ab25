use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::tryon::status::SessionStatus;

/// Raw `tryon_sessions` row.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub owner_id: Uuid,
    pub model_image_id: Uuid,
    pub garment_image_id: Uuid,
    pub result_image_id: Option<Uuid>,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: OffsetDateTime,
    pub processing_started_at: Option<OffsetDateTime>,
    pub processing_completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
pub struct TryOnSession {
    pub id: Uuid,
    /// Public identifier handed to clients.
    pub session_id: Uuid,
    pub owner_id: Uuid,
    pub model_image_id: Uuid,
    pub garment_image_id: Uuid,
    pub result_image_id: Option<Uuid>,
    pub status: SessionStatus,
    pub error_message: Option<String>,
    pub created_at: OffsetDateTime,
    pub processing_started_at: Option<OffsetDateTime>,
    pub processing_completed_at: Option<OffsetDateTime>,
}

impl TryOnSession {
    pub fn processing_duration_ms(&self) -> Option<i64> {
        let started = self.processing_started_at?;
        let finished = self.processing_completed_at?;
        Some((finished - started).whole_milliseconds() as i64)
    }
}

impl TryFrom<SessionRow> for TryOnSession {
    type Error = anyhow::Error;

    fn try_from(r: SessionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            session_id: r.session_id,
            owner_id: r.owner_id,
            model_image_id: r.model_image_id,
            garment_image_id: r.garment_image_id,
            result_image_id: r.result_image_id,
            status: r.status.parse()?,
            error_message: r.error_message,
            created_at: r.created_at,
            processing_started_at: r.processing_started_at,
            processing_completed_at: r.processing_completed_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_id: Uuid,
    pub owner_id: Uuid,
    pub model_image_id: Uuid,
    pub garment_image_id: Uuid,
}
