use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{images::dto::ImageDto, tryon::status::SessionStatus};

/// Request body for starting a try-on.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub model_image_id: Uuid,
    #[serde(alias = "dressImageId")]
    pub garment_image_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub status: Option<SessionStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDto {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub model_image: Option<ImageDto>,
    pub garment_image: Option<ImageDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_image: Option<ImageDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub processing_started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub processing_completed_at: Option<OffsetDateTime>,
    pub processing_duration_ms: Option<i64>,
}
