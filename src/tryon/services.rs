use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Context;
use bytes::Bytes;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    ai::{GenerateError, ImageInput, TryOnGenerator},
    error::{AppError, AppResult},
    images::{
        dto::ImageDto,
        repo_types::{Image, ImageCategory},
        services::{ext_from_mime, sniff_image_type, store_image, to_dto},
    },
    pagination::{Page, Pagination},
    state::AppState,
    tryon::{
        dto::{CreateSessionRequest, SessionDto},
        repo_types::{NewSession, TryOnSession},
        status::SessionStatus,
    },
};

/// Stored on the session when processing fails for reasons the user cannot act on.
pub const SERVER_FAILURE_MESSAGE: &str = "Processing failed due to server error";

#[derive(Debug, Error)]
enum ProcessError {
    #[error(transparent)]
    Generate(#[from] GenerateError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ProcessError {
    fn user_message(&self) -> String {
        match self {
            ProcessError::Generate(e) => e.to_string(),
            ProcessError::Internal(_) => SERVER_FAILURE_MESSAGE.to_string(),
        }
    }
}

/// Result bytes of a completed session, ready to be sent.
pub struct ResultFile {
    pub body: Bytes,
    pub content_type: String,
    pub download_name: String,
}

#[instrument(skip(st, req))]
pub async fn create_session(
    st: &AppState,
    owner_id: Uuid,
    req: CreateSessionRequest,
) -> AppResult<SessionDto> {
    let generator = st
        .generator
        .clone()
        .ok_or_else(|| AppError::ServiceUnavailable("AI service is not configured".into()))?;

    let model = st
        .images
        .find_owned(req.model_image_id, owner_id)
        .await?
        .filter(|i| i.category == ImageCategory::Model)
        .ok_or_else(|| AppError::not_found("Model image not found"))?;
    let garment = st
        .images
        .find_owned(req.garment_image_id, owner_id)
        .await?
        .filter(|i| i.category == ImageCategory::Garment)
        .ok_or_else(|| AppError::not_found("Garment image not found"))?;

    let session = st
        .sessions
        .insert(NewSession {
            session_id: Uuid::new_v4(),
            owner_id,
            model_image_id: model.id,
            garment_image_id: garment.id,
        })
        .await?;
    info!(session_id = %session.session_id, generator = generator.name(), "session created");

    spawn_processing(st.clone(), generator, session.id);

    let images = HashMap::from([(model.id, model), (garment.id, garment)]);
    session_dto(st, session, &images).await
}

fn spawn_processing(st: AppState, generator: Arc<dyn TryOnGenerator>, id: Uuid) {
    tokio::spawn(async move {
        if let Err(e) = process_session(&st, generator.as_ref(), id).await {
            error!(error = ?e, %id, "session processing aborted");
        }
    });
}

/// Drives one session from pending to a terminal state. Returns the terminal status
/// reached, or `None` when the session was not pending anymore and nothing was done.
#[instrument(skip(st, generator))]
pub async fn process_session(
    st: &AppState,
    generator: &dyn TryOnGenerator,
    id: Uuid,
) -> anyhow::Result<Option<SessionStatus>> {
    if !st
        .sessions
        .mark_processing(id, OffsetDateTime::now_utc())
        .await?
    {
        debug!("session is not pending; skipping");
        return Ok(None);
    }
    let session = st
        .sessions
        .find_by_id(id)
        .await?
        .context("session vanished after entering processing")?;

    match generate_result(st, generator, &session).await {
        Ok(result) => {
            let completed = st
                .sessions
                .mark_completed(id, result.id, OffsetDateTime::now_utc())
                .await;
            match completed {
                Ok(true) => {
                    info!(
                        session_id = %session.session_id,
                        result_image_id = %result.id,
                        "session completed"
                    );
                    Ok(Some(SessionStatus::Completed))
                }
                Ok(false) => {
                    warn!(session_id = %session.session_id, "session left processing before completion");
                    discard_result(st, &result).await;
                    Ok(None)
                }
                Err(e) => {
                    discard_result(st, &result).await;
                    st.sessions
                        .mark_failed(id, SERVER_FAILURE_MESSAGE, OffsetDateTime::now_utc())
                        .await?;
                    Err(e)
                }
            }
        }
        Err(failure) => {
            match &failure {
                ProcessError::Generate(e) => {
                    warn!(session_id = %session.session_id, error = %e, "session failed")
                }
                ProcessError::Internal(e) => {
                    error!(session_id = %session.session_id, error = ?e, "session failed")
                }
            }
            st.sessions
                .mark_failed(id, &failure.user_message(), OffsetDateTime::now_utc())
                .await?;
            Ok(Some(SessionStatus::Failed))
        }
    }
}

async fn generate_result(
    st: &AppState,
    generator: &dyn TryOnGenerator,
    session: &TryOnSession,
) -> Result<Image, ProcessError> {
    let person = load_input(st, session.model_image_id).await?;
    let garment = load_input(st, session.garment_image_id).await?;

    let limit = Duration::from_secs(st.config.gemini.timeout_secs);
    let generated = tokio::time::timeout(limit, generator.generate(&person, &garment))
        .await
        .map_err(|_| GenerateError::Timeout(limit))??;

    let content_type = sniff_image_type(&generated.bytes)
        .map(str::to_string)
        .unwrap_or(generated.content_type);
    let image = store_image(
        st,
        session.owner_id,
        ImageCategory::Result,
        generated.bytes,
        &content_type,
        &format!("tryon_result_{}", session.session_id),
        &format!("{}-", session.session_id),
    )
    .await?;
    Ok(image)
}

async fn load_input(st: &AppState, image_id: Uuid) -> anyhow::Result<ImageInput> {
    let image = st
        .images
        .find_by_id(image_id)
        .await?
        .with_context(|| format!("source image {} missing", image_id))?;
    let bytes = st
        .storage
        .get_object(&image.storage_key)
        .await?
        .with_context(|| format!("source file {} missing", image.storage_key))?;
    Ok(ImageInput {
        bytes,
        content_type: image.content_type,
    })
}

async fn discard_result(st: &AppState, image: &Image) {
    if let Err(e) = st.images.delete(image.id).await {
        warn!(error = %e, image_id = %image.id, "failed to remove result row");
    }
    if let Err(e) = st.storage.delete_object(&image.storage_key).await {
        warn!(error = %e, key = %image.storage_key, "failed to remove result file");
    }
}

async fn image_dto(
    st: &AppState,
    images: &HashMap<Uuid, Image>,
    id: Option<Uuid>,
) -> AppResult<Option<ImageDto>> {
    match id.and_then(|id| images.get(&id)) {
        Some(image) => to_dto(st, image.clone()).await.map(Some),
        None => Ok(None),
    }
}

async fn session_dto(
    st: &AppState,
    s: TryOnSession,
    images: &HashMap<Uuid, Image>,
) -> AppResult<SessionDto> {
    let model_image = image_dto(st, images, Some(s.model_image_id)).await?;
    let garment_image = image_dto(st, images, Some(s.garment_image_id)).await?;
    let result_image = image_dto(st, images, s.result_image_id).await?;
    let processing_duration_ms = s.processing_duration_ms();

    Ok(SessionDto {
        session_id: s.session_id,
        status: s.status,
        model_image,
        garment_image,
        result_image_url: result_image.as_ref().map(|r| r.url.clone()),
        result_image,
        error_message: s.error_message,
        created_at: s.created_at,
        processing_started_at: s.processing_started_at,
        processing_completed_at: s.processing_completed_at,
        processing_duration_ms,
    })
}

async fn images_for(st: &AppState, sessions: &[TryOnSession]) -> AppResult<HashMap<Uuid, Image>> {
    let ids: Vec<Uuid> = sessions
        .iter()
        .flat_map(|s| [Some(s.model_image_id), Some(s.garment_image_id), s.result_image_id])
        .flatten()
        .collect();
    let images = st.images.find_many(&ids).await?;
    Ok(images.into_iter().map(|i| (i.id, i)).collect())
}

async fn find_session(st: &AppState, owner_id: Uuid, session_id: Uuid) -> AppResult<TryOnSession> {
    st.sessions
        .find_owned(session_id, owner_id)
        .await?
        .ok_or_else(|| AppError::not_found("Try-on session not found"))
}

pub async fn get_session(st: &AppState, owner_id: Uuid, session_id: Uuid) -> AppResult<SessionDto> {
    let session = find_session(st, owner_id, session_id).await?;
    let images = images_for(st, std::slice::from_ref(&session)).await?;
    session_dto(st, session, &images).await
}

pub async fn list_sessions(
    st: &AppState,
    owner_id: Uuid,
    status: Option<SessionStatus>,
    pagination: Pagination,
) -> AppResult<Page<SessionDto>> {
    let (limit, offset) = pagination.limit_offset();
    let sessions = st
        .sessions
        .list_by_owner(owner_id, status, limit, offset)
        .await?;
    let total = st.sessions.count_by_owner(owner_id, status).await?;
    let images = images_for(st, &sessions).await?;

    let mut items = Vec::with_capacity(sessions.len());
    for session in sessions {
        items.push(session_dto(st, session, &images).await?);
    }
    Ok(Page {
        items,
        pagination: pagination.info(total),
    })
}

/// Removes the session, then its result image file and row.
#[instrument(skip(st))]
pub async fn delete_session(st: &AppState, owner_id: Uuid, session_id: Uuid) -> AppResult<()> {
    let session = find_session(st, owner_id, session_id).await?;
    st.sessions.delete(session.id).await?;

    if let Some(result_id) = session.result_image_id {
        if let Some(image) = st.images.find_by_id(result_id).await? {
            if let Err(e) = st.storage.delete_object(&image.storage_key).await {
                warn!(error = %e, key = %image.storage_key, "failed to remove result file");
            }
            st.images.delete(image.id).await?;
        }
    }
    info!(%session_id, "session deleted");
    Ok(())
}

pub async fn result_file(st: &AppState, owner_id: Uuid, session_id: Uuid) -> AppResult<ResultFile> {
    let session = find_session(st, owner_id, session_id).await?;
    let result_id = match (session.status, session.result_image_id) {
        (SessionStatus::Completed, Some(id)) => id,
        _ => return Err(AppError::not_found("Result not available")),
    };

    let image = st
        .images
        .find_by_id(result_id)
        .await?
        .ok_or_else(|| AppError::not_found("Result image not found"))?;
    let body = st
        .storage
        .get_object(&image.storage_key)
        .await?
        .ok_or_else(|| AppError::not_found("Result image not found"))?;

    let ext = ext_from_mime(&image.content_type).unwrap_or("bin");
    Ok(ResultFile {
        body,
        download_name: format!("tryon_result_{}.{}", session.session_id, ext),
        content_type: image.content_type,
    })
}
