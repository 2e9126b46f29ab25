use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    extract::{AppPath, AppQuery},
    images::{
        dto::{ImageDto, ImageQuery},
        repo_types::ImageCategory,
        services::{self, UploadItem, MAX_UPLOAD_BYTES},
    },
    pagination::{Page, Pagination},
    state::AppState,
};

// --- public router ---

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/images",
            get(list_images).merge(
                post(upload_image)
                    // room for the multipart envelope around a maximum-size file
                    .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 64 * 1024)),
            ),
        )
        .route("/images/:id", get(get_image).delete(delete_image))
}

// --- handlers ---

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("File size cannot exceed 10MB".into())
    } else {
        AppError::validation(e.body_text())
    }
}

/// POST /images (multipart)
/// Fields: `image` (file) and `category` (`model`, `garment` or `dress`).
#[instrument(skip(state, mp))]
pub async fn upload_image(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mp: Result<Multipart, MultipartRejection>,
) -> AppResult<(StatusCode, HeaderMap, Json<ImageDto>)> {
    let mut mp = mp?;
    let mut file: Option<UploadItem> = None;
    let mut category: Option<String> = None;

    while let Some(field) = mp.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("image") => {
                let content_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "application/octet-stream".into());
                let original_name = field
                    .file_name()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "upload".into());
                let body = field.bytes().await.map_err(multipart_error)?;
                file = Some(UploadItem {
                    body,
                    content_type,
                    original_name,
                });
            }
            Some("category") => {
                category = Some(field.text().await.map_err(multipart_error)?);
            }
            other => {
                warn!(field = ?other, "ignoring unknown multipart field");
            }
        }
    }

    let file = file.ok_or_else(|| AppError::validation("No file uploaded"))?;
    let category: ImageCategory = category
        .as_deref()
        .and_then(|c| c.parse().ok())
        .filter(|c: &ImageCategory| c.is_uploadable())
        .ok_or_else(|| {
            AppError::validation("Invalid category. Must be \"model\" or \"garment\"")
        })?;

    let dto = services::upload_image(&state, user_id, category, file).await?;

    let mut headers = HeaderMap::new();
    if let Ok(location) = format!("/api/v1/images/{}", dto.id).parse() {
        headers.insert(axum::http::header::LOCATION, location);
    }
    Ok((StatusCode::CREATED, headers, Json(dto)))
}

#[instrument(skip(state))]
pub async fn list_images(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    AppQuery(filter): AppQuery<ImageQuery>,
    AppQuery(p): AppQuery<Pagination>,
) -> AppResult<Json<Page<ImageDto>>> {
    services::list_images(&state, user_id, filter.category, p)
        .await
        .map(Json)
}

#[instrument(skip(state))]
pub async fn get_image(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<ImageDto>> {
    services::get_image(&state, user_id, id).await.map(Json)
}

#[instrument(skip(state))]
pub async fn delete_image(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<StatusCode> {
    services::delete_image(&state, user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
