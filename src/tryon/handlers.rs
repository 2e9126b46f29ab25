use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::AppResult,
    extract::{AppJson, AppPath, AppQuery},
    pagination::{Page, Pagination},
    state::AppState,
    tryon::{
        dto::{CreateSessionRequest, SessionDto, SessionQuery},
        services::{self, ResultFile},
    },
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/tryon", get(list_sessions).post(create_session))
        .route("/tryon/:session_id", get(get_session).delete(delete_session))
        .route("/tryon/:session_id/result", get(view_result))
        .route("/tryon/:session_id/download", get(download_result))
}

#[instrument(skip(state, payload))]
pub async fn create_session(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    AppJson(payload): AppJson<CreateSessionRequest>,
) -> AppResult<(StatusCode, HeaderMap, Json<SessionDto>)> {
    let dto = services::create_session(&state, user_id, payload).await?;

    let mut headers = HeaderMap::new();
    if let Ok(location) = format!("/api/v1/tryon/{}", dto.session_id).parse() {
        headers.insert(header::LOCATION, location);
    }
    Ok((StatusCode::CREATED, headers, Json(dto)))
}

#[instrument(skip(state))]
pub async fn list_sessions(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    AppQuery(filter): AppQuery<SessionQuery>,
    AppQuery(p): AppQuery<Pagination>,
) -> AppResult<Json<Page<SessionDto>>> {
    services::list_sessions(&state, user_id, filter.status, p)
        .await
        .map(Json)
}

/// GET /tryon/:session_id, polled by clients until the status is terminal.
#[instrument(skip(state))]
pub async fn get_session(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    AppPath(session_id): AppPath<Uuid>,
) -> AppResult<Json<SessionDto>> {
    services::get_session(&state, user_id, session_id)
        .await
        .map(Json)
}

#[instrument(skip(state))]
pub async fn delete_session(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    AppPath(session_id): AppPath<Uuid>,
) -> AppResult<StatusCode> {
    services::delete_session(&state, user_id, session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn view_result(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    AppPath(session_id): AppPath<Uuid>,
) -> AppResult<Response> {
    let file = services::result_file(&state, user_id, session_id).await?;
    Ok(file_response(file, false))
}

#[instrument(skip(state))]
pub async fn download_result(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    AppPath(session_id): AppPath<Uuid>,
) -> AppResult<Response> {
    let file = services::result_file(&state, user_id, session_id).await?;
    Ok(file_response(file, true))
}

fn file_response(file: ResultFile, attachment: bool) -> Response {
    let mut headers = HeaderMap::new();
    if let Ok(ct) = HeaderValue::from_str(&file.content_type) {
        headers.insert(header::CONTENT_TYPE, ct);
    }
    let disposition = if attachment {
        format!("attachment; filename=\"{}\"", file.download_name)
    } else {
        // result files never change once written
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("private, max-age=31536000, immutable"),
        );
        "inline".to_string()
    };
    if let Ok(v) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, v);
    }
    (headers, file.body).into_response()
}
