use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{
            AuthResponse, ImageCounts, LoginRequest, PublicUser, RegisterRequest, SessionCounts,
            UpdateProfileRequest, UserActivity, UserStats,
        },
        jwt::JwtKeys,
        password::{check_strength, hash_password, verify_password},
        repo::{DUPLICATE_PROFILE, DUPLICATE_USER},
        repo_types::{NewUser, ProfileUpdate, User},
    },
    error::{AppError, AppResult},
    images::{repo_types::ImageCategory, services::list_images},
    pagination::Pagination,
    state::AppState,
    tryon::{services::list_sessions, status::SessionStatus},
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn is_valid_username(username: &str) -> bool {
    lazy_static! {
        static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_]{3,20}$").unwrap();
    }
    USERNAME_RE.is_match(username)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn issue_tokens(keys: &JwtKeys, user: User) -> AppResult<AuthResponse> {
    let access_token = keys.sign_access(user.id)?;
    let refresh_token = keys.sign_refresh(user.id)?;
    Ok(AuthResponse {
        access_token,
        refresh_token,
        user: PublicUser::from(user),
    })
}

#[instrument(skip(st, req), fields(username = %req.username))]
pub async fn register(st: &AppState, req: RegisterRequest) -> AppResult<AuthResponse> {
    let email = normalize_email(&req.email);
    let username = req.username.trim().to_string();

    if !is_valid_username(&username) {
        warn!("invalid username");
        return Err(AppError::validation(
            "Username must be 3-20 characters of letters, numbers and underscores",
        ));
    }
    if !is_valid_email(&email) {
        warn!(%email, "invalid email");
        return Err(AppError::validation("Invalid email"));
    }
    check_strength(&req.password)?;

    if st.users.find_conflicting(&email, &username, None).await?.is_some() {
        warn!(%email, "email or username already registered");
        return Err(AppError::conflict(DUPLICATE_USER));
    }

    let password_hash = hash_password(&req.password)?;
    let user = st
        .users
        .create(NewUser {
            email,
            username,
            password_hash,
        })
        .await?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    issue_tokens(&JwtKeys::from(&st.config.jwt), user)
}

#[instrument(skip(st, req))]
pub async fn login(st: &AppState, req: LoginRequest) -> AppResult<AuthResponse> {
    let email = normalize_email(&req.email);
    if !is_valid_email(&email) {
        return Err(AppError::validation("Invalid email"));
    }

    let Some(user) = st.users.find_by_email(&email).await? else {
        warn!(%email, "login unknown email");
        return Err(AppError::unauthorized("Invalid email or password"));
    };

    if !verify_password(&req.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::unauthorized("Invalid email or password"));
    }

    if !user.is_active {
        warn!(user_id = %user.id, "login on deactivated account");
        return Err(AppError::unauthorized("Your account has been deactivated"));
    }

    info!(user_id = %user.id, "user logged in");
    issue_tokens(&JwtKeys::from(&st.config.jwt), user)
}

#[instrument(skip(st, refresh_token))]
pub async fn refresh(st: &AppState, refresh_token: &str) -> AppResult<AuthResponse> {
    let keys = JwtKeys::from(&st.config.jwt);
    let claims = keys
        .verify_refresh(refresh_token)
        .map_err(|e| AppError::unauthorized(e.to_string()))?;

    let user = st
        .users
        .find_by_id(claims.sub)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| AppError::unauthorized("User not found"))?;

    issue_tokens(&keys, user)
}

pub async fn profile(st: &AppState, user_id: Uuid) -> AppResult<PublicUser> {
    st.users
        .find_by_id(user_id)
        .await?
        .map(PublicUser::from)
        .ok_or_else(|| AppError::not_found("User not found"))
}

#[instrument(skip(st, req))]
pub async fn update_profile(
    st: &AppState,
    user_id: Uuid,
    req: UpdateProfileRequest,
) -> AppResult<PublicUser> {
    let current = st
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    let username = req.username.map(|u| u.trim().to_string());
    let email = req.email.as_deref().map(normalize_email);

    if let Some(u) = &username {
        if !is_valid_username(u) {
            return Err(AppError::validation(
                "Username must be 3-20 characters of letters, numbers and underscores",
            ));
        }
    }
    if let Some(e) = &email {
        if !is_valid_email(e) {
            return Err(AppError::validation("Invalid email"));
        }
    }

    let check_email = email.as_deref().unwrap_or(&current.email);
    let check_username = username.as_deref().unwrap_or(&current.username);
    if st
        .users
        .find_conflicting(check_email, check_username, Some(user_id))
        .await?
        .is_some()
    {
        return Err(AppError::conflict(DUPLICATE_PROFILE));
    }

    let updated = st
        .users
        .update_profile(user_id, ProfileUpdate { email, username })
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    info!(user_id = %user_id, "profile updated");
    Ok(PublicUser::from(updated))
}

pub async fn stats(st: &AppState, user_id: Uuid) -> AppResult<UserStats> {
    let mut images = ImageCounts::default();
    for category in ImageCategory::ALL {
        let n = st.images.count_by_owner(user_id, Some(category)).await?;
        match category {
            ImageCategory::Model => images.model = n,
            ImageCategory::Garment => images.garment = n,
            ImageCategory::Result => images.result = n,
        }
        images.total += n;
    }

    let mut sessions = SessionCounts::default();
    for status in SessionStatus::ALL {
        let n = st.sessions.count_by_owner(user_id, Some(status)).await?;
        match status {
            SessionStatus::Pending => sessions.pending = n,
            SessionStatus::Processing => sessions.processing = n,
            SessionStatus::Completed => sessions.completed = n,
            SessionStatus::Failed => sessions.failed = n,
        }
        sessions.total += n;
    }

    Ok(UserStats { images, sessions })
}

/// First page of the user's images and sessions; `limit` is clamped like any page size.
#[instrument(skip(st))]
pub async fn activity(st: &AppState, user_id: Uuid, limit: i64) -> AppResult<UserActivity> {
    let recent = Pagination { page: 1, limit };
    let recent_images = list_images(st, user_id, None, recent).await?.items;
    let recent_sessions = list_sessions(st, user_id, None, recent).await?.items;
    Ok(UserActivity {
        recent_images,
        recent_sessions,
    })
}
