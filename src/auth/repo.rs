use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    auth::repo_types::{NewUser, ProfileUpdate, User, UserRow},
    error::map_constraint,
};

pub const DUPLICATE_USER: &str = "User with this email or username already exists";
pub const DUPLICATE_PROFILE: &str = "Username or email already exists";

const USER_COLUMNS: &str =
    "id, email, username, password_hash, role, is_active, created_at, updated_at";

#[async_trait::async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    /// Any user other than `exclude` that already owns `email` or `username`.
    async fn find_conflicting(
        &self,
        email: &str,
        username: &str,
        exclude: Option<Uuid>,
    ) -> anyhow::Result<Option<User>>;
    async fn create(&self, new: NewUser) -> anyhow::Result<User>;
    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> anyhow::Result<Option<User>>;
}

pub struct PgUserRepo {
    db: PgPool,
}

impl PgUserRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl UserRepo for PgUserRepo {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        row.map(User::try_from).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        row.map(User::try_from).transpose()
    }

    async fn find_conflicting(
        &self,
        email: &str,
        username: &str,
        exclude: Option<Uuid>,
    ) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {USER_COLUMNS}
              FROM users
             WHERE (email = $1 OR lower(username) = lower($2))
               AND ($3::uuid IS NULL OR id <> $3)
             LIMIT 1
            "#
        ))
        .bind(email)
        .bind(username)
        .bind(exclude)
        .fetch_optional(&self.db)
        .await
        .context("find conflicting user")?;
        row.map(User::try_from).transpose()
    }

    async fn create(&self, new: NewUser) -> anyhow::Result<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (email, username, password_hash)
            VALUES ($1, $2, $3)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&new.email)
        .bind(&new.username)
        .bind(&new.password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(|e| map_constraint(e, DUPLICATE_USER, "insert user"))?;
        User::try_from(row)
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
               SET email = COALESCE($2, email),
                   username = COALESCE($3, username),
                   updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(update.email)
        .bind(update.username)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| map_constraint(e, DUPLICATE_PROFILE, "update user profile"))?;
        row.map(User::try_from).transpose()
    }
}
