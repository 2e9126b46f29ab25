use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    ai::TryOnGenerator,
    auth::repo::{PgUserRepo, UserRepo},
    config::AppConfig,
    images::repo::{ImageRepo, PgImageRepo},
    storage::StorageClient,
    tryon::repo::{PgSessionRepo, SessionRepo},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserRepo>,
    pub images: Arc<dyn ImageRepo>,
    pub sessions: Arc<dyn SessionRepo>,
    pub storage: Arc<dyn StorageClient>,
    /// `None` when no AI backend is configured; session creation is refused then.
    pub generator: Option<Arc<dyn TryOnGenerator>>,
}

impl AppState {
    /// Postgres-backed state.
    pub fn init(
        db: PgPool,
        config: Arc<AppConfig>,
        storage: Arc<dyn StorageClient>,
        generator: Option<Arc<dyn TryOnGenerator>>,
    ) -> Self {
        Self {
            config,
            users: Arc::new(PgUserRepo::new(db.clone())),
            images: Arc::new(PgImageRepo::new(db.clone())),
            sessions: Arc::new(PgSessionRepo::new(db)),
            storage,
            generator,
        }
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserRepo>,
        images: Arc<dyn ImageRepo>,
        sessions: Arc<dyn SessionRepo>,
        storage: Arc<dyn StorageClient>,
        generator: Option<Arc<dyn TryOnGenerator>>,
    ) -> Self {
        Self {
            config,
            users,
            images,
            sessions,
            storage,
            generator,
        }
    }
}
