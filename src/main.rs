use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

mod ai;
mod app;
mod auth;
mod config;
mod error;
mod extract;
mod images;
mod pagination;
mod state;
mod storage;
#[cfg(test)]
mod testing;
mod tryon;

use crate::{config::AppConfig, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "tryon=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = Arc::new(AppConfig::from_env()?);

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("connect to database")?;
    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .context("run migrations")?;

    let storage = storage::from_config(&config.storage).await?;
    let generator = ai::from_config(&config)?;
    let state = AppState::init(db, config.clone(), storage, generator);

    let sweeper = tryon::sweeper::spawn(state.clone());

    let app = app::build_app(state);
    app::serve(app, &config).await?;

    sweeper.abort();
    Ok(())
}
