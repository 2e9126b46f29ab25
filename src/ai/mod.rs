//! Boundary to the external generative image model.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::AppConfig;

mod gemini;
mod mock;

pub use gemini::GeminiGenerator;
pub use mock::MockGenerator;

/// Prompt sent with every try-on request.
pub const TRY_ON_PROMPT: &str = "Create a photorealistic image of the person in the first image \
wearing the garment from the second image. The garment should fit naturally on the person's \
body, maintaining their pose and body proportions. Ensure the lighting and shadows match the \
original person image. The result should look like a real photograph, not a digital composite.";

#[derive(Debug, Clone)]
pub struct ImageInput {
    pub bytes: Bytes,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Bytes,
    pub content_type: String,
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("AI request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("AI service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("AI response contained no image")]
    NoImage,

    #[error("AI response could not be decoded: {0}")]
    InvalidPayload(String),

    #[error("AI processing timeout ({}s)", .0.as_secs())]
    Timeout(Duration),
}

/// Composites a garment onto a person photo.
#[async_trait::async_trait]
pub trait TryOnGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        person: &ImageInput,
        garment: &ImageInput,
    ) -> Result<GeneratedImage, GenerateError>;
}

/// Picks the adapter for this deployment: Gemini when an API key is configured, the mock
/// in development, nothing otherwise.
pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Option<Arc<dyn TryOnGenerator>>> {
    if let Some(api_key) = &cfg.gemini.api_key {
        let gen = GeminiGenerator::new(
            &cfg.gemini.base_url,
            &cfg.gemini.model,
            api_key,
            Duration::from_secs(cfg.gemini.timeout_secs),
        )?;
        info!(model = %cfg.gemini.model, "gemini adapter configured");
        return Ok(Some(Arc::new(gen)));
    }

    if cfg.is_development() {
        warn!("no GEMINI_API_KEY in development; using mock try-on generator");
        return Ok(Some(Arc::new(MockGenerator::default())));
    }

    warn!("no GEMINI_API_KEY; try-on sessions will be refused");
    Ok(None)
}
