use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    Development,
    Production,
}

/// Where uploaded and generated image files live.
#[derive(Debug, Clone, Deserialize)]
pub enum StorageConfig {
    Local {
        dir: String,
    },
    S3 {
        endpoint: String,
        bucket: String,
        access_key: String,
        secret_key: String,
        region: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub env: AppEnv,
    pub host: String,
    pub port: u16,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
    pub gemini: GeminiConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so tests never touch the process env.
    pub fn from_lookup<F>(get: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| get(key).with_context(|| format!("{} must be set", key));
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());
        let parsed = |key: &str, default: i64| {
            get(key)
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(default)
        };

        let database_url = required("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: required("JWT_SECRET")?,
            issuer: or("JWT_ISSUER", "tryon"),
            audience: or("JWT_AUDIENCE", "tryon-users"),
            ttl_minutes: parsed("JWT_TTL_MINUTES", 60),
            refresh_ttl_minutes: parsed("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14),
        };

        let env = match or("APP_ENV", "production").to_lowercase().as_str() {
            "development" | "dev" => AppEnv::Development,
            "production" | "prod" => AppEnv::Production,
            other => anyhow::bail!("unknown APP_ENV {:?}", other),
        };

        let storage = match or("STORAGE_BACKEND", "local").to_lowercase().as_str() {
            "local" => StorageConfig::Local {
                dir: or("UPLOADS_DIR", "uploads"),
            },
            "s3" => StorageConfig::S3 {
                endpoint: required("S3_ENDPOINT")?,
                bucket: required("S3_BUCKET")?,
                access_key: required("S3_ACCESS_KEY")?,
                secret_key: required("S3_SECRET_KEY")?,
                region: or("S3_REGION", "us-east-1"),
            },
            other => anyhow::bail!("unknown STORAGE_BACKEND {:?}", other),
        };

        let gemini = GeminiConfig {
            api_key: get("GEMINI_API_KEY").filter(|k| !k.trim().is_empty()),
            model: or("GEMINI_MODEL", "gemini-2.0-flash-exp-image-generation"),
            base_url: or("GEMINI_BASE_URL", "https://generativelanguage.googleapis.com"),
            timeout_secs: parsed("GEMINI_TIMEOUT_SECS", 60).max(1) as u64,
        };

        let port = or("APP_PORT", "8080")
            .parse::<u16>()
            .context("APP_PORT must be a port number")?;

        Ok(Self {
            database_url,
            env,
            host: or("APP_HOST", "0.0.0.0"),
            port,
            jwt,
            storage,
            gemini,
        })
    }

    pub fn is_development(&self) -> bool {
        self.env == AppEnv::Development
    }
}
