use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};

use crate::generator::{DEFAULT_MODEL_NAME, HttpQuestionGenerator};
use crate::handlers::{generate_questions_handler, health_check};
use crate::storage::{AppState, TempFileStore, upload_files_handler};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub scratch_dir: PathBuf,
    pub generator_url: String,
    pub default_model: String,
    pub max_upload_mb: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            scratch_dir: std::env::var("SCRATCH_DIR")
                .unwrap_or_else(|_| "temp".to_string())
                .into(),
            generator_url: std::env::var("GENERATOR_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8000".to_string()),
            default_model: std::env::var("DEFAULT_MODEL")
                .unwrap_or_else(|_| DEFAULT_MODEL_NAME.to_string()),
            max_upload_mb: std::env::var("MAX_UPLOAD_MB")
                .unwrap_or_else(|_| "25".to_string())
                .parse()?,
        })
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

pub async fn app_init() -> Result<(Config, Arc<AppState>), Box<dyn Error>> {
    let config = Config::from_env()?;
    log::info!("✅ Configuration loaded");

    let store = Arc::new(TempFileStore::new(&config.scratch_dir));
    tokio::fs::create_dir_all(store.root()).await?;
    log::info!("✅ Scratch directory ready: {}", store.root().display());

    let generator = Arc::new(HttpQuestionGenerator::new(&config.generator_url));

    let state = Arc::new(AppState {
        store,
        generator,
        default_model: config.default_model.clone(),
    });
    Ok((config, state))
}

// ============================================================================
// Router
// ============================================================================

pub fn create_app_router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route(
            "/api/generate",
            get(generate_questions_handler).post(upload_files_handler),
        )
        .route("/health", get(health_check))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_upload_mb: usize) -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 3000,
            scratch_dir: "temp".into(),
            generator_url: "http://127.0.0.1:8000".to_string(),
            default_model: DEFAULT_MODEL_NAME.to_string(),
            max_upload_mb,
        }
    }

    #[test]
    fn test_max_upload_bytes() {
        assert_eq!(config(25).max_upload_bytes(), 25 * 1024 * 1024);
    }

    #[test]
    fn test_huge_upload_limit_saturates() {
        assert_eq!(config(usize::MAX).max_upload_bytes(), usize::MAX);
    }
}
