//! Ambient configuration loaded once at process start, via plain
//! `std::env::var` calls wrapped in `anyhow::Context` for readable
//! startup failures.

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    pub provider_api_url: String,
    pub provider_api_key: Option<String>,
    pub chat_model: String,
    pub embedding_model: String,

    /// `tracing_subscriber::EnvFilter` directive string.
    pub log_filter: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,

            provider_api_url: std::env::var("PROVIDER_API_URL")
                .unwrap_or_else(|_| "http://localhost:8080/v1".to_string()),
            provider_api_key: std::env::var("PROVIDER_API_KEY").ok(),
            chat_model: std::env::var("CHAT_MODEL").unwrap_or_else(|_| "kimi-k2".to_string()),
            embedding_model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "nomic-embed-text".to_string()),

            log_filter: std::env::var("RUST_LOG").unwrap_or_else(|_| "weave_core=info".to_string()),
        })
    }
}
