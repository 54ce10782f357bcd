//! Configuration management with environment variable support and validation.

use anyhow::{anyhow, Result};
use config::{Config, Environment};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    pub max_request_size_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            enable_cors: true,
            max_request_size_mb: 5,
        }
    }
}

/// Main settings structure. Flat option names match the environment
/// variables they are overridden by (STORE_URL, LLM_MODEL, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,

    pub llm_api_key: String,
    pub search_api_key: String,

    /// Remote task store endpoint; empty string means fallback-only.
    pub store_url: String,
    pub store_ttl_seconds: u64,

    pub max_concurrent_generations: usize,
    pub max_concurrent_verifications: usize,

    /// 0 means unbounded.
    pub generation_timeout_seconds: u64,
    pub verification_timeout_seconds: u64,

    pub meta_recursion_limit: u32,
    pub team_recursion_limit: u32,
    pub max_tool_rounds: u32,

    pub llm_model: String,
    pub llm_temperature: f32,
    pub llm_timeout_seconds: u64,
    pub llm_base_url: String,
    pub search_base_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            llm_api_key: String::new(),
            search_api_key: String::new(),
            store_url: "redis://localhost:6379".to_string(),
            store_ttl_seconds: 7200,
            max_concurrent_generations: 3,
            max_concurrent_verifications: 5,
            generation_timeout_seconds: 0,
            verification_timeout_seconds: 120,
            meta_recursion_limit: 50,
            team_recursion_limit: 25,
            max_tool_rounds: 8,
            llm_model: "gpt-4o-mini".to_string(),
            llm_temperature: 0.7,
            llm_timeout_seconds: 60,
            llm_base_url: "https://api.openai.com/v1".to_string(),
            search_base_url: "https://api.tavily.com".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from the embedded defaults, an optional local config
    /// file, and environment variables.
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::with_name("config").required(false))
            .add_source(Environment::default().separator("__").try_parsing(true))
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;

        Self::apply_env_overrides(&mut settings)?;
        settings.validate()?;

        Ok(settings)
    }

    /// Explicit overrides for the options that must win regardless of how
    /// the layered sources resolved.
    fn apply_env_overrides(settings: &mut Settings) -> Result<()> {
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            settings.llm_api_key = key;
        }
        if let Ok(key) = std::env::var("SEARCH_API_KEY") {
            settings.search_api_key = key;
        }
        if let Ok(url) = std::env::var("STORE_URL") {
            settings.store_url = url;
        }
        if let Ok(host) = std::env::var("SERVER__HOST") {
            settings.server.host = host;
        }
        if let Ok(port) = std::env::var("SERVER__PORT") {
            settings.server.port = port.parse()?;
        }
        Ok(())
    }

    /// Validate settings for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }
        if self.max_concurrent_generations == 0 {
            return Err(anyhow!("MAX_CONCURRENT_GENERATIONS cannot be 0"));
        }
        if self.max_concurrent_verifications == 0 {
            return Err(anyhow!("MAX_CONCURRENT_VERIFICATIONS cannot be 0"));
        }
        if self.max_tool_rounds == 0 {
            return Err(anyhow!("MAX_TOOL_ROUNDS cannot be 0"));
        }
        if self.team_recursion_limit == 0 || self.meta_recursion_limit == 0 {
            return Err(anyhow!("Recursion limits cannot be 0"));
        }
        if self.store_url.is_empty() {
            warn!("STORE_URL is empty; task persistence will be in-process only");
        }
        if self.llm_api_key.is_empty() {
            warn!("LLM_API_KEY is not configured");
        }
        if self.search_api_key.is_empty() {
            warn!("SEARCH_API_KEY is not configured");
        }
        Ok(())
    }

    pub fn store_ttl(&self) -> Duration {
        Duration::from_secs(self.store_ttl_seconds)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_seconds)
    }

    /// Whole-job deadline for a generation run; None means unbounded.
    pub fn generation_timeout(&self) -> Option<Duration> {
        (self.generation_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.generation_timeout_seconds))
    }

    pub fn verification_timeout(&self) -> Duration {
        Duration::from_secs(self.verification_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.max_concurrent_generations, 3);
        assert_eq!(settings.max_concurrent_verifications, 5);
        assert_eq!(settings.store_ttl_seconds, 7200);
        assert_eq!(settings.generation_timeout(), None);
        assert_eq!(settings.verification_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn zero_permits_rejected() {
        let settings = Settings {
            max_concurrent_generations: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
