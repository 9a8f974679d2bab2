//! Application Configuration Module
//!
//! Loads the tutor service settings from environment variables (and a `.env`
//! file when present) into a single struct that is handed to every component
//! at startup.

use secrecy::{ExposeSecret, SecretString};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;
use tutor_core::transcript::DEFAULT_TRANSCRIPT_LIMIT;

// --- Application Constants ---

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_GEMINI_BASE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_SIMLI_BASE_URL: &str = "https://api.simli.ai/v1";
pub const DEFAULT_SUBJECTS_PATH: &str = "data/subjects.json";
pub const DEFAULT_REGISTRY_PATH: &str = "data/students.json";
pub const DEFAULT_RENDERER_BIND_ADDRESS: &str = "127.0.0.1:3000";

/// What to do when an API key is absent at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialPolicy {
    /// Log a warning and carry on. The model handshake fails later and the
    /// avatar is skipped.
    #[default]
    Warn,
    /// Refuse to start.
    FailFast,
}

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_api_key: SecretString,
    pub simli_api_key: SecretString,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub simli_base_url: String,
    pub credential_policy: CredentialPolicy,
    pub transcript_limit: usize,
    pub subjects_path: PathBuf,
    pub registry_path: PathBuf,
    pub renderer_bind_address: SocketAddr,
    pub log_level: Level,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `GEMINI_API_KEY`, `SIMLI_API_KEY`: service credentials.
    // *   `GEMINI_MODEL`, `GEMINI_BASE_URL`, `SIMLI_BASE_URL`: (Optional) endpoints.
    // *   `CREDENTIAL_POLICY`: (Optional) "warn" or "fail_fast". Defaults to "warn".
    // *   `TRANSCRIPT_LIMIT`: (Optional) rolling transcript size in characters. Defaults to 500.
    // *   `SUBJECTS_PATH`, `REGISTRY_PATH`: (Optional) JSON data files.
    // *   `RENDERER_BIND_ADDRESS`: (Optional) Defaults to "127.0.0.1:3000".
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_source(|name| env::var(name).ok())
    }

    /// Same parsing as [`Config::from_env`], reading variables through `lookup`.
    pub fn from_source(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var_or = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let credential_policy = match var_or("CREDENTIAL_POLICY", "warn").to_lowercase().as_str() {
            "warn" => CredentialPolicy::Warn,
            "fail_fast" | "fail-fast" => CredentialPolicy::FailFast,
            other => return Err(invalid("CREDENTIAL_POLICY", other)),
        };

        let transcript_limit_str = var_or("TRANSCRIPT_LIMIT", &DEFAULT_TRANSCRIPT_LIMIT.to_string());
        let transcript_limit = transcript_limit_str
            .parse::<usize>()
            .ok()
            .filter(|limit| *limit > 0)
            .ok_or_else(|| invalid("TRANSCRIPT_LIMIT", &transcript_limit_str))?;

        let bind_str = var_or("RENDERER_BIND_ADDRESS", DEFAULT_RENDERER_BIND_ADDRESS);
        let renderer_bind_address = bind_str
            .parse::<SocketAddr>()
            .map_err(|_| invalid("RENDERER_BIND_ADDRESS", &bind_str))?;

        // Configure logging level from RUST_LOG, with a sensible default.
        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| invalid("RUST_LOG", &log_level_str))?;

        let config = Self {
            gemini_api_key: lookup("GEMINI_API_KEY").unwrap_or_default().into(),
            simli_api_key: lookup("SIMLI_API_KEY").unwrap_or_default().into(),
            gemini_model: var_or("GEMINI_MODEL", DEFAULT_GEMINI_MODEL),
            gemini_base_url: var_or("GEMINI_BASE_URL", DEFAULT_GEMINI_BASE_URL),
            simli_base_url: var_or("SIMLI_BASE_URL", DEFAULT_SIMLI_BASE_URL),
            credential_policy,
            transcript_limit,
            subjects_path: var_or("SUBJECTS_PATH", DEFAULT_SUBJECTS_PATH).into(),
            registry_path: var_or("REGISTRY_PATH", DEFAULT_REGISTRY_PATH).into(),
            renderer_bind_address,
            log_level,
        };

        if config.credential_policy == CredentialPolicy::FailFast {
            if let Some(name) = config.missing_credentials().first() {
                return Err(ConfigError::MissingVar(format!(
                    "{name} must be set when CREDENTIAL_POLICY is fail_fast"
                )));
            }
        }

        Ok(config)
    }

    /// Names of the credentials that are absent or still a placeholder.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !is_usable(&self.gemini_api_key) {
            missing.push("GEMINI_API_KEY");
        }
        if !is_usable(&self.simli_api_key) {
            missing.push("SIMLI_API_KEY");
        }
        missing
    }
}

fn is_usable(key: &SecretString) -> bool {
    let key = key.expose_secret().trim();
    !key.is_empty() && !key.contains("PLACEHOLDER")
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    }
}
