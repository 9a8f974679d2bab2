use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

pub const SIMLI_API_KEY: &str = "SIMLI_API_KEY";
pub const BASE_URL: &str = "https://api.simli.ai/v1";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
/// Used when a subject has no face configured.
pub const DEFAULT_FACE_ID: &str = "550e8400-e29b-41d4-a716-446655440000";
const SESSION_PATH: &str = "/session";
const WEBRTC_PATH: &str = "/StartWebRTCSession";
/// Applies to each HTTP call of the negotiation.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SimliConfig {
    base_url: String,
    api_key: SecretString,
    ice_servers: Vec<String>,
    request_timeout: Duration,
}

pub struct SimliConfigBuilder {
    config: SimliConfig,
}

impl Default for SimliConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SimliConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SimliConfig::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.config.api_key = api_key;
        self
    }

    pub fn with_ice_servers(mut self, ice_servers: Vec<String>) -> Self {
        self.config.ice_servers = ice_servers;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn build(self) -> SimliConfig {
        self.config
    }
}

impl Default for SimliConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SimliConfig {
    pub fn new() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            api_key: std::env::var(SIMLI_API_KEY).unwrap_or_default().into(),
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn builder() -> SimliConfigBuilder {
        SimliConfigBuilder::new()
    }

    pub fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    /// Empty keys and unreplaced `PLACEHOLDER` values do not count.
    pub fn has_credentials(&self) -> bool {
        let key = self.api_key.expose_secret();
        !key.trim().is_empty() && !key.contains("PLACEHOLDER")
    }

    pub fn ice_servers(&self) -> &[String] {
        &self.ice_servers
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn session_url(&self) -> String {
        format!("{}{}", self.base_url, SESSION_PATH)
    }

    pub fn webrtc_url(&self) -> String {
        format!("{}{}", self.base_url, WEBRTC_PATH)
    }
}
