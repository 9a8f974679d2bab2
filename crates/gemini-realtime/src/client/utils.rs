use crate::client::config::Config;
use crate::client::consts::API_KEY_QUERY_PARAM;
use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

pub fn build_request(config: &Config) -> tokio_tungstenite::tungstenite::Result<Request> {
    let separator = if config.base_url().contains('?') { '&' } else { '?' };
    format!(
        "{}{}{}={}",
        config.base_url(),
        separator,
        API_KEY_QUERY_PARAM,
        config.api_key().expose_secret()
    )
    .into_client_request()
}
