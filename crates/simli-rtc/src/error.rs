#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("SIMLI_API_KEY is missing or invalid")]
    MissingCredentials,

    #[error("session request failed: {0}")]
    SessionRequest(String),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("WebRTC error: {0}")]
    WebRtc(String),

    #[error("connection attempt was superseded")]
    Superseded,
}

impl From<webrtc::Error> for TransportError {
    fn from(e: webrtc::Error) -> Self {
        TransportError::WebRtc(e.to_string())
    }
}
