/// Failures surfaced by the session orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Microphone access refused. The session never starts.
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    /// The model session could not be opened.
    #[error("session negotiation failed: {0}")]
    NegotiationFailed(String),

    /// Mid-session transport fault.
    #[error("stream error: {0}")]
    StreamError(String),

    /// Malformed tool invocation.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}
