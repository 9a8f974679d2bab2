use crate::generic_types::{AvatarStream, LiveSessionConfig, ModelSessionHandle};
use crate::visualization::VisualizationCommand;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)]
use mockall::automock;
use tokio::sync::{mpsc, oneshot};

/// A real-time, bidirectional model provider (Gemini Live or any other
/// backend speaking the same event vocabulary).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Opens a session. Commands sent before the remote side is ready are
    /// buffered by the provider, not dropped.
    async fn open(&self, config: LiveSessionConfig) -> Result<ModelSessionHandle>;
}

/// Peer connection to the avatar rendering service.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AvatarTransport: Send + Sync {
    /// Negotiates a connection for `face_id`, replacing any existing one.
    /// Failures are logged, not returned: a missing avatar is not fatal.
    /// `on_stream` receives the video at most once.
    async fn connect(&self, face_id: &str, on_stream: oneshot::Sender<AvatarStream>);

    /// Best-effort delivery. Never blocks; no-op when the channel is not open.
    fn send_bytes(&self, data: Bytes);

    /// Idempotent.
    async fn disconnect(&self);
}

/// A held microphone hardware track.
pub trait MicrophoneTrack: Send {
    fn stop(&mut self) -> Result<()>;
}

/// 16 kHz mono samples plus the track that produces them.
pub struct MicrophoneCapture {
    pub samples: mpsc::Receiver<Vec<f32>>,
    pub track: Box<dyn MicrophoneTrack>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Requests device access. An error means permission was refused or no
    /// device is available.
    async fn acquire(&self) -> Result<MicrophoneCapture>;
}

/// Consumer of visualization commands.
#[cfg_attr(test, automock)]
pub trait VisualizationRenderer: Send + Sync {
    fn render(&self, command: &VisualizationCommand) -> Result<()>;
}
