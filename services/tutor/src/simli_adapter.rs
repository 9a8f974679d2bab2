use async_trait::async_trait;
use bytes::Bytes;
use simli_rtc::{SimliClient, TrackRemote, TransportError};
use std::sync::Arc;
use tokio::sync::oneshot;
use tutor_core::generic_types::AvatarStream;
use tutor_core::realtime_api::AvatarTransport;

/// An adapter that implements the generic `AvatarTransport` trait for `simli_rtc::SimliClient`.
pub struct SimliAvatar {
    client: Arc<SimliClient>,
}

impl SimliAvatar {
    pub fn new(client: Arc<SimliClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AvatarTransport for SimliAvatar {
    async fn connect(&self, face_id: &str, on_stream: oneshot::Sender<AvatarStream>) {
        let (track_tx, track_rx) = oneshot::channel::<Arc<TrackRemote>>();
        tokio::spawn(async move {
            if let Ok(track) = track_rx.await {
                let stream = AvatarStream::new(track.id(), track.stream_id(), track);
                if on_stream.send(stream).is_err() {
                    tracing::debug!("Avatar stream arrived after the session moved on.");
                }
            }
        });

        match self.client.connect(face_id, track_tx).await {
            Ok(()) => {}
            Err(TransportError::MissingCredentials) => {
                tracing::warn!("SIMLI_API_KEY is missing, continuing without the avatar.");
            }
            Err(TransportError::Superseded) => {
                tracing::debug!("Avatar negotiation was superseded.");
            }
            Err(e) => tracing::error!("Avatar negotiation failed: {}", e),
        }
    }

    fn send_bytes(&self, data: Bytes) {
        self.client.send_bytes(data);
    }

    async fn disconnect(&self) {
        self.client.disconnect().await;
    }
}
