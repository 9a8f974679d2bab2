use crate::config::{DEFAULT_FACE_ID, SimliConfig};
use crate::error::TransportError;
use crate::lifecycle::{Lifecycle, TransportState};
use crate::types::{SessionDescription, SessionRequest, SessionResponse};
use bytes::Bytes;
use secrecy::ExposeSecret;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::track::track_remote::TrackRemote;

const DATA_CHANNEL_LABEL: &str = "datachannel";
/// Audio chunks queued for the data channel before new ones are dropped.
const AUDIO_QUEUE: usize = 64;
/// The offer goes out with whatever candidates were found by then.
const GATHERING_TIMEOUT: Duration = Duration::from_secs(5);

struct Connection {
    pc: Arc<RTCPeerConnection>,
    audio_tx: mpsc::Sender<Bytes>,
    channel_open: Arc<AtomicBool>,
    writer: JoinHandle<()>,
}

impl Connection {
    async fn close(self) {
        self.channel_open.store(false, Ordering::SeqCst);
        self.writer.abort();
        if let Err(e) = self.pc.close().await {
            tracing::warn!("error while closing avatar peer connection: {}", e);
        }
    }
}

/// One avatar peer connection at a time.
///
/// Share it behind an `Arc`; all methods take `&self`. `connect` while a
/// connection exists tears the old one down first, and an attempt overtaken
/// by a later `connect` or `disconnect` closes what it built and returns
/// [`TransportError::Superseded`].
pub struct SimliClient {
    config: SimliConfig,
    http: reqwest::Client,
    lifecycle: Mutex<Lifecycle<Connection>>,
}

impl SimliClient {
    pub fn new(config: SimliConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("failed to build HTTP client with timeout, using defaults: {}", e);
                reqwest::Client::new()
            });
        Self {
            config,
            http,
            lifecycle: Mutex::new(Lifecycle::new()),
        }
    }

    pub fn state(&self) -> TransportState {
        self.lifecycle
            .lock()
            .map(|lifecycle| lifecycle.state())
            .unwrap_or(TransportState::Closed)
    }

    /// Negotiates a session for `face_id`. The remote video track is sent on
    /// `on_stream` at most once; the sender is dropped unused on failure.
    pub async fn connect(
        &self,
        face_id: &str,
        on_stream: oneshot::Sender<Arc<TrackRemote>>,
    ) -> Result<(), TransportError> {
        if !self.config.has_credentials() {
            return Err(TransportError::MissingCredentials);
        }
        let face_id = if face_id.is_empty() {
            DEFAULT_FACE_ID
        } else {
            face_id
        };

        let (generation, previous) = self.with_lifecycle(|l| l.begin_connect())?;
        if let Some(previous) = previous {
            tracing::info!("Replacing existing avatar connection.");
            previous.close().await;
        }

        let connection = match self.establish(face_id, on_stream).await {
            Ok(connection) => connection,
            Err(e) => {
                self.with_lifecycle(|l| l.fail(generation))?;
                return Err(e);
            }
        };

        match self.with_lifecycle(|l| l.complete(generation, connection))? {
            Ok(()) => {
                tracing::info!("Avatar link established for face {}", short_id(face_id));
                Ok(())
            }
            Err(stale) => {
                stale.close().await;
                Err(TransportError::Superseded)
            }
        }
    }

    /// Queues `data` for the data channel. Silently drops it when no channel is
    /// open or the queue is full.
    pub fn send_bytes(&self, data: Bytes) {
        let Ok(lifecycle) = self.lifecycle.lock() else {
            return;
        };
        let Some(connection) = lifecycle.active() else {
            return;
        };
        if !connection.channel_open.load(Ordering::SeqCst) {
            return;
        }
        if let Err(mpsc::error::TrySendError::Full(_)) = connection.audio_tx.try_send(data) {
            tracing::debug!("avatar audio queue full, dropping chunk");
        }
    }

    /// Closes the current connection, if any, and cancels an attempt in flight.
    pub async fn disconnect(&self) {
        let connection = match self.lifecycle.lock() {
            Ok(mut lifecycle) => lifecycle.close(),
            Err(_) => None,
        };
        if let Some(connection) = connection {
            connection.close().await;
            tracing::info!("Avatar disconnected.");
        }
    }

    fn with_lifecycle<T>(
        &self,
        f: impl FnOnce(&mut Lifecycle<Connection>) -> T,
    ) -> Result<T, TransportError> {
        self.lifecycle
            .lock()
            .map(|mut lifecycle| f(&mut lifecycle))
            .map_err(|_| TransportError::WebRtc("connection state poisoned".to_string()))
    }

    async fn establish(
        &self,
        face_id: &str,
        on_stream: oneshot::Sender<Arc<TrackRemote>>,
    ) -> Result<Connection, TransportError> {
        let session_token = self.request_session(face_id).await?;
        let pc = Arc::new(self.new_peer_connection().await?);

        match self.negotiate(&pc, session_token, on_stream).await {
            Ok((audio_tx, channel_open, writer)) => Ok(Connection {
                pc,
                audio_tx,
                channel_open,
                writer,
            }),
            Err(e) => {
                if let Err(close_err) = pc.close().await {
                    tracing::warn!("error while closing failed peer connection: {}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn request_session(&self, face_id: &str) -> Result<String, TransportError> {
        let response = self
            .http
            .post(self.config.session_url())
            .header("x-api-key", self.config.api_key().expose_secret())
            .json(&SessionRequest {
                face_id: face_id.to_string(),
                is_sync: true,
            })
            .send()
            .await
            .map_err(|e| TransportError::SessionRequest(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::SessionRequest(format!(
                "status {}",
                response.status()
            )));
        }

        let body: SessionResponse = response
            .json()
            .await
            .map_err(|e| TransportError::SessionRequest(e.to_string()))?;
        Ok(body.session_token)
    }

    async fn new_peer_connection(&self) -> Result<RTCPeerConnection, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = self
            .config
            .ice_servers()
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        Ok(api
            .new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await?)
    }

    async fn negotiate(
        &self,
        pc: &Arc<RTCPeerConnection>,
        session_token: String,
        on_stream: oneshot::Sender<Arc<TrackRemote>>,
    ) -> Result<(mpsc::Sender<Bytes>, Arc<AtomicBool>, JoinHandle<()>), TransportError> {
        pc.add_transceiver_from_kind(
            RTPCodecType::Video,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            }),
        )
        .await?;

        let on_stream = Arc::new(Mutex::new(Some(on_stream)));
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            if track.kind() == RTPCodecType::Video {
                let sender = on_stream.lock().ok().and_then(|mut slot| slot.take());
                if let Some(sender) = sender {
                    tracing::info!("Avatar video track received: {}", track.id());
                    let _ = sender.send(track);
                }
            }
            Box::pin(async {})
        }));

        pc.on_peer_connection_state_change(Box::new(|state| {
            tracing::debug!("Avatar peer connection state: {}", state);
            Box::pin(async {})
        }));

        let dc = pc
            .create_data_channel(
                DATA_CHANNEL_LABEL,
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                }),
            )
            .await?;
        let channel_open = Arc::new(AtomicBool::new(false));
        watch_data_channel(&dc, session_token, channel_open.clone());

        let offer = pc.create_offer(None).await?;
        let mut gathering_complete = pc.gathering_complete_promise().await;
        pc.set_local_description(offer).await?;
        if tokio::time::timeout(GATHERING_TIMEOUT, gathering_complete.recv())
            .await
            .is_err()
        {
            tracing::warn!("ICE gathering timed out, sending a partial offer.");
        }

        let local = pc
            .local_description()
            .await
            .ok_or_else(|| TransportError::Negotiation("no local description".to_string()))?;

        let answer = self.exchange_offer(local.sdp).await?;
        let answer = RTCSessionDescription::answer(answer.sdp)
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;
        pc.set_remote_description(answer).await?;

        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_QUEUE);
        let writer = tokio::spawn(run_writer(dc, audio_rx));
        Ok((audio_tx, channel_open, writer))
    }

    async fn exchange_offer(&self, sdp: String) -> Result<SessionDescription, TransportError> {
        let response = self
            .http
            .post(self.config.webrtc_url())
            .header("x-api-key", self.config.api_key().expose_secret())
            .json(&SessionDescription::offer(sdp))
            .send()
            .await
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Negotiation(format!(
                "status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| TransportError::Negotiation(e.to_string()))
    }
}

// The service expects the session token as the first message on the channel.
fn watch_data_channel(dc: &Arc<RTCDataChannel>, session_token: String, open: Arc<AtomicBool>) {
    let weak = Arc::downgrade(dc);
    let on_open_flag = open.clone();
    dc.on_open(Box::new(move || {
        let open = on_open_flag.clone();
        Box::pin(async move {
            let Some(dc) = weak.upgrade() else { return };
            match dc.send_text(session_token).await {
                Ok(_) => {
                    open.store(true, Ordering::SeqCst);
                    tracing::info!("Avatar data channel open.");
                }
                Err(e) => tracing::error!("failed to send avatar session token: {}", e),
            }
        })
    }));

    dc.on_close(Box::new(move || {
        open.store(false, Ordering::SeqCst);
        tracing::debug!("Avatar data channel closed.");
        Box::pin(async {})
    }));
}

async fn run_writer(dc: Arc<RTCDataChannel>, mut audio_rx: mpsc::Receiver<Bytes>) {
    while let Some(chunk) = audio_rx.recv().await {
        if let Err(e) = dc.send(&chunk).await {
            tracing::debug!("dropped avatar audio chunk: {}", e);
        }
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
