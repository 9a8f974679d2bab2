//! One live tutoring session at a time: microphone to model, model audio to
//! the avatar, tool calls to the visualization slot, transcript to the
//! snapshot.
//!
//! State is published through a `watch` channel. Every task spawned for a
//! session carries that session's generation and a cancellation token; a
//! bumped generation or a cancelled token turns all of its sends and state
//! writes into no-ops, which is what makes `stop` safe to call from anywhere,
//! including from inside event handling.

use crate::catalog::SubjectConfig;
use crate::error::SessionError;
use crate::framing::FrameBuffer;
use crate::generic_types::{
    AvatarStream, LiveSessionConfig, ModelCommand, ModelEvent, ModelSessionHandle,
    ResponseModality, ToolAck, ToolInvocation,
};
use crate::persona::{AgeGroup, SessionRecord, TutorState, render_persona_prompt, resolve_voice};
use crate::realtime_api::{
    AvatarTransport, Microphone, MicrophoneCapture, MicrophoneTrack, ModelProvider,
    VisualizationRenderer,
};
use crate::transcript::{DEFAULT_TRANSCRIPT_LIMIT, TranscriptBuffer};
use crate::visualization::{
    UPDATE_VISUALIZATION, VisualizationCommand, VisualizationSlot, update_visualization_declaration,
};
use bytes::Bytes;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tutor_native_utils::audio::{FRAME_SAMPLES, decode_to_bytes, encode_frame};

/// Acknowledgment payload for a visualization that was applied.
pub const TOOL_ACK_OK: &str = "Visualization Updated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    AcquiringDevices,
    Connecting,
    Active,
    Closing,
    /// The model session ended on its own. `stop` returns to `Idle`.
    Closed,
    /// The model session ended with a stream error.
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub subject: Option<SubjectConfig>,
    pub transcript: TranscriptBuffer,
    pub speaking: bool,
    pub avatar_stream: Option<AvatarStream>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub transcript_limit: usize,
    /// Samples per outbound audio frame.
    pub frame_samples: usize,
    pub age_group: AgeGroup,
    /// Past lessons of the signed-in student, read once at startup.
    pub memory: Vec<SessionRecord>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            transcript_limit: DEFAULT_TRANSCRIPT_LIMIT,
            frame_samples: FRAME_SAMPLES,
            age_group: AgeGroup::Adult,
            memory: Vec::new(),
        }
    }
}

/// Resources held by a running session. Released only in `release`.
struct ActiveSession {
    generation: u64,
    cancel: CancellationToken,
    avatar_connect: JoinHandle<()>,
    track: Box<dyn MicrophoneTrack>,
    commands: mpsc::Sender<ModelCommand>,
}

struct Shared {
    model: Arc<dyn ModelProvider>,
    avatar: Arc<dyn AvatarTransport>,
    microphone: Arc<dyn Microphone>,
    renderer: Arc<dyn VisualizationRenderer>,
    settings: SessionSettings,
    snapshot: watch::Sender<SessionSnapshot>,
    visualization: VisualizationSlot,
    generation: AtomicU64,
    active: Mutex<Option<ActiveSession>>,
}

/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct SessionOrchestrator {
    shared: Arc<Shared>,
}

impl SessionOrchestrator {
    pub fn new(
        model: Arc<dyn ModelProvider>,
        avatar: Arc<dyn AvatarTransport>,
        microphone: Arc<dyn Microphone>,
        renderer: Arc<dyn VisualizationRenderer>,
        settings: SessionSettings,
    ) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot {
            transcript: TranscriptBuffer::new(settings.transcript_limit),
            ..Default::default()
        });
        Self {
            shared: Arc::new(Shared {
                model,
                avatar,
                microphone,
                renderer,
                settings,
                snapshot,
                visualization: VisualizationSlot::new(),
                generation: AtomicU64::new(0),
                active: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.snapshot.borrow().status
    }

    /// The renderer-facing visualization mailbox.
    pub fn visualization(&self) -> watch::Receiver<VisualizationCommand> {
        self.shared.visualization.subscribe()
    }

    /// Starts a lesson for `subject`, stopping any session already running.
    ///
    /// Returns once the model session is open. The avatar is negotiated in
    /// the background; if that fails or stalls the lesson continues without
    /// video.
    pub async fn start(&self, subject: SubjectConfig) -> Result<(), SessionError> {
        let mut active = self.shared.active.lock().await;
        if active.is_some() || self.status() != SessionStatus::Idle {
            tracing::info!("A session is already running, stopping it first.");
            self.shutdown(&mut active).await;
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.snapshot.send_modify(|s| {
            s.status = SessionStatus::AcquiringDevices;
            s.subject = Some(subject.clone());
            s.last_error = None;
        });
        tracing::info!("Starting session {} for {} ({})", generation, subject.title, subject.id);

        let MicrophoneCapture { samples, mut track } = match self.shared.microphone.acquire().await
        {
            Ok(capture) => capture,
            Err(e) => {
                tracing::error!("Microphone unavailable: {:#}", e);
                let error = SessionError::PermissionDenied(e.to_string());
                self.reset_to_idle(Some(error.to_string()));
                return Err(error);
            }
        };
        self.set_status(SessionStatus::Connecting);

        // Avatar negotiation never holds the lesson in Connecting.
        let cancel = CancellationToken::new();
        let (stream_tx, stream_rx) = oneshot::channel();
        let avatar_connect = tokio::spawn(connect_avatar(
            self.shared.avatar.clone(),
            subject.face_id.clone(),
            stream_tx,
            cancel.clone(),
        ));

        let ModelSessionHandle { commands, events } =
            match self.shared.model.open(self.live_config(&subject)).await {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::error!("Failed to open model session: {:#}", e);
                    cancel.cancel();
                    avatar_connect.abort();
                    self.shared.avatar.disconnect().await;
                    if let Err(e) = track.stop() {
                        tracing::error!("Failed to stop microphone track: {:#}", e);
                    }
                    let error = SessionError::NegotiationFailed(e.to_string());
                    self.reset_to_idle(Some(error.to_string()));
                    return Err(error);
                }
            };

        tokio::spawn(self.clone().pump_microphone(
            generation,
            samples,
            commands.clone(),
            cancel.clone(),
        ));
        tokio::spawn(self.clone().dispatch_events(
            generation,
            events,
            commands.clone(),
            cancel.clone(),
        ));
        tokio::spawn(self.clone().await_avatar_stream(generation, stream_rx, cancel.clone()));

        *active = Some(ActiveSession {
            generation,
            cancel,
            avatar_connect,
            track,
            commands,
        });
        self.set_status(SessionStatus::Active);
        tracing::info!("Session {} active.", generation);
        Ok(())
    }

    /// Ends the current session and releases everything it holds. A no-op
    /// when nothing is running.
    pub async fn stop(&self) {
        let mut active = self.shared.active.lock().await;
        if active.is_none() && self.status() == SessionStatus::Idle {
            tracing::debug!("stop() called with no session.");
            return;
        }
        self.shutdown(&mut active).await;
    }

    async fn shutdown(&self, active: &mut Option<ActiveSession>) {
        tracing::info!("Stopping session.");
        self.set_status(SessionStatus::Closing);
        self.release(active).await;
        self.reset_to_idle(None);
        tracing::info!("Session stopped.");
    }

    /// Releases session resources in order: microphone forwarding, avatar
    /// connection, microphone track, model session. Each step runs even when
    /// an earlier one fails.
    async fn release(&self, active: &mut Option<ActiveSession>) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(mut session) = active.take() {
            session.cancel.cancel();
            session.avatar_connect.abort();
            self.shared.avatar.disconnect().await;
            if let Err(e) = session.track.stop() {
                tracing::error!("Failed to stop microphone track: {:#}", e);
            }
            drop(session.commands);
            tracing::debug!("Released session {}", session.generation);
        }

        if self.shared.visualization.clear() {
            if let Err(e) = self.shared.renderer.render(&VisualizationCommand::clear()) {
                tracing::error!("Failed to clear visualization: {:#}", e);
            }
        }
        self.shared.snapshot.send_modify(|s| {
            s.speaking = false;
            s.avatar_stream = None;
        });
    }

    /// Terminal model event: release resources and park in `status` until
    /// the user stops or restarts.
    async fn finish(&self, generation: u64, status: SessionStatus, reason: Option<String>) {
        let mut active = self.shared.active.lock().await;
        if active.as_ref().map(|s| s.generation) != Some(generation) {
            return;
        }
        self.release(&mut active).await;
        self.shared.snapshot.send_modify(|s| {
            s.status = status;
            s.last_error = reason;
        });
    }

    fn reset_to_idle(&self, error: Option<String>) {
        self.shared.snapshot.send_modify(|s| {
            s.status = SessionStatus::Idle;
            s.subject = None;
            s.speaking = false;
            s.avatar_stream = None;
            s.transcript.clear();
            s.last_error = error;
        });
    }

    fn set_status(&self, status: SessionStatus) {
        self.shared.snapshot.send_modify(|s| s.status = status);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.shared.generation.load(Ordering::SeqCst) == generation
    }

    /// Applies `f` only while `generation` is live. The check runs under the
    /// snapshot's write lock, so it cannot interleave with a teardown.
    fn update_if_current(
        &self,
        generation: u64,
        f: impl FnOnce(&mut SessionSnapshot) -> bool,
    ) -> bool {
        self.shared
            .snapshot
            .send_if_modified(|snapshot| self.is_current(generation) && f(snapshot))
    }

    fn live_config(&self, subject: &SubjectConfig) -> LiveSessionConfig {
        let settings = &self.shared.settings;
        LiveSessionConfig {
            instructions: render_persona_prompt(
                settings.age_group,
                TutorState::Teaching,
                &settings.memory,
            ),
            response_modality: ResponseModality::Audio,
            output_transcription: true,
            voice: resolve_voice(&subject.voice_id).to_string(),
            tools: vec![update_visualization_declaration()],
        }
    }

    async fn pump_microphone(
        self,
        generation: u64,
        mut samples: mpsc::Receiver<Vec<f32>>,
        commands: mpsc::Sender<ModelCommand>,
        cancel: CancellationToken,
    ) {
        let mut framer = FrameBuffer::new(self.shared.settings.frame_samples);
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                chunk = samples.recv() => chunk,
            };
            let Some(chunk) = chunk else {
                tracing::info!("Microphone stream ended.");
                break;
            };

            for frame in framer.push(&chunk) {
                let frame = match encode_frame(&frame) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!("Dropping microphone frame: {}", e);
                        continue;
                    }
                };
                if !self.is_current(generation) {
                    return;
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    sent = commands.send(ModelCommand::Audio(frame)) => {
                        if sent.is_err() {
                            tracing::debug!("Model session closed, no longer forwarding audio.");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn dispatch_events(
        self,
        generation: u64,
        mut events: mpsc::Receiver<ModelEvent>,
        commands: mpsc::Sender<ModelCommand>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                self.finish(generation, SessionStatus::Closed, None).await;
                break;
            };
            if !self.is_current(generation) {
                break;
            }

            match event {
                ModelEvent::SetupComplete => tracing::info!("Model session ready."),
                ModelEvent::TranscriptFragment(text) => {
                    self.update_if_current(generation, |s| {
                        s.transcript.push(&text);
                        true
                    });
                }
                ModelEvent::ToolInvocation(calls) => {
                    for call in calls {
                        self.acknowledge(generation, &commands, &cancel, call).await;
                    }
                }
                ModelEvent::ToolCancellation(ids) => {
                    tracing::warn!("Model cancelled tool calls {:?}", ids);
                }
                ModelEvent::AudioChunk(data) => self.forward_audio(generation, &data),
                ModelEvent::TurnComplete | ModelEvent::Interrupted => {
                    self.update_if_current(generation, |s| std::mem::take(&mut s.speaking));
                }
                ModelEvent::GoAway(time_left) => {
                    tracing::warn!("Model endpoint is going away, time left: {:?}", time_left);
                }
                ModelEvent::Error(message) => {
                    tracing::error!("Model stream error: {}", message);
                    let error = SessionError::StreamError(message);
                    self.finish(generation, SessionStatus::Failed, Some(error.to_string()))
                        .await;
                    break;
                }
                ModelEvent::Closed(reason) => {
                    tracing::info!("Model session closed: {:?}", reason);
                    self.finish(generation, SessionStatus::Closed, reason).await;
                    break;
                }
            }
        }
    }

    /// Applies one tool call and sends its acknowledgment before returning,
    /// so nothing queued behind it is processed first.
    async fn acknowledge(
        &self,
        generation: u64,
        commands: &mpsc::Sender<ModelCommand>,
        cancel: &CancellationToken,
        call: ToolInvocation,
    ) {
        tracing::info!("Tool call {} ({})", call.name, call.id);
        let response = self.apply_tool_call(generation, &call);
        let id = call.id.clone();
        let ack = ModelCommand::ToolAck(ToolAck {
            id: call.id,
            name: call.name,
            response,
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Session ended before acknowledging tool call {}", id);
            }
            sent = commands.send(ack) => {
                if sent.is_err() {
                    tracing::error!("Failed to acknowledge tool call {}", id);
                }
            }
        }
    }

    fn apply_tool_call(&self, generation: u64, call: &ToolInvocation) -> Value {
        if call.name != UPDATE_VISUALIZATION {
            tracing::warn!("Unknown tool {} ({})", call.name, call.id);
            return json!({ "error": format!("unknown function {}", call.name) });
        }

        let command = match VisualizationCommand::from_args(&call.args) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!("Tool call {}: {}", call.id, e);
                return json!({ "error": e.to_string() });
            }
        };

        self.shared
            .visualization
            .replace_if(command.clone(), || self.is_current(generation));
        match self.shared.renderer.render(&command) {
            Ok(()) => json!({ "result": TOOL_ACK_OK }),
            Err(e) => {
                tracing::error!("Renderer rejected visualization {}: {:#}", call.id, e);
                json!({ "error": format!("renderer failed: {e}") })
            }
        }
    }

    fn forward_audio(&self, generation: u64, data: &str) {
        let bytes = match decode_to_bytes(data) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Dropping model audio chunk: {}", e);
                return;
            }
        };
        if !self.is_current(generation) {
            return;
        }
        self.update_if_current(generation, |s| !std::mem::replace(&mut s.speaking, true));
        self.shared.avatar.send_bytes(Bytes::from(bytes));
    }

    async fn await_avatar_stream(
        self,
        generation: u64,
        stream_rx: oneshot::Receiver<AvatarStream>,
        cancel: CancellationToken,
    ) {
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            stream = stream_rx => stream,
        };
        match stream {
            Ok(stream) => {
                let track_id = stream.track_id().to_string();
                if self.update_if_current(generation, |s| {
                    s.avatar_stream = Some(stream);
                    true
                }) {
                    tracing::info!("Avatar stream ready: {}", track_id);
                }
            }
            Err(_) => tracing::warn!("No avatar stream, continuing without video."),
        }
    }
}

async fn connect_avatar(
    avatar: Arc<dyn AvatarTransport>,
    face_id: String,
    on_stream: oneshot::Sender<AvatarStream>,
    cancel: CancellationToken,
) {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => tracing::debug!("Avatar negotiation abandoned."),
        _ = avatar.connect(&face_id, on_stream) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_subjects;
    use crate::realtime_api::{MockModelProvider, MockVisualizationRenderer};
    use crate::visualization::VisualizationKind;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::time::timeout;
    use tutor_native_utils::audio::encode_text;

    const WAIT: Duration = Duration::from_secs(2);

    struct FakeSession {
        config: LiveSessionConfig,
        events: mpsc::Sender<ModelEvent>,
        commands: mpsc::Receiver<ModelCommand>,
    }

    #[derive(Default)]
    struct FakeModel {
        sessions: std::sync::Mutex<Vec<FakeSession>>,
    }

    impl FakeModel {
        fn take_session(&self) -> FakeSession {
            self.sessions.lock().unwrap().pop().expect("no model session opened")
        }
    }

    #[async_trait]
    impl ModelProvider for FakeModel {
        async fn open(&self, config: LiveSessionConfig) -> anyhow::Result<ModelSessionHandle> {
            let (commands_tx, commands_rx) = mpsc::channel(64);
            let (events_tx, events_rx) = mpsc::channel(64);
            self.sessions.lock().unwrap().push(FakeSession {
                config,
                events: events_tx,
                commands: commands_rx,
            });
            Ok(ModelSessionHandle {
                commands: commands_tx,
                events: events_rx,
            })
        }
    }

    /// Counts peer connections; `connect` without `disconnect` would leak one.
    #[derive(Default)]
    struct FakeAvatar {
        fail: bool,
        /// Negotiation never finishes, like a peer that silently drops packets.
        hang: bool,
        pending: AtomicUsize,
        live: AtomicUsize,
        disconnects: AtomicUsize,
        sent: std::sync::Mutex<Vec<Bytes>>,
    }

    #[async_trait]
    impl AvatarTransport for FakeAvatar {
        async fn connect(&self, _face_id: &str, on_stream: oneshot::Sender<AvatarStream>) {
            if self.fail {
                return;
            }
            if self.hang {
                self.pending.fetch_add(1, Ordering::SeqCst);
                let _pending = PendingConnect(&self.pending);
                std::future::pending::<()>().await;
            }
            self.live.fetch_add(1, Ordering::SeqCst);
            let _ = on_stream.send(AvatarStream::new(
                "video".into(),
                "avatar".into(),
                Arc::new(()),
            ));
        }

        fn send_bytes(&self, data: Bytes) {
            if self.live.load(Ordering::SeqCst) > 0 {
                self.sent.lock().unwrap().push(data);
            }
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            self.live.store(0, Ordering::SeqCst);
        }
    }

    struct PendingConnect<'a>(&'a AtomicUsize);

    impl Drop for PendingConnect<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct FakeTrack {
        live: Arc<AtomicUsize>,
        stopped: bool,
    }

    impl MicrophoneTrack for FakeTrack {
        fn stop(&mut self) -> anyhow::Result<()> {
            if !self.stopped {
                self.stopped = true;
                self.live.fetch_sub(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeMicrophone {
        deny: bool,
        live_tracks: Arc<AtomicUsize>,
        feed: std::sync::Mutex<Option<mpsc::Sender<Vec<f32>>>>,
    }

    impl FakeMicrophone {
        fn feed(&self) -> mpsc::Sender<Vec<f32>> {
            self.feed.lock().unwrap().clone().expect("microphone not acquired")
        }
    }

    #[async_trait]
    impl Microphone for FakeMicrophone {
        async fn acquire(&self) -> anyhow::Result<MicrophoneCapture> {
            if self.deny {
                anyhow::bail!("permission denied by user");
            }
            self.live_tracks.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(16);
            *self.feed.lock().unwrap() = Some(tx);
            Ok(MicrophoneCapture {
                samples: rx,
                track: Box::new(FakeTrack {
                    live: self.live_tracks.clone(),
                    stopped: false,
                }),
            })
        }
    }

    #[derive(Default)]
    struct RecordingRenderer {
        rendered: std::sync::Mutex<Vec<VisualizationCommand>>,
    }

    impl VisualizationRenderer for RecordingRenderer {
        fn render(&self, command: &VisualizationCommand) -> anyhow::Result<()> {
            self.rendered.lock().unwrap().push(command.clone());
            Ok(())
        }
    }

    struct Harness {
        orchestrator: SessionOrchestrator,
        model: Arc<FakeModel>,
        avatar: Arc<FakeAvatar>,
        mic: Arc<FakeMicrophone>,
        renderer: Arc<RecordingRenderer>,
    }

    fn harness_with(avatar: FakeAvatar, mic: FakeMicrophone, settings: SessionSettings) -> Harness {
        let model = Arc::new(FakeModel::default());
        let avatar = Arc::new(avatar);
        let mic = Arc::new(mic);
        let renderer = Arc::new(RecordingRenderer::default());
        let orchestrator = SessionOrchestrator::new(
            model.clone(),
            avatar.clone(),
            mic.clone(),
            renderer.clone(),
            settings,
        );
        Harness {
            orchestrator,
            model,
            avatar,
            mic,
            renderer,
        }
    }

    fn harness() -> Harness {
        harness_with(
            FakeAvatar::default(),
            FakeMicrophone::default(),
            SessionSettings::default(),
        )
    }

    fn subject(voice_id: &str, face_id: &str) -> SubjectConfig {
        let mut subject = default_subjects().remove(0);
        subject.voice_id = voice_id.to_string();
        subject.face_id = face_id.to_string();
        subject
    }

    fn molecule_call(id: &str) -> ToolInvocation {
        ToolInvocation {
            id: id.to_string(),
            name: UPDATE_VISUALIZATION.to_string(),
            args: json!({"type": "chemistry", "subType": "molecule", "data": "H2O"}),
        }
    }

    async fn wait_for(
        orchestrator: &SessionOrchestrator,
        mut condition: impl FnMut(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        let mut rx = orchestrator.subscribe();
        let snapshot = timeout(WAIT, rx.wait_for(|s| condition(s)))
            .await
            .expect("timed out waiting for session state")
            .expect("snapshot channel closed");
        (*snapshot).clone()
    }

    /// Starts a lesson and waits for the avatar stream to be published.
    async fn start_with_avatar(h: &Harness, subject: SubjectConfig) {
        h.orchestrator.start(subject).await.unwrap();
        wait_for(&h.orchestrator, |s| s.avatar_stream.is_some()).await;
    }

    async fn next_command(session: &mut FakeSession) -> ModelCommand {
        timeout(WAIT, session.commands.recv())
            .await
            .expect("timed out waiting for a command")
            .expect("command channel closed")
    }

    async fn next_ack(session: &mut FakeSession) -> ToolAck {
        loop {
            if let ModelCommand::ToolAck(ack) = next_command(session).await {
                return ack;
            }
        }
    }

    #[tokio::test]
    async fn stop_before_start_is_a_noop() {
        let h = harness();
        let mut rx = h.orchestrator.subscribe();

        h.orchestrator.stop().await;

        assert!(!rx.has_changed().unwrap());
        assert_eq!(h.orchestrator.status(), SessionStatus::Idle);
        assert_eq!(h.avatar.disconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn start_opens_model_with_persona_voice_and_tools() {
        let h = harness();

        h.orchestrator.start(subject("Kore", "abc")).await.unwrap();

        let session = h.model.take_session();
        assert_eq!(session.config.voice, "Kore");
        assert_eq!(session.config.response_modality, ResponseModality::Audio);
        assert!(session.config.output_transcription);
        assert!(session.config.instructions.contains("CURRENT STATE: TEACHING"));
        assert!(session.config.instructions.contains("STUDENT AGE GROUP: adult"));
        assert_eq!(session.config.tools[0].name, UPDATE_VISUALIZATION);
        assert_eq!(h.orchestrator.status(), SessionStatus::Active);
    }

    #[tokio::test]
    async fn blank_voice_uses_default() {
        let h = harness();
        h.orchestrator.start(subject("", "abc")).await.unwrap();
        assert_eq!(h.model.take_session().config.voice, "Zephyr");
    }

    #[tokio::test]
    async fn start_twice_holds_one_track_and_one_peer_connection() {
        let h = harness();

        start_with_avatar(&h, subject("Kore", "abc")).await;
        start_with_avatar(&h, subject("Puck", "def")).await;

        assert_eq!(h.mic.live_tracks.load(Ordering::SeqCst), 1);
        assert_eq!(h.avatar.live.load(Ordering::SeqCst), 1);
        assert_eq!(h.orchestrator.status(), SessionStatus::Active);
        assert_eq!(
            h.orchestrator.snapshot().subject.map(|s| s.voice_id),
            Some("Puck".to_string())
        );
    }

    #[tokio::test]
    async fn denied_microphone_leaves_session_idle() {
        let h = harness_with(
            FakeAvatar::default(),
            FakeMicrophone {
                deny: true,
                ..Default::default()
            },
            SessionSettings::default(),
        );

        let result = h.orchestrator.start(subject("Kore", "abc")).await;

        assert!(matches!(result, Err(SessionError::PermissionDenied(_))));
        let snapshot = h.orchestrator.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Idle);
        assert!(snapshot.subject.is_none());
        assert!(snapshot.last_error.is_some());
        assert_eq!(h.avatar.live.load(Ordering::SeqCst), 0);
        assert!(h.model.sessions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn avatar_failure_still_reaches_active() {
        let h = harness_with(
            FakeAvatar {
                fail: true,
                ..Default::default()
            },
            FakeMicrophone::default(),
            SessionSettings::default(),
        );

        h.orchestrator.start(subject("Kore", "abc")).await.unwrap();
        tokio::task::yield_now().await;

        let snapshot = h.orchestrator.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Active);
        assert!(!snapshot.speaking);
        assert!(snapshot.avatar_stream.is_none());
    }

    #[tokio::test]
    async fn hung_avatar_negotiation_does_not_block_the_lesson() {
        let h = harness_with(
            FakeAvatar {
                hang: true,
                ..Default::default()
            },
            FakeMicrophone::default(),
            SessionSettings::default(),
        );

        timeout(WAIT, h.orchestrator.start(subject("Kore", "abc")))
            .await
            .expect("start waited on avatar negotiation")
            .unwrap();
        assert_eq!(h.orchestrator.status(), SessionStatus::Active);

        let session = h.model.take_session();
        session
            .events
            .send(ModelEvent::TranscriptFragment("Hello".into()))
            .await
            .unwrap();
        wait_for(&h.orchestrator, |s| s.transcript.as_str() == "Hello").await;

        timeout(WAIT, h.orchestrator.stop())
            .await
            .expect("stop waited on avatar negotiation");
        assert_eq!(h.orchestrator.status(), SessionStatus::Idle);
        assert_eq!(h.avatar.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(h.mic.live_tracks.load(Ordering::SeqCst), 0);

        // The abandoned negotiation is dropped, not left running.
        timeout(WAIT, async {
            while h.avatar.pending.load(Ordering::SeqCst) > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("avatar negotiation was not cancelled");
    }

    #[tokio::test]
    async fn tool_call_is_applied_and_acknowledged_before_next_audio() {
        let h = harness();
        start_with_avatar(&h, subject("Kore", "abc")).await;
        let mut session = h.model.take_session();

        session
            .events
            .send(ModelEvent::ToolInvocation(vec![molecule_call("42")]))
            .await
            .unwrap();
        session
            .events
            .send(ModelEvent::AudioChunk(encode_text(&[1, 2, 3, 4])))
            .await
            .unwrap();
        wait_for(&h.orchestrator, |s| s.speaking).await;

        // The audio chunk has been handled, so the ack must already be queued.
        match session.commands.try_recv() {
            Ok(ModelCommand::ToolAck(ack)) => {
                assert_eq!(ack.id, "42");
                assert_eq!(ack.name, UPDATE_VISUALIZATION);
                assert_eq!(ack.response, json!({"result": TOOL_ACK_OK}));
            }
            other => panic!("expected tool ack, got {other:?}"),
        }
        let expected = VisualizationCommand {
            kind: VisualizationKind::Chemistry,
            sub_type: Some("molecule".into()),
            data: "H2O".into(),
            label: None,
        };
        assert_eq!(*h.orchestrator.visualization().borrow(), expected);
        assert_eq!(*h.renderer.rendered.lock().unwrap(), vec![expected]);
        assert_eq!(
            *h.avatar.sent.lock().unwrap(),
            vec![Bytes::from_static(&[1, 2, 3, 4])]
        );
    }

    #[tokio::test]
    async fn every_call_in_a_batch_gets_one_ack_in_order() {
        let h = harness();
        h.orchestrator.start(subject("Kore", "abc")).await.unwrap();
        let mut session = h.model.take_session();

        let batch = vec![
            ToolInvocation {
                id: "a".into(),
                name: UPDATE_VISUALIZATION.into(),
                args: json!({"type": "plot", "data": "x^2"}),
            },
            ToolInvocation {
                id: "b".into(),
                name: UPDATE_VISUALIZATION.into(),
                args: json!({"type": "plot"}),
            },
            ToolInvocation {
                id: "c".into(),
                name: "playSound".into(),
                args: json!({}),
            },
            molecule_call("d"),
        ];
        session.events.send(ModelEvent::ToolInvocation(batch)).await.unwrap();

        let acks = vec![
            next_ack(&mut session).await,
            next_ack(&mut session).await,
            next_ack(&mut session).await,
            next_ack(&mut session).await,
        ];
        let ids: Vec<_> = acks.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c", "d"]);
        assert_eq!(acks[0].response["result"], TOOL_ACK_OK);
        assert!(acks[1].response["error"].is_string());
        assert!(acks[2].response["error"].as_str().unwrap().contains("playSound"));
        assert_eq!(acks[3].response["result"], TOOL_ACK_OK);

        let rendered = h.renderer.rendered.lock().unwrap();
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0].kind, VisualizationKind::Plot);
        assert_eq!(rendered[1].kind, VisualizationKind::Chemistry);
    }

    #[tokio::test]
    async fn transcript_keeps_most_recent_window() {
        let h = harness_with(
            FakeAvatar::default(),
            FakeMicrophone::default(),
            SessionSettings {
                transcript_limit: 12,
                ..Default::default()
            },
        );
        h.orchestrator.start(subject("Kore", "abc")).await.unwrap();
        let session = h.model.take_session();

        for fragment in ["Photosynthesis", "turns", "light", "into sugar"] {
            session
                .events
                .send(ModelEvent::TranscriptFragment(fragment.into()))
                .await
                .unwrap();
        }

        let snapshot = wait_for(&h.orchestrator, |s| s.transcript.as_str().ends_with("sugar")).await;
        assert_eq!(snapshot.transcript.as_str(), "t into sugar");
        assert!(snapshot.transcript.len() <= 12);
    }

    #[tokio::test]
    async fn speaking_follows_audio_and_turn_boundaries() {
        let h = harness();
        start_with_avatar(&h, subject("Kore", "abc")).await;
        let session = h.model.take_session();

        session.events.send(ModelEvent::AudioChunk(encode_text(&[0, 0]))).await.unwrap();
        wait_for(&h.orchestrator, |s| s.speaking).await;
        session.events.send(ModelEvent::TurnComplete).await.unwrap();
        wait_for(&h.orchestrator, |s| !s.speaking).await;

        session.events.send(ModelEvent::AudioChunk(encode_text(&[0, 0]))).await.unwrap();
        wait_for(&h.orchestrator, |s| s.speaking).await;
        session.events.send(ModelEvent::Interrupted).await.unwrap();
        wait_for(&h.orchestrator, |s| !s.speaking).await;

        // Undecodable audio is skipped without touching state.
        session.events.send(ModelEvent::AudioChunk("%%%".into())).await.unwrap();
        session.events.send(ModelEvent::TranscriptFragment("ok".into())).await.unwrap();
        let snapshot = wait_for(&h.orchestrator, |s| s.transcript.as_str() == "ok").await;
        assert!(!snapshot.speaking);
        assert_eq!(h.avatar.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn microphone_audio_is_framed_and_forwarded() {
        let h = harness();
        h.orchestrator.start(subject("Kore", "abc")).await.unwrap();
        let mut session = h.model.take_session();
        let feed = h.mic.feed();

        feed.send(vec![0.25; 5000]).await.unwrap();
        feed.send(vec![-0.25; 4000]).await.unwrap();

        for _ in 0..2 {
            match next_command(&mut session).await {
                ModelCommand::Audio(frame) => {
                    assert_eq!(frame.sample_count(), FRAME_SAMPLES);
                    assert_eq!(frame.mime_type(), "audio/pcm;rate=16000");
                }
                other => panic!("expected audio, got {other:?}"),
            }
        }
        assert!(session.commands.try_recv().is_err());
    }

    #[tokio::test]
    async fn stop_mid_utterance_releases_everything() {
        let h = harness();
        start_with_avatar(&h, subject("Kore", "abc")).await;
        let mut session = h.model.take_session();

        session
            .events
            .send(ModelEvent::ToolInvocation(vec![molecule_call("1")]))
            .await
            .unwrap();
        next_ack(&mut session).await;
        session.events.send(ModelEvent::AudioChunk(encode_text(&[9, 9]))).await.unwrap();
        session
            .events
            .send(ModelEvent::TranscriptFragment("Water is".into()))
            .await
            .unwrap();
        wait_for(&h.orchestrator, |s| {
            s.speaking && s.avatar_stream.is_some() && !s.transcript.is_empty()
        })
        .await;

        h.orchestrator.stop().await;

        let snapshot = h.orchestrator.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Idle);
        assert!(!snapshot.speaking);
        assert!(snapshot.avatar_stream.is_none());
        assert!(snapshot.transcript.is_empty());
        assert!(h.orchestrator.visualization().borrow().is_clear());
        assert!(h.renderer.rendered.lock().unwrap().last().unwrap().is_clear());
        assert_eq!(h.mic.live_tracks.load(Ordering::SeqCst), 0);
        assert_eq!(h.avatar.live.load(Ordering::SeqCst), 0);

        // Late events from the old session go nowhere.
        let _ = session.events.send(ModelEvent::AudioChunk(encode_text(&[7]))).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.avatar.sent.lock().unwrap().len(), 1);
        assert!(!h.orchestrator.snapshot().speaking);

        // The model session is closed once the session's tasks have exited.
        loop {
            match timeout(WAIT, session.commands.recv()).await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => panic!("model command channel was not closed"),
            }
        }

        h.orchestrator.stop().await;
        assert_eq!(h.avatar.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_from_a_spawned_handler_does_not_deadlock() {
        let h = harness();
        h.orchestrator.start(subject("Kore", "abc")).await.unwrap();
        let session = h.model.take_session();
        session.events.send(ModelEvent::AudioChunk(encode_text(&[1]))).await.unwrap();
        wait_for(&h.orchestrator, |s| s.speaking).await;

        let orchestrator = h.orchestrator.clone();
        timeout(WAIT, tokio::spawn(async move { orchestrator.stop().await }))
            .await
            .expect("stop did not finish")
            .unwrap();

        assert_eq!(h.orchestrator.status(), SessionStatus::Idle);
    }

    #[tokio::test]
    async fn stream_error_fails_session_and_releases_resources() {
        let h = harness();
        h.orchestrator.start(subject("Kore", "abc")).await.unwrap();
        let session = h.model.take_session();

        session
            .events
            .send(ModelEvent::Error("connection reset".into()))
            .await
            .unwrap();

        let snapshot = wait_for(&h.orchestrator, |s| s.status == SessionStatus::Failed).await;
        assert!(snapshot.last_error.unwrap().contains("connection reset"));
        assert_eq!(h.mic.live_tracks.load(Ordering::SeqCst), 0);
        assert_eq!(h.avatar.live.load(Ordering::SeqCst), 0);

        // No automatic retry; the user stops or restarts.
        h.orchestrator.stop().await;
        assert_eq!(h.orchestrator.status(), SessionStatus::Idle);
        assert_eq!(h.avatar.disconnects.load(Ordering::SeqCst), 1);
        assert!(h.model.sessions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn remote_close_parks_session_in_closed() {
        let h = harness();
        h.orchestrator.start(subject("Kore", "abc")).await.unwrap();
        let session = h.model.take_session();

        session
            .events
            .send(ModelEvent::Closed(Some("1000 bye".into())))
            .await
            .unwrap();

        wait_for(&h.orchestrator, |s| s.status == SessionStatus::Closed).await;
        h.orchestrator.start(subject("Kore", "abc")).await.unwrap();
        assert_eq!(h.orchestrator.status(), SessionStatus::Active);
        assert_eq!(h.mic.live_tracks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn model_open_failure_releases_microphone_and_avatar() {
        let mut model = MockModelProvider::new();
        model
            .expect_open()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("403 Forbidden")));
        let avatar = Arc::new(FakeAvatar::default());
        let mic = Arc::new(FakeMicrophone::default());
        let orchestrator = SessionOrchestrator::new(
            Arc::new(model),
            avatar.clone(),
            mic.clone(),
            Arc::new(RecordingRenderer::default()),
            SessionSettings::default(),
        );

        let result = orchestrator.start(subject("Kore", "abc")).await;

        assert!(matches!(result, Err(SessionError::NegotiationFailed(ref m)) if m.contains("403")));
        assert_eq!(orchestrator.status(), SessionStatus::Idle);
        assert_eq!(mic.live_tracks.load(Ordering::SeqCst), 0);
        assert_eq!(avatar.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn renderer_failure_is_reported_in_ack() {
        let model = Arc::new(FakeModel::default());
        let mut renderer = MockVisualizationRenderer::new();
        renderer
            .expect_render()
            .returning(|_| Err(anyhow::anyhow!("canvas unavailable")));
        let orchestrator = SessionOrchestrator::new(
            model.clone(),
            Arc::new(FakeAvatar::default()),
            Arc::new(FakeMicrophone::default()),
            Arc::new(renderer),
            SessionSettings::default(),
        );
        orchestrator.start(subject("Kore", "abc")).await.unwrap();
        let mut session = model.take_session();

        session
            .events
            .send(ModelEvent::ToolInvocation(vec![molecule_call("7")]))
            .await
            .unwrap();

        let ack = next_ack(&mut session).await;
        assert_eq!(ack.id, "7");
        assert!(ack.response["error"].as_str().unwrap().contains("canvas unavailable"));
    }
}
