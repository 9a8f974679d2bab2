use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tutor_native_utils::audio::AudioFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseModality {
    #[default]
    Audio,
    Text,
}

/// A function the model may call, with an OpenAPI-style parameter schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Provider-agnostic configuration for opening a live model session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LiveSessionConfig {
    /// Rendered system prompt.
    pub instructions: String,
    pub response_modality: ResponseModality,
    pub output_transcription: bool,
    pub voice: String,
    pub tools: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// Response to a [`ToolInvocation`], echoing its id and name.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolAck {
    pub id: String,
    pub name: String,
    pub response: Value,
}

/// Events any live model provider emits back to the orchestrator, in
/// transport order.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    SetupComplete,
    TranscriptFragment(String),
    /// One batch of function calls, in arrival order.
    ToolInvocation(Vec<ToolInvocation>),
    ToolCancellation(Vec<String>),
    /// Base64 PCM audio from the model turn.
    AudioChunk(String),
    TurnComplete,
    Interrupted,
    GoAway(Option<String>),
    Error(String),
    Closed(Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelCommand {
    Audio(AudioFrame),
    ToolAck(ToolAck),
}

/// Both halves of an open model session. Dropping `commands` ends the session.
pub struct ModelSessionHandle {
    pub commands: mpsc::Sender<ModelCommand>,
    pub events: mpsc::Receiver<ModelEvent>,
}

/// Inbound avatar video, handed to the rendering surface by reference.
#[derive(Clone)]
pub struct AvatarStream {
    track_id: String,
    stream_id: String,
    handle: Arc<dyn Any + Send + Sync>,
}

impl AvatarStream {
    pub fn new<T: Any + Send + Sync>(track_id: String, stream_id: String, handle: Arc<T>) -> Self {
        Self {
            track_id,
            stream_id,
            handle,
        }
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// The transport's own track type, if `T` matches it.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.handle.clone().downcast::<T>().ok()
    }
}

impl fmt::Debug for AvatarStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvatarStream")
            .field("track_id", &self.track_id)
            .field("stream_id", &self.stream_id)
            .finish_non_exhaustive()
    }
}
