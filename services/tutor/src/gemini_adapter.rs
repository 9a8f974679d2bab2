use anyhow::{Context, Result};
use async_trait::async_trait;
use gemini_realtime::types::{
    FunctionDeclaration, FunctionResponse, Modality, ServerEvent, ServerMessage, Setup,
};
use tokio::sync::mpsc;
use tutor_core::generic_types::{
    LiveSessionConfig, ModelCommand, ModelEvent, ModelSessionHandle, ResponseModality,
    ToolInvocation,
};
use tutor_core::realtime_api::ModelProvider;

const CHANNEL_CAPACITY: usize = 1024;

/// An adapter that implements the generic `ModelProvider` trait over `gemini_realtime`.
pub struct GeminiProvider {
    config: gemini_realtime::Config,
}

impl GeminiProvider {
    pub fn new(config: gemini_realtime::Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    async fn open(&self, config: LiveSessionConfig) -> Result<ModelSessionHandle> {
        if !self.config.has_api_key() {
            tracing::warn!("GEMINI_API_KEY is not set, the handshake will be rejected.");
        }
        let setup = build_setup(self.config.model(), &config);
        let mut client =
            gemini_realtime::open_with_config(CHANNEL_CAPACITY, self.config.clone(), setup);
        let server_rx = client
            .server_events()
            .context("Failed to take Gemini server events")?;

        let (commands, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, events) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(forward_commands(client, command_rx));
        tokio::spawn(translate_events(server_rx, event_tx));

        Ok(ModelSessionHandle { commands, events })
    }
}

/// Maps the provider-agnostic session config onto a Live `setup` message.
pub fn build_setup(model: &str, config: &LiveSessionConfig) -> Setup {
    let modality = match config.response_modality {
        ResponseModality::Audio => Modality::Audio,
        ResponseModality::Text => Modality::Text,
    };
    let declarations = config
        .tools
        .iter()
        .map(|tool| FunctionDeclaration {
            name: tool.name.clone(),
            description: Some(tool.description.clone()),
            parameters: tool.parameters.clone(),
        })
        .collect();

    let mut setup = Setup::new(model)
        .with_response_modality(modality)
        .with_output_transcription(config.output_transcription)
        .with_function_declarations(declarations);
    if !config.instructions.is_empty() {
        setup = setup.with_system_instruction(&config.instructions);
    }
    if !config.voice.is_empty() {
        setup = setup.with_voice(&config.voice);
    }
    setup
}

// Owns the client: when the orchestrator drops its command sender this task
// ends, the client is dropped and the socket closes.
async fn forward_commands(client: gemini_realtime::Client, mut command_rx: mpsc::Receiver<ModelCommand>) {
    while let Some(command) = command_rx.recv().await {
        let result = match command {
            ModelCommand::Audio(frame) => {
                client
                    .send_audio(frame.mime_type(), frame.to_base64())
                    .await
            }
            ModelCommand::ToolAck(ack) => {
                tracing::debug!("Sending tool response {} ({})", ack.name, ack.id);
                client
                    .send_tool_response(FunctionResponse {
                        id: ack.id,
                        name: ack.name,
                        response: ack.response,
                    })
                    .await
            }
        };
        if let Err(e) = result {
            tracing::warn!("Gemini session no longer accepts input: {}", e);
            break;
        }
    }
    tracing::debug!("Gemini command forwarder finished.");
}

async fn translate_events(mut server_rx: gemini_realtime::ServerRx, event_tx: mpsc::Sender<ModelEvent>) {
    while let Some(event) = server_rx.recv().await {
        let (events, terminal) = match event {
            ServerEvent::Message(message) => (translate(&message), false),
            ServerEvent::Error(e) => (vec![ModelEvent::Error(e)], false),
            ServerEvent::Close { reason } => (vec![ModelEvent::Closed(reason)], true),
        };
        for event in events {
            if event_tx.send(event).await.is_err() {
                tracing::debug!("Model event receiver dropped, stopping adapter task.");
                return;
            }
        }
        if terminal {
            return;
        }
    }
    let _ = event_tx.send(ModelEvent::Closed(None)).await;
}

/// Translates one server message into model events, in the order the
/// orchestrator must apply them.
pub fn translate(message: &ServerMessage) -> Vec<ModelEvent> {
    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        events.push(ModelEvent::SetupComplete);
    }

    if let Some(content) = &message.server_content {
        if let Some(transcription) = &content.output_transcription {
            if !transcription.text.is_empty() {
                events.push(ModelEvent::TranscriptFragment(transcription.text.clone()));
            }
        }
    }

    if let Some(tool_call) = &message.tool_call {
        let calls: Vec<ToolInvocation> = tool_call
            .function_calls
            .iter()
            .map(|call| ToolInvocation {
                id: call.id.clone(),
                name: call.name.clone(),
                args: call.args.clone(),
            })
            .collect();
        if !calls.is_empty() {
            events.push(ModelEvent::ToolInvocation(calls));
        }
    }

    if let Some(cancellation) = &message.tool_call_cancellation {
        events.push(ModelEvent::ToolCancellation(cancellation.ids.clone()));
    }

    if let Some(content) = &message.server_content {
        if let Some(audio) = content.audio_data() {
            events.push(ModelEvent::AudioChunk(audio.to_string()));
        }
        if content.interrupted == Some(true) {
            events.push(ModelEvent::Interrupted);
        }
        if content.turn_complete == Some(true) {
            events.push(ModelEvent::TurnComplete);
        }
    }

    if let Some(go_away) = &message.go_away {
        events.push(ModelEvent::GoAway(go_away.time_left.clone()));
    }

    events
}
