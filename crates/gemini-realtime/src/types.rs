//! Wire types for the Gemini Live `BidiGenerateContent` stream.
//!
//! Field names follow the JSON protocol (camelCase). Outgoing messages are
//! externally tagged by their single top-level key (`setup`, `realtimeInput`,
//! `toolResponse`); incoming messages are one struct with optional members
//! because the server sets exactly one of them per frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// Outgoing messages

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
}

impl Setup {
    pub fn new(model: &str) -> Self {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        Self {
            model,
            generation_config: GenerationConfig::default(),
            system_instruction: None,
            tools: Vec::new(),
            output_audio_transcription: None,
        }
    }

    pub fn with_response_modality(mut self, modality: Modality) -> Self {
        self.generation_config.response_modalities = vec![modality];
        self
    }

    pub fn with_system_instruction(mut self, text: &str) -> Self {
        self.system_instruction = Some(Content {
            role: None,
            parts: vec![Part {
                text: Some(text.to_string()),
                inline_data: None,
            }],
        });
        self
    }

    pub fn with_voice(mut self, voice_name: &str) -> Self {
        self.generation_config.speech_config = Some(SpeechConfig {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: voice_name.to_string(),
                },
            },
        });
        self
    }

    pub fn with_output_transcription(mut self, enabled: bool) -> Self {
        self.output_audio_transcription = enabled.then_some(AudioTranscriptionConfig {});
        self
    }

    pub fn with_function_declarations(mut self, declarations: Vec<FunctionDeclaration>) -> Self {
        if !declarations.is_empty() {
            self.tools.push(Tool {
                function_declarations: declarations,
            });
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Audio,
    Text,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioTranscriptionConfig {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// OpenAPI-style parameter schema.
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    /// Base64-encoded payload.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

impl RealtimeInput {
    pub fn audio(mime_type: &str, base64_data: String) -> Self {
        Self {
            media_chunks: vec![Blob {
                mime_type: mime_type.to_string(),
                data: base64_data,
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

// Incoming messages

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCall>,
    #[serde(default)]
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: Option<bool>,
    #[serde(default)]
    pub interrupted: Option<bool>,
    #[serde(default)]
    pub generation_complete: Option<bool>,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
}

impl ServerContent {
    /// Base64 audio carried by the first part of the model turn, if any.
    pub fn audio_data(&self) -> Option<&str> {
        self.model_turn
            .as_ref()
            .and_then(|turn| turn.parts.first())
            .and_then(|part| part.inline_data.as_ref())
            .map(|blob| blob.data.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: Option<i64>,
    #[serde(default)]
    pub response_token_count: Option<i64>,
    #[serde(default)]
    pub total_token_count: Option<i64>,
}

/// What the client's reader task forwards to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Message(Box<ServerMessage>),
    /// Transport-level failure. No further events follow except `Close`.
    Error(String),
    Close { reason: Option<String> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn setup_serializes_with_protocol_field_names() {
        let setup = Setup::new("gemini-2.5-flash-native-audio-preview-09-2025")
            .with_response_modality(Modality::Audio)
            .with_system_instruction("Be kind.")
            .with_voice("Kore")
            .with_output_transcription(true)
            .with_function_declarations(vec![FunctionDeclaration {
                name: "updateVisualization".to_string(),
                description: None,
                parameters: json!({"type": "OBJECT"}),
            }]);

        let value = serde_json::to_value(ClientMessage::Setup(setup)).unwrap();
        assert_eq!(
            value,
            json!({
                "setup": {
                    "model": "models/gemini-2.5-flash-native-audio-preview-09-2025",
                    "generationConfig": {
                        "responseModalities": ["AUDIO"],
                        "speechConfig": {
                            "voiceConfig": {"prebuiltVoiceConfig": {"voiceName": "Kore"}}
                        }
                    },
                    "systemInstruction": {"parts": [{"text": "Be kind."}]},
                    "tools": [{"functionDeclarations": [
                        {"name": "updateVisualization", "parameters": {"type": "OBJECT"}}
                    ]}],
                    "outputAudioTranscription": {}
                }
            })
        );
    }

    #[test]
    fn realtime_input_and_tool_response_are_tagged() {
        let audio = ClientMessage::RealtimeInput(RealtimeInput::audio(
            "audio/pcm;rate=16000",
            "AAAA".to_string(),
        ));
        assert_eq!(
            serde_json::to_value(audio).unwrap(),
            json!({"realtimeInput": {"mediaChunks": [
                {"mimeType": "audio/pcm;rate=16000", "data": "AAAA"}
            ]}})
        );

        let ack = ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![FunctionResponse {
                id: "42".to_string(),
                name: "updateVisualization".to_string(),
                response: json!({"result": "ok"}),
            }],
        });
        assert_eq!(
            serde_json::to_value(ack).unwrap(),
            json!({"toolResponse": {"functionResponses": [
                {"id": "42", "name": "updateVisualization", "response": {"result": "ok"}}
            ]}})
        );
    }

    #[test]
    fn server_content_parses_audio_transcript_and_turn_flags() {
        let msg: ServerMessage = serde_json::from_value(json!({
            "serverContent": {
                "modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AQID"}}]},
                "outputTranscription": {"text": "Hello"},
                "turnComplete": true
            }
        }))
        .unwrap();

        let content = msg.server_content.unwrap();
        assert_eq!(content.audio_data(), Some("AQID"));
        assert_eq!(content.output_transcription.unwrap().text, "Hello");
        assert_eq!(content.turn_complete, Some(true));
        assert!(msg.tool_call.is_none());
    }

    #[test]
    fn tool_call_parses_function_calls_in_order() {
        let msg: ServerMessage = serde_json::from_str(
            r#"{"toolCall":{"functionCalls":[
                {"id":"1","name":"updateVisualization","args":{"type":"plot","data":"x^2"}},
                {"id":"2","name":"updateVisualization","args":{"type":"clear","data":""}}
            ]}}"#,
        )
        .unwrap();
        let calls = msg.tool_call.unwrap().function_calls;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "1");
        assert_eq!(calls[1].args["type"], "clear");
    }

    #[test]
    fn setup_complete_is_recognised() {
        let msg: ServerMessage = serde_json::from_str(r#"{"setupComplete":{}}"#).unwrap();
        assert!(msg.setup_complete.is_some());
    }
}
