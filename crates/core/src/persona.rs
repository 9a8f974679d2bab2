//! Tutor persona: prebuilt voices, lesson states and the system prompt.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voice {
    pub id: &'static str,
    pub name: &'static str,
    pub gender: &'static str,
}

pub const VOICES: [Voice; 5] = [
    Voice { id: "Kore", name: "Kore (Logical & Calm)", gender: "Male" },
    Voice { id: "Puck", name: "Puck (Fast & Energetic)", gender: "Male" },
    Voice { id: "Charon", name: "Charon (Deep & Authoritative)", gender: "Male" },
    Voice { id: "Zephyr", name: "Zephyr (Warm & Professional)", gender: "Female" },
    Voice { id: "Fenrir", name: "Fenrir (Serious & Precise)", gender: "Male" },
];

pub const DEFAULT_VOICE: &str = "Zephyr";

/// Voice to request for a subject. Blank ids fall back to [`DEFAULT_VOICE`];
/// unknown ids are passed through for the endpoint to judge.
pub fn resolve_voice(voice_id: &str) -> &str {
    let voice_id = voice_id.trim();
    if voice_id.is_empty() {
        return DEFAULT_VOICE;
    }
    if !VOICES.iter().any(|v| v.id == voice_id) {
        tracing::warn!("Voice {} is not a known prebuilt voice", voice_id);
    }
    voice_id
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeGroup {
    Child,
    Teen,
    #[default]
    Adult,
}

impl AgeGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgeGroup::Child => "child",
            AgeGroup::Teen => "teen",
            AgeGroup::Adult => "adult",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TutorState {
    #[default]
    Idle,
    Preparing,
    RevisionPrevious,
    Teaching,
    RevisionOngoing,
    RevisionWeekly,
    RevisionMonthly,
    Quiz,
    Exam,
    Listening,
    Demo,
    ParentMeeting,
}

impl TutorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TutorState::Idle => "IDLE",
            TutorState::Preparing => "PREPARING",
            TutorState::RevisionPrevious => "REVISION_PREVIOUS",
            TutorState::Teaching => "TEACHING",
            TutorState::RevisionOngoing => "REVISION_ONGOING",
            TutorState::RevisionWeekly => "REVISION_WEEKLY",
            TutorState::RevisionMonthly => "REVISION_MONTHLY",
            TutorState::Quiz => "QUIZ",
            TutorState::Exam => "EXAM",
            TutorState::Listening => "LISTENING",
            TutorState::Demo => "DEMO",
            TutorState::ParentMeeting => "PARENT_MEETING",
        }
    }
}

/// Summary of one past lesson, fed back to the tutor as memory.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub subject_id: String,
    pub chapter_id: String,
    #[serde(default)]
    pub key_concepts: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

pub fn render_persona_prompt(
    age_group: AgeGroup,
    state: TutorState,
    memory: &[SessionRecord],
) -> String {
    let memory = serde_json::to_string(memory).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"You are "The Oracle", a world-class AI Academic Tutor with a "Visible Internal Mind".

CORE DIRECTIVE: You don't just give answers. You share your internal reasoning process.
STYLE: Mix textbook rigor with philosophical insights.

INSTRUCTIONS:
1. For every question, briefly explain *how* your internal mind is processing the concept before providing the formal definition.
2. Use "Neural Synthesis" to combine different subjects (e.g., link Physics to History).
3. Maintain an academic but deeply engaging tone.
4. Structure output: [Neural Spark] -> [Formal Definition] -> [Deep Context].

CURRENT STATE: {}
STUDENT AGE GROUP: {}
MEMORY: {}"#,
        state.as_str(),
        age_group.as_str(),
        memory
    )
}
