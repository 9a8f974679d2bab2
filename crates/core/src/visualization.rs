//! The `updateVisualization` tool: its declaration, argument parsing, and the
//! single-slot mailbox the renderer reads from.

use crate::error::SessionError;
use crate::generic_types::FunctionDeclaration;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use tokio::sync::watch;

pub const UPDATE_VISUALIZATION: &str = "updateVisualization";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationKind {
    Plot,
    Shape,
    Equation,
    #[default]
    Clear,
    Shape3d,
    Physics,
    Chemistry,
    Biology,
}

/// The last applied visualization, or the clear sentinel (`type: "clear"`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VisualizationCommand {
    #[serde(rename = "type")]
    pub kind: VisualizationKind,
    #[serde(rename = "subType", default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    #[serde(deserialize_with = "data_as_string")]
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl VisualizationCommand {
    pub fn clear() -> Self {
        Self::default()
    }

    pub fn is_clear(&self) -> bool {
        self.kind == VisualizationKind::Clear
    }

    /// Parses tool-call arguments.
    pub fn from_args(args: &Value) -> Result<Self, SessionError> {
        serde_json::from_value(args.clone()).map_err(|e| {
            SessionError::ProtocolViolation(format!("invalid {UPDATE_VISUALIZATION} arguments: {e}"))
        })
    }
}

// The schema declares `data` as a string, but models sometimes send the JSON
// configuration as an object.
fn data_as_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

pub fn update_visualization_declaration() -> FunctionDeclaration {
    FunctionDeclaration {
        name: UPDATE_VISUALIZATION.to_string(),
        description: "Updates the mathematical or scientific visualization display.".to_string(),
        parameters: json!({
            "type": "OBJECT",
            "properties": {
                "type": {
                    "type": "STRING",
                    "description": "Domain of visualization.",
                    "enum": ["plot", "shape", "equation", "clear", "shape3d", "physics", "chemistry", "biology"]
                },
                "subType": {
                    "type": "STRING",
                    "description": "Specific simulation type.",
                    "enum": ["projectile", "pendulum", "solar_system", "molecule", "periodic_table", "dna", "cell", "neuron"]
                },
                "data": {
                    "type": "STRING",
                    "description": "Configuration data (JSON string or formula)."
                },
                "label": {
                    "type": "STRING",
                    "description": "A descriptive label for the visualization."
                }
            },
            "required": ["type", "data"]
        }),
    }
}

/// Single current visualization. Each write replaces the previous value;
/// readers subscribe and always see the latest.
#[derive(Debug)]
pub struct VisualizationSlot {
    tx: watch::Sender<VisualizationCommand>,
}

impl Default for VisualizationSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl VisualizationSlot {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(VisualizationCommand::clear());
        Self { tx }
    }

    /// Stores `command`. Returns false when it equals the current value.
    pub fn replace(&self, command: VisualizationCommand) -> bool {
        self.replace_if(command, || true)
    }

    /// Like [`replace`](Self::replace), but `live` is checked under the slot's
    /// write lock so a writer that has been retired cannot race a clear.
    pub fn replace_if(&self, command: VisualizationCommand, live: impl FnOnce() -> bool) -> bool {
        self.tx.send_if_modified(|current| {
            if !live() || *current == command {
                return false;
            }
            *current = command;
            true
        })
    }

    pub fn clear(&self) -> bool {
        self.replace(VisualizationCommand::clear())
    }

    pub fn current(&self) -> VisualizationCommand {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<VisualizationCommand> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_molecule_invocation() {
        let command = VisualizationCommand::from_args(
            &json!({"type": "chemistry", "subType": "molecule", "data": "H2O"}),
        )
        .unwrap();
        assert_eq!(
            command,
            VisualizationCommand {
                kind: VisualizationKind::Chemistry,
                sub_type: Some("molecule".to_string()),
                data: "H2O".to_string(),
                label: None,
            }
        );
    }

    #[test]
    fn object_data_is_kept_as_json_text() {
        let command = VisualizationCommand::from_args(
            &json!({"type": "plot", "data": {"fn": "x^2"}, "label": "Parabola"}),
        )
        .unwrap();
        assert_eq!(command.data, r#"{"fn":"x^2"}"#);
        assert_eq!(command.label.as_deref(), Some("Parabola"));
    }

    #[test]
    fn rejects_missing_or_unknown_fields() {
        assert!(matches!(
            VisualizationCommand::from_args(&json!({"type": "plot"})),
            Err(SessionError::ProtocolViolation(_))
        ));
        assert!(VisualizationCommand::from_args(&json!({"type": "hologram", "data": ""})).is_err());
        assert!(VisualizationCommand::from_args(&json!("plot")).is_err());
    }

    #[test]
    fn clear_serializes_as_sentinel() {
        let value = serde_json::to_value(VisualizationCommand::clear()).unwrap();
        assert_eq!(value, json!({"type": "clear", "data": ""}));
    }

    #[test]
    fn slot_keeps_only_latest_command() {
        let slot = VisualizationSlot::new();
        let rx = slot.subscribe();
        let plot = VisualizationCommand {
            kind: VisualizationKind::Plot,
            data: "sin(x)".into(),
            ..Default::default()
        };

        assert!(slot.replace(plot.clone()));
        assert!(!slot.replace(plot.clone()));
        assert_eq!(*rx.borrow(), plot);

        assert!(slot.clear());
        assert!(rx.borrow().is_clear());
    }

    #[test]
    fn declaration_requires_type_and_data() {
        let declaration = update_visualization_declaration();
        assert_eq!(declaration.name, UPDATE_VISUALIZATION);
        assert_eq!(declaration.parameters["required"], json!(["type", "data"]));
        assert_eq!(
            declaration.parameters["properties"]["subType"]["enum"]
                .as_array()
                .map(Vec::len),
            Some(8)
        );
    }
}
