//! JSON bodies exchanged with the avatar service during negotiation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRequest {
    pub face_id: String,
    pub is_sync: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionResponse {
    pub session_token: String,
}

/// SDP offer or answer, in the browser's `RTCSessionDescriptionInit` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
}

impl SessionDescription {
    pub fn offer(sdp: String) -> Self {
        Self {
            sdp,
            sdp_type: "offer".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_request_matches_wire_shape() {
        let request = SessionRequest {
            face_id: "550e8400-e29b-41d4-a716-446655440000".to_string(),
            is_sync: true,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"face_id": "550e8400-e29b-41d4-a716-446655440000", "is_sync": true})
        );
    }

    #[test]
    fn answer_parses_type_field() {
        let answer: SessionDescription =
            serde_json::from_value(json!({"sdp": "v=0\r\n", "type": "answer"})).unwrap();
        assert_eq!(answer.sdp_type, "answer");

        let token: SessionResponse =
            serde_json::from_value(json!({"session_token": "tok", "extra": 1})).unwrap();
        assert_eq!(token.session_token, "tok");
    }
}
