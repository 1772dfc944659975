//! Wire contract between the edge node and the plate recognition service.
//!
//! The edge posts a multipart form (processed plate crop plus gate context)
//! and receives a JSON [`RecognitionResponse`] carrying the final gate
//! verdict. Both sides depend on this crate so the field names cannot drift.

use serde::{Deserialize, Serialize};

/// Multipart field holding the JPEG-encoded plate crop.
pub const IMAGE_FIELD: &str = "image";
/// Multipart field holding the parking lot identifier.
pub const LOT_FIELD: &str = "parkiran_id";
/// Multipart field holding the gate mode (entry or exit).
pub const GATE_MODE_FIELD: &str = "gate_type";

/// Header carrying the shared secret between services.
pub const EDGE_SECRET_HEADER: &str = "x-edge-secret";

/// The authorization verdict forwarded to the edge actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateAction {
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "DENY")]
    Deny,
}

/// Response body of `POST /api/parking/process`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionResponse {
    pub success: bool,
    #[serde(default)]
    pub plate_text: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub character_count: usize,
    pub gate_action: GateAction,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_action_uses_wire_tags() {
        let json = r#"{
            "success": true,
            "plate_text": "B1234XYZ",
            "confidence": 0.91,
            "character_count": 8,
            "gate_action": "OPEN",
            "message": "welcome"
        }"#;
        let response: RecognitionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.gate_action, GateAction::Open);
        assert_eq!(response.plate_text, "B1234XYZ");
    }

    #[test]
    fn missing_optional_fields_default() {
        let json = r#"{"success": false, "gate_action": "DENY"}"#;
        let response: RecognitionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.gate_action, GateAction::Deny);
        assert!(response.plate_text.is_empty());
        assert_eq!(response.character_count, 0);
    }
}
