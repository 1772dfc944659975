use crate::model_service::ModelError;
use crate::reconstruct::{reconstruct, RecognitionResult};
use crate::server::AppState;
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use plate_wire::{GateAction, RecognitionResponse, GATE_MODE_FIELD, IMAGE_FIELD, LOT_FIELD};
use tracing::instrument;

pub struct ProcessRequest {
    pub image: Vec<u8>,
    pub parkiran_id: u32,
    pub gate_type: String,
}

#[instrument(skip(state, multipart))]
pub async fn process_parking(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Response {
    let request = match read_request(&mut multipart).await {
        Ok(request) => request,
        Err(reason) => {
            tracing::warn!(%reason, "rejected malformed upload");
            let body = deny_body(None, reason);
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };

    let (status, body) = decide(&state, &request).await;
    (status, Json(body)).into_response()
}

async fn read_request(multipart: &mut Multipart) -> Result<ProcessRequest, String> {
    let mut image = None;
    let mut parkiran_id = None;
    let mut gate_type = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| format!("invalid multipart body: {}", e))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some(IMAGE_FIELD) => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| format!("failed to read image field: {}", e))?;
                image = Some(bytes.to_vec());
            }
            Some(LOT_FIELD) => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| format!("failed to read {} field: {}", LOT_FIELD, e))?;
                parkiran_id = text.trim().parse::<u32>().ok();
            }
            Some(GATE_MODE_FIELD) => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| format!("failed to read {} field: {}", GATE_MODE_FIELD, e))?;
                gate_type = Some(text);
            }
            _ => {}
        }
    }

    Ok(ProcessRequest {
        image: image.ok_or_else(|| "no image provided".to_string())?,
        parkiran_id: parkiran_id.ok_or_else(|| format!("missing or invalid {}", LOT_FIELD))?,
        gate_type: gate_type.ok_or_else(|| format!("missing {}", GATE_MODE_FIELD))?,
    })
}

/// The decision ladder for one submitted crop: recognize characters, refuse
/// unreadable or low-confidence plates, otherwise let the authorization
/// service rule. Every deny carries a stated reason, and an unreachable
/// authorization service is a deny, never an implicit allow.
async fn decide(state: &AppState, request: &ProcessRequest) -> (StatusCode, RecognitionResponse) {
    let detections = match state.model.detect_characters(&request.image) {
        Ok(detections) => detections,
        Err(ModelError::InvalidImage(reason)) => {
            return (
                StatusCode::BAD_REQUEST,
                deny_body(None, format!("invalid image: {}", reason)),
            );
        }
        Err(e) => {
            tracing::error!("character detection failed: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                deny_body(None, "character recognition failed".to_string()),
            );
        }
    };

    let result = reconstruct(detections);
    tracing::info!(
        plate = %result.plate_text,
        confidence = result.confidence,
        characters = result.character_count,
        gate = %request.gate_type,
        "recognized plate"
    );

    if result.character_count == 0 {
        return (
            StatusCode::OK,
            deny_body(Some(&result), "no plate text recognized".to_string()),
        );
    }

    if result.confidence < state.min_text_confidence {
        return (
            StatusCode::OK,
            deny_body(
                Some(&result),
                format!("low OCR confidence ({:.2})", result.confidence),
            ),
        );
    }

    match state
        .authorization
        .authorize(&result.plate_text, request.parkiran_id, &request.gate_type)
        .await
    {
        Ok(verdict) => (
            StatusCode::OK,
            RecognitionResponse {
                success: true,
                plate_text: result.plate_text,
                confidence: result.confidence,
                character_count: result.character_count,
                gate_action: verdict.gate_action,
                message: verdict.message,
            },
        ),
        Err(e) => {
            tracing::error!("authorization lookup failed: {e}");
            (
                StatusCode::OK,
                deny_body(Some(&result), "authorization service unreachable".to_string()),
            )
        }
    }
}

fn deny_body(result: Option<&RecognitionResult>, message: String) -> RecognitionResponse {
    let (plate_text, confidence, character_count) = match result {
        Some(result) => (
            result.plate_text.clone(),
            result.confidence,
            result.character_count,
        ),
        None => (String::new(), 0.0, 0),
    };

    RecognitionResponse {
        success: result.is_some(),
        plate_text,
        confidence,
        character_count,
        gate_action: GateAction::Deny,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorization::AuthorizationClient;
    use crate::config::AuthorizationSettings;
    use crate::model_service::{CharacterDetection, CharacterModel};
    use std::sync::Arc;

    struct MockCharacterModel {
        detections: Vec<CharacterDetection>,
    }

    impl CharacterModel for MockCharacterModel {
        fn detect_characters(
            &self,
            _image_data: &[u8],
        ) -> Result<Vec<CharacterDetection>, ModelError> {
            Ok(self.detections.clone())
        }
    }

    struct BrokenModel;

    impl CharacterModel for BrokenModel {
        fn detect_characters(
            &self,
            _image_data: &[u8],
        ) -> Result<Vec<CharacterDetection>, ModelError> {
            Err(ModelError::InvalidImage("not an image".into()))
        }
    }

    fn glyph(character: &str, x_center: f32, confidence: f32) -> CharacterDetection {
        CharacterDetection {
            x_center,
            character: character.into(),
            confidence,
        }
    }

    fn state_with(model: Arc<dyn CharacterModel>) -> AppState {
        // Port 9 is not listening, so any authorization lookup fails fast.
        let authorization = AuthorizationClient::new(&AuthorizationSettings {
            url: "http://127.0.0.1:9/api/parkir/edge/process".into(),
            timeout_secs: 1,
            edge_secret: "secret".into(),
        })
        .unwrap();

        AppState {
            model,
            authorization: Arc::new(authorization),
            min_text_confidence: 0.5,
        }
    }

    fn request() -> ProcessRequest {
        ProcessRequest {
            image: vec![0u8; 16],
            parkiran_id: 1,
            gate_type: "entry".into(),
        }
    }

    #[tokio::test]
    async fn no_characters_is_a_deny_with_reason() {
        let state = state_with(Arc::new(MockCharacterModel { detections: vec![] }));

        let (status, body) = decide(&state, &request()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.gate_action, GateAction::Deny);
        assert!(body.message.contains("no plate text"));
    }

    #[tokio::test]
    async fn low_confidence_is_denied_before_authorization() {
        let state = state_with(Arc::new(MockCharacterModel {
            detections: vec![glyph("B", 10.0, 0.2), glyph("1", 20.0, 0.3)],
        }));

        let (status, body) = decide(&state, &request()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.gate_action, GateAction::Deny);
        assert!(body.message.contains("low OCR confidence"));
        assert_eq!(body.plate_text, "B1");
    }

    #[tokio::test]
    async fn unreachable_authorization_denies_not_allows() {
        let state = state_with(Arc::new(MockCharacterModel {
            detections: vec![
                glyph("B", 10.0, 0.9),
                glyph("A", 20.0, 0.8),
                glyph("1", 30.0, 0.95),
            ],
        }));

        let (status, body) = decide(&state, &request()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.gate_action, GateAction::Deny);
        assert!(body.message.contains("unreachable"));
        assert_eq!(body.plate_text, "BA1");
        assert_eq!(body.character_count, 3);
    }

    #[tokio::test]
    async fn unreadable_image_is_a_bad_request() {
        let state = state_with(Arc::new(BrokenModel));

        let (status, body) = decide(&state, &request()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.gate_action, GateAction::Deny);
        assert!(!body.success);
    }
}
