use crate::config::RecognitionConfig;
use crate::gate::GateMode;
use opencv::{core::Mat, core::Vector, imgcodecs};
use plate_wire::{GateAction, RecognitionResponse, GATE_MODE_FIELD, IMAGE_FIELD, LOT_FIELD};
use reqwest::multipart::{Form, Part};
use thiserror::Error;
use tracing::instrument;

const JPEG_QUALITY: i32 = 95;

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("failed to encode crop: {0}")]
    EncodeFailed(#[from] opencv::Error),
    #[error("failed to build recognition request: {0}")]
    RequestFailed(#[source] reqwest::Error),
    #[error("recognition service unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),
    #[error("recognition service rejected request: {0}")]
    Rejected(String),
}

/// What the service reported back for one submitted crop.
#[derive(Debug, Clone, PartialEq)]
pub struct PlateReading {
    pub plate_text: String,
    pub confidence: f32,
    pub character_count: usize,
    pub action: GateAction,
    pub message: String,
}

/// Client for the remote recognition service. Serializes the processed crop
/// and blocks until response or timeout; errors are translated so the caller
/// can resolve them as a deny, never as an implicit allow. The client itself
/// performs no retries.
pub struct RecognitionClient {
    http: reqwest::Client,
    url: String,
    lot_id: u32,
}

impl RecognitionClient {
    pub fn new(config: &RecognitionConfig) -> Result<Self, RecognitionError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(RecognitionError::RequestFailed)?;

        Ok(Self {
            http,
            url: config.url.clone(),
            lot_id: config.lot_id,
        })
    }

    #[instrument(skip(self, crop))]
    pub async fn recognize(
        &self,
        crop: &Mat,
        mode: GateMode,
    ) -> Result<PlateReading, RecognitionError> {
        let jpeg = encode_jpeg(crop)?;

        let image_part = Part::bytes(jpeg)
            .file_name("plate.jpg")
            .mime_str("image/jpeg")
            .map_err(RecognitionError::RequestFailed)?;
        let form = Form::new()
            .part(IMAGE_FIELD, image_part)
            .text(LOT_FIELD, self.lot_id.to_string())
            .text(GATE_MODE_FIELD, mode.as_str());

        let response = self
            .http
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(RecognitionError::Unreachable)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(RecognitionError::Unreachable)?;

        parse_response(status.as_u16(), &body)
    }
}

fn encode_jpeg(crop: &Mat) -> Result<Vec<u8>, opencv::Error> {
    let mut buf = Vector::<u8>::new();
    let mut params = Vector::<i32>::new();
    params.push(imgcodecs::IMWRITE_JPEG_QUALITY);
    params.push(JPEG_QUALITY);
    imgcodecs::imencode(".jpg", crop, &mut buf, &params)?;
    Ok(buf.into())
}

/// A non-200 status or a body that does not parse as the wire contract is a
/// rejection; only transport-level failures count as unreachable.
fn parse_response(status: u16, body: &str) -> Result<PlateReading, RecognitionError> {
    if !(200..300).contains(&status) {
        let reason = serde_json::from_str::<RecognitionResponse>(body)
            .map(|r| r.message)
            .unwrap_or_else(|_| body.trim().to_string());
        return Err(RecognitionError::Rejected(format!(
            "status {}: {}",
            status, reason
        )));
    }

    let response: RecognitionResponse = serde_json::from_str(body)
        .map_err(|e| RecognitionError::Rejected(format!("malformed response: {}", e)))?;

    Ok(PlateReading {
        plate_text: response.plate_text,
        confidence: response.confidence,
        character_count: response.character_count,
        action: response.gate_action,
        message: response.message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_open_response_is_parsed() {
        let body = r#"{
            "success": true,
            "plate_text": "B1234XYZ",
            "confidence": 0.92,
            "character_count": 8,
            "gate_action": "OPEN",
            "message": "registered vehicle"
        }"#;

        let reading = parse_response(200, body).unwrap();
        assert_eq!(reading.plate_text, "B1234XYZ");
        assert_eq!(reading.action, GateAction::Open);
        assert_eq!(reading.character_count, 8);
    }

    #[test]
    fn deny_body_keeps_its_reason() {
        let body = r#"{
            "success": true,
            "plate_text": "B1234XYZ",
            "confidence": 0.9,
            "character_count": 8,
            "gate_action": "DENY",
            "message": "vehicle not registered"
        }"#;

        let reading = parse_response(200, body).unwrap();
        assert_eq!(reading.action, GateAction::Deny);
        assert_eq!(reading.message, "vehicle not registered");
    }

    #[test]
    fn non_success_status_is_rejected_with_server_message() {
        let body = r#"{"success": false, "gate_action": "DENY", "message": "no image provided"}"#;

        let err = parse_response(400, body).unwrap_err();
        match err {
            RecognitionError::Rejected(reason) => {
                assert!(reason.contains("400"));
                assert!(reason.contains("no image provided"));
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = parse_response(200, "<html>gateway error</html>").unwrap_err();
        assert!(matches!(err, RecognitionError::Rejected(_)));
    }

    #[tokio::test]
    async fn transport_failure_is_unreachable() {
        use crate::config::RecognitionConfig;
        use opencv::core::{Scalar, CV_8UC3};

        // Port 9 (discard) is not listening; the connect fails immediately.
        let client = RecognitionClient::new(&RecognitionConfig {
            url: "http://127.0.0.1:9/api/parking/process".into(),
            timeout_secs: 1,
            lot_id: 1,
        })
        .unwrap();
        let crop =
            Mat::new_rows_cols_with_default(32, 100, CV_8UC3, Scalar::all(127.0)).unwrap();

        let err = client.recognize(&crop, GateMode::Entry).await.unwrap_err();

        assert!(matches!(err, RecognitionError::Unreachable(_)));
        // The capture loop surfaces this text as the deny reason.
        assert!(err.to_string().contains("unreachable"));
    }
}
