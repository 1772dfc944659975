use crate::config::AuthorizationSettings;
use plate_wire::{GateAction, EDGE_SECRET_HEADER};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum AuthorizationError {
    #[error("failed to build authorization client: {0}")]
    ClientBuildFailed(#[source] reqwest::Error),
    #[error("authorization service unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),
    #[error("authorization service returned malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Serialize)]
struct AuthorizationRequest<'a> {
    plate_text: &'a str,
    parkiran_id: u32,
    gate_type: &'a str,
}

/// The business-rule service's answer for one recognized plate.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AuthorizationVerdict {
    pub gate_action: GateAction,
    #[serde(default)]
    pub message: String,
}

/// Client for the external business-rule service that decides whether a
/// recognized plate may pass. Denials come back as well-formed bodies on
/// non-200 statuses, so the body is parsed regardless of status code.
pub struct AuthorizationClient {
    http: reqwest::Client,
    url: String,
    edge_secret: String,
}

impl AuthorizationClient {
    pub fn new(settings: &AuthorizationSettings) -> Result<Self, AuthorizationError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(AuthorizationError::ClientBuildFailed)?;

        Ok(Self {
            http,
            url: settings.url.clone(),
            edge_secret: settings.edge_secret.clone(),
        })
    }

    #[instrument(skip(self))]
    pub async fn authorize(
        &self,
        plate_text: &str,
        parkiran_id: u32,
        gate_type: &str,
    ) -> Result<AuthorizationVerdict, AuthorizationError> {
        let request = AuthorizationRequest {
            plate_text,
            parkiran_id,
            gate_type,
        };

        let response = self
            .http
            .post(&self.url)
            .header(EDGE_SECRET_HEADER, &self.edge_secret)
            .json(&request)
            .send()
            .await
            .map_err(AuthorizationError::Unreachable)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(AuthorizationError::Unreachable)?;

        parse_verdict(status.as_u16(), &body)
    }
}

fn parse_verdict(status: u16, body: &str) -> Result<AuthorizationVerdict, AuthorizationError> {
    serde_json::from_str(body).map_err(|e| {
        AuthorizationError::Malformed(format!("status {}: {}", status, e))
    })
}
