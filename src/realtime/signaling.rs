//! SDP offer/answer exchange with the hosted realtime-audio service.

use crate::error::{CredentialError, SignalingError};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
}

/// An SDP blob tagged with its role in the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Short-lived bearer token authorizing a single realtime session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralCredential {
    pub key: String,
    pub expires_at: Option<i64>,
}

#[derive(Deserialize)]
struct EphemeralKeyResponse {
    #[serde(default)]
    ephemeral_key: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
}

/// Negotiates a peer connection with the realtime-audio service.
///
/// The credential and the offer exchange are separate steps so a transport
/// can fail fast on a missing credential before it touches the microphone.
#[async_trait]
pub trait Negotiator: Send + Sync {
    async fn request_credential(&self) -> Result<EphemeralCredential, CredentialError>;

    async fn exchange_offer(
        &self,
        local_offer: &str,
        credential: &EphemeralCredential,
    ) -> Result<SessionDescription, SignalingError>;

    /// One full negotiation attempt. No retries.
    async fn negotiate(&self, local_offer: &str) -> Result<SessionDescription, SignalingError> {
        let credential = self.request_credential().await?;
        self.exchange_offer(local_offer, &credential).await
    }
}

/// HTTP implementation of [`Negotiator`].
pub struct SignalingClient {
    client: reqwest::Client,
    credential_url: String,
    calls_url: String,
}

impl SignalingClient {
    pub fn new(credential_url: impl Into<String>, calls_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), credential_url, calls_url)
    }

    pub fn with_client(
        client: reqwest::Client,
        credential_url: impl Into<String>,
        calls_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            credential_url: credential_url.into(),
            calls_url: calls_url.into(),
        }
    }
}

#[async_trait]
impl Negotiator for SignalingClient {
    async fn request_credential(&self) -> Result<EphemeralCredential, CredentialError> {
        debug!("Requesting ephemeral key from {}", self.credential_url);

        let response = self
            .client
            .get(&self.credential_url)
            .send()
            .await
            .map_err(|e| CredentialError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CredentialError::Status {
                status: status.as_u16(),
            });
        }

        let body: EphemeralKeyResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::Request(format!("invalid response body: {}", e)))?;

        match body.ephemeral_key {
            Some(key) if !key.is_empty() => Ok(EphemeralCredential {
                key,
                expires_at: body.expires_at,
            }),
            _ => Err(CredentialError::MissingKey),
        }
    }

    async fn exchange_offer(
        &self,
        local_offer: &str,
        credential: &EphemeralCredential,
    ) -> Result<SessionDescription, SignalingError> {
        debug!("Posting SDP offer ({} bytes) to {}", local_offer.len(), self.calls_url);

        let response = self
            .client
            .post(&self.calls_url)
            .header(AUTHORIZATION, format!("Bearer {}", credential.key))
            .header(CONTENT_TYPE, "application/sdp")
            .body(local_offer.to_string())
            .send()
            .await
            .map_err(|e| SignalingError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SignalingError::Status {
                status: status.as_u16(),
            });
        }

        let answer = response
            .text()
            .await
            .map_err(|e| SignalingError::Request(e.to_string()))?;

        info!("Received SDP answer ({} bytes)", answer.len());
        Ok(SessionDescription::answer(answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const OFFER: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\n";

    fn client_for(server: &MockServer) -> SignalingClient {
        SignalingClient::new(
            format!("{}/realtime/ephemeral-key", server.uri()),
            format!("{}/v1/realtime/calls", server.uri()),
        )
    }

    #[tokio::test]
    async fn test_negotiate_returns_answer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/realtime/ephemeral-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ephemeral_key": "ek_test",
                "expires_at": 1_700_000_000
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/realtime/calls"))
            .and(header("authorization", "Bearer ek_test"))
            .and(header("content-type", "application/sdp"))
            .and(body_string(OFFER))
            .respond_with(ResponseTemplate::new(201).set_body_string("v=0\r\nanswer"))
            .expect(1)
            .mount(&server)
            .await;

        let answer = client_for(&server).negotiate(OFFER).await.unwrap();
        assert_eq!(answer, SessionDescription::answer("v=0\r\nanswer"));
    }

    #[tokio::test]
    async fn test_credential_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/realtime/ephemeral-key"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(serde_json::json!({"error": "OpenAI API key not configured"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client_for(&server).negotiate(OFFER).await.unwrap_err();
        assert_eq!(
            err,
            SignalingError::Credential(CredentialError::Status { status: 500 })
        );
    }

    #[tokio::test]
    async fn test_credential_missing_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "expires_at": 1_700_000_000
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).request_credential().await.unwrap_err();
        assert_eq!(err, CredentialError::MissingKey);
    }

    #[tokio::test]
    async fn test_exchange_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/realtime/calls"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let credential = EphemeralCredential {
            key: "ek_expired".to_string(),
            expires_at: None,
        };
        let err = client_for(&server)
            .exchange_offer(OFFER, &credential)
            .await
            .unwrap_err();
        assert_eq!(err, SignalingError::Status { status: 401 });
    }
}
