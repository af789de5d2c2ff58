//! Server-side minting of short-lived realtime credentials.

use crate::error::MintError;
use crate::retry::{with_retry, RetryPolicy};
use log::{debug, error};
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const DEFAULT_REALTIME_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-10-01";
pub const DEFAULT_VOICE: &str = "alloy";

/// Body served by `GET /realtime/ephemeral-key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintedKey {
    pub ephemeral_key: String,
    pub expires_at: Option<i64>,
}

#[derive(Deserialize)]
struct ClientSecretResponse {
    value: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
}

pub struct EphemeralKeyMinter {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    voice: String,
    retry: RetryPolicy,
}

impl EphemeralKeyMinter {
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.into(),
            voice: voice.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Request a client secret for one realtime session.
    pub async fn mint(&self) -> Result<MintedKey, MintError> {
        let api_key = self.api_key.as_deref().ok_or(MintError::MissingApiKey)?;

        let result = with_retry(self.retry, "Client secret request", MintError::is_retryable, || {
            self.mint_once(api_key)
        })
        .await;

        if let Err(e) = &result {
            error!("Failed to mint ephemeral key: {}", e);
        }
        result
    }

    async fn mint_once(&self, api_key: &str) -> Result<MintedKey, MintError> {
        let url = format!("{}/realtime/client_secrets", self.api_base);
        debug!("Requesting client secret from {}", url);

        let body = json!({
            "session": {
                "type": "realtime",
                "model": self.model,
                "audio": {
                    "output": { "voice": self.voice }
                }
            }
        });

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| MintError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MintError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let secret: ClientSecretResponse = response
            .json()
            .await
            .map_err(|e| MintError::Decode(e.to_string()))?;

        match secret.value {
            Some(value) if !value.is_empty() => Ok(MintedKey {
                ephemeral_key: value,
                expires_at: secret.expires_at,
            }),
            _ => Err(MintError::Decode("missing value".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn minter_for(server: &MockServer, key: Option<&str>) -> EphemeralKeyMinter {
        EphemeralKeyMinter::new(
            format!("{}/v1", server.uri()),
            key.map(str::to_string),
            DEFAULT_REALTIME_MODEL,
            DEFAULT_VOICE,
        )
        .with_retry_policy(RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        })
    }

    #[tokio::test]
    async fn test_mint_maps_client_secret() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/realtime/client_secrets"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "session": {
                    "type": "realtime",
                    "model": DEFAULT_REALTIME_MODEL,
                    "audio": {"output": {"voice": "alloy"}}
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": "ek_abc123",
                "expires_at": 1_756_000_000
            })))
            .expect(1)
            .mount(&server)
            .await;

        let key = minter_for(&server, Some("sk-test")).mint().await.unwrap();
        assert_eq!(
            key,
            MintedKey {
                ephemeral_key: "ek_abc123".into(),
                expires_at: Some(1_756_000_000)
            }
        );
    }

    #[tokio::test]
    async fn test_missing_api_key_never_calls_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let minter = minter_for(&server, Some("   "));
        assert!(!minter.has_api_key());
        let err = minter.mint().await.unwrap_err();
        assert_eq!(err, MintError::MissingApiKey);
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .expect(1)
            .mount(&server)
            .await;

        let err = minter_for(&server, Some("sk-bad")).mint().await.unwrap_err();
        assert_eq!(
            err,
            MintError::Upstream {
                status: 401,
                body: "invalid key".into()
            }
        );
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = minter_for(&server, Some("sk-test")).mint().await.unwrap_err();
        assert_eq!(err.status_code(), 503);
    }
}
