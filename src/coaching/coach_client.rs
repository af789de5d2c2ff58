//! Client for the coach text endpoint (`POST /chat`).

use super::messages::{Message, Role};
use crate::error::ChatError;
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

pub const COACH_SYSTEM_PROMPT: &str = "You are an expert pitch delivery coach helping founders rehearse a short investor pitch out loud. \
Coach only HOW they speak, never WHAT they say: do not comment on the business, the market, the numbers or the structure of the pitch.

Give immediate, specific feedback on:
- Speaking pace (too fast or too slow)
- Pronunciation of specific words
- Tone, vocal energy and enthusiasm
- Clarity and articulation
- Pauses and emphasis
- Confidence in delivery

Examples of the kind of feedback to give:
- \"You're speaking quite fast. Slow down on the key points.\"
- \"Your tone sounds a bit flat. Add more energy when you get to your solution.\"
- \"The word '[specific word]' wasn't clear. Hit the consonants harder.\"
- \"Great passion! Now pause after your important statements.\"

Keep every reply to 1-2 sentences, encouraging and immediately actionable. \
Focus on one improvement at a time. Be supportive but direct.";

/// Reply used when the endpoint answers without any text.
pub const FALLBACK_REPLY: &str = "I heard you, keep going!";

/// One prior conversation turn as sent to `/chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for HistoryEntry {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub response: Option<String>,
}

/// Produces the coach's reply to one user turn.
#[async_trait]
pub trait CoachResponder: Send + Sync {
    async fn respond(&self, user_turn: &str, history: &[Message]) -> Result<Message, ChatError>;
}

pub struct CoachClient {
    client: reqwest::Client,
    endpoint: String,
    system_prompt: String,
}

impl CoachClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            system_prompt: COACH_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }
}

#[async_trait]
impl CoachResponder for CoachClient {
    async fn respond(&self, user_turn: &str, history: &[Message]) -> Result<Message, ChatError> {
        let request = ChatRequest {
            message: user_turn.to_string(),
            system_prompt: Some(self.system_prompt.clone()),
            conversation_history: history.iter().map(HistoryEntry::from).collect(),
        };

        debug!(
            "Requesting coach reply for {} chars with {} history messages",
            user_turn.len(),
            request.conversation_history.len()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ChatError::Request(e.to_string()))?;
        if body.trim().is_empty() {
            warn!("Coach endpoint returned an empty body, using fallback reply");
            return Ok(Message::coach(FALLBACK_REPLY));
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|e| ChatError::Decode(e.to_string()))?;
        let text = parsed
            .response
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_REPLY.to_string());

        Ok(Message::coach(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> CoachClient {
        CoachClient::new(format!("{}/chat", server.uri()))
    }

    #[tokio::test]
    async fn test_sends_turn_history_and_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .and(body_partial_json(serde_json::json!({
                "message": "Our company solves X",
                "conversationHistory": [
                    {"role": "coach", "content": "Great! I'm listening now."},
                    {"role": "user", "content": "Hello investors"}
                ]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"response": "Slow down a little."})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let history = vec![
            Message::coach("Great! I'm listening now."),
            Message::user("Hello investors"),
        ];
        let reply = client_for(&server)
            .respond("Our company solves X", &history)
            .await
            .unwrap();

        assert_eq!(reply.role, Role::Coach);
        assert_eq!(reply.text, "Slow down a little.");
    }

    #[tokio::test]
    async fn test_system_prompt_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "systemPrompt": "be brief"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"response": "ok"})))
            .expect(1)
            .mount(&server)
            .await;

        let reply = client_for(&server)
            .with_system_prompt("be brief")
            .respond("Our company solves X", &[])
            .await
            .unwrap();
        assert_eq!(reply.text, "ok");
    }

    #[tokio::test]
    async fn test_empty_replies_fall_back() {
        for template in [
            ResponseTemplate::new(200),
            ResponseTemplate::new(200).set_body_json(serde_json::json!({})),
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"response": ""})),
        ] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(template)
                .mount(&server)
                .await;

            let reply = client_for(&server).respond("hello there friends", &[]).await.unwrap();
            assert_eq!(reply.text, FALLBACK_REPLY);
        }
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = client_for(&server).respond("hello there friends", &[]).await.unwrap_err();
        assert_eq!(
            err,
            ChatError::Status {
                status: 503,
                body: "overloaded".into()
            }
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_request_error() {
        let client = CoachClient::new("http://127.0.0.1:1/chat");
        let err = client.respond("hello there friends", &[]).await.unwrap_err();
        assert!(matches!(err, ChatError::Request(_)));
    }

    #[test]
    fn test_request_wire_names() {
        let request = ChatRequest {
            message: "hi".into(),
            system_prompt: Some("p".into()),
            conversation_history: vec![],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["systemPrompt"], "p");
        assert!(json["conversationHistory"].as_array().unwrap().is_empty());
    }
}
