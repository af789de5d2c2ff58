use crate::coaching::coach_client::{ChatRequest, HistoryEntry, COACH_SYSTEM_PROMPT};
use crate::coaching::Role;
use crate::settings::LlmSettings;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::env;

// Environment variable name for custom LLM base URL override
pub const CUSTOM_LLM_BASE_URL_ENV: &str = "MICROPITCH_LLM_BASE_URL";

/// Get the effective base URL for the configured provider.
/// For the "custom" provider, checks the environment variable first.
/// Read on every call so runtime changes are picked up.
pub fn get_effective_base_url(llm: &LlmSettings) -> String {
    if llm.provider_id == "custom" {
        if let Ok(env_url) = env::var(CUSTOM_LLM_BASE_URL_ENV) {
            let trimmed = env_url.trim();
            if !trimmed.is_empty() {
                debug!(
                    "Using base URL from environment variable {}: {}",
                    CUSTOM_LLM_BASE_URL_ENV, trimmed
                );
                return trimmed.trim_end_matches('/').to_string();
            }
        }
    }
    llm.base_url.trim_end_matches('/').to_string()
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

fn history_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Coach => "assistant",
    }
}

/// System prompt first, then prior turns, then the new user turn.
fn build_messages(request: &ChatRequest) -> Vec<ChatMessage> {
    let system_prompt = request
        .system_prompt
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or(COACH_SYSTEM_PROMPT);

    let mut messages = Vec::with_capacity(request.conversation_history.len() + 2);
    messages.push(ChatMessage {
        role: "system",
        content: system_prompt.to_string(),
    });
    messages.extend(
        request
            .conversation_history
            .iter()
            .map(|HistoryEntry { role, content }| ChatMessage {
                role: history_role(*role),
                content: content.clone(),
            }),
    );
    messages.push(ChatMessage {
        role: "user",
        content: request.message.clone(),
    });
    messages
}

fn build_headers(api_key: &str) -> Result<HeaderMap, String> {
    let mut headers = HeaderMap::new();

    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("MicroPitch/", env!("CARGO_PKG_VERSION"))),
    );

    if !api_key.is_empty() {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| format!("Invalid authorization header value: {}", e))?,
        );
    }

    Ok(headers)
}

fn create_client(api_key: &str) -> Result<reqwest::Client, String> {
    let headers = build_headers(api_key)?;
    reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {}", e))
}

/// Send one coach turn to an OpenAI-compatible chat completion API.
/// Returns Ok(Some(content)) on success, Ok(None) if the response has no
/// content, or Err on HTTP and parsing failures.
pub async fn send_chat_completion(
    llm: &LlmSettings,
    api_key: &str,
    request: &ChatRequest,
) -> Result<Option<String>, String> {
    let base_url = get_effective_base_url(llm);
    let url = format!("{}/chat/completions", base_url);

    debug!(
        "Sending chat completion request to: {} ({} history messages)",
        url,
        request.conversation_history.len()
    );

    let client = create_client(api_key)?;

    let request_body = ChatCompletionRequest {
        model: llm.model.clone(),
        messages: build_messages(request),
    };

    let response = client
        .post(&url)
        .json(&request_body)
        .send()
        .await
        .map_err(|e| format!("HTTP request failed: {}", e))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());
        return Err(format!(
            "API request failed with status {}: {}",
            status, error_text
        ));
    }

    let completion: ChatCompletionResponse = response
        .json()
        .await
        .map_err(|e| format!("Failed to parse API response: {}", e))?;

    Ok(completion
        .choices
        .first()
        .and_then(|choice| choice.message.content.clone())
        .filter(|content| !content.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn llm(provider_id: &str, base_url: &str) -> LlmSettings {
        LlmSettings {
            provider_id: provider_id.to_string(),
            base_url: base_url.to_string(),
            model: "gpt-4o-mini".to_string(),
        }
    }

    fn request() -> ChatRequest {
        ChatRequest {
            message: "We help teams ship faster".into(),
            system_prompt: None,
            conversation_history: vec![
                HistoryEntry {
                    role: Role::User,
                    content: "Hi everyone".into(),
                },
                HistoryEntry {
                    role: Role::Coach,
                    content: "Nice energy.".into(),
                },
            ],
        }
    }

    // Single test so env mutations don't race with each other.
    #[test]
    fn test_get_effective_base_url() {
        std::env::set_var(CUSTOM_LLM_BASE_URL_ENV, "http://custom-server:8080/v1/");
        assert_eq!(
            get_effective_base_url(&llm("custom", "http://localhost:11434/v1")),
            "http://custom-server:8080/v1"
        );
        assert_eq!(
            get_effective_base_url(&llm("openai", "https://api.openai.com/v1")),
            "https://api.openai.com/v1"
        );

        std::env::set_var(CUSTOM_LLM_BASE_URL_ENV, "  ");
        assert_eq!(
            get_effective_base_url(&llm("custom", "http://localhost:11434/v1/")),
            "http://localhost:11434/v1"
        );

        std::env::remove_var(CUSTOM_LLM_BASE_URL_ENV);
        assert_eq!(
            get_effective_base_url(&llm("custom", "http://localhost:11434/v1")),
            "http://localhost:11434/v1"
        );
    }

    #[test]
    fn test_messages_order_and_roles() {
        let messages = build_messages(&request());
        let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(messages[0].content, COACH_SYSTEM_PROMPT);
        assert_eq!(messages[3].content, "We help teams ship faster");
    }

    #[test]
    fn test_custom_system_prompt() {
        let mut req = request();
        req.system_prompt = Some("Only talk about pace.".into());
        assert_eq!(build_messages(&req)[0].content, "Only talk about pace.");
    }

    #[tokio::test]
    async fn test_send_chat_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "messages": [
                    {"role": "system"},
                    {"role": "user", "content": "Hi everyone"},
                    {"role": "assistant", "content": "Nice energy."},
                    {"role": "user", "content": "We help teams ship faster"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "Pause after that line."}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let settings = llm("openai", &format!("{}/v1/", server.uri()));
        let reply = send_chat_completion(&settings, "sk-test", &request())
            .await
            .unwrap();
        assert_eq!(reply.as_deref(), Some("Pause after that line."));
    }

    #[tokio::test]
    async fn test_empty_choices_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let settings = llm("openai", &server.uri());
        let reply = send_chat_completion(&settings, "", &request()).await.unwrap();
        assert_eq!(reply, None);
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let settings = llm("openai", &server.uri());
        let err = send_chat_completion(&settings, "sk-test", &request())
            .await
            .unwrap_err();
        assert!(err.contains("429"), "{}", err);
        assert!(err.contains("slow down"), "{}", err);
    }
}
