//! Backend for the coaching client: ephemeral key minting, the coach text
//! endpoint and the realtime call webhook.

use crate::coaching::coach_client::ChatRequest;
use crate::error::MintError;
use crate::llm_client;
use crate::realtime::credentials::EphemeralKeyMinter;
use crate::realtime::sideband::SidebandRegistry;
use crate::settings::{AppSettings, LlmSettings};
use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub struct ServerState {
    pub minter: EphemeralKeyMinter,
    pub sideband: SidebandRegistry,
    pub llm: LlmSettings,
    pub api_key: Option<String>,
}

impl ServerState {
    pub fn from_settings(settings: &AppSettings, api_key: Option<String>) -> Self {
        let realtime = &settings.realtime;
        Self {
            minter: EphemeralKeyMinter::new(
                &realtime.api_base,
                api_key.clone(),
                &realtime.model,
                &realtime.voice,
            ),
            sideband: SidebandRegistry::new(&realtime.sideband_url, api_key.clone()),
            llm: settings.llm.clone(),
            api_key,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub state: Arc<ServerState>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    data: Value,
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/realtime/ephemeral-key", get(ephemeral_key))
        .route("/chat", post(chat))
        .route("/realtime/webhook", post(webhook).get(webhook_status))
        .with_state(AppState { state })
}

pub struct ApiServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    sideband: Option<SidebandRegistry>,
    pub bind: String,
}

impl ApiServer {
    pub fn new(bind: impl Into<String>) -> Self {
        Self {
            shutdown_tx: None,
            handle: None,
            sideband: None,
            bind: bind.into(),
        }
    }

    /// Bind and start serving in the background. Returns the bound address.
    pub async fn start(&mut self, state: ServerState) -> anyhow::Result<SocketAddr> {
        let listener = TcpListener::bind(&self.bind)
            .await
            .with_context(|| format!("Failed to bind server to {}", self.bind))?;
        let addr = listener
            .local_addr()
            .context("Failed to read bound address")?;

        let (tx, rx) = oneshot::channel();
        self.shutdown_tx = Some(tx);
        self.sideband = Some(state.sideband.clone());

        let app = router(Arc::new(state));

        info!("Starting MicroPitch backend on {}", addr);
        self.handle = Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    rx.await.ok();
                })
                .await
            {
                error!("Server error: {}", e);
            }
            info!("MicroPitch backend on {} stopped", addr);
        }));

        Ok(addr)
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(sideband) = self.sideband.take() {
            sideband.close_all();
        }
    }

    /// Wait for the serve task to finish after `stop`.
    pub async fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Server task failed: {}", e);
            }
        }
    }
}

fn error_body(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

async fn ephemeral_key(State(app): State<AppState>) -> impl IntoResponse {
    match app.state.minter.mint().await {
        Ok(key) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "ephemeral_key": key.ephemeral_key,
                "expires_at": key.expires_at,
            })),
        ),
        Err(e) => {
            let status = StatusCode::from_u16(e.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let message = match &e {
                MintError::MissingApiKey => e.to_string(),
                _ => format!("Failed to create ephemeral key: {}", e),
            };
            error_body(status, message)
        }
    }
}

async fn chat(State(app): State<AppState>, Json(request): Json<ChatRequest>) -> impl IntoResponse {
    if request.message.trim().is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "message is required");
    }

    let state = &app.state;
    let api_key = match (&state.api_key, state.llm.provider_id.as_str()) {
        (Some(key), _) => key.as_str(),
        (None, "custom") => "",
        (None, _) => {
            return error_body(StatusCode::INTERNAL_SERVER_ERROR, "OpenAI API key not configured")
        }
    };

    match llm_client::send_chat_completion(&state.llm, api_key, &request).await {
        Ok(response) => {
            if response.is_none() {
                warn!("Chat completion returned no content");
            }
            (StatusCode::OK, Json(serde_json::json!({ "response": response })))
        }
        Err(e) => {
            error!("Chat completion failed: {}", e);
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get AI response")
        }
    }
}

async fn webhook(State(app): State<AppState>, Json(event): Json<WebhookEvent>) -> impl IntoResponse {
    let call_id = match event.call_id.filter(|id| !id.is_empty()) {
        Some(id) => id,
        None => return error_body(StatusCode::BAD_REQUEST, "call_id is required"),
    };
    let event_type = event.event_type.unwrap_or_default();
    info!("Webhook {} for call {}", event_type, call_id);

    let sideband = &app.state.sideband;
    match event_type.as_str() {
        "call.started" => {
            let sideband = sideband.clone();
            tokio::spawn(async move {
                if let Err(e) = sideband.attach(&call_id).await {
                    error!("Failed to open sideband for call {}: {}", call_id, e);
                }
            });
        }
        "call.ended" | "error" => {
            if event_type == "error" {
                error!("Realtime call {} reported an error: {}", call_id, event.data);
            }
            if !sideband.detach(&call_id) {
                debug!("No sideband connection open for call {}", call_id);
            }
        }
        "transcription.completed" => {
            let transcript = event
                .data
                .get("transcript")
                .and_then(Value::as_str)
                .unwrap_or_default();
            info!("Transcription completed for call {}: {}", call_id, transcript);
        }
        other => debug!("Ignoring webhook event {:?} for call {}", other, call_id),
    }

    (StatusCode::OK, Json(serde_json::json!({ "status": "received" })))
}

async fn webhook_status(State(app): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "active",
        "active_connections": app.state.sideband.active_connections(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
