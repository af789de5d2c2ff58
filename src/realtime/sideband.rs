//! Server-side control connections to live realtime calls.
//!
//! When the realtime service reports that a call started, the backend opens a
//! WebSocket to the same call (`?call_id=`), pushes the session
//! configuration and keeps the socket until the call ends. Connections are
//! tracked per call id in a [`SidebandRegistry`] shared by the webhook
//! handlers.

use crate::error::SidebandError;
use crate::realtime::events::RealtimeEvent;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub const DEFAULT_SIDEBAND_URL: &str = "wss://api.openai.com/v1/realtime";

const SIDEBAND_INSTRUCTIONS: &str = "You are a helpful assistant providing real-time transcription. Transcribe all audio input clearly and accurately. Focus on providing clean, readable transcripts.";

/// `session.update` sent as soon as a sideband connection opens.
pub fn session_update() -> Value {
    json!({
        "type": "session.update",
        "session": {
            "instructions": SIDEBAND_INSTRUCTIONS,
            "voice": "alloy",
            "input_audio_format": "pcm16",
            "output_audio_format": "pcm16",
            "input_audio_transcription": {
                "model": "whisper-1"
            },
            "turn_detection": {
                "type": "server_vad",
                "threshold": 0.5,
                "prefix_padding_ms": 300,
                "silence_duration_ms": 500
            },
            "temperature": 0.3,
            "max_response_output_tokens": 4096
        }
    })
}

struct Connection {
    generation: u64,
    outgoing: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

type SidebandSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Default)]
struct Calls {
    connections: HashMap<String, Connection>,
    /// Calls whose attach is still connecting.
    pending: HashSet<String>,
    /// Pending calls that ended before their socket was registered.
    ended: HashSet<String>,
}

struct RegistryInner {
    base_url: String,
    api_key: Option<String>,
    calls: Mutex<Calls>,
    next_generation: AtomicU64,
}

impl RegistryInner {
    fn remove_if_current(&self, call_id: &str, generation: u64) {
        let mut calls = self.calls.lock().unwrap();
        if calls
            .connections
            .get(call_id)
            .is_some_and(|c| c.generation == generation)
        {
            calls.connections.remove(call_id);
            debug!("Sideband connection for {} removed", call_id);
        }
    }
}

/// Live sideband connections keyed by call id. Cheap to clone.
#[derive(Clone)]
pub struct SidebandRegistry {
    inner: Arc<RegistryInner>,
}

impl SidebandRegistry {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                base_url: base_url.into(),
                api_key: api_key.filter(|k| !k.trim().is_empty()),
                calls: Mutex::new(Calls::default()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn active_connections(&self) -> usize {
        self.inner.calls.lock().unwrap().connections.len()
    }

    pub fn is_attached(&self, call_id: &str) -> bool {
        self.inner
            .calls
            .lock()
            .unwrap()
            .connections
            .contains_key(call_id)
    }

    async fn connect(&self, call_id: &str) -> Result<SidebandSocket, SidebandError> {
        let api_key = self
            .inner
            .api_key
            .as_deref()
            .ok_or(SidebandError::MissingApiKey)?;

        let url = format!("{}?call_id={}", self.inner.base_url, call_id);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| SidebandError::InvalidRequest(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| SidebandError::InvalidRequest(e.to_string()))?;
        request.headers_mut().insert("Authorization", auth);

        let (mut ws, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| SidebandError::Connect(e.to_string()))?;
        info!("Connected to realtime sideband for call {}", call_id);

        ws.send(Message::Text(session_update().to_string().into()))
            .await
            .map_err(|e| SidebandError::Connect(e.to_string()))?;
        Ok(ws)
    }

    /// Open the sideband socket for `call_id` and send the session
    /// configuration. Replaces an existing connection for the same call.
    ///
    /// If the call is detached while the socket is still connecting, the
    /// socket is closed as soon as it opens and nothing is registered.
    pub async fn attach(&self, call_id: &str) -> Result<(), SidebandError> {
        self.inner
            .calls
            .lock()
            .unwrap()
            .pending
            .insert(call_id.to_string());

        let ws = match self.connect(call_id).await {
            Ok(ws) => ws,
            Err(e) => {
                let mut calls = self.inner.calls.lock().unwrap();
                calls.pending.remove(call_id);
                calls.ended.remove(call_id);
                return Err(e);
            }
        };

        let (mut ws_tx, mut ws_rx) = ws.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.clone();
        let task_call_id = call_id.to_string();

        let rejected = {
            let mut calls = self.inner.calls.lock().unwrap();
            calls.pending.remove(call_id);
            if calls.ended.remove(call_id) {
                Some(ws_tx)
            } else {
                // Spawned under the lock so the task cannot remove itself
                // before it is registered.
                let task = tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            message = outgoing_rx.recv() => match message {
                                Some(message) => {
                                    if let Err(e) = ws_tx.send(message).await {
                                        warn!("Sideband send for {} failed: {}", task_call_id, e);
                                        break;
                                    }
                                }
                                None => {
                                    let _ = ws_tx.send(Message::Close(None)).await;
                                    break;
                                }
                            },
                            incoming = ws_rx.next() => match incoming {
                                Some(Ok(Message::Text(text))) => log_sideband_event(&task_call_id, text.as_str()),
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    error!("Sideband WebSocket error for {}: {}", task_call_id, e);
                                    break;
                                }
                            },
                        }
                    }
                    info!("Sideband connection closed for call {}", task_call_id);
                    inner.remove_if_current(&task_call_id, generation);
                });

                if let Some(previous) = calls.connections.insert(
                    call_id.to_string(),
                    Connection {
                        generation,
                        outgoing,
                        task,
                    },
                ) {
                    debug!("Replacing sideband connection for {}", call_id);
                    drop(previous.outgoing);
                }
                None
            }
        };

        if let Some(mut ws_tx) = rejected {
            info!("Call {} ended before its sideband opened, closing", call_id);
            let _ = ws_tx.send(Message::Close(None)).await;
        }
        Ok(())
    }

    /// Close the connection for `call_id`, or cancel an attach that is still
    /// connecting. Returns false if the call had neither.
    pub fn detach(&self, call_id: &str) -> bool {
        let mut calls = self.inner.calls.lock().unwrap();
        if let Some(connection) = calls.connections.remove(call_id) {
            // Dropping the sender makes the task send a close frame.
            drop(connection.outgoing);
            debug!("Sideband connection for {} detached", call_id);
            return true;
        }
        if calls.pending.contains(call_id) {
            calls.ended.insert(call_id.to_string());
            debug!("Sideband for {} still connecting, marked ended", call_id);
            return true;
        }
        false
    }

    /// Send a control event to a live call. Returns false if the call has no
    /// open sideband connection.
    pub fn send_control(&self, call_id: &str, message: &Value) -> bool {
        let calls = self.inner.calls.lock().unwrap();
        match calls.connections.get(call_id) {
            Some(connection) => connection
                .outgoing
                .send(Message::Text(message.to_string().into()))
                .is_ok(),
            None => false,
        }
    }

    /// Abort every connection. Attaches still connecting are closed when
    /// they open.
    pub fn close_all(&self) {
        let drained: Vec<_> = {
            let mut calls = self.inner.calls.lock().unwrap();
            let pending: Vec<_> = calls.pending.iter().cloned().collect();
            calls.ended.extend(pending);
            calls.connections.drain().collect()
        };
        for (call_id, connection) in drained {
            connection.task.abort();
            debug!("Sideband connection for {} aborted", call_id);
        }
    }
}

fn log_sideband_event(call_id: &str, raw: &str) {
    match RealtimeEvent::parse(raw) {
        Ok(RealtimeEvent::TranscriptionCompleted { transcript }) => {
            info!("Sideband transcription for {}: {}", call_id, transcript)
        }
        Ok(RealtimeEvent::Error { message }) => {
            error!("Realtime API error for {}: {}", call_id, message)
        }
        Ok(event) => debug!("Sideband event for {}: {}", call_id, event.kind()),
        Err(e) => warn!("Failed to parse sideband message for {}: {}", call_id, e),
    }
}
