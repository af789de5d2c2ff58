//! Offline session driver.
//!
//! Feeds a recorded log of realtime data-channel events into a coaching
//! session over the loopback transport, so the trigger, timer and coach
//! path can be exercised without a microphone or a realtime connection.
//!
//! One JSON object per line:
//!
//! ```text
//! {"at_ms": 0,    "event": {"type": "input_audio_buffer.speech_started"}}
//! {"at_ms": 1800, "event": {"type": "conversation.item.input_audio_transcription.completed", "transcript": "Hi, I'm Dana."}}
//! {"at_ms": 9000, "action": "stop"}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use crate::coaching::{
    CoachResponder, CoachingSession, Message, SessionConfig, SessionDeps, SessionHooks,
    SessionStatus,
};
use crate::realtime::loopback::{
    LoopbackEngine, LoopbackMedia, LoopbackNegotiator, RecordingPlayback,
};
use crate::realtime::transport::{PeerConnectionState, PeerEvent, TransportDeps};
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, timeout, Instant};

/// Extra wait after the last entry so a pending coach turn can fire.
const SETTLE: Duration = Duration::from_millis(250);
const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayAction {
    Stop,
    CloseDataChannel,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplayEntry {
    pub at_ms: u64,
    #[serde(default)]
    pub event: Option<Value>,
    #[serde(default)]
    pub action: Option<ReplayAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayOutcome {
    pub status: SessionStatus,
    pub transcript: String,
    pub messages: Vec<Message>,
    pub last_error: Option<String>,
}

pub fn parse_log(raw: &str) -> Result<Vec<ReplayEntry>> {
    let mut entries = Vec::new();
    for (index, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let entry: ReplayEntry = serde_json::from_str(line)
            .with_context(|| format!("Invalid replay entry on line {}", index + 1))?;
        if entry.event.is_none() && entry.action.is_none() {
            bail!("Replay entry on line {} has neither event nor action", index + 1);
        }
        entries.push(entry);
    }
    entries.sort_by_key(|entry| entry.at_ms);
    Ok(entries)
}

pub fn load_log(path: &Path) -> Result<Vec<ReplayEntry>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read replay log {}", path.display()))?;
    parse_log(&raw)
}

/// Run one session over `entries` and return how it ended.
pub async fn run_replay(
    entries: &[ReplayEntry],
    config: SessionConfig,
    coach: Arc<dyn CoachResponder>,
) -> Result<ReplayOutcome> {
    let debounce = config.debounce;
    let engine = Arc::new(LoopbackEngine::new());
    let deps = SessionDeps {
        transport: TransportDeps {
            engine: engine.clone(),
            media: Arc::new(LoopbackMedia::new()),
            playback: Arc::new(RecordingPlayback::default()),
        },
        negotiator: Arc::new(LoopbackNegotiator::default()),
        coach,
    };
    let hooks = SessionHooks::default()
        .on_transcript(|transcript| debug!("Transcript now {} chars", transcript.len()))
        .on_session_end(|transcript, messages| {
            info!(
                "Session ended with {} transcript chars and {} messages",
                transcript.len(),
                messages.len()
            )
        });

    let session = CoachingSession::spawn(config, deps, hooks);
    session.start().await.context("Replay session failed to start")?;

    let remote = engine
        .remote()
        .ok_or_else(|| anyhow!("Loopback engine has no peer connection"))?;
    remote.open_data_channel();

    let mut snapshots = session.subscribe();
    snapshots
        .wait_for(|s| s.status != SessionStatus::Connecting)
        .await
        .context("Session closed before activation")?;

    let origin = Instant::now();
    let mut stopped = false;
    for entry in entries {
        sleep_until(origin + Duration::from_millis(entry.at_ms)).await;

        if let Some(event) = &entry.event {
            if !remote.send_event(&event.to_string()) {
                warn!("Replay event at {}ms not delivered, session closed", entry.at_ms);
                break;
            }
        }

        match entry.action {
            Some(ReplayAction::Stop) => {
                session.stop().await?;
                stopped = true;
                break;
            }
            Some(ReplayAction::CloseDataChannel) => {
                remote.emit(PeerEvent::DataChannelClosed);
            }
            Some(ReplayAction::Disconnect) => {
                remote.emit(PeerEvent::ConnectionStateChanged(PeerConnectionState::Failed));
            }
            None => {}
        }
    }

    if !stopped && session.snapshot().status == SessionStatus::Active {
        tokio::time::sleep(debounce + SETTLE).await;
        let settled = timeout(
            REPLY_TIMEOUT,
            snapshots.wait_for(|s| !s.is_processing || s.status != SessionStatus::Active),
        )
        .await;
        if settled.is_err() {
            warn!("Coach reply still pending after {:?}", REPLY_TIMEOUT);
        }
        session.stop().await?;
    }

    let snapshot = session.snapshot();
    session.shutdown().await;

    Ok(ReplayOutcome {
        status: snapshot.status,
        transcript: snapshot.transcript,
        messages: snapshot.messages,
        last_error: snapshot.last_error,
    })
}
