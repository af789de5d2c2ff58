//! Coaching session orchestrator.
//!
//! A [`CoachingSession`] is a handle on a single actor task that owns every
//! piece of mutable session state: the transport, the transcript, the
//! trigger engine, the timer, the proactive scheduler and the message log.
//! Commands arrive over a channel, peer callbacks over the transport's event
//! channel and coach replies over an internal channel tagged with the epoch
//! of the session that asked for them. The actor publishes a
//! [`SessionSnapshot`] after every change.

use super::coach_client::CoachResponder;
use super::messages::{Message, MessageLog};
use super::proactive::{default_prompts, ProactiveScheduler};
use super::timer::{SessionTimer, TimerTick};
use super::transcript::TranscriptAggregator;
use super::trigger::CoachingTrigger;
use crate::error::{ChatError, SessionError};
use crate::realtime::events::RealtimeEvent;
use crate::realtime::signaling::Negotiator;
use crate::realtime::transport::{
    AudioConstraints, ConnectionState, PeerConnectionState, PeerEvent, PeerEvents,
    RtcConfiguration, TransportDeps, TransportSession,
};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

pub const INTRO_MESSAGE: &str = "Hi! I'm your AI Pitch Coach. I'm here to help you improve your pitch delivery, pronunciation, tone, and overall presentation skills. Start coaching when you're ready to begin your 5-minute practice session!";

pub const LISTENING_MESSAGE: &str = "Great! I'm listening now. Start speaking about your pitch and I'll give you real-time feedback on your delivery, pronunciation, and tone. Remember, you have 5 minutes!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Connecting,
    Active,
    Ended,
    Errored,
}

impl SessionStatus {
    fn is_live(self) -> bool {
        matches!(self, SessionStatus::Connecting | SessionStatus::Active)
    }
}

/// Tunables for one coaching session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Wall-clock budget, measured from the start request.
    pub budget: Duration,
    /// How often the countdown is re-evaluated while active.
    pub tick: Duration,
    /// Silence after the last transcript update before the coach is asked.
    pub debounce: Duration,
    /// New speech must be strictly longer than this to earn a coach turn.
    pub min_new_chars: usize,
    pub proactive_interval: Duration,
    pub proactive_min_chars: usize,
    pub proactive_prompts: Vec<String>,
    /// Fixed RNG seed for proactive prompt selection.
    pub proactive_seed: Option<u64>,
    /// Prior messages sent along with each coach request.
    pub history_window: usize,
    pub rtc: RtcConfiguration,
    pub constraints: AudioConstraints,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(5 * 60),
            tick: Duration::from_millis(100),
            debounce: Duration::from_millis(2000),
            min_new_chars: 10,
            proactive_interval: Duration::from_secs(30),
            proactive_min_chars: 50,
            proactive_prompts: default_prompts(),
            proactive_seed: None,
            history_window: 4,
            rtc: RtcConfiguration::default(),
            constraints: AudioConstraints::default(),
        }
    }
}

/// External collaborators of a session.
#[derive(Clone)]
pub struct SessionDeps {
    pub transport: TransportDeps,
    pub negotiator: Arc<dyn Negotiator>,
    pub coach: Arc<dyn CoachResponder>,
}

type EndCallback = Box<dyn Fn(&str, &[Message]) + Send + Sync>;
type TranscriptCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Host callbacks.
#[derive(Default)]
pub struct SessionHooks {
    on_session_end: Option<EndCallback>,
    on_transcript: Option<TranscriptCallback>,
}

impl SessionHooks {
    /// Called with the final transcript and messages when a session ends by
    /// stop, timer expiry or connection failure. Fires at most once per
    /// session.
    pub fn on_session_end<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &[Message]) + Send + Sync + 'static,
    {
        self.on_session_end = Some(Box::new(callback));
        self
    }

    /// Called with the full transcript after every transcript update.
    pub fn on_transcript<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_transcript = Some(Box::new(callback));
        self
    }
}

/// Everything a presentation layer needs, published after each change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Option<String>,
    pub status: SessionStatus,
    pub connection: ConnectionState,
    pub remaining: Duration,
    pub transcript: String,
    pub messages: Vec<Message>,
    pub is_processing: bool,
    pub last_error: Option<String>,
}

enum Command {
    Start {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

struct CoachReply {
    epoch: u64,
    result: Result<Message, ChatError>,
}

/// Handle on a running session actor. Dropping it tears the session down
/// without firing the end callback.
pub struct CoachingSession {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl CoachingSession {
    /// Spawn the session actor on the current tokio runtime.
    pub fn spawn(config: SessionConfig, deps: SessionDeps, hooks: SessionHooks) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();

        let actor = SessionActor::new(config, deps, hooks, reply_tx);
        let (snapshot_tx, snapshot_rx) = watch::channel(actor.snapshot());
        let task = tokio::spawn(actor.run(snapshot_tx, command_rx, reply_rx));

        Self {
            commands: command_tx,
            snapshot: snapshot_rx,
            task: Some(task),
        }
    }

    /// Connect and wait until the transport is negotiated. The session
    /// becomes `Active` once the event data channel opens.
    pub async fn start(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Start { reply }).await?
    }

    /// End the running session. Safe to call in any state.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Tear down without the end callback and return to `Idle`.
    pub async fn reset(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Reset { reply }).await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Tear down and wait for the actor to exit.
    pub async fn shutdown(mut self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).is_ok() {
            let _ = done.await;
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Coaching session task failed: {}", e);
            }
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)
    }
}

/// What the run loop has to do with its timers and event stream after a
/// handler ran.
enum Lifecycle {
    Unchanged,
    Negotiated(PeerEvents),
    Activated,
    TornDown,
    Exit,
}

enum StartOutcome {
    Finished(Result<PeerEvents, SessionError>),
    Stopped(oneshot::Sender<()>),
    Reset(oneshot::Sender<()>),
    Shutdown(Option<oneshot::Sender<()>>),
}

struct SessionActor {
    config: SessionConfig,
    deps: SessionDeps,
    on_session_end: Option<EndCallback>,
    transport: TransportSession,
    aggregator: TranscriptAggregator,
    trigger: CoachingTrigger,
    timer: SessionTimer,
    proactive: ProactiveScheduler,
    messages: MessageLog,
    status: SessionStatus,
    session_id: Option<String>,
    epoch: u64,
    last_error: Option<String>,
    end_notified: bool,
    coach_task: Option<JoinHandle<()>>,
    replies: mpsc::UnboundedSender<CoachReply>,
    snapshot_tx: Option<watch::Sender<SessionSnapshot>>,
}

impl SessionActor {
    fn new(
        config: SessionConfig,
        deps: SessionDeps,
        hooks: SessionHooks,
        replies: mpsc::UnboundedSender<CoachReply>,
    ) -> Self {
        let mut aggregator = TranscriptAggregator::new();
        if let Some(on_transcript) = hooks.on_transcript {
            aggregator.add_listener(on_transcript);
        }

        let prompts = config.proactive_prompts.clone();
        let proactive = match config.proactive_seed {
            Some(seed) => ProactiveScheduler::with_seed(config.proactive_min_chars, prompts, seed),
            None => ProactiveScheduler::new(config.proactive_min_chars, prompts),
        };

        let mut messages = MessageLog::new();
        messages.push(Message::coach(INTRO_MESSAGE));

        Self {
            transport: TransportSession::new(
                deps.transport.clone(),
                config.rtc.clone(),
                config.constraints.clone(),
            ),
            trigger: CoachingTrigger::new(config.debounce, config.min_new_chars),
            timer: SessionTimer::new(config.budget),
            aggregator,
            proactive,
            messages,
            status: SessionStatus::Idle,
            session_id: None,
            epoch: 0,
            last_error: None,
            end_notified: true,
            coach_task: None,
            on_session_end: hooks.on_session_end,
            replies,
            snapshot_tx: None,
            config,
            deps,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            status: self.status,
            connection: self.transport.connection_state(),
            remaining: self.timer.remaining(),
            transcript: self.aggregator.current_transcript().to_string(),
            messages: self.messages.as_slice().to_vec(),
            is_processing: self.trigger.is_processing(),
            last_error: self.last_error.clone(),
        }
    }

    fn publish(&self) {
        if let Some(tx) = &self.snapshot_tx {
            tx.send_replace(self.snapshot());
        }
    }

    async fn run(
        mut self,
        snapshot_tx: watch::Sender<SessionSnapshot>,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut replies: mpsc::UnboundedReceiver<CoachReply>,
    ) {
        self.snapshot_tx = Some(snapshot_tx);

        let mut peer_events: Option<PeerEvents> = None;
        let mut ticker: Option<Interval> = None;
        let mut proactive: Option<Interval> = None;

        loop {
            let deadline = self.trigger.deadline();

            let lifecycle = tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => self.on_command(command, &mut commands).await,
                    None => {
                        debug!("Coaching session handle dropped");
                        self.shutdown(None).await
                    }
                },
                now = next_tick(&mut ticker) => self.on_tick(now).await,
                event = next_peer_event(&mut peer_events) => match event {
                    Some(event) => self.on_peer_event(event).await,
                    None => {
                        self.fail_session("Peer connection event stream closed".to_string())
                            .await
                    }
                },
                Some(reply) = replies.recv() => self.on_coach_reply(reply),
                _ = sleep_until_deadline(deadline) => self.on_debounce_elapsed(),
                _ = next_tick(&mut proactive) => self.on_proactive_tick(),
            };

            match lifecycle {
                Lifecycle::Unchanged => {}
                Lifecycle::Negotiated(events) => peer_events = Some(events),
                Lifecycle::Activated => {
                    let now = Instant::now();
                    let mut tick = tokio::time::interval_at(now + self.config.tick, self.config.tick);
                    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    ticker = Some(tick);

                    let period = self.config.proactive_interval;
                    let mut prompts = tokio::time::interval_at(now + period, period);
                    prompts.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    proactive = Some(prompts);
                }
                Lifecycle::TornDown => {
                    peer_events = None;
                    ticker = None;
                    proactive = None;
                }
                Lifecycle::Exit => break,
            }
        }

        debug!("Coaching session actor exited");
    }

    async fn on_command(
        &mut self,
        command: Command,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Lifecycle {
        match command {
            Command::Start { reply } => self.start_session(reply, commands).await,
            Command::Stop { reply } => {
                let lifecycle = self.stop_session().await;
                let _ = reply.send(());
                lifecycle
            }
            Command::Reset { reply } => {
                self.reset_session().await;
                let _ = reply.send(());
                Lifecycle::TornDown
            }
            Command::Shutdown { reply } => self.shutdown(Some(reply)).await,
        }
    }

    async fn start_session(
        &mut self,
        reply: oneshot::Sender<Result<(), SessionError>>,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Lifecycle {
        if self.status.is_live() {
            let _ = reply.send(Err(SessionError::AlreadyRunning));
            return Lifecycle::Unchanged;
        }

        self.epoch += 1;
        self.session_id = Some(Uuid::new_v4().to_string());
        self.status = SessionStatus::Connecting;
        self.last_error = None;
        self.end_notified = false;
        self.aggregator.reset();
        self.trigger.reset();
        self.messages.push(Message::coach(LISTENING_MESSAGE));
        self.timer.start(Instant::now());
        self.publish();

        info!(
            "Starting coaching session {}",
            self.session_id.as_deref().unwrap_or_default()
        );

        let negotiator = self.deps.negotiator.clone();
        let outcome = {
            let start = self.transport.start(negotiator.as_ref());
            tokio::pin!(start);

            loop {
                tokio::select! {
                    result = &mut start => break StartOutcome::Finished(result),
                    command = commands.recv() => match command {
                        Some(Command::Start { reply }) => {
                            let _ = reply.send(Err(SessionError::AlreadyRunning));
                        }
                        Some(Command::Stop { reply }) => break StartOutcome::Stopped(reply),
                        Some(Command::Reset { reply }) => break StartOutcome::Reset(reply),
                        Some(Command::Shutdown { reply }) => break StartOutcome::Shutdown(Some(reply)),
                        None => break StartOutcome::Shutdown(None),
                    },
                }
            }
        };

        match outcome {
            StartOutcome::Finished(Ok(events)) => {
                let _ = reply.send(Ok(()));
                self.publish();
                Lifecycle::Negotiated(events)
            }
            StartOutcome::Finished(Err(err)) => {
                error!("Failed to start coaching session: {}", err);
                self.status = SessionStatus::Errored;
                self.last_error = Some(err.to_string());
                self.end_notified = true;
                self.timer.reset();
                self.publish();
                let _ = reply.send(Err(err));
                Lifecycle::TornDown
            }
            StartOutcome::Stopped(stop_reply) => {
                info!("Session start cancelled by stop");
                let _ = reply.send(Err(SessionError::Cancelled));
                let lifecycle = self.stop_session().await;
                let _ = stop_reply.send(());
                lifecycle
            }
            StartOutcome::Reset(reset_reply) => {
                let _ = reply.send(Err(SessionError::Cancelled));
                self.reset_session().await;
                let _ = reset_reply.send(());
                Lifecycle::TornDown
            }
            StartOutcome::Shutdown(shutdown_reply) => {
                let _ = reply.send(Err(SessionError::Cancelled));
                self.shutdown(shutdown_reply).await
            }
        }
    }

    /// Abort outstanding work and release the transport. Every exit path
    /// goes through here.
    async fn teardown(&mut self) {
        if let Some(task) = self.coach_task.take() {
            task.abort();
            debug!("In-flight coach request aborted");
        }
        self.trigger.reset();
        if !self.timer.has_fired() {
            self.timer.reset();
        }
        self.transport.stop().await;
    }

    async fn end_session(&mut self, status: SessionStatus) -> Lifecycle {
        self.teardown().await;
        self.status = status;
        self.notify_end();
        self.publish();
        Lifecycle::TornDown
    }

    fn notify_end(&mut self) {
        if self.end_notified {
            return;
        }
        self.end_notified = true;
        if let Some(callback) = &self.on_session_end {
            callback(self.aggregator.current_transcript(), self.messages.as_slice());
        }
    }

    async fn stop_session(&mut self) -> Lifecycle {
        if !self.status.is_live() {
            self.teardown().await;
            return Lifecycle::TornDown;
        }
        info!("Stopping coaching session");
        self.end_session(SessionStatus::Ended).await
    }

    async fn fail_session(&mut self, reason: String) -> Lifecycle {
        if !self.status.is_live() {
            return Lifecycle::TornDown;
        }
        error!("Coaching session connection failed: {}", reason);
        self.last_error = Some(reason);
        self.end_session(SessionStatus::Errored).await
    }

    async fn reset_session(&mut self) {
        self.teardown().await;
        self.timer.reset();
        self.epoch += 1;
        self.status = SessionStatus::Idle;
        self.session_id = None;
        self.last_error = None;
        self.end_notified = true;
        self.aggregator.reset();
        self.messages.clear();
        self.messages.push(Message::coach(INTRO_MESSAGE));
        self.publish();
        debug!("Coaching session reset");
    }

    async fn shutdown(&mut self, reply: Option<oneshot::Sender<()>>) -> Lifecycle {
        self.teardown().await;
        if self.status.is_live() {
            self.status = SessionStatus::Ended;
        }
        self.end_notified = true;
        self.publish();
        if let Some(reply) = reply {
            let _ = reply.send(());
        }
        Lifecycle::Exit
    }

    async fn on_tick(&mut self, now: Instant) -> Lifecycle {
        if self.status != SessionStatus::Active {
            return Lifecycle::Unchanged;
        }
        match self.timer.tick(now) {
            TimerTick::Remaining(_) => {
                self.publish();
                Lifecycle::Unchanged
            }
            TimerTick::Expired => {
                info!("Session time is up, ending coaching session");
                self.end_session(SessionStatus::Ended).await
            }
            TimerTick::Inactive => Lifecycle::Unchanged,
        }
    }

    async fn on_peer_event(&mut self, event: PeerEvent) -> Lifecycle {
        match event {
            PeerEvent::RemoteTrack(track) => {
                self.transport.attach_remote_track(&track);
                Lifecycle::Unchanged
            }
            PeerEvent::DataChannelOffered { label } => {
                debug!("Accepted data channel '{}' offered by the service", label);
                Lifecycle::Unchanged
            }
            PeerEvent::DataChannelOpen { label } => {
                if self.status != SessionStatus::Connecting {
                    return Lifecycle::Unchanged;
                }
                info!("Data channel '{}' open, coaching session active", label);
                self.transport.mark_data_channel_open();
                self.status = SessionStatus::Active;
                self.publish();
                Lifecycle::Activated
            }
            PeerEvent::DataChannelMessage(raw) => {
                if self.status != SessionStatus::Active {
                    return Lifecycle::Unchanged;
                }
                match RealtimeEvent::parse(&raw) {
                    Ok(event) => self.on_realtime_event(event),
                    Err(e) => warn!("Ignoring malformed realtime event: {}", e),
                }
                Lifecycle::Unchanged
            }
            PeerEvent::DataChannelError(message) => {
                self.fail_session(format!("Data channel error: {}", message))
                    .await
            }
            PeerEvent::DataChannelClosed => {
                self.fail_session("Data channel closed".to_string()).await
            }
            PeerEvent::ConnectionStateChanged(state) => match state {
                PeerConnectionState::Failed | PeerConnectionState::Disconnected => {
                    self.fail_session(format!("Peer connection {:?}", state).to_lowercase())
                        .await
                }
                other => {
                    debug!("Peer connection state: {:?}", other);
                    Lifecycle::Unchanged
                }
            },
        }
    }

    fn on_realtime_event(&mut self, event: RealtimeEvent) {
        match &event {
            RealtimeEvent::TranscriptionCompleted { .. } => {
                if self.aggregator.on_event(&event) {
                    self.trigger.on_transcript_update(Instant::now());
                    self.publish();
                }
            }
            RealtimeEvent::SpeechStarted => self.trigger.on_speech_started(),
            RealtimeEvent::SpeechStopped => debug!("Speech stopped"),
            RealtimeEvent::Error { message } => {
                warn!("Realtime service error: {}", message);
                self.last_error = Some(message.clone());
                self.publish();
            }
            RealtimeEvent::Unknown { kind } => debug!("Ignoring realtime event {}", kind),
        }
    }

    fn on_debounce_elapsed(&mut self) -> Lifecycle {
        if self.status != SessionStatus::Active {
            self.trigger.reset();
            return Lifecycle::Unchanged;
        }

        let Some(turn) = self.trigger.fire(self.aggregator.state_mut()) else {
            return Lifecycle::Unchanged;
        };

        let history = self.messages.recent(self.config.history_window).to_vec();
        self.messages.push(Message::user(turn.clone()));

        let coach = self.deps.coach.clone();
        let replies = self.replies.clone();
        let epoch = self.epoch;
        self.coach_task = Some(tokio::spawn(async move {
            let result = coach.respond(&turn, &history).await;
            let _ = replies.send(CoachReply { epoch, result });
        }));

        self.publish();
        Lifecycle::Unchanged
    }

    fn on_coach_reply(&mut self, reply: CoachReply) -> Lifecycle {
        if reply.epoch != self.epoch || self.status != SessionStatus::Active {
            debug!("Dropping coach reply from a finished session");
            return Lifecycle::Unchanged;
        }

        self.coach_task = None;
        self.trigger.complete();
        match reply.result {
            Ok(message) => self.messages.push(message),
            Err(e) => warn!("Coach request failed: {}", e),
        }

        if self.trigger.deadline().is_none() && self.trigger.has_pending_turn(self.aggregator.state())
        {
            self.trigger.on_transcript_update(Instant::now());
        }
        self.publish();
        Lifecycle::Unchanged
    }

    fn on_proactive_tick(&mut self) -> Lifecycle {
        if self.status != SessionStatus::Active {
            return Lifecycle::Unchanged;
        }
        let transcript_chars = self.aggregator.current_transcript().chars().count();
        if let Some(prompt) = self.proactive.next_prompt(transcript_chars) {
            debug!("Proactive coaching prompt");
            self.messages.push(Message::coach(prompt));
            self.publish();
        }
        Lifecycle::Unchanged
    }
}

async fn next_tick(interval: &mut Option<Interval>) -> Instant {
    match interval {
        Some(interval) => interval.tick().await,
        None => std::future::pending().await,
    }
}

async fn next_peer_event(events: &mut Option<PeerEvents>) -> Option<PeerEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
