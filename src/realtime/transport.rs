//! Transport session: microphone, peer connection, event data channel and
//! remote audio playback for one coaching session.
//!
//! The WebRTC stack itself sits behind [`RtcEngine`] and [`PeerConnection`].
//! No engine ships with this crate: the embedding host supplies one and
//! exchanges [`AudioFrame`]s with the devices in [`super::audio`], which
//! implement [`MediaDevices`] and [`PlaybackSink`] on cpal and rodio. Peer
//! callbacks are delivered as [`PeerEvent`]s on an unbounded channel and
//! consumed by the coaching session.

use crate::error::{MediaAccessError, SessionError, TransportError};
use crate::realtime::signaling::{Negotiator, SessionDescription};
use async_trait::async_trait;
use log::{debug, info};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_DATA_CHANNEL_LABEL: &str = "oai-events";

/// Microphone capture options requested from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub sample_rate: u32,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            sample_rate: 24_000,
        }
    }
}

/// Peer connection setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcConfiguration {
    /// ICE server URLs; at least one public STUN server.
    pub ice_servers: Vec<String>,
    /// Label of the event data channel created on the local side.
    pub data_channel_label: String,
}

impl Default for RtcConfiguration {
    fn default() -> Self {
        Self {
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            data_channel_label: DEFAULT_DATA_CHANNEL_LABEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
    pub id: String,
}

/// Interleaved PCM exchanged between the audio devices and the RTC engine.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Callbacks raised by a peer connection and its data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    RemoteTrack(RemoteTrack),
    /// The remote side opened a data channel. Its messages arrive as
    /// [`PeerEvent::DataChannelMessage`] like those of the local channel.
    DataChannelOffered { label: String },
    DataChannelOpen { label: String },
    DataChannelMessage(String),
    DataChannelError(String),
    DataChannelClosed,
    ConnectionStateChanged(PeerConnectionState),
}

pub type PeerEvents = mpsc::UnboundedReceiver<PeerEvent>;

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_track(&self, track: &AudioTrack) -> Result<(), TransportError>;
    async fn create_data_channel(&self, label: &str) -> Result<(), TransportError>;
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError>;
    /// Close every data channel and the connection itself.
    async fn close(&self);
}

/// Host-supplied WebRTC engine. Live sessions pass one to
/// [`crate::live::live_session_deps`]; replay uses the loopback engine.
#[async_trait]
pub trait RtcEngine: Send + Sync {
    async fn create_peer_connection(
        &self,
        config: &RtcConfiguration,
    ) -> Result<(Box<dyn PeerConnection>, PeerEvents), TransportError>;
}

/// A live microphone capture.
pub trait LocalAudioStream: Send + Sync {
    fn tracks(&self) -> Vec<AudioTrack>;
    /// Stop every track. Must be safe to call more than once.
    fn stop(&mut self);
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_audio(
        &self,
        constraints: &AudioConstraints,
    ) -> Result<Box<dyn LocalAudioStream>, MediaAccessError>;
}

/// Where the coach's synthesized speech is played.
pub trait PlaybackSink: Send + Sync {
    fn attach(&self, track: &RemoteTrack);
    fn detach(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConnectionState {
    pub transport: TransportState,
    pub data_channel_open: bool,
}

/// Collaborators a [`TransportSession`] drives.
#[derive(Clone)]
pub struct TransportDeps {
    pub engine: Arc<dyn RtcEngine>,
    pub media: Arc<dyn MediaDevices>,
    pub playback: Arc<dyn PlaybackSink>,
}

/// Owns every transport resource of a session. [`TransportSession::stop`] is
/// the only place they are released.
pub struct TransportSession {
    deps: TransportDeps,
    rtc: RtcConfiguration,
    constraints: AudioConstraints,
    state: ConnectionState,
    stream: Option<Box<dyn LocalAudioStream>>,
    peer: Option<Box<dyn PeerConnection>>,
    playback_attached: bool,
}

impl TransportSession {
    pub fn new(deps: TransportDeps, rtc: RtcConfiguration, constraints: AudioConstraints) -> Self {
        Self {
            deps,
            rtc,
            constraints,
            state: ConnectionState::default(),
            stream: None,
            peer: None,
            playback_attached: false,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    /// Whether any resource is currently held.
    pub fn is_live(&self) -> bool {
        self.stream.is_some() || self.peer.is_some() || self.playback_attached
    }

    /// Open the microphone, create the peer connection and negotiate it.
    ///
    /// The credential is requested first so a credential failure never
    /// touches the microphone or creates a peer connection. Any failure
    /// releases what was acquired and leaves the state `Disconnected`.
    /// Resources are stored on `self` as soon as they exist, so dropping this
    /// future midway and calling [`stop`](Self::stop) releases them too.
    pub async fn start(&mut self, negotiator: &dyn Negotiator) -> Result<PeerEvents, SessionError> {
        if self.is_live() {
            self.stop().await;
        }
        self.state = ConnectionState {
            transport: TransportState::Connecting,
            data_channel_open: false,
        };

        match self.connect(negotiator).await {
            Ok(events) => Ok(events),
            Err(err) => {
                self.stop().await;
                Err(err)
            }
        }
    }

    async fn connect(&mut self, negotiator: &dyn Negotiator) -> Result<PeerEvents, SessionError> {
        let credential = negotiator.request_credential().await?;

        let stream = self.deps.media.get_user_audio(&self.constraints).await?;
        let tracks = stream.tracks();
        self.stream = Some(stream);
        debug!("Microphone acquired with {} track(s)", tracks.len());

        let (peer, events) = self.deps.engine.create_peer_connection(&self.rtc).await?;
        let peer: &dyn PeerConnection = &**self.peer.insert(peer);

        for track in &tracks {
            peer.add_track(track).await?;
        }
        peer.create_data_channel(&self.rtc.data_channel_label).await?;

        let offer = peer.create_offer().await?;
        peer.set_local_description(offer.clone()).await?;

        let answer = negotiator.exchange_offer(&offer.sdp, &credential).await?;
        peer.set_remote_description(answer).await?;

        info!("Peer connection negotiated, waiting for data channel");
        Ok(events)
    }

    pub fn attach_remote_track(&mut self, track: &RemoteTrack) {
        debug!("Attaching remote track {} to playback", track.id);
        self.deps.playback.attach(track);
        self.playback_attached = true;
    }

    pub fn mark_data_channel_open(&mut self) {
        self.state = ConnectionState {
            transport: TransportState::Connected,
            data_channel_open: true,
        };
    }

    /// Release the microphone, close the peer connection and its data
    /// channel, detach playback. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            debug!("Microphone tracks stopped");
        }
        if let Some(peer) = self.peer.take() {
            peer.close().await;
            debug!("Peer connection closed");
        }
        if self.playback_attached {
            self.deps.playback.detach();
            self.playback_attached = false;
        }
        self.state = ConnectionState::default();
    }
}
