//! In-process implementations of the transport seams.
//!
//! The loopback engine never touches the network: the "remote" side is a
//! [`LoopbackRemote`] handle that injects peer events (data channel open,
//! transcription events, connection failures) into the session. Used by the
//! `replay` command and by tests.

use crate::error::{CredentialError, MediaAccessError, SignalingError, TransportError};
use crate::realtime::signaling::{EphemeralCredential, Negotiator, SessionDescription};
use crate::realtime::transport::{
    AudioConstraints, AudioTrack, LocalAudioStream, MediaDevices, PeerConnection, PeerEvent,
    PeerEvents, PlaybackSink, RemoteTrack, RtcConfiguration, RtcEngine,
};
use async_trait::async_trait;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const LOOPBACK_ANSWER: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=micropitch-loopback-answer\r\nt=0 0\r\n";

struct PeerShared {
    events: mpsc::UnboundedSender<PeerEvent>,
    tracks: Mutex<Vec<String>>,
    data_channels: Mutex<Vec<String>>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    closed: AtomicBool,
}

/// Handle on the remote end of a loopback peer connection.
#[derive(Clone)]
pub struct LoopbackRemote {
    shared: Arc<PeerShared>,
}

impl LoopbackRemote {
    /// Deliver an event to the session. Returns false once the connection is
    /// closed or nobody is listening.
    pub fn emit(&self, event: PeerEvent) -> bool {
        if self.is_closed() {
            return false;
        }
        self.shared.events.send(event).is_ok()
    }

    /// Open the locally created event channel.
    pub fn open_data_channel(&self) -> bool {
        let label = self
            .shared
            .data_channels
            .lock()
            .unwrap()
            .first()
            .cloned()
            .unwrap_or_default();
        self.emit(PeerEvent::DataChannelOpen { label })
    }

    /// Send one JSON event over the data channel.
    pub fn send_event(&self, json: &str) -> bool {
        self.emit(PeerEvent::DataChannelMessage(json.to_string()))
    }

    pub fn data_channels(&self) -> Vec<String> {
        self.shared.data_channels.lock().unwrap().clone()
    }

    pub fn track_count(&self) -> usize {
        self.shared.tracks.lock().unwrap().len()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.shared.local.lock().unwrap().clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.shared.remote.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

struct LoopbackPeer {
    shared: Arc<PeerShared>,
    serial: usize,
}

impl LoopbackPeer {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError("peer connection is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerConnection for LoopbackPeer {
    async fn add_track(&self, track: &AudioTrack) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.shared.tracks.lock().unwrap().push(track.id.clone());
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.shared
            .data_channels
            .lock()
            .unwrap()
            .push(label.to_string());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.ensure_open()?;
        let mut sdp = format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=micropitch-loopback\r\nt=0 0\r\n",
            self.serial
        );
        for track in self.shared.tracks.lock().unwrap().iter() {
            sdp.push_str(&format!("m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=msid:{}\r\n", track));
        }
        if !self.shared.data_channels.lock().unwrap().is_empty() {
            sdp.push_str("m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n");
        }
        Ok(SessionDescription::offer(sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.ensure_open()?;
        *self.shared.local.lock().unwrap() = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.ensure_open()?;
        *self.shared.remote.lock().unwrap() = Some(desc);
        Ok(())
    }

    async fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            debug!("Loopback peer {} closed", self.serial);
        }
    }
}

/// Engine handing out loopback peer connections.
#[derive(Default)]
pub struct LoopbackEngine {
    peers_created: AtomicUsize,
    current: Mutex<Option<LoopbackRemote>>,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peers_created(&self) -> usize {
        self.peers_created.load(Ordering::SeqCst)
    }

    /// Remote handle of the most recently created peer connection.
    pub fn remote(&self) -> Option<LoopbackRemote> {
        self.current.lock().unwrap().clone()
    }
}

#[async_trait]
impl RtcEngine for LoopbackEngine {
    async fn create_peer_connection(
        &self,
        config: &RtcConfiguration,
    ) -> Result<(Box<dyn PeerConnection>, PeerEvents), TransportError> {
        if config.ice_servers.is_empty() {
            return Err(TransportError("no ICE servers configured".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(PeerShared {
            events: tx,
            tracks: Mutex::new(Vec::new()),
            data_channels: Mutex::new(Vec::new()),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        let serial = self.peers_created.fetch_add(1, Ordering::SeqCst) + 1;
        *self.current.lock().unwrap() = Some(LoopbackRemote {
            shared: shared.clone(),
        });

        debug!(
            "Loopback peer {} created (ice: {})",
            serial,
            config.ice_servers.join(", ")
        );
        Ok((Box::new(LoopbackPeer { shared, serial }), rx))
    }
}

struct LoopbackStream {
    open: Arc<AtomicUsize>,
    stopped: bool,
}

impl LocalAudioStream for LoopbackStream {
    fn tracks(&self) -> Vec<AudioTrack> {
        vec![AudioTrack {
            id: "loopback-mic".to_string(),
        }]
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Microphone stand-in. Can be configured to refuse access.
#[derive(Default)]
pub struct LoopbackMedia {
    deny: Option<MediaAccessError>,
    open: Arc<AtomicUsize>,
    opened: AtomicUsize,
}

impl LoopbackMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn denied(err: MediaAccessError) -> Self {
        Self {
            deny: Some(err),
            ..Self::default()
        }
    }

    /// Streams handed out and not yet stopped.
    pub fn open_streams(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Streams handed out in total.
    pub fn streams_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDevices for LoopbackMedia {
    async fn get_user_audio(
        &self,
        constraints: &AudioConstraints,
    ) -> Result<Box<dyn LocalAudioStream>, MediaAccessError> {
        if let Some(err) = &self.deny {
            return Err(err.clone());
        }
        debug!("Loopback microphone opened at {} Hz", constraints.sample_rate);
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LoopbackStream {
            open: self.open.clone(),
            stopped: false,
        }))
    }
}

/// Negotiator that answers every offer locally.
#[derive(Default)]
pub struct LoopbackNegotiator {
    credential_error: Option<CredentialError>,
    exchange_error: Option<SignalingError>,
    exchange_delay: Duration,
}

impl LoopbackNegotiator {
    pub fn failing_credential(err: CredentialError) -> Self {
        Self {
            credential_error: Some(err),
            ..Self::default()
        }
    }

    pub fn failing_exchange(err: SignalingError) -> Self {
        Self {
            exchange_error: Some(err),
            ..Self::default()
        }
    }

    /// Hold the offer exchange for `delay` before answering.
    pub fn with_exchange_delay(mut self, delay: Duration) -> Self {
        self.exchange_delay = delay;
        self
    }
}

#[async_trait]
impl Negotiator for LoopbackNegotiator {
    async fn request_credential(&self) -> Result<EphemeralCredential, CredentialError> {
        if let Some(err) = &self.credential_error {
            return Err(err.clone());
        }
        Ok(EphemeralCredential {
            key: "ek_loopback".to_string(),
            expires_at: None,
        })
    }

    async fn exchange_offer(
        &self,
        _local_offer: &str,
        _credential: &EphemeralCredential,
    ) -> Result<SessionDescription, SignalingError> {
        if !self.exchange_delay.is_zero() {
            tokio::time::sleep(self.exchange_delay).await;
        }
        if let Some(err) = &self.exchange_error {
            return Err(err.clone());
        }
        Ok(SessionDescription::answer(LOOPBACK_ANSWER))
    }
}

/// Playback sink that only records and logs what it is given.
#[derive(Default)]
pub struct RecordingPlayback {
    attached: Mutex<Option<String>>,
    detaches: AtomicUsize,
}

impl RecordingPlayback {
    pub fn attached_track(&self) -> Option<String> {
        self.attached.lock().unwrap().clone()
    }

    pub fn detach_count(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }
}

impl PlaybackSink for RecordingPlayback {
    fn attach(&self, track: &RemoteTrack) {
        info!("Coach audio track {} attached", track.id);
        *self.attached.lock().unwrap() = Some(track.id.clone());
    }

    fn detach(&self) {
        *self.attached.lock().unwrap() = None;
        self.detaches.fetch_add(1, Ordering::SeqCst);
    }
}
