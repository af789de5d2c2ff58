//! Connection to the hosted realtime-audio service.
//!
//! ```text
//!   Negotiator ──(credential, SDP answer)──▶ TransportSession
//!                                               │  microphone, peer,
//!                                               │  playback, data channel
//!                                               ▼
//!                                          PeerEvent stream ──▶ RealtimeEvent
//! ```
//!
//! The server side lives here too: [`credentials`] mints ephemeral keys and
//! [`sideband`] keeps per-call control WebSockets. [`audio`] holds the
//! cpal microphone and rodio playback used by live sessions.

pub mod audio;
pub mod credentials;
pub mod events;
pub mod loopback;
pub mod sideband;
pub mod signaling;
pub mod transport;

pub use events::RealtimeEvent;
pub use signaling::{EphemeralCredential, Negotiator, SessionDescription, SignalingClient};
pub use transport::{
    AudioConstraints, ConnectionState, PeerEvent, RtcConfiguration, TransportDeps,
    TransportSession, TransportState,
};
