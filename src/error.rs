//! Error taxonomy for the coaching pipeline.
//!
//! Start-time failures (`MediaAccessError`, `SignalingError`, `TransportError`)
//! abort a session before it ever becomes active. `ChatError` is recovered
//! locally by the session and only costs one coaching turn.

use thiserror::Error;

/// Microphone acquisition failed. Fatal to session start; the user has to
/// grant access and start again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaAccessError {
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("no audio input device available")]
    NoDevice,
    #[error("failed to open microphone: {0}")]
    Device(String),
}

/// The ephemeral-key endpoint could not provide a credential.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("ephemeral key request failed with status {status}")]
    Status { status: u16 },
    #[error("ephemeral key response did not contain an ephemeral_key")]
    MissingKey,
    #[error("ephemeral key request failed: {0}")]
    Request(String),
}

/// SDP negotiation with the realtime-audio service failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalingError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("SDP exchange failed: {status}")]
    Status { status: u16 },
    #[error("SDP exchange request failed: {0}")]
    Request(String),
}

impl SignalingError {
    /// HTTP status reported by the failing endpoint, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            SignalingError::Credential(CredentialError::Status { status }) => Some(*status),
            SignalingError::Status { status } => Some(*status),
            _ => None,
        }
    }
}

/// The peer connection or data channel rejected an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// A coach turn could not be produced. Never fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("coach endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("coach request failed: {0}")]
    Request(String),
    #[error("failed to decode coach response: {0}")]
    Decode(String),
}

/// Errors reported to the caller of `CoachingSession::start`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    MediaAccess(#[from] MediaAccessError),
    #[error(transparent)]
    Signaling(#[from] SignalingError),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("a coaching session is already running")]
    AlreadyRunning,
    #[error("session start was cancelled")]
    Cancelled,
    #[error("coaching session task is no longer running")]
    Closed,
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        SessionError::Connection(err.0)
    }
}

impl From<CredentialError> for SessionError {
    fn from(err: CredentialError) -> Self {
        SessionError::Signaling(SignalingError::Credential(err))
    }
}

/// Minting an ephemeral key from the upstream realtime API failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MintError {
    #[error("OpenAI API key not configured")]
    MissingApiKey,
    #[error("upstream returned status {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("client secret request failed: {0}")]
    Request(String),
    #[error("invalid client secret response: {0}")]
    Decode(String),
}

impl MintError {
    /// HTTP status the backend answers with for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            MintError::Upstream { status, .. } => *status,
            _ => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            MintError::Request(_) => true,
            MintError::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Sideband control connection errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SidebandError {
    #[error("OpenAI API key not configured")]
    MissingApiKey,
    #[error("invalid sideband request: {0}")]
    InvalidRequest(String),
    #[error("sideband connection failed: {0}")]
    Connect(String),
}
