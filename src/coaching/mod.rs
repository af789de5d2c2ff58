//! Coaching pipeline on top of the realtime transport.
//!
//! ```text
//! data channel ──▶ TranscriptAggregator ──▶ CoachingTrigger ──▶ CoachResponder
//!                        │                        ▲                  │
//!                        ▼                        │                  ▼
//!                  transcript hook          SessionTimer         MessageLog
//!                                                 │                  ▲
//!                                         ProactiveScheduler ────────┘
//! ```
//!
//! [`CoachingSession`] owns all of it inside one actor task.

pub mod coach_client;
pub mod messages;
pub mod proactive;
pub mod session;
pub mod timer;
pub mod transcript;
pub mod trigger;

pub use coach_client::{CoachClient, CoachResponder, FALLBACK_REPLY};
pub use messages::{Message, MessageLog, Role};
pub use session::{
    CoachingSession, SessionConfig, SessionDeps, SessionHooks, SessionSnapshot, SessionStatus,
};
pub use timer::format_remaining;
