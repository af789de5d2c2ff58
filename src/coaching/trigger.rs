//! Debounced coach-turn trigger.
//!
//! Every transcript update (re)arms a deadline; speech resuming cancels it.
//! When the deadline passes, the text since the last consumed boundary
//! becomes a user turn if it is long enough and no coach request is already
//! outstanding.

use super::transcript::TranscriptState;
use log::debug;
use std::time::Duration;
use tokio::time::Instant;

pub struct CoachingTrigger {
    debounce: Duration,
    min_new_chars: usize,
    deadline: Option<Instant>,
    in_flight: bool,
}

impl CoachingTrigger {
    pub fn new(debounce: Duration, min_new_chars: usize) -> Self {
        Self {
            debounce,
            min_new_chars,
            deadline: None,
            in_flight: false,
        }
    }

    /// Restart the debounce window.
    pub fn on_transcript_update(&mut self, now: Instant) {
        self.deadline = Some(now + self.debounce);
    }

    /// The user resumed talking; drop the pending trigger.
    pub fn on_speech_started(&mut self) {
        if self.deadline.take().is_some() {
            debug!("Speech resumed, pending coach trigger cancelled");
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_processing(&self) -> bool {
        self.in_flight
    }

    /// Whether enough unconsumed speech exists to justify a coach turn.
    ///
    /// Counts everything the transcript grew by since the boundary,
    /// separator included; only the emitted turn is trimmed.
    pub fn has_pending_turn(&self, transcript: &TranscriptState) -> bool {
        transcript.pending_delta().chars().count() > self.min_new_chars
    }

    /// Evaluate the debounce expiry.
    ///
    /// Returns the new user turn when one should be sent to the coach. The
    /// transcript boundary only advances when a turn is returned, and the
    /// engine then counts as processing until [`complete`](Self::complete).
    pub fn fire(&mut self, transcript: &mut TranscriptState) -> Option<String> {
        self.deadline = None;

        if self.in_flight {
            debug!("Coach request still in flight, trigger suppressed");
            return None;
        }
        if !self.has_pending_turn(transcript) {
            debug!(
                "Only {} new characters, not enough for a coach turn",
                transcript.pending_delta().chars().count()
            );
            return None;
        }

        let turn = transcript.pending_delta().trim().to_string();
        transcript.consume_delta();
        self.in_flight = true;
        Some(turn)
    }

    /// The outstanding coach request resolved, successfully or not.
    pub fn complete(&mut self) {
        self.in_flight = false;
    }

    pub fn reset(&mut self) {
        self.deadline = None;
        self.in_flight = false;
    }
}
