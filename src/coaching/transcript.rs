//! Running transcript built from completed-transcription events.

use crate::realtime::events::RealtimeEvent;

/// Full session transcript plus how much of it the coach has already seen.
///
/// `last_delta_boundary` is a byte offset into `full_text`; it only moves
/// forward and never passes the end of the text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptState {
    full_text: String,
    last_delta_boundary: usize,
}

impl TranscriptState {
    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    pub fn last_delta_boundary(&self) -> usize {
        self.last_delta_boundary
    }

    pub fn len(&self) -> usize {
        self.full_text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.full_text.is_empty()
    }

    /// Text appended since the boundary was last advanced.
    pub fn pending_delta(&self) -> &str {
        &self.full_text[self.last_delta_boundary..]
    }

    /// Mark everything transcribed so far as consumed.
    pub fn consume_delta(&mut self) {
        self.last_delta_boundary = self.full_text.len();
    }

    fn append(&mut self, fragment: &str) {
        if !self.full_text.is_empty() {
            self.full_text.push(' ');
        }
        self.full_text.push_str(fragment);
    }
}

type TranscriptListener = Box<dyn Fn(&str) + Send + Sync>;

/// Accumulates transcription fragments and notifies listeners.
///
/// Only [`RealtimeEvent::TranscriptionCompleted`] is acted on here; speech
/// activity events go straight to the trigger engine.
#[derive(Default)]
pub struct TranscriptAggregator {
    state: TranscriptState,
    listeners: Vec<TranscriptListener>,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener called with the full transcript after each update.
    pub fn add_listener<F>(&mut self, listener: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Returns true when the transcript grew.
    pub fn on_event(&mut self, event: &RealtimeEvent) -> bool {
        let RealtimeEvent::TranscriptionCompleted { transcript } = event else {
            return false;
        };
        if transcript.is_empty() {
            return false;
        }

        self.state.append(transcript);
        for listener in &self.listeners {
            listener(self.state.full_text());
        }
        true
    }

    pub fn current_transcript(&self) -> &str {
        self.state.full_text()
    }

    pub fn state(&self) -> &TranscriptState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut TranscriptState {
        &mut self.state
    }

    /// Drop the transcript. Listeners stay registered.
    pub fn reset(&mut self) {
        self.state = TranscriptState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn completed(text: &str) -> RealtimeEvent {
        RealtimeEvent::TranscriptionCompleted {
            transcript: text.to_string(),
        }
    }

    #[test]
    fn test_fragments_are_space_separated() {
        let mut aggregator = TranscriptAggregator::new();
        assert!(aggregator.on_event(&completed("Our company")));
        assert!(aggregator.on_event(&completed("solves X")));
        assert_eq!(aggregator.current_transcript(), "Our company solves X");
    }

    #[test]
    fn test_other_events_and_empty_fragments_are_ignored() {
        let mut aggregator = TranscriptAggregator::new();
        assert!(!aggregator.on_event(&RealtimeEvent::SpeechStarted));
        assert!(!aggregator.on_event(&RealtimeEvent::Unknown {
            kind: "response.done".into()
        }));
        assert!(!aggregator.on_event(&completed("")));
        assert_eq!(aggregator.current_transcript(), "");
    }

    #[test]
    fn test_listeners_see_full_transcript() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut aggregator = TranscriptAggregator::new();
        let sink = seen.clone();
        aggregator.add_listener(move |text| sink.lock().unwrap().push(text.to_string()));

        aggregator.on_event(&completed("hello"));
        aggregator.on_event(&RealtimeEvent::SpeechStopped);
        aggregator.on_event(&completed("investors"));

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["hello".to_string(), "hello investors".to_string()]
        );
    }

    #[test]
    fn test_transcript_is_monotonic_and_boundary_bounded() {
        let mut aggregator = TranscriptAggregator::new();
        let fragments = ["a", "", "longer fragment here", "ünïcödé", "x"];
        let mut last_len = 0;

        for (i, fragment) in fragments.iter().enumerate() {
            aggregator.on_event(&completed(fragment));
            let state = aggregator.state();
            assert!(state.len() >= last_len);
            assert!(state.last_delta_boundary() <= state.len());
            last_len = state.len();

            if i % 2 == 0 {
                let before = state.last_delta_boundary();
                aggregator.state_mut().consume_delta();
                assert!(aggregator.state().last_delta_boundary() >= before);
                assert_eq!(aggregator.state().pending_delta(), "");
            }
        }
    }

    #[test]
    fn test_reset_keeps_listeners() {
        let count = Arc::new(Mutex::new(0));
        let mut aggregator = TranscriptAggregator::new();
        let c = count.clone();
        aggregator.add_listener(move |_| *c.lock().unwrap() += 1);

        aggregator.on_event(&completed("one"));
        aggregator.state_mut().consume_delta();
        aggregator.reset();
        assert_eq!(aggregator.state(), &TranscriptState::default());

        aggregator.on_event(&completed("two"));
        assert_eq!(*count.lock().unwrap(), 2);
        assert_eq!(aggregator.current_transcript(), "two");
    }
}
