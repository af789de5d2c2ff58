//! Periodic generic delivery prompts while the founder keeps talking.

use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

pub const DEFAULT_PROACTIVE_PROMPTS: &[&str] = &[
    "How's your pacing feeling? Remember to slow down on key points for emphasis.",
    "Let's work on your tone. Try adding more energy and enthusiasm to your voice.",
    "Focus on clear pronunciation. Make sure every word is crisp and understandable.",
    "Great start! Now let's add some strategic pauses after important statements.",
    "I'm listening for confidence in your voice. Speak with authority about your solution.",
    "Remember to vary your vocal energy. Get excited about the benefits you're describing!",
];

pub fn default_prompts() -> Vec<String> {
    DEFAULT_PROACTIVE_PROMPTS
        .iter()
        .map(|p| p.to_string())
        .collect()
}

pub struct ProactiveScheduler {
    min_transcript_chars: usize,
    prompts: Vec<String>,
    rng: StdRng,
}

impl ProactiveScheduler {
    pub fn new(min_transcript_chars: usize, prompts: Vec<String>) -> Self {
        Self {
            min_transcript_chars,
            prompts,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic prompt selection for tests and replays.
    pub fn with_seed(min_transcript_chars: usize, prompts: Vec<String>, seed: u64) -> Self {
        Self {
            min_transcript_chars,
            prompts,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Pick a prompt for this interval tick, uniformly and with repeats.
    /// Nothing is offered until the transcript is long enough to coach.
    pub fn next_prompt(&mut self, transcript_len: usize) -> Option<String> {
        if transcript_len <= self.min_transcript_chars {
            debug!(
                "Transcript has {} chars, skipping proactive prompt",
                transcript_len
            );
            return None;
        }
        self.prompts.choose(&mut self.rng).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_transcript_gets_no_prompt() {
        let mut scheduler = ProactiveScheduler::with_seed(50, default_prompts(), 7);
        assert_eq!(scheduler.next_prompt(0), None);
        assert_eq!(scheduler.next_prompt(50), None);
    }

    #[test]
    fn test_prompts_come_from_pool() {
        let pool = default_prompts();
        let mut scheduler = ProactiveScheduler::with_seed(50, pool.clone(), 7);
        for _ in 0..20 {
            let prompt = scheduler.next_prompt(51).unwrap();
            assert!(pool.contains(&prompt));
        }
    }

    #[test]
    fn test_empty_pool_yields_nothing() {
        let mut scheduler = ProactiveScheduler::with_seed(0, Vec::new(), 1);
        assert_eq!(scheduler.next_prompt(500), None);
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = ProactiveScheduler::with_seed(10, default_prompts(), 42);
        let mut b = ProactiveScheduler::with_seed(10, default_prompts(), 42);
        for _ in 0..5 {
            assert_eq!(a.next_prompt(100), b.next_prompt(100));
        }
    }
}
