//! Fixed wall-clock budget for a coaching session.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTick {
    /// Not started, or already expired.
    Inactive,
    Remaining(Duration),
    /// The budget ran out on this tick. Reported exactly once per start.
    Expired,
}

/// One-shot countdown. Once expired it stays expired until
/// [`reset`](Self::reset) or the next [`start`](Self::start).
pub struct SessionTimer {
    budget: Duration,
    started_at: Option<Instant>,
    remaining: Duration,
    fired: bool,
}

impl SessionTimer {
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            started_at: None,
            remaining: budget,
            fired: false,
        }
    }

    pub fn start(&mut self, now: Instant) {
        self.started_at = Some(now);
        self.remaining = self.budget;
        self.fired = false;
    }

    pub fn tick(&mut self, now: Instant) -> TimerTick {
        let Some(started_at) = self.started_at else {
            return TimerTick::Inactive;
        };
        if self.fired {
            return TimerTick::Inactive;
        }

        let elapsed = now.saturating_duration_since(started_at);
        self.remaining = self.budget.saturating_sub(elapsed);
        if self.remaining.is_zero() {
            self.fired = true;
            TimerTick::Expired
        } else {
            TimerTick::Remaining(self.remaining)
        }
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// Cancel the countdown so a stale timer can never fire into a new session.
    pub fn reset(&mut self) {
        self.started_at = None;
        self.remaining = self.budget;
        self.fired = false;
    }
}

/// Render a countdown as `m:ss`.
pub fn format_remaining(remaining: Duration) -> String {
    let total_seconds = remaining.as_secs();
    format!("{}:{:02}", total_seconds / 60, total_seconds % 60)
}
