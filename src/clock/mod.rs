//! Elapsed-time measurement and deadline arithmetic.
//!
//! Everything here reads `tokio::time::Instant`, so paused-time tests drive
//! the whole session deterministically. Wall-clock stamps are only used for
//! artifact metadata, never for decisions.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// Monotonic stopwatch anchored at construction.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn started_at(&self) -> Instant {
        self.started
    }

    pub fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.started)
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }
}

/// Stand-in for budgets too large to represent as an instant.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// An absolute monotonic point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    /// Saturates to a far-future instant when `budget` overflows.
    pub fn after(from: Instant, budget: Duration) -> Self {
        let at = from
            .checked_add(budget)
            .or_else(|| from.checked_add(FAR_FUTURE))
            .unwrap_or(from);
        Self(at)
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.0
    }

    /// Strictly past the deadline. Budgets like "max wait" trip on exceed,
    /// not on reach.
    pub fn is_exceeded_at(&self, now: Instant) -> bool {
        now > self.0
    }

    pub fn remaining_at(&self, now: Instant) -> Duration {
        self.0.saturating_duration_since(now)
    }
}

pub fn wall_now() -> DateTime<Utc> {
    Utc::now()
}

/// Whole seconds, for log lines.
pub fn secs(duration: Duration) -> u64 {
    duration.as_secs()
}
