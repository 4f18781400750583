//! Attendance watchdog: a debounced "bot is alone" grace timer.
//!
//! Pure over its inputs. Each [`AttendanceSample`] carries its own timestamp,
//! so the watchdog never reads a clock.

use std::time::Duration;
use tracing::info;

use crate::clock::Deadline;
use crate::monitor::AttendanceSample;

/// How long the bot tolerates being (nearly) alone.
pub const SOLO_GRACE_PERIOD: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogSignal {
    /// Enough attendees; no timer running.
    Quiet,
    /// Low attendance, counting down.
    Armed { remaining: Duration },
    /// Grace period elapsed. Repeats on every low sample until cleared.
    Terminate,
    /// Unknown count; nothing changed.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct AttendanceWatchdog {
    grace: Duration,
    deadline: Option<Deadline>,
}

impl Default for AttendanceWatchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl AttendanceWatchdog {
    pub fn new() -> Self {
        Self::with_grace(SOLO_GRACE_PERIOD)
    }

    pub fn with_grace(grace: Duration) -> Self {
        Self {
            grace,
            deadline: None,
        }
    }

    pub fn deadline(&self) -> Option<Deadline> {
        self.deadline
    }

    pub fn observe(&mut self, sample: AttendanceSample) -> WatchdogSignal {
        let Some(count) = sample.count else {
            return WatchdogSignal::Ignored;
        };

        if count >= 2 {
            if self.deadline.take().is_some() {
                info!("Member count increased to {}. Cancelling solo timer.", count);
            }
            return WatchdogSignal::Quiet;
        }

        let grace = self.grace;
        let deadline = *self.deadline.get_or_insert_with(|| {
            info!(
                "Member count is {}. Starting {}-minute solo timer.",
                count,
                grace.as_secs() / 60
            );
            Deadline::after(sample.at, grace)
        });

        if deadline.is_expired_at(sample.at) {
            WatchdogSignal::Terminate
        } else {
            WatchdogSignal::Armed {
                remaining: deadline.remaining_at(sample.at),
            }
        }
    }
}
