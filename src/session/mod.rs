//! Session data model: the unit of work one bot process carries out.
//!
//! A [`Session`] is owned and mutated by the orchestrator alone. Other
//! components only ever see snapshots ([`SessionPhase`], ids, paths).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::clock::{Deadline, Stopwatch};
use crate::recorder::Recording;
use crate::watchdog::AttendanceWatchdog;

/// Coarse phase of a session, cheap to copy into logs and outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Joining,
    WaitingRoom,
    Recording,
    Retrying,
    Ending,
    Ended,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Joining => "joining",
            Self::WaitingRoom => "waiting_room",
            Self::Recording => "recording",
            Self::Retrying => "retrying",
            Self::Ending => "ending",
            Self::Ended => "ended",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session left the live phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    AdmissionTimeout,
    Denied,
    Removed,
    MeetingEnded,
    SoloTimeout,
    RecordingComplete,
    RecorderFailed,
    JoinFailed,
    RetryFailed,
    AdapterUnavailable,
    Cancelled,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdmissionTimeout => "admission timeout",
            Self::Denied => "denied",
            Self::Removed => "removed",
            Self::MeetingEnded => "meeting ended",
            Self::SoloTimeout => "solo timeout",
            Self::RecordingComplete => "recording complete",
            Self::RecorderFailed => "recorder failed",
            Self::JoinFailed => "join failed",
            Self::RetryFailed => "retry failed",
            Self::AdapterUnavailable => "meeting client unavailable",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens once the minimum recording time has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingLimit {
    /// End as soon as the minimum recording time is reached.
    #[default]
    StopAtMinimum,
    /// Keep recording past the minimum until the solo timer fires.
    UntilAlone,
}

/// Timing policy for one session.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub min_record: Duration,
    pub max_wait: Duration,
    pub poll_interval: Duration,
    pub retry_pause: Duration,
    pub settle_delay: Duration,
    pub recording_limit: RecordingLimit,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            min_record: Duration::from_secs(200),
            max_wait: Duration::from_secs(1800),
            poll_interval: Duration::from_secs(2),
            retry_pause: Duration::from_secs(10),
            settle_delay: Duration::from_secs(10),
            recording_limit: RecordingLimit::StopAtMinimum,
        }
    }
}

/// Recording-phase state: the live capture plus its attendance bookkeeping.
#[derive(Debug)]
pub struct ActiveRecording {
    pub recording: Recording,
    pub watchdog: AttendanceWatchdog,
    /// Watchdog asked to terminate; honoured once the minimum is met.
    pub solo_requested: bool,
    pub last_known_count: Option<u32>,
}

impl ActiveRecording {
    pub fn new(recording: Recording) -> Self {
        Self {
            recording,
            watchdog: AttendanceWatchdog::new(),
            solo_requested: false,
            last_known_count: None,
        }
    }
}

/// Orchestrator state. The live recording travels inside the variants, so
/// there is a recording exactly when the state says so.
#[derive(Debug)]
pub enum SessionState {
    Joining,
    WaitingRoom,
    Recording(ActiveRecording),
    Retrying,
    Ending {
        reason: EndReason,
        recording: Option<Recording>,
    },
    Ended {
        reason: EndReason,
    },
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            Self::Joining => SessionPhase::Joining,
            Self::WaitingRoom => SessionPhase::WaitingRoom,
            Self::Recording(_) => SessionPhase::Recording,
            Self::Retrying => SessionPhase::Retrying,
            Self::Ending { .. } => SessionPhase::Ending,
            Self::Ended { .. } => SessionPhase::Ended,
        }
    }

    /// Phases in which the stop signal still has something to interrupt.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            Self::Joining | Self::WaitingRoom | Self::Recording(_) | Self::Retrying
        )
    }

    /// Move to Ending, carrying along any live recording.
    pub fn into_ending(self, reason: EndReason) -> Self {
        let recording = match self {
            Self::Recording(active) => Some(active.recording),
            Self::Ending { recording, .. } => recording,
            _ => None,
        };
        Self::Ending { reason, recording }
    }
}

pub struct Session {
    id: Uuid,
    meeting_link: String,
    bot_name: String,
    policy: SessionPolicy,
    join_clock: Stopwatch,
    join_deadline: Deadline,
    state: SessionState,
    ended_once: bool,
    admitted_after: Option<Duration>,
    history: Vec<SessionPhase>,
}

impl Session {
    pub fn new(
        meeting_link: impl Into<String>,
        bot_name: impl Into<String>,
        policy: SessionPolicy,
    ) -> Self {
        let join_clock = Stopwatch::start();
        let join_deadline = Deadline::after(join_clock.started_at(), policy.max_wait);
        Self {
            id: Uuid::new_v4(),
            meeting_link: meeting_link.into(),
            bot_name: bot_name.into(),
            policy,
            join_clock,
            join_deadline,
            state: SessionState::Joining,
            ended_once: false,
            admitted_after: None,
            history: vec![SessionPhase::Joining],
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn meeting_link(&self) -> &str {
        &self.meeting_link
    }

    pub fn bot_name(&self) -> &str {
        &self.bot_name
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    /// Time spent trying to get in, cumulative across retries.
    pub fn join_elapsed(&self) -> Duration {
        self.join_clock.elapsed()
    }

    pub fn join_deadline(&self) -> Deadline {
        self.join_deadline
    }

    pub fn recording(&self) -> Option<&Recording> {
        match &self.state {
            SessionState::Recording(active) => Some(&active.recording),
            SessionState::Ending { recording, .. } => recording.as_ref(),
            _ => None,
        }
    }

    pub fn admitted_after(&self) -> Option<Duration> {
        self.admitted_after
    }

    pub fn history(&self) -> &[SessionPhase] {
        &self.history
    }

    pub(crate) fn take_state(&mut self) -> SessionState {
        // Placeholder until `enter` stores the successor.
        std::mem::replace(&mut self.state, SessionState::Joining)
    }

    pub(crate) fn enter(&mut self, next: SessionState) {
        let from = self.history.last().copied().unwrap_or(SessionPhase::Joining);
        let to = next.phase();
        if from != to {
            info!("Session {}: {} -> {}", self.id, from, to);
            if to == SessionPhase::Recording && self.admitted_after.is_none() {
                self.admitted_after = Some(self.join_clock.elapsed());
            }
            self.history.push(to);
        }
        self.state = next;
    }

    /// One-shot guard for the termination sequence. Returns `true` only on
    /// the first call.
    pub(crate) fn begin_ending(&mut self) -> bool {
        !std::mem::replace(&mut self.ended_once, true)
    }

    pub fn ended_once(&self) -> bool {
        self.ended_once
    }
}

/// Cross-boundary control flags, read once per tick.
#[derive(Debug, Clone, Default)]
pub struct SessionControl {
    stop: Arc<AtomicBool>,
    retry: Arc<AtomicBool>,
}

impl SessionControl {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn request_retry(&self) {
        self.retry.store(true, Ordering::SeqCst);
    }

    /// Consume a pending retry request.
    pub fn take_retry(&self) -> bool {
        self.retry.swap(false, Ordering::SeqCst)
    }
}
