//! Session orchestrator: the single-owner tick loop.
//!
//! One logical worker drives the whole session. Each loop iteration takes
//! the current [`SessionState`] by value, runs the step for it and stores
//! the successor. WaitingRoom and Recording wait on a fixed-interval ticker
//! between steps. The stop signal is read at every iteration boundary.

use std::time::Duration;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapter::MeetingClient;
use crate::clock;
use crate::finalizer::{FinalizeReport, Finalizer};
use crate::join::JoinFlow;
use crate::monitor::{LifecycleEvent, LifecycleMonitor, TickReport};
use crate::recorder::Recorder;
use crate::session::{
    ActiveRecording, EndReason, RecordingLimit, Session, SessionControl, SessionPhase, SessionState,
};
use crate::watchdog::WatchdogSignal;

/// What a finished session reports back to the caller.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub id: Uuid,
    pub reason: EndReason,
    pub admitted_after: Option<Duration>,
    pub history: Vec<SessionPhase>,
    /// `None` only if finalization was already claimed elsewhere.
    pub report: Option<FinalizeReport>,
}

impl SessionOutcome {
    pub fn recorded(&self) -> bool {
        self.report
            .as_ref()
            .is_some_and(|report| report.recorded_for.is_some())
    }

    /// End a session that never got a meeting client. Nothing was started,
    /// so finalization has nothing to release.
    pub fn without_client(mut session: Session, reason: EndReason) -> Self {
        session.enter(SessionState::Ending {
            reason,
            recording: None,
        });
        let report = session
            .begin_ending()
            .then(FinalizeReport::nothing_recorded);
        session.enter(SessionState::Ended { reason });
        info!("Session {} ended: {}", session.id(), reason);

        Self {
            id: session.id(),
            reason,
            admitted_after: None,
            history: session.history().to_vec(),
            report,
        }
    }
}

pub struct Orchestrator {
    session: Session,
    client: Box<dyn MeetingClient>,
    recorder: Box<dyn Recorder>,
    monitor: LifecycleMonitor,
    join: JoinFlow,
    finalizer: Finalizer,
    control: SessionControl,
    report: Option<FinalizeReport>,
}

impl Orchestrator {
    pub fn new(
        session: Session,
        client: Box<dyn MeetingClient>,
        recorder: Box<dyn Recorder>,
        monitor: LifecycleMonitor,
        join: JoinFlow,
        finalizer: Finalizer,
        control: SessionControl,
    ) -> Self {
        Self {
            session,
            client,
            recorder,
            monitor,
            join,
            finalizer,
            control,
            report: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Drive the session to completion. Every exit path goes through
    /// Ending, so the finalizer runs exactly once.
    pub async fn run(mut self) -> SessionOutcome {
        info!(
            "Session {} starting for {} as '{}'",
            self.session.id(),
            self.session.meeting_link(),
            self.session.bot_name()
        );

        let mut ticker = interval(self.session.policy().poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            let state = self.session.take_state();
            if let SessionState::Ended { reason } = state {
                self.session.enter(SessionState::Ended { reason });
                break reason;
            }

            let next = if state.is_live() && self.control.is_stopped() {
                info!("Stop requested, ending session.");
                state.into_ending(EndReason::Cancelled)
            } else {
                self.step(state, &mut ticker).await
            };
            self.session.enter(next);
        };

        info!("Session {} ended: {}", self.session.id(), reason);

        SessionOutcome {
            id: self.session.id(),
            reason,
            admitted_after: self.session.admitted_after(),
            history: self.session.history().to_vec(),
            report: self.report,
        }
    }

    async fn step(
        &mut self,
        state: SessionState,
        ticker: &mut tokio::time::Interval,
    ) -> SessionState {
        match state {
            SessionState::Joining => self.join().await,
            SessionState::WaitingRoom => {
                ticker.tick().await;
                self.tick_waiting().await
            }
            SessionState::Recording(active) => {
                ticker.tick().await;
                self.tick_recording(active).await
            }
            SessionState::Retrying => self.retry().await,
            SessionState::Ending { reason, recording } => {
                if self.session.begin_ending() {
                    info!("Finalizing session ({})...", reason);
                    let report = self
                        .finalizer
                        .finalize(
                            self.session.id(),
                            self.client.as_ref(),
                            self.recorder.as_mut(),
                            recording,
                        )
                        .await;
                    self.report = Some(report);
                } else {
                    warn!("Session already finalized, skipping teardown.");
                }
                SessionState::Ended { reason }
            }
            ended @ SessionState::Ended { .. } => ended,
        }
    }

    async fn join(&mut self) -> SessionState {
        let result = self
            .join
            .join(
                self.client.as_ref(),
                self.session.meeting_link(),
                self.session.bot_name(),
            )
            .await;

        match result {
            Ok(()) => {
                info!("Join requested, waiting for admission...");
                SessionState::WaitingRoom
            }
            Err(e) if e.is_unavailable() => {
                error!("Meeting client unavailable while joining: {}", e);
                SessionState::WaitingRoom.into_ending(EndReason::AdapterUnavailable)
            }
            Err(e) => {
                error!("Failed to join the meeting: {}", e);
                SessionState::WaitingRoom.into_ending(EndReason::JoinFailed)
            }
        }
    }

    async fn tick_waiting(&mut self) -> SessionState {
        let report = match self.monitor.poll(self.client.as_ref()).await {
            Ok(report) => report,
            Err(e) => {
                error!("Meeting client unavailable: {}", e);
                return SessionState::WaitingRoom.into_ending(EndReason::AdapterUnavailable);
            }
        };
        let retry_requested =
            self.control.take_retry() || report.contains(LifecycleEvent::RetryNeeded);

        match report.primary() {
            Some(LifecycleEvent::Denied) => {
                return SessionState::WaitingRoom.into_ending(EndReason::Denied);
            }
            Some(LifecycleEvent::Removed) => {
                return SessionState::WaitingRoom.into_ending(EndReason::Removed);
            }
            Some(LifecycleEvent::MeetingEnded) => {
                return SessionState::WaitingRoom.into_ending(EndReason::MeetingEnded);
            }
            Some(LifecycleEvent::Admitted) => return self.start_recording().await,
            _ => {}
        }

        let now = report.attendance.at;
        if self.session.join_deadline().is_exceeded_at(now) {
            warn!(
                "Not admitted within {}s, giving up.",
                clock::secs(self.session.policy().max_wait)
            );
            return SessionState::WaitingRoom.into_ending(EndReason::AdmissionTimeout);
        }

        if retry_requested {
            return SessionState::Retrying;
        }

        debug!(
            "Still waiting for admission ({}s left)",
            clock::secs(self.session.join_deadline().remaining_at(now))
        );
        SessionState::WaitingRoom
    }

    async fn start_recording(&mut self) -> SessionState {
        info!(
            "Admitted to the meeting after {}s.",
            clock::secs(self.session.join_elapsed())
        );
        let audio_path = self.finalizer.paths(self.session.id()).audio;
        match self.recorder.start(&audio_path).await {
            Ok(recording) => SessionState::Recording(ActiveRecording::new(recording)),
            Err(e) => {
                error!("Failed to start recording: {}", e);
                SessionState::WaitingRoom.into_ending(EndReason::RecorderFailed)
            }
        }
    }

    async fn tick_recording(&mut self, mut active: ActiveRecording) -> SessionState {
        let report: TickReport = match self.monitor.poll(self.client.as_ref()).await {
            Ok(report) => report,
            Err(e) => {
                error!("Meeting client unavailable: {}", e);
                return SessionState::Recording(active).into_ending(EndReason::AdapterUnavailable);
            }
        };

        // Admitted while already recording is a no-op.
        match report.primary() {
            Some(LifecycleEvent::Denied) => {
                return SessionState::Recording(active).into_ending(EndReason::Denied);
            }
            Some(LifecycleEvent::Removed) => {
                return SessionState::Recording(active).into_ending(EndReason::Removed);
            }
            Some(LifecycleEvent::MeetingEnded) => {
                return SessionState::Recording(active).into_ending(EndReason::MeetingEnded);
            }
            _ => {}
        }

        if let Some(count) = report.attendance.count {
            if active.last_known_count != Some(count) {
                info!("Member count: {}", count);
                active.last_known_count = Some(count);
            }
        }

        match active.watchdog.observe(report.attendance) {
            WatchdogSignal::Terminate => {
                if !active.solo_requested {
                    info!("Solo timer elapsed.");
                }
                active.solo_requested = true;
            }
            WatchdogSignal::Quiet => active.solo_requested = false,
            WatchdogSignal::Armed { remaining } => {
                debug!("Solo timer: {}s remaining", clock::secs(remaining))
            }
            WatchdogSignal::Ignored => {}
        }

        self.recording_verdict(active, report.attendance.at)
    }

    fn recording_verdict(&self, active: ActiveRecording, now: Instant) -> SessionState {
        let policy = self.session.policy();
        let recorded = active.recording.elapsed_at(now);
        let min_met = recorded >= policy.min_record;

        if active.solo_requested {
            if min_met {
                info!("Alone for too long. Leaving the meeting.");
                return SessionState::Recording(active).into_ending(EndReason::SoloTimeout);
            }
            debug!(
                "Solo timeout deferred until {}s of recording",
                clock::secs(policy.min_record)
            );
        }

        if min_met && policy.recording_limit == RecordingLimit::StopAtMinimum {
            info!(
                "Minimum recording time of {}s reached.",
                clock::secs(policy.min_record)
            );
            return SessionState::Recording(active).into_ending(EndReason::RecordingComplete);
        }

        SessionState::Recording(active)
    }

    async fn retry(&mut self) -> SessionState {
        let pause = self.session.policy().retry_pause;
        info!("Join needs a retry, pausing {}s first.", clock::secs(pause));
        sleep(pause).await;

        let result = self
            .join
            .rejoin(
                self.client.as_ref(),
                self.session.meeting_link(),
                self.session.bot_name(),
            )
            .await;

        match result {
            Ok(()) => SessionState::WaitingRoom,
            Err(e) => {
                error!("Retry failed: {}", e);
                SessionState::Retrying.into_ending(EndReason::RetryFailed)
            }
        }
    }
}
