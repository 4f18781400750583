//! Admission & lifecycle monitor.
//!
//! Once per tick, runs every probe against the meeting client concurrently,
//! each bounded by the probe timeout, and folds the results into one
//! [`TickReport`]. A probe that errors or times out counts as "signal
//! absent". The only error that escapes is [`AdapterError::Unavailable`].

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::adapter::{AdapterError, ElementHandle, Locator, MeetingClient};

/// Text on the join-error page when the organiser turned the request down.
const DENIED_REQUEST_TEXT: &str = "denied your request to join";

/// Lifecycle signals, declared in precedence order: when several fire in
/// the same tick, the smallest wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleEvent {
    Denied,
    Removed,
    MeetingEnded,
    Admitted,
    RetryNeeded,
    StillWaiting,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Denied => "denied",
            Self::Removed => "removed",
            Self::MeetingEnded => "meeting_ended",
            Self::Admitted => "admitted",
            Self::RetryNeeded => "retry_needed",
            Self::StillWaiting => "still_waiting",
        }
    }
}

/// Attendee count observed at `at`. `None` means the count could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttendanceSample {
    pub at: Instant,
    pub count: Option<u32>,
}

impl AttendanceSample {
    pub fn unknown(at: Instant) -> Self {
        Self { at, count: None }
    }

    pub fn known(at: Instant, count: u32) -> Self {
        Self {
            at,
            count: Some(count),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Sorted by precedence, without duplicates.
    pub events: Vec<LifecycleEvent>,
    pub attendance: AttendanceSample,
}

impl TickReport {
    pub fn primary(&self) -> Option<LifecycleEvent> {
        self.events.first().copied()
    }

    pub fn contains(&self, event: LifecycleEvent) -> bool {
        self.events.contains(&event)
    }
}

/// Element descriptors the monitor probes for.
#[derive(Debug, Clone)]
pub struct MeetingSignals {
    pub admitted: Locator,
    pub denied: Locator,
    pub join_error: Locator,
    pub removed: Locator,
    pub meeting_ended: Locator,
    pub waiting_room: Locator,
    pub attendee_count: Locator,
}

impl MeetingSignals {
    /// Microsoft Teams web client.
    pub fn teams() -> Self {
        Self {
            admitted: Locator::xpath(r#"//button[starts-with(@aria-label, "Leave")]"#),
            denied: Locator::xpath(
                "//h1[contains(text(), 'Sorry, but you were denied access to the meeting.')]",
            ),
            join_error: Locator::xpath(concat!(
                r#"//h2[contains(text(), "#,
                r#""We couldn't find a meeting matching this ID and passcode.")]"#,
            )),
            removed: Locator::xpath(
                r#"//h1[contains(text(), "You've been removed from this meeting")]"#,
            ),
            meeting_ended: Locator::xpath(concat!(
                "//*[self::span or self::h1]",
                "[contains(text(), 'Enjoy your call? Join Teams today for free')]",
            )),
            waiting_room: Locator::xpath(concat!(
                "//h2[contains(text(), ",
                "'We\u{2019}ve let the organiser know that you\u{2019}re waiting.') ",
                "or contains(text(), ",
                "'When the meeting starts, we\u{2019}ll let the organiser know ",
                "that you\u{2019}re waiting.')]",
            )),
            attendee_count: Locator::xpath("//span[@data-tid='roster-button-tile']"),
        }
    }
}

pub struct LifecycleMonitor {
    signals: MeetingSignals,
    probe_timeout: Duration,
}

impl LifecycleMonitor {
    pub fn new(signals: MeetingSignals, probe_timeout: Duration) -> Self {
        Self {
            signals,
            probe_timeout,
        }
    }

    pub async fn poll(&self, client: &dyn MeetingClient) -> Result<TickReport, AdapterError> {
        let s = &self.signals;
        let (admitted, denied, join_error, removed, ended, waiting) = tokio::join!(
            self.probe(client, &s.admitted, "admitted"),
            self.probe(client, &s.denied, "denied"),
            self.probe(client, &s.join_error, "join error"),
            self.probe(client, &s.removed, "removed"),
            self.probe(client, &s.meeting_ended, "meeting ended"),
            self.probe(client, &s.waiting_room, "waiting room"),
        );
        let (admitted, denied, join_error, removed, ended, waiting) =
            (admitted?, denied?, join_error?, removed?, ended?, waiting?);

        let mut events = Vec::new();
        if denied.is_some() {
            info!("Join request was denied.");
            events.push(LifecycleEvent::Denied);
        }
        if let Some(element) = join_error {
            events.push(self.classify_join_error(client, &element).await?);
        }
        if removed.is_some() {
            info!("Detected removal from meeting.");
            events.push(LifecycleEvent::Removed);
        }
        if ended.is_some() {
            info!("Detected end-of-call screen. Meeting has ended.");
            events.push(LifecycleEvent::MeetingEnded);
        }
        if admitted.is_some() {
            events.push(LifecycleEvent::Admitted);
        }

        let now = Instant::now();
        let attendance = if waiting.is_some() {
            events.push(LifecycleEvent::StillWaiting);
            AttendanceSample::unknown(now)
        } else {
            AttendanceSample {
                at: now,
                count: self.attendee_count(client).await?,
            }
        };

        events.sort();
        events.dedup();

        Ok(TickReport { events, attendance })
    }

    async fn probe(
        &self,
        client: &dyn MeetingClient,
        locator: &Locator,
        what: &str,
    ) -> Result<Option<ElementHandle>, AdapterError> {
        let found = self
            .bounded(what, client.locate(locator, self.probe_timeout))
            .await?;
        Ok(found.flatten())
    }

    async fn classify_join_error(
        &self,
        client: &dyn MeetingClient,
        element: &ElementHandle,
    ) -> Result<LifecycleEvent, AdapterError> {
        let text = self
            .bounded("join error text", client.read_text(element))
            .await?
            .unwrap_or_default();

        if text.contains(DENIED_REQUEST_TEXT) {
            info!("Join error says the request was denied: {}", text.trim());
            Ok(LifecycleEvent::Denied)
        } else {
            warn!("Join error page detected, a retry is needed: {}", text.trim());
            Ok(LifecycleEvent::RetryNeeded)
        }
    }

    /// Read the roster count. Anything unreadable is unknown.
    async fn attendee_count(
        &self,
        client: &dyn MeetingClient,
    ) -> Result<Option<u32>, AdapterError> {
        let read = async {
            match client.locate(&self.signals.attendee_count, Duration::ZERO).await {
                Ok(Some(element)) => client.read_text(&element).await.map(Some),
                Ok(None) => Ok(None),
                Err(e) => Err(e),
            }
        };
        let text = self.bounded("attendee count", read).await?.flatten();
        Ok(text.as_deref().and_then(parse_attendee_count))
    }

    /// Run one client call under the probe timeout. A timeout or any error
    /// other than [`AdapterError::Unavailable`] comes back as `None`.
    async fn bounded<T, F>(&self, what: &str, call: F) -> Result<Option<T>, AdapterError>
    where
        F: Future<Output = Result<T, AdapterError>>,
    {
        match tokio::time::timeout(self.probe_timeout, call).await {
            Ok(Ok(value)) => Ok(Some(value)),
            Ok(Err(e)) if e.is_unavailable() => Err(e),
            Ok(Err(e)) => {
                debug!("Probe '{}' treated as absent: {}", what, e);
                Ok(None)
            }
            Err(_) => {
                debug!("Probe '{}' timed out after {:?}", what, self.probe_timeout);
                Ok(None)
            }
        }
    }
}

pub fn parse_attendee_count(text: &str) -> Option<u32> {
    let trimmed = text.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}
