//! Scripted in-memory collaborators for unit tests.
//!
//! Every fake writes into a shared [`Journal`] so tests can assert on the
//! order of side effects across components.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::adapter::{AdapterError, ElementHandle, Locator, MeetingClient};
use crate::join::JoinLocators;
use crate::monitor::MeetingSignals;
use crate::recorder::{Recorder, RecorderError, Recording};
use crate::store::{ArtifactKind, ArtifactStore, UploadError, UploadTarget};

#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

pub fn signals() -> MeetingSignals {
    MeetingSignals {
        admitted: Locator::css("admitted"),
        denied: Locator::css("denied"),
        join_error: Locator::css("join-error"),
        removed: Locator::css("removed"),
        meeting_ended: Locator::css("meeting-ended"),
        waiting_room: Locator::css("waiting-room"),
        attendee_count: Locator::css("attendee-count"),
    }
}

pub fn join_locators() -> JoinLocators {
    JoinLocators {
        continue_on_browser: Locator::css("continue-on-browser"),
        continue_without_media: Locator::css("continue-without-media"),
        microphone_on: Locator::css("mic-on"),
        camera_on: Locator::css("camera-on"),
        passcode_input: Locator::css("passcode"),
        passcode_retry: Locator::css("passcode-retry"),
        name_input: Locator::css("name"),
        join_now: Locator::css("join-now"),
    }
}

struct Rule {
    locator: Locator,
    from: Duration,
    until: Option<Duration>,
    text: String,
}

#[derive(Default)]
struct FakePage {
    rules: Vec<Rule>,
    failing: Vec<Locator>,
    unavailable_after: Option<Duration>,
    stall: Duration,
    storage: Vec<(String, Value)>,
    closed: bool,
}

/// Meeting page whose elements appear and disappear on a virtual timeline
/// measured from construction.
#[derive(Clone)]
pub struct FakeClient {
    origin: Instant,
    page: Arc<Mutex<FakePage>>,
    journal: Journal,
}

impl FakeClient {
    pub fn new(journal: Journal) -> Self {
        Self {
            origin: Instant::now(),
            page: Arc::new(Mutex::new(FakePage::default())),
            journal,
        }
    }

    fn add_rule(self, locator: &Locator, from: u64, until: Option<u64>, text: &str) -> Self {
        self.page.lock().unwrap().rules.push(Rule {
            locator: locator.clone(),
            from: Duration::from_secs(from),
            until: until.map(Duration::from_secs),
            text: text.to_string(),
        });
        self
    }

    pub fn show(self, locator: &Locator, from: u64) -> Self {
        self.add_rule(locator, from, None, "")
    }

    pub fn show_between(self, locator: &Locator, from: u64, until: u64) -> Self {
        self.add_rule(locator, from, Some(until), "")
    }

    pub fn show_text(self, locator: &Locator, from: u64, text: &str) -> Self {
        self.add_rule(locator, from, None, text)
    }

    pub fn show_text_between(self, locator: &Locator, from: u64, until: u64, text: &str) -> Self {
        self.add_rule(locator, from, Some(until), text)
    }

    pub fn failing(self, locator: &Locator) -> Self {
        self.page.lock().unwrap().failing.push(locator.clone());
        self
    }

    pub fn unavailable_after(self, secs: u64) -> Self {
        self.page.lock().unwrap().unavailable_after = Some(Duration::from_secs(secs));
        self
    }

    /// Every lookup and text read hangs this long before answering,
    /// whatever timeout the caller passed.
    pub fn stalling(self, secs: u64) -> Self {
        self.page.lock().unwrap().stall = Duration::from_secs(secs);
        self
    }

    pub fn with_storage(self, key: &str, value: Value) -> Self {
        self.page.lock().unwrap().storage.push((key.to_string(), value));
        self
    }

    pub fn is_closed(&self) -> bool {
        self.page.lock().unwrap().closed
    }

    fn check_available(&self) -> Result<(), AdapterError> {
        let page = self.page.lock().unwrap();
        if page.closed {
            return Err(AdapterError::Unavailable("browser closed".into()));
        }
        if let Some(after) = page.unavailable_after {
            if self.origin.elapsed() >= after {
                return Err(AdapterError::Unavailable("browser crashed".into()));
            }
        }
        Ok(())
    }

    async fn stall(&self) {
        let stall = self.page.lock().unwrap().stall;
        if !stall.is_zero() {
            tokio::time::sleep(stall).await;
        }
    }

    fn active_text(&self, id: &str) -> Option<String> {
        let elapsed = self.origin.elapsed();
        let page = self.page.lock().unwrap();
        page.rules
            .iter()
            .rev()
            .find(|r| {
                r.locator.to_string() == id
                    && elapsed >= r.from
                    && r.until.map_or(true, |until| elapsed < until)
            })
            .map(|r| r.text.clone())
    }
}

#[async_trait]
impl MeetingClient for FakeClient {
    async fn navigate(&self, url: &str) -> Result<(), AdapterError> {
        self.check_available()?;
        self.journal.record(format!("client.navigate:{url}"));
        Ok(())
    }

    async fn locate(
        &self,
        locator: &Locator,
        _timeout: Duration,
    ) -> Result<Option<ElementHandle>, AdapterError> {
        self.check_available()?;
        self.stall().await;
        if self.page.lock().unwrap().failing.contains(locator) {
            return Err(AdapterError::Protocol(format!("stale page for {locator}")));
        }
        let id = locator.to_string();
        Ok(self.active_text(&id).map(|_| ElementHandle::new(id)))
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), AdapterError> {
        self.check_available()?;
        self.journal.record(format!("client.click:{}", element.id()));
        Ok(())
    }

    async fn send_keys(&self, element: &ElementHandle, text: &str) -> Result<(), AdapterError> {
        self.check_available()?;
        self.journal
            .record(format!("client.send_keys:{}:{}", element.id(), text));
        Ok(())
    }

    async fn read_text(&self, element: &ElementHandle) -> Result<String, AdapterError> {
        self.check_available()?;
        self.stall().await;
        self.active_text(element.id())
            .ok_or_else(|| AdapterError::NotFound(element.id().to_string()))
    }

    async fn refresh(&self) -> Result<(), AdapterError> {
        self.check_available()?;
        self.journal.record("client.refresh");
        Ok(())
    }

    async fn close(&self) -> Result<(), AdapterError> {
        self.page.lock().unwrap().closed = true;
        self.journal.record("client.close");
        Ok(())
    }

    async fn eval_script(&self, script: &str) -> Result<Value, AdapterError> {
        self.check_available()?;
        self.journal.record("client.eval");
        let page = self.page.lock().unwrap();
        Ok(page
            .storage
            .iter()
            .find(|(key, _)| script.contains(&format!("'{key}'")))
            .map(|(_, value)| value.clone())
            .unwrap_or(Value::Null))
    }
}

pub struct FakeRecorder {
    journal: Journal,
    fail: bool,
}

impl FakeRecorder {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            fail: false,
        }
    }

    pub fn failing(journal: Journal) -> Self {
        Self {
            journal,
            fail: true,
        }
    }
}

#[async_trait]
impl Recorder for FakeRecorder {
    async fn start(&mut self, audio_path: &Path) -> Result<Recording, RecorderError> {
        self.journal.record("recorder.start");
        if self.fail {
            return Err(RecorderError::UnsupportedPlatform("plan9".into()));
        }
        if let Some(parent) = audio_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(audio_path, b"OggS fake opus").await?;
        Ok(Recording::begin(audio_path.to_path_buf()))
    }

    async fn stop(&mut self, _recording: &mut Recording) {
        self.journal.record("recorder.stop");
    }
}

#[derive(Clone, Default)]
pub struct FakeStore {
    journal: Journal,
    fail: Vec<ArtifactKind>,
    uploads: Arc<Mutex<Vec<(ArtifactKind, PathBuf)>>>,
}

impl FakeStore {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    pub fn failing(journal: Journal, kind: ArtifactKind) -> Self {
        Self {
            journal,
            fail: vec![kind],
            ..Self::default()
        }
    }

    pub fn uploads(&self) -> Vec<(ArtifactKind, PathBuf)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactStore for FakeStore {
    async fn put(
        &self,
        path: &Path,
        kind: ArtifactKind,
        _target: &UploadTarget,
    ) -> Result<(), UploadError> {
        self.journal.record(format!("store.put:{}", kind.as_str()));
        if !path.exists() {
            return Err(UploadError::MissingFile(path.to_path_buf()));
        }
        if self.fail.contains(&kind) {
            return Err(UploadError::Status {
                status: 500,
                body: "internal error".into(),
            });
        }
        self.uploads.lock().unwrap().push((kind, path.to_path_buf()));
        Ok(())
    }
}
