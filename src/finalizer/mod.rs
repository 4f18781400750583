//! Artifact finalizer: the once-per-session teardown sequence.
//!
//! With a recording: settle, read the transcript while the client is still
//! live, write `{id}.json`, stop the recorder, close the client, package
//! `{id}.tar`, then upload bundle and audio independently. Without one the
//! client is closed and nothing is uploaded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapter::MeetingClient;
use crate::clock;
use crate::recorder::{Recorder, Recording};
use crate::store::{ArtifactKind, ArtifactStore, UploadTargets};

#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("failed to serialize transcript: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("artifact io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("packaging task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Transcript record written as `{id}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub title: Option<String>,
    pub meeting_start_time: Option<DateTime<Utc>>,
    pub meeting_end_time: DateTime<Utc>,
    pub transcript: Option<Vec<Value>>,
    pub chat_messages: Option<Vec<Value>>,
}

/// Read what the in-page capture extension left in `localStorage`.
/// Every field degrades to `None` on its own.
pub async fn extract_transcript(
    client: &dyn MeetingClient,
    started_at: Option<DateTime<Utc>>,
) -> TranscriptRecord {
    let transcript = read_storage(client, "transcript").await.and_then(as_entries);
    let chat_messages = read_storage(client, "chatMessages").await.and_then(as_entries);
    let title = read_storage(client, "meetingTitle").await.and_then(|v| match v {
        Value::String(s) if !s.is_empty() => Some(s),
        _ => None,
    });

    TranscriptRecord {
        title,
        meeting_start_time: started_at,
        meeting_end_time: clock::wall_now(),
        transcript,
        chat_messages,
    }
}

async fn read_storage(client: &dyn MeetingClient, key: &str) -> Option<Value> {
    let script = format!("return localStorage.getItem('{}');", key);
    match client.eval_script(&script).await {
        Ok(Value::Null) => {
            debug!("No '{}' in page storage", key);
            None
        }
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Failed to read '{}' from page storage: {}", key, e);
            None
        }
    }
}

/// Storage values are JSON text; accept an already-decoded array too.
fn as_entries(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(entries) => Some(entries),
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Array(entries)) => Some(entries),
            Ok(_) => None,
            Err(e) => {
                warn!("Unparsable transcript data: {}", e);
                None
            }
        },
        _ => None,
    }
}

/// Per-session output files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub audio: PathBuf,
    pub transcript: PathBuf,
    pub bundle: PathBuf,
}

impl ArtifactPaths {
    pub fn new(output_dir: &Path, id: Uuid) -> Self {
        Self {
            audio: output_dir.join(format!("{id}.opus")),
            transcript: output_dir.join(format!("{id}.json")),
            bundle: output_dir.join(format!("{id}.tar")),
        }
    }
}

pub async fn write_transcript(record: &TranscriptRecord, path: &Path) -> Result<(), FinalizeError> {
    let json = serde_json::to_vec_pretty(record)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, json).await?;
    Ok(())
}

/// Tar whichever of audio and transcript exist into `paths.bundle`.
pub async fn package(paths: &ArtifactPaths) -> Result<PathBuf, FinalizeError> {
    let paths = paths.clone();
    tokio::task::spawn_blocking(move || -> Result<PathBuf, FinalizeError> {
        let file = std::fs::File::create(&paths.bundle)?;
        let mut builder = tar::Builder::new(file);
        for member in [&paths.audio, &paths.transcript] {
            if !member.exists() {
                warn!("{:?} missing, leaving it out of the bundle", member);
                continue;
            }
            let name = member
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| member.clone());
            builder.append_path_with_name(member, name)?;
        }
        builder.into_inner()?;
        Ok(paths.bundle)
    })
    .await?
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    /// Nothing recorded, so nothing to send.
    NotAttempted,
    /// No destination configured for this artifact.
    NoTarget,
    Uploaded,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeReport {
    pub recorded_for: Option<Duration>,
    pub transcript_written: bool,
    pub bundle: UploadStatus,
    pub audio: UploadStatus,
}

impl FinalizeReport {
    /// Nothing was captured, so there is nothing to package or upload.
    pub fn nothing_recorded() -> Self {
        Self {
            recorded_for: None,
            transcript_written: false,
            bundle: UploadStatus::NotAttempted,
            audio: UploadStatus::NotAttempted,
        }
    }
}

pub struct Finalizer {
    output_dir: PathBuf,
    settle_delay: Duration,
    targets: UploadTargets,
    store: Box<dyn ArtifactStore>,
}

impl Finalizer {
    pub fn new(
        output_dir: PathBuf,
        settle_delay: Duration,
        targets: UploadTargets,
        store: Box<dyn ArtifactStore>,
    ) -> Self {
        Self {
            output_dir,
            settle_delay,
            targets,
            store,
        }
    }

    pub fn paths(&self, id: Uuid) -> ArtifactPaths {
        ArtifactPaths::new(&self.output_dir, id)
    }

    pub async fn finalize(
        &self,
        id: Uuid,
        client: &dyn MeetingClient,
        recorder: &mut dyn Recorder,
        recording: Option<Recording>,
    ) -> FinalizeReport {
        let Some(mut recording) = recording else {
            info!("No recording was made, closing the meeting client.");
            self.close_client(client).await;
            return FinalizeReport::nothing_recorded();
        };

        let paths = self.paths(id);

        // Let the page flush the last captions into storage.
        tokio::time::sleep(self.settle_delay).await;
        info!("Extracting transcript...");
        let record = extract_transcript(client, Some(recording.started_at())).await;
        let transcript_written = match write_transcript(&record, &paths.transcript).await {
            Ok(()) => {
                info!("Transcript saved to {:?}", paths.transcript);
                true
            }
            Err(e) => {
                error!("Failed to save transcript: {}", e);
                false
            }
        };

        let recorded_for = recording.elapsed();
        recorder.stop(&mut recording).await;
        self.close_client(client).await;
        drop(recording);

        let bundle = match package(&paths).await {
            Ok(bundle) => {
                info!("Packaged artifacts into {:?}", bundle);
                self.upload(&bundle, ArtifactKind::Bundle).await
            }
            Err(e) => {
                error!("Failed to package artifacts, skipping bundle upload: {}", e);
                UploadStatus::Failed(e.to_string())
            }
        };
        let audio = self.upload(&paths.audio, ArtifactKind::Audio).await;

        FinalizeReport {
            recorded_for: Some(recorded_for),
            transcript_written,
            bundle,
            audio,
        }
    }

    async fn close_client(&self, client: &dyn MeetingClient) {
        if let Err(e) = client.close().await {
            warn!("Failed to close meeting client: {}", e);
        }
    }

    async fn upload(&self, path: &Path, kind: ArtifactKind) -> UploadStatus {
        let Some(target) = self.targets.get(kind) else {
            info!("No {} upload URL configured, keeping {:?} locally", kind.as_str(), path);
            return UploadStatus::NoTarget;
        };
        match self.store.put(path, kind, target).await {
            Ok(()) => UploadStatus::Uploaded,
            Err(e) => {
                error!("Failed to upload {}: {}", kind.as_str(), e);
                UploadStatus::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::UploadTarget;
    use crate::testing::{FakeClient, FakeRecorder, FakeStore, Journal};
    use tempfile::TempDir;

    fn targets() -> UploadTargets {
        UploadTargets {
            bundle: Some(UploadTarget::new("http://store/bundle?sig=1")),
            audio: Some(UploadTarget::new("http://store/audio?sig=2")),
        }
    }

    fn finalizer(dir: &TempDir, store: FakeStore, targets: UploadTargets) -> Finalizer {
        Finalizer::new(dir.path().to_path_buf(), Duration::from_secs(10), targets, Box::new(store))
    }

    async fn started_recording(
        recorder: &mut FakeRecorder,
        finalizer: &Finalizer,
        id: Uuid,
    ) -> Recording {
        recorder.start(&finalizer.paths(id).audio).await.unwrap()
    }

    #[test]
    fn test_artifact_paths() {
        let id = Uuid::nil();
        let paths = ArtifactPaths::new(Path::new("out"), id);
        assert_eq!(paths.audio, PathBuf::from(format!("out/{id}.opus")));
        assert_eq!(paths.transcript, PathBuf::from(format!("out/{id}.json")));
        assert_eq!(paths.bundle, PathBuf::from(format!("out/{id}.tar")));
    }

    #[tokio::test]
    async fn test_extract_transcript_reads_storage() {
        let client = FakeClient::new(Journal::default())
            .with_storage("transcript", Value::String(r#"[{"speaker":"A","text":"hi"}]"#.into()))
            .with_storage("chatMessages", Value::String("[]".into()))
            .with_storage("meetingTitle", Value::String("Weekly sync".into()));

        let record = extract_transcript(&client, None).await;
        assert_eq!(record.title.as_deref(), Some("Weekly sync"));
        assert_eq!(record.transcript.unwrap().len(), 1);
        assert_eq!(record.chat_messages, Some(vec![]));
        assert!(record.meeting_start_time.is_none());
    }

    #[tokio::test]
    async fn test_extract_transcript_degrades_per_field() {
        let client = FakeClient::new(Journal::default())
            .with_storage("transcript", Value::String("not json".into()));
        let record = extract_transcript(&client, None).await;
        assert_eq!(record.transcript, None);
        assert_eq!(record.chat_messages, None);
        assert_eq!(record.title, None);

        let gone = FakeClient::new(Journal::default()).unavailable_after(0);
        let record = extract_transcript(&gone, None).await;
        assert_eq!(record.transcript, None);
    }

    #[test]
    fn test_transcript_record_field_names() {
        let record = TranscriptRecord {
            title: None,
            meeting_start_time: None,
            meeting_end_time: Utc::now(),
            transcript: None,
            chat_messages: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        for key in [
            "title",
            "meeting_start_time",
            "meeting_end_time",
            "transcript",
            "chat_messages",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[tokio::test]
    async fn test_package_bundles_audio_and_transcript() {
        let dir = TempDir::new().unwrap();
        let paths = ArtifactPaths::new(dir.path(), Uuid::new_v4());
        std::fs::write(&paths.audio, b"opus").unwrap();
        std::fs::write(&paths.transcript, b"{}").unwrap();

        let bundle = package(&paths).await.unwrap();

        let mut archive = tar::Archive::new(std::fs::File::open(bundle).unwrap());
        let mut names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        let mut expected = vec![
            paths.audio.file_name().unwrap().to_string_lossy().into_owned(),
            paths.transcript.file_name().unwrap().to_string_lossy().into_owned(),
        ];
        expected.sort();
        assert_eq!(names, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalize_order_with_recording() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::default();
        let store = FakeStore::new(journal.clone());
        let finalizer = finalizer(&dir, store.clone(), targets());
        let client = FakeClient::new(journal.clone());
        let mut recorder = FakeRecorder::new(journal.clone());
        let id = Uuid::new_v4();
        let recording = started_recording(&mut recorder, &finalizer, id).await;

        let report = finalizer
            .finalize(id, &client, &mut recorder, Some(recording))
            .await;

        assert!(report.transcript_written);
        assert_eq!(report.bundle, UploadStatus::Uploaded);
        assert_eq!(report.audio, UploadStatus::Uploaded);
        assert!(client.is_closed());
        assert!(finalizer.paths(id).transcript.exists());

        let eval = journal.position("client.eval").unwrap();
        let stop = journal.position("recorder.stop").unwrap();
        let close = journal.position("client.close").unwrap();
        let bundle = journal.position("store.put:bundle").unwrap();
        let audio = journal.position("store.put:audio").unwrap();
        assert!(eval < close);
        assert!(stop < bundle);
        assert!(close < bundle);
        assert!(bundle < audio);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_bundle_upload_does_not_block_audio() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::default();
        let store = FakeStore::failing(journal.clone(), ArtifactKind::Bundle);
        let finalizer = finalizer(&dir, store.clone(), targets());
        let client = FakeClient::new(journal.clone());
        let mut recorder = FakeRecorder::new(journal.clone());
        let id = Uuid::new_v4();
        let recording = started_recording(&mut recorder, &finalizer, id).await;

        let report = finalizer
            .finalize(id, &client, &mut recorder, Some(recording))
            .await;

        assert!(matches!(report.bundle, UploadStatus::Failed(_)));
        assert_eq!(report.audio, UploadStatus::Uploaded);
        assert_eq!(store.uploads().len(), 1);
        // Left on disk for out-of-band recovery.
        assert!(finalizer.paths(id).bundle.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_target_skips_that_upload() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::default();
        let store = FakeStore::new(journal.clone());
        let only_audio = UploadTargets {
            bundle: None,
            audio: Some(UploadTarget::new("http://store/audio")),
        };
        let finalizer = finalizer(&dir, store.clone(), only_audio);
        let client = FakeClient::new(journal.clone());
        let mut recorder = FakeRecorder::new(journal.clone());
        let id = Uuid::new_v4();
        let recording = started_recording(&mut recorder, &finalizer, id).await;

        let report = finalizer
            .finalize(id, &client, &mut recorder, Some(recording))
            .await;

        assert_eq!(report.bundle, UploadStatus::NoTarget);
        assert_eq!(report.audio, UploadStatus::Uploaded);
        assert_eq!(journal.count("store.put"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalize_without_recording_uploads_nothing() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::default();
        let finalizer = finalizer(&dir, FakeStore::new(journal.clone()), targets());
        let client = FakeClient::new(journal.clone());
        let mut recorder = FakeRecorder::new(journal.clone());

        let report = finalizer
            .finalize(Uuid::new_v4(), &client, &mut recorder, None)
            .await;

        assert_eq!(report.recorded_for, None);
        assert_eq!(report.bundle, UploadStatus::NotAttempted);
        assert_eq!(report.audio, UploadStatus::NotAttempted);
        assert_eq!(journal.entries(), vec!["client.close".to_string()]);
    }
}
