//! Recorder controller: supervises the external audio-capture process.
//!
//! The capture backend is an OS-dependent constant: AVFoundation on macOS,
//! PulseAudio on Linux. Anything else fails before a process is spawned.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::time::{timeout, Instant};
use tracing::{error, info, warn};

use crate::clock::{self, Stopwatch};

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("audio recording is not supported on {0}")]
    UnsupportedPlatform(String),
    #[error("ffmpeg not found: {0}")]
    BinaryNotFound(String),
    #[error("failed to spawn capture process: {0}")]
    SpawnFailed(#[from] std::io::Error),
}

/// Platform audio input used by ffmpeg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureBackend {
    AvFoundation,
    Pulse,
}

impl CaptureBackend {
    pub fn for_os(os: &str) -> Result<Self, RecorderError> {
        match os {
            "macos" => Ok(Self::AvFoundation),
            "linux" => Ok(Self::Pulse),
            other => Err(RecorderError::UnsupportedPlatform(other.to_string())),
        }
    }

    pub fn current() -> Result<Self, RecorderError> {
        Self::for_os(std::env::consts::OS)
    }

    fn input_args(&self) -> [&'static str; 4] {
        match self {
            Self::AvFoundation => ["-f", "avfoundation", "-i", ":0"],
            Self::Pulse => ["-f", "pulse", "-i", "default"],
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub ffmpeg_path: Option<PathBuf>,
    pub bitrate: String,
    pub sample_rate: u32,
    pub channels: u8,
    pub stop_timeout: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            bitrate: "128k".to_string(),
            sample_rate: 48000,
            channels: 2,
            stop_timeout: Duration::from_secs(10),
        }
    }
}

/// Full ffmpeg argument list for one capture run into `output`.
pub fn capture_args(
    backend: CaptureBackend,
    settings: &CaptureSettings,
    output: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = backend.input_args().iter().map(|s| s.to_string()).collect();
    args.extend([
        "-acodec".to_string(),
        "libopus".to_string(),
        "-b:a".to_string(),
        settings.bitrate.clone(),
        "-ac".to_string(),
        settings.channels.to_string(),
        "-ar".to_string(),
        settings.sample_rate.to_string(),
        "-y".to_string(),
    ]);
    args.push(output.to_string_lossy().into_owned());
    args
}

/// One audio-capture run.
#[derive(Debug)]
pub struct Recording {
    started_at: DateTime<Utc>,
    stopwatch: Stopwatch,
    audio_path: PathBuf,
    process: Option<Child>,
}

impl Recording {
    /// Stamp the start instants. Call right before spawning the capture.
    pub fn begin(audio_path: PathBuf) -> Self {
        Self {
            started_at: clock::wall_now(),
            stopwatch: Stopwatch::start(),
            audio_path,
            process: None,
        }
    }

    pub fn attach(&mut self, process: Child) {
        self.process = Some(process);
    }

    /// Wall-clock start, used as the transcript's meeting start.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.stopwatch.elapsed()
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        self.stopwatch.elapsed_at(now)
    }

    pub fn audio_path(&self) -> &Path {
        &self.audio_path
    }

    pub fn is_live(&self) -> bool {
        self.process.is_some()
    }

    fn take_process(&mut self) -> Option<Child> {
        self.process.take()
    }
}

#[async_trait]
pub trait Recorder: Send {
    async fn start(&mut self, audio_path: &Path) -> Result<Recording, RecorderError>;

    /// Stop capture. Bounded in time and safe to call twice.
    ///
    /// The ffmpeg recorder asks the process to quit by writing `q` to its
    /// stdin instead of sending a terminate signal, so the container is
    /// finalised. It is killed only after the stop timeout.
    async fn stop(&mut self, recording: &mut Recording);
}

pub struct FfmpegRecorder {
    settings: CaptureSettings,
}

impl FfmpegRecorder {
    pub fn new(settings: CaptureSettings) -> Self {
        Self { settings }
    }

    fn ffmpeg_binary(&self) -> Result<PathBuf, RecorderError> {
        match &self.settings.ffmpeg_path {
            Some(path) => Ok(path.clone()),
            None => {
                which::which("ffmpeg").map_err(|e| RecorderError::BinaryNotFound(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl Recorder for FfmpegRecorder {
    async fn start(&mut self, audio_path: &Path) -> Result<Recording, RecorderError> {
        let backend = CaptureBackend::current()?;
        let ffmpeg = self.ffmpeg_binary()?;

        if let Some(parent) = audio_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!("Starting meeting audio recording with {:?} ({:?})", ffmpeg, backend);

        let mut recording = Recording::begin(audio_path.to_path_buf());
        let child = Command::new(&ffmpeg)
            .args(capture_args(backend, &self.settings, audio_path))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        recording.attach(child);

        info!("Recording started. Output will be saved to {:?}", audio_path);
        Ok(recording)
    }

    async fn stop(&mut self, recording: &mut Recording) {
        let Some(mut child) = recording.take_process() else {
            info!("No recording process running, nothing to stop.");
            return;
        };

        info!(
            "Stopping audio recording after {}s...",
            clock::secs(recording.elapsed())
        );

        // ffmpeg finalises the container and exits on `q`.
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(b"q").await {
                warn!("Failed to ask ffmpeg to quit: {}", e);
            }
        }

        match timeout(self.settings.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => info!("Recording stopped ({}).", status),
            Ok(Err(e)) => {
                warn!("Failed waiting for recording process: {}", e);
                if let Err(e) = child.kill().await {
                    error!("Failed to kill recording process: {}", e);
                }
            }
            Err(_) => {
                warn!(
                    "Recording process did not terminate within {}s. Forcibly killing it.",
                    self.settings.stop_timeout.as_secs()
                );
                match child.kill().await {
                    Ok(()) => info!("Recording process killed."),
                    Err(e) => error!("Failed to kill recording process: {}", e),
                }
            }
        }
    }
}
