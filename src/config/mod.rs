use crate::adapter::WebDriverOptions;
use crate::global;
use crate::recorder::CaptureSettings;
use crate::session::{RecordingLimit, SessionPolicy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub browser: BrowserConfig,
    pub recorder: RecorderConfig,
    pub output: OutputConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Display name typed into the lobby.
    pub bot_name: String,
    pub min_record_secs: u64,
    /// Admission budget, shared across retries.
    pub max_wait_secs: u64,
    pub poll_interval_secs: u64,
    pub retry_pause_secs: u64,
    /// Pause before reading the transcript so the page can flush captions.
    pub finalize_settle_secs: u64,
    pub recording_limit: RecordingLimit,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bot_name: "Teams Bot".to_string(),
            min_record_secs: 200,
            max_wait_secs: 1800,
            poll_interval_secs: 2,
            retry_pause_secs: 10,
            finalize_settle_secs: 10,
            recording_limit: RecordingLimit::StopAtMinimum,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub webdriver_url: String,
    pub headless: bool,
    pub user_agent: Option<String>,
    /// Unpacked transcript-capture extension loaded into the browser.
    pub extension_dir: Option<PathBuf>,
    pub profile_dir: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://127.0.0.1:9515".to_string(),
            headless: true,
            user_agent: None,
            extension_dir: None,
            profile_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Falls back to `ffmpeg` on PATH.
    pub ffmpeg_path: Option<PathBuf>,
    pub bitrate: String,
    pub sample_rate: u32,
    pub channels: u8,
    pub stop_timeout_secs: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            bitrate: "128k".to_string(),
            sample_rate: 48000,
            channels: 2,
            stop_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("out"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self { timeout_secs: 300 }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`. A missing
    /// file yields defaults and is not created.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => global::config_file()?,
        };

        if !config_path.exists() {
            if path.is_some() {
                anyhow::bail!("Config file {:?} does not exist", config_path);
            }
            info!("Config file not found at {:?}, using defaults", config_path);
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config = Self::from_toml(&content)?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    pub fn session_policy(&self) -> SessionPolicy {
        let s = &self.session;
        SessionPolicy {
            min_record: Duration::from_secs(s.min_record_secs),
            max_wait: Duration::from_secs(s.max_wait_secs),
            poll_interval: Duration::from_secs(s.poll_interval_secs.max(1)),
            retry_pause: Duration::from_secs(s.retry_pause_secs),
            settle_delay: Duration::from_secs(s.finalize_settle_secs),
            recording_limit: s.recording_limit,
        }
    }

    pub fn webdriver_options(&self) -> WebDriverOptions {
        let b = &self.browser;
        let defaults = WebDriverOptions::default();
        WebDriverOptions {
            endpoint: b.webdriver_url.clone(),
            headless: b.headless,
            user_agent: b.user_agent.clone().unwrap_or(defaults.user_agent),
            extension_dir: b.extension_dir.clone(),
            profile_dir: b.profile_dir.clone(),
            ..WebDriverOptions::default()
        }
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        let r = &self.recorder;
        CaptureSettings {
            ffmpeg_path: r.ffmpeg_path.clone(),
            bitrate: r.bitrate.clone(),
            sample_rate: r.sample_rate,
            channels: r.channels,
            stop_timeout: Duration::from_secs(r.stop_timeout_secs),
        }
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload.timeout_secs)
    }
}
