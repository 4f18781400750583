pub mod args;

pub use args::{Cli, CliCommand, JoinArgs};

use crate::config::Config;
use crate::store::{UploadTarget, UploadTargets};

impl JoinArgs {
    /// Fold command-line overrides into the loaded config.
    pub fn apply(&self, config: &mut Config) {
        if let Some(name) = &self.name {
            config.session.bot_name = name.clone();
        }
        if let Some(secs) = self.min_record_secs {
            config.session.min_record_secs = secs;
        }
        if let Some(secs) = self.max_wait_secs {
            config.session.max_wait_secs = secs;
        }
        if let Some(dir) = &self.output_dir {
            config.output.dir = dir.clone();
        }
        if let Some(url) = &self.webdriver_url {
            config.browser.webdriver_url = url.clone();
        }
    }

    /// Upload URLs are per-run and never read from the config file.
    pub fn upload_targets(&self) -> UploadTargets {
        UploadTargets {
            bundle: self.combined_url.as_deref().map(UploadTarget::new),
            audio: self.audio_url.as_deref().map(UploadTarget::new),
        }
    }
}
