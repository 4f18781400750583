//! Join sequence driven over the meeting client.
//!
//! Every step is optional: a prompt that never shows up is skipped. Only a
//! failed navigation or a lost client aborts the join.

use reqwest::Url;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::adapter::{AdapterError, Locator, MeetingClient};

/// Descriptors for the pre-join screens.
#[derive(Debug, Clone)]
pub struct JoinLocators {
    pub continue_on_browser: Locator,
    pub continue_without_media: Locator,
    pub microphone_on: Locator,
    pub camera_on: Locator,
    pub passcode_input: Locator,
    pub passcode_retry: Locator,
    pub name_input: Locator,
    pub join_now: Locator,
}

impl JoinLocators {
    /// Microsoft Teams web client.
    pub fn teams() -> Self {
        Self {
            continue_on_browser: Locator::xpath("//button[contains(.,'Continue on this browser')]"),
            continue_without_media: Locator::xpath(
                "//button[contains(.,'Continue without audio or video')]",
            ),
            microphone_on: Locator::css(
                "div[data-tid='toggle-mute'][title='Microphone'][aria-checked='true']",
            ),
            camera_on: Locator::css(
                "div[data-tid='toggle-video'][title='Camera'][aria-checked='true']",
            ),
            passcode_input: Locator::xpath("//input[@placeholder='Type a meeting passcode']"),
            passcode_retry: Locator::xpath("//button[contains(.,'Retry')]"),
            name_input: Locator::xpath("//input[@placeholder='Type your name']"),
            join_now: Locator::xpath("//button[contains(.,'Join now')]"),
        }
    }
}

/// Pauses and per-step bounds of the join sequence.
#[derive(Debug, Clone)]
pub struct JoinTimings {
    pub after_navigate: Duration,
    pub before_media_prompt: Duration,
    pub before_passcode: Duration,
    pub after_join: Duration,
    pub continue_timeout: Duration,
    pub step_timeout: Duration,
    pub passcode_timeout: Duration,
}

impl Default for JoinTimings {
    fn default() -> Self {
        Self {
            after_navigate: Duration::from_secs(2),
            before_media_prompt: Duration::from_secs(4),
            before_passcode: Duration::from_secs(4),
            after_join: Duration::from_secs(2),
            continue_timeout: Duration::from_secs(20),
            step_timeout: Duration::from_secs(10),
            passcode_timeout: Duration::from_secs(5),
        }
    }
}

impl JoinTimings {
    /// No pauses at all.
    pub fn immediate() -> Self {
        Self {
            after_navigate: Duration::ZERO,
            before_media_prompt: Duration::ZERO,
            before_passcode: Duration::ZERO,
            after_join: Duration::ZERO,
            ..Self::default()
        }
    }
}

pub struct JoinFlow {
    locators: JoinLocators,
    timings: JoinTimings,
}

impl JoinFlow {
    pub fn new(locators: JoinLocators, timings: JoinTimings) -> Self {
        Self { locators, timings }
    }

    /// Initial join: navigate, clear the pre-join prompts, enter the
    /// passcode when the link carries one, then ask to join.
    pub async fn join(
        &self,
        client: &dyn MeetingClient,
        link: &str,
        bot_name: &str,
    ) -> Result<(), AdapterError> {
        self.open(client, link).await?;
        if let Some(passcode) = passcode_from_link(link) {
            self.enter_passcode(client, &passcode).await?;
        }
        self.request_entry(client, bot_name).await
    }

    /// Join again after a recoverable failure.
    pub async fn rejoin(
        &self,
        client: &dyn MeetingClient,
        link: &str,
        bot_name: &str,
    ) -> Result<(), AdapterError> {
        info!("Retrying to join the meeting...");
        client.refresh().await?;
        self.open(client, link).await?;
        self.request_entry(client, bot_name).await
    }

    async fn open(&self, client: &dyn MeetingClient, link: &str) -> Result<(), AdapterError> {
        info!("Navigating to meeting link: {}", link);
        client.navigate(link).await?;
        sleep(self.timings.after_navigate).await;

        let l = &self.locators;
        self.click_if_present(
            client,
            &l.continue_on_browser,
            self.timings.continue_timeout,
            "Continue on this browser",
        )
        .await?;
        sleep(self.timings.before_media_prompt).await;
        self.click_if_present(
            client,
            &l.continue_without_media,
            self.timings.step_timeout,
            "Continue without audio or video",
        )
        .await?;

        if self
            .click_if_present(
                client,
                &l.microphone_on,
                self.timings.step_timeout,
                "microphone toggle",
            )
            .await?
        {
            info!("Microphone turned off");
        }
        if self
            .click_if_present(client, &l.camera_on, self.timings.step_timeout, "camera toggle")
            .await?
        {
            info!("Camera turned off");
        }
        Ok(())
    }

    async fn enter_passcode(
        &self,
        client: &dyn MeetingClient,
        passcode: &str,
    ) -> Result<(), AdapterError> {
        sleep(self.timings.before_passcode).await;
        if self
            .type_if_present(client, &self.locators.passcode_input, passcode, "meeting passcode")
            .await?
        {
            self.click_if_present(
                client,
                &self.locators.passcode_retry,
                self.timings.passcode_timeout,
                "Retry",
            )
            .await?;
        }
        Ok(())
    }

    async fn request_entry(
        &self,
        client: &dyn MeetingClient,
        bot_name: &str,
    ) -> Result<(), AdapterError> {
        info!("Attempting to join the meeting...");
        self.type_if_present(client, &self.locators.name_input, bot_name, "bot name").await?;
        self.click_if_present(
            client,
            &self.locators.join_now,
            self.timings.step_timeout,
            "Join now",
        )
        .await?;
        sleep(self.timings.after_join).await;
        Ok(())
    }

    /// Click `locator` if it shows up within `timeout`. Returns whether it was clicked.
    async fn click_if_present(
        &self,
        client: &dyn MeetingClient,
        locator: &Locator,
        timeout: Duration,
        what: &str,
    ) -> Result<bool, AdapterError> {
        let element = match client.locate(locator, timeout).await {
            Ok(Some(element)) => element,
            Ok(None) => {
                debug!("'{}' not shown, skipping", what);
                return Ok(false);
            }
            Err(e) if e.is_unavailable() => return Err(e),
            Err(e) => {
                warn!("Error while looking for '{}': {}", what, e);
                return Ok(false);
            }
        };

        match client.click(&element).await {
            Ok(()) => {
                info!("Clicked '{}'", what);
                Ok(true)
            }
            Err(e) if e.is_unavailable() => Err(e),
            Err(e) => {
                warn!("Failed to click '{}': {}", what, e);
                Ok(false)
            }
        }
    }

    async fn type_if_present(
        &self,
        client: &dyn MeetingClient,
        locator: &Locator,
        text: &str,
        what: &str,
    ) -> Result<bool, AdapterError> {
        let element = match client.locate(locator, self.timings.step_timeout).await {
            Ok(Some(element)) => element,
            Ok(None) => {
                debug!("No input for {}, skipping", what);
                return Ok(false);
            }
            Err(e) if e.is_unavailable() => return Err(e),
            Err(e) => {
                warn!("Error while looking for {} input: {}", what, e);
                return Ok(false);
            }
        };

        match client.send_keys(&element, text).await {
            Ok(()) => {
                info!("Entered {}", what);
                Ok(true)
            }
            Err(e) if e.is_unavailable() => Err(e),
            Err(e) => {
                warn!("Failed to enter {}: {}", what, e);
                Ok(false)
            }
        }
    }
}

/// Passcode carried in the meeting link's `p` query parameter.
pub fn passcode_from_link(link: &str) -> Option<String> {
    let url = Url::parse(link).ok()?;
    let passcode = url
        .query_pairs()
        .find(|(key, _)| key == "p")
        .map(|(_, value)| value.into_owned())?;
    (!passcode.is_empty()).then_some(passcode)
}
