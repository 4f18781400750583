//! Meeting client adapter boundary.
//!
//! The session core never touches a browser directly. It asks a
//! [`MeetingClient`] to navigate, locate elements by description, click,
//! type, read text and evaluate scripts. Every call is bounded in time, and
//! a missing element is an ordinary `Ok(None)`.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod webdriver;

pub use webdriver::{WebDriverClient, WebDriverOptions};

/// How to find an element on the meeting page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    XPath(String),
    Css(String),
}

impl Locator {
    pub fn xpath(expr: impl Into<String>) -> Self {
        Self::XPath(expr.into())
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// WebDriver `using` strategy name.
    pub fn strategy(&self) -> &'static str {
        match self {
            Self::XPath(_) => "xpath",
            Self::Css(_) => "css selector",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::XPath(v) | Self::Css(v) => v,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.strategy(), self.value())
    }
}

/// Opaque reference to an element the client located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle(String);

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    /// The underlying client handle is gone (browser closed, session lost).
    #[error("meeting client unavailable: {0}")]
    Unavailable(String),
    #[error("meeting client call timed out: {0}")]
    Timeout(String),
    #[error("element not found: {0}")]
    NotFound(String),
    #[error("meeting client protocol error: {0}")]
    Protocol(String),
    #[error("meeting client request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl AdapterError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Capabilities the session core needs from the concrete meeting UI.
#[async_trait]
pub trait MeetingClient: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), AdapterError>;

    /// Wait up to `timeout` for `locator` to appear. `Ok(None)` means the
    /// condition is not (yet) true.
    async fn locate(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Option<ElementHandle>, AdapterError>;

    async fn click(&self, element: &ElementHandle) -> Result<(), AdapterError>;

    async fn send_keys(&self, element: &ElementHandle, text: &str) -> Result<(), AdapterError>;

    async fn read_text(&self, element: &ElementHandle) -> Result<String, AdapterError>;

    async fn refresh(&self) -> Result<(), AdapterError>;

    async fn close(&self) -> Result<(), AdapterError>;

    /// Evaluate a script in the page and return its JSON result.
    async fn eval_script(&self, script: &str) -> Result<Value, AdapterError>;
}
