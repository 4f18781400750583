//! W3C WebDriver implementation of [`MeetingClient`], driving Chrome through
//! a chromedriver endpoint.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::{AdapterError, ElementHandle, Locator, MeetingClient};

/// Key under which WebDriver returns element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const DIALOG_SUPPRESSION: &str = "window.alert = function() { return; };\
     window.confirm = function() { return true; };\
     window.prompt = function() { return null; };";

#[derive(Debug, Clone)]
pub struct WebDriverOptions {
    pub endpoint: String,
    pub headless: bool,
    pub user_agent: String,
    pub extension_dir: Option<PathBuf>,
    pub profile_dir: Option<PathBuf>,
    pub command_timeout: Duration,
    pub locate_poll_interval: Duration,
}

impl Default for WebDriverOptions {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9515".to_string(),
            headless: true,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/129.0.6668.89 Safari/537.36"
                .to_string(),
            extension_dir: None,
            profile_dir: None,
            command_timeout: Duration::from_secs(30),
            locate_poll_interval: Duration::from_millis(250),
        }
    }
}

impl WebDriverOptions {
    /// `goog:chromeOptions` for an unattended meeting participant.
    pub fn chrome_options(&self) -> Value {
        let mut args: Vec<String> = Vec::new();
        if self.headless {
            args.push("--headless".to_string());
        }
        args.extend(
            [
                "--start-maximized",
                "--disable-notifications",
                "--disable-infobars",
                "--no-sandbox",
                "--disable-gpu",
                "--disable-dev-shm-usage",
                "--disable-blink-features=AutomationControlled",
                "--use-fake-ui-for-media-stream",
                "--use-fake-device-for-media-stream",
                "--auto-select-desktop-capture-source=Teams Meet",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(format!("user-agent={}", self.user_agent));
        if let Some(profile) = &self.profile_dir {
            args.push(format!("user-data-dir={}", profile.display()));
        }
        if let Some(extension) = &self.extension_dir {
            args.push(format!("--load-extension={}", extension.display()));
        }

        json!({
            "args": args,
            "excludeSwitches": ["enable-logging", "enable-automation"],
            "useAutomationExtension": false,
            "prefs": {
                "profile.default_content_setting_values.media_stream_mic": 1,
                "profile.default_content_setting_values.media_stream_camera": 0,
                "profile.default_content_setting_values.geolocation": 0,
                "profile.default_content_setting_values.notifications": 0,
                "profile.default_content_setting_values.popups": 2,
                "profile.default_content_settings.popups": 2,
                "download.prompt_for_download": false,
                "download.directory_upgrade": true,
            },
        })
    }
}

pub struct WebDriverClient {
    http: Client,
    session_url: String,
    command_timeout: Duration,
    locate_poll_interval: Duration,
    closed: AtomicBool,
}

impl WebDriverClient {
    /// Launch a browser session. Failure here means there is no adapter at all.
    pub async fn connect(options: &WebDriverOptions) -> Result<Self, AdapterError> {
        let http = Client::builder()
            .timeout(options.command_timeout)
            .build()?;

        let endpoint = options.endpoint.trim_end_matches('/');
        let body = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": options.chrome_options(),
                }
            }
        });

        let response = http
            .post(format!("{}/session", endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, options.command_timeout))?;
        let value = unwrap_response(response).await.map_err(|e| match e {
            AdapterError::Protocol(msg) => {
                AdapterError::Unavailable(format!("session not created: {msg}"))
            }
            other => other,
        })?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AdapterError::Protocol("new session response has no sessionId".into())
            })?;

        info!("Browser launched (webdriver session {})", session_id);

        Ok(Self {
            http,
            session_url: format!("{}/session/{}", endpoint, session_id),
            command_timeout: options.command_timeout,
            locate_poll_interval: options.locate_poll_interval,
            closed: AtomicBool::new(false),
        })
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, AdapterError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AdapterError::Unavailable("browser session closed".into()));
        }

        let url = format!("{}{}", self.session_url, path);
        let mut request = self.http.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(e, self.command_timeout))?;
        unwrap_response(response).await
    }

    async fn find_element(&self, locator: &Locator) -> Result<ElementHandle, AdapterError> {
        let value = self
            .command(
                Method::POST,
                "/element",
                Some(json!({ "using": locator.strategy(), "value": locator.value() })),
            )
            .await?;

        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(ElementHandle::new)
            .ok_or_else(|| {
                AdapterError::Protocol("find element response has no reference".into())
            })
    }
}

#[async_trait]
impl MeetingClient for WebDriverClient {
    async fn navigate(&self, url: &str) -> Result<(), AdapterError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        if let Err(e) = self.eval_script(DIALOG_SUPPRESSION).await {
            debug!("Could not neutralise page dialogs: {}", e);
        }
        Ok(())
    }

    async fn locate(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Option<ElementHandle>, AdapterError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.find_element(locator).await {
                Ok(element) => return Ok(Some(element)),
                Err(AdapterError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(self.locate_poll_interval).await;
        }
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), AdapterError> {
        self.command(
            Method::POST,
            &format!("/element/{}/click", element.id()),
            Some(json!({})),
        )
        .await
        .map(|_| ())
    }

    async fn send_keys(&self, element: &ElementHandle, text: &str) -> Result<(), AdapterError> {
        self.command(
            Method::POST,
            &format!("/element/{}/value", element.id()),
            Some(json!({ "text": text })),
        )
        .await
        .map(|_| ())
    }

    async fn read_text(&self, element: &ElementHandle) -> Result<String, AdapterError> {
        let value = self
            .command(Method::GET, &format!("/element/{}/text", element.id()), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn refresh(&self) -> Result<(), AdapterError> {
        self.command(Method::POST, "/refresh", Some(json!({})))
            .await
            .map(|_| ())
    }

    async fn close(&self) -> Result<(), AdapterError> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.command(Method::DELETE, "", None).await.map(|_| ());
        self.closed.store(true, Ordering::SeqCst);
        match result {
            Err(AdapterError::Unavailable(msg)) => {
                warn!("Browser was already gone when closing: {}", msg);
                Ok(())
            }
            other => other,
        }
    }

    async fn eval_script(&self, script: &str) -> Result<Value, AdapterError> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": [] })),
        )
        .await
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> AdapterError {
    if err.is_connect() {
        AdapterError::Unavailable(err.to_string())
    } else if err.is_timeout() {
        AdapterError::Timeout(format!("no response within {:?}", timeout))
    } else {
        AdapterError::Http(err)
    }
}

async fn unwrap_response(response: reqwest::Response) -> Result<Value, AdapterError> {
    let status = response.status();
    let mut body: Value = response.json().await?;
    let value = body.get_mut("value").map(Value::take).unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(value);
    }

    let code = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
    let message = value.get("message").and_then(Value::as_str).unwrap_or_default();
    Err(classify_error(code, message))
}

/// Map a WebDriver error code onto the adapter taxonomy.
fn classify_error(code: &str, message: &str) -> AdapterError {
    let detail = if message.is_empty() {
        code.to_string()
    } else {
        format!("{code}: {message}")
    };
    match code {
        "no such element" | "stale element reference" | "element not interactable" => {
            AdapterError::NotFound(detail)
        }
        "invalid session id" | "no such window" | "session not created" | "disconnected" => {
            AdapterError::Unavailable(detail)
        }
        "timeout" | "script timeout" => AdapterError::Timeout(detail),
        _ => AdapterError::Protocol(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_missing_element() {
        assert!(matches!(
            classify_error("no such element", "Unable to locate element"),
            AdapterError::NotFound(_)
        ));
        assert!(matches!(
            classify_error("stale element reference", ""),
            AdapterError::NotFound(_)
        ));
    }

    #[test]
    fn test_classify_lost_session_is_unavailable() {
        assert!(classify_error("invalid session id", "").is_unavailable());
        assert!(classify_error("no such window", "target window already closed").is_unavailable());
    }

    #[test]
    fn test_classify_timeout_keeps_driver_message() {
        match classify_error("script timeout", "result was not received in 30 seconds") {
            AdapterError::Timeout(detail) => {
                assert_eq!(detail, "script timeout: result was not received in 30 seconds")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_silent_driver_times_out_with_configured_budget() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and hold connections without ever answering.
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let options = WebDriverOptions {
            endpoint: format!("http://{addr}"),
            command_timeout: Duration::from_millis(200),
            ..WebDriverOptions::default()
        };
        let Err(err) = WebDriverClient::connect(&options).await else {
            panic!("connect should time out");
        };
        match err {
            AdapterError::Timeout(detail) => assert!(detail.contains("200ms"), "{detail}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classify_other_errors_are_protocol() {
        match classify_error("javascript error", "x is undefined") {
            AdapterError::Protocol(msg) => assert_eq!(msg, "javascript error: x is undefined"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_chrome_options_include_extension_and_profile() {
        let options = WebDriverOptions {
            extension_dir: Some(PathBuf::from("transcript_extension")),
            profile_dir: Some(PathBuf::from("bot-profile")),
            ..WebDriverOptions::default()
        };
        let chrome = options.chrome_options();
        let args: Vec<&str> = chrome["args"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();

        assert!(args.contains(&"--headless"));
        assert!(args.contains(&"--use-fake-ui-for-media-stream"));
        assert!(args.contains(&"--load-extension=transcript_extension"));
        assert!(args.contains(&"user-data-dir=bot-profile"));
        assert_eq!(chrome["useAutomationExtension"], json!(false));
    }

    #[test]
    fn test_chrome_options_headful() {
        let options = WebDriverOptions {
            headless: false,
            ..WebDriverOptions::default()
        };
        let chrome = options.chrome_options();
        let args = chrome["args"].as_array().unwrap();
        assert!(!args.iter().any(|a| a == "--headless"));
    }
}
