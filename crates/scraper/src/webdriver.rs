//! W3C WebDriver render session
//!
//! Talks to a WebDriver endpoint (chromedriver, geckodriver, a Selenium
//! grid) over HTTP. Each pool session owns one remote browser session,
//! created lazily on first navigation and deleted on close.

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use warrant_core::{ScrapeError, ScrapeResult, ScraperConfig};

use crate::session::{RenderSession, SessionFactory};

/// Extra time granted to the HTTP call beyond the remote timeout
const HTTP_SLACK: Duration = Duration::from_secs(5);

/// Browser settings shared by every session
#[derive(Debug, Clone)]
pub struct WebDriverOptions {
    pub endpoint: String,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub page_load_timeout: Duration,
    pub script_timeout: Duration,
}

impl WebDriverOptions {
    pub fn from_config(config: &ScraperConfig) -> Self {
        Self {
            endpoint: config.webdriver_url.trim_end_matches('/').to_string(),
            headless: config.headless,
            viewport_width: config.viewport_width,
            viewport_height: config.viewport_height,
            page_load_timeout: config.navigation_timeout(),
            script_timeout: config.extract_timeout(),
        }
    }

    fn capabilities(&self) -> Value {
        let mut args = vec![
            format!("--window-size={},{}", self.viewport_width, self.viewport_height),
            "--disable-gpu".to_string(),
            "--no-sandbox".to_string(),
        ];
        if self.headless {
            args.push("--headless=new".to_string());
        }

        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args }
                }
            }
        })
    }
}

/// WebDriver wire envelope: every response carries a `value`
#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    value: Value,
}

/// Builds `WebDriverSession`s sharing one HTTP client
#[derive(Debug, Clone)]
pub struct WebDriverFactory {
    client: reqwest::Client,
    options: Arc<WebDriverOptions>,
}

impl WebDriverFactory {
    pub fn new(options: WebDriverOptions) -> ScrapeResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ScrapeError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            options: Arc::new(options),
        })
    }
}

impl SessionFactory for WebDriverFactory {
    type Session = WebDriverSession;

    fn create(&self, index: usize) -> WebDriverSession {
        WebDriverSession {
            index,
            client: self.client.clone(),
            options: Arc::clone(&self.options),
            session_id: Mutex::new(None),
        }
    }
}

/// One remote browser session
#[derive(Debug)]
pub struct WebDriverSession {
    index: usize,
    client: reqwest::Client,
    options: Arc<WebDriverOptions>,
    session_id: Mutex<Option<String>>,
}

impl WebDriverSession {
    fn current_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    /// Remote session id, creating the remote session if needed
    async fn ensure_session(&self) -> ScrapeResult<String> {
        if let Some(id) = self.current_id() {
            return Ok(id);
        }

        let url = format!("{}/session", self.options.endpoint);
        let value = self
            .send(
                self.client.post(&url).json(&self.options.capabilities()),
                self.options.page_load_timeout,
            )
            .await?;

        let id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| ScrapeError::Protocol("new session response without sessionId".into()))?
            .to_string();

        let timeouts = json!({
            "pageLoad": self.options.page_load_timeout.as_millis() as u64,
            "script": self.options.script_timeout.as_millis() as u64,
            "implicit": 0,
        });
        let url = format!("{}/session/{}/timeouts", self.options.endpoint, id);
        if let Err(e) = self
            .send(self.client.post(&url).json(&timeouts), HTTP_SLACK)
            .await
        {
            warn!(session = self.index, "Failed to set timeouts: {}", e);
        }

        info!(session = self.index, "Opened browser session {}", id);
        *self.session_id.lock() = Some(id.clone());
        Ok(id)
    }

    /// Send a command and unwrap the `value` envelope
    async fn send(&self, request: reqwest::RequestBuilder, timeout: Duration) -> ScrapeResult<Value> {
        let response = request
            .timeout(timeout + HTTP_SLACK)
            .send()
            .await
            .map_err(|e| ScrapeError::Transport(e.to_string()))?;

        let status = response.status();
        let body: WireResponse = response
            .json()
            .await
            .map_err(|e| ScrapeError::Protocol(format!("invalid response body: {}", e)))?;

        if status.is_success() {
            return Ok(body.value);
        }

        let error = body.value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
        let message = body.value.get("message").and_then(Value::as_str).unwrap_or("");

        if error == "invalid session id" {
            // Browser is gone. The pool re-positions lost sessions, and that
            // navigation opens a fresh one.
            self.session_id.lock().take();
            return Err(ScrapeError::SessionNotOpen(self.index));
        }

        Err(match error {
            "javascript error" | "script timeout" => {
                ScrapeError::Script(format!("{}: {}", error, message))
            }
            _ => ScrapeError::Protocol(format!("{} ({}): {}", error, status, message)),
        })
    }
}

#[async_trait::async_trait]
impl RenderSession for WebDriverSession {
    fn index(&self) -> usize {
        self.index
    }

    async fn navigate(&self, url: &str, timeout: Duration) -> ScrapeResult<()> {
        let id = self.ensure_session().await?;
        let endpoint = format!("{}/session/{}/url", self.options.endpoint, id);

        match self
            .send(self.client.post(&endpoint).json(&json!({ "url": url })), timeout)
            .await
        {
            Ok(_) => {
                debug!(session = self.index, "Navigated to {}", url);
                Ok(())
            }
            Err(ScrapeError::Protocol(msg)) if msg.starts_with("timeout") => {
                Err(ScrapeError::NavigationTimeout {
                    url: url.to_string(),
                    timeout,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn execute(&self, script: &str, args: Vec<Value>) -> ScrapeResult<Value> {
        let id = self
            .current_id()
            .ok_or(ScrapeError::SessionNotOpen(self.index))?;
        let endpoint = format!("{}/session/{}/execute/sync", self.options.endpoint, id);

        self.send(
            self.client
                .post(&endpoint)
                .json(&json!({ "script": script, "args": args })),
            self.options.script_timeout,
        )
        .await
    }

    async fn close(&self) -> ScrapeResult<()> {
        let taken = self.session_id.lock().take();
        let id = match taken {
            Some(id) => id,
            None => return Ok(()),
        };

        let endpoint = format!("{}/session/{}", self.options.endpoint, id);
        self.send(self.client.delete(&endpoint), HTTP_SLACK).await?;
        info!(session = self.index, "Closed browser session {}", id);
        Ok(())
    }
}
