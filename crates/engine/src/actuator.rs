//! Browser actuation capability.
//!
//! The orchestrator only sees the [`Actuator`] trait; the default
//! implementation speaks the W3C WebDriver protocol over HTTP against a
//! chromedriver/msedgedriver endpoint.

use crate::config::EngineConfig;
use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use uiproof_common::{Error, Result};

/// W3C element identifier key
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Executes one scripted UI action against a live browser session
#[async_trait]
pub trait Actuator: Send {
    async fn navigate(&mut self, url: &str) -> Result<()>;
    async fn switch_frame(&mut self, frame: &str) -> Result<()>;
    /// Fill an input located by its name attribute
    async fn fill(&mut self, field: &str, value: &str) -> Result<()>;
    /// Send text to the active element
    async fn send_keys(&mut self, text: &str) -> Result<()>;
    /// Press a named key ("enter", "tab", ...) on the active element
    async fn press_key(&mut self, key: &str) -> Result<()>;
    /// Click the control recorded as an image template
    async fn click_image(&mut self, template: &str) -> Result<()>;
    /// Live page text, inspected by the error-detection check
    async fn page_text(&mut self) -> Result<String>;
    /// PNG screenshot of the current screen
    async fn screenshot(&mut self) -> Result<Vec<u8>>;
    /// Tear the session down
    async fn close(&mut self) -> Result<()>;
}

/// Creates one exclusive browser session per run
#[async_trait]
pub trait ActuatorFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn Actuator>>;
}

/// Map a friendly key name onto its WebDriver key code
pub fn key_code(key: &str) -> Option<&'static str> {
    match key.to_lowercase().as_str() {
        "enter" => Some("\u{E007}"),
        "tab" => Some("\u{E004}"),
        "escape" => Some("\u{E00C}"),
        "left" => Some("\u{E012}"),
        "up" => Some("\u{E013}"),
        "right" => Some("\u{E014}"),
        "down" => Some("\u{E015}"),
        _ => None,
    }
}

/// Resolve a legacy image template to the CSS selector configured for it
pub fn resolve_template<'a>(
    targets: &'a HashMap<String, String>,
    template: &str,
) -> Result<&'a str> {
    targets
        .get(template)
        .map(String::as_str)
        .ok_or_else(|| Error::Actuator(format!("no selector registered for template {template}")))
}

/// WebDriver-backed actuator
pub struct WebDriverActuator {
    client: reqwest::Client,
    base: String,
    session: String,
    image_targets: HashMap<String, String>,
}

impl WebDriverActuator {
    /// Open a new WebDriver session
    pub async fn connect(config: &EngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Actuator(e.to_string()))?;

        let body = json!({
            "capabilities": { "alwaysMatch": { "pageLoadStrategy": "normal" } }
        });
        let value = request(
            &client,
            reqwest::Method::POST,
            &format!("{}/session", config.webdriver_url.trim_end_matches('/')),
            Some(body),
        )
        .await?;
        let session = value["sessionId"]
            .as_str()
            .ok_or_else(|| Error::Actuator("webdriver returned no session id".into()))?
            .to_string();

        info!("Opened WebDriver session {}", session);
        Ok(Self {
            client,
            base: config.webdriver_url.trim_end_matches('/').to_string(),
            session,
            image_targets: config.image_targets.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/session/{}{}", self.base, self.session, path)
    }

    async fn command(&self, method: reqwest::Method, path: &str, body: Option<Value>) -> Result<Value> {
        request(&self.client, method, &self.url(path), body).await
    }

    async fn find_element(&self, selector: &str) -> Result<String> {
        let value = self
            .command(
                reqwest::Method::POST,
                "/element",
                Some(json!({ "using": "css selector", "value": selector })),
            )
            .await?;
        value[ELEMENT_KEY]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Actuator(format!("element not found: {selector}")))
    }

    async fn active_element(&self) -> Result<String> {
        let value = self
            .command(reqwest::Method::GET, "/element/active", None)
            .await?;
        value[ELEMENT_KEY]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Actuator("no active element".into()))
    }

    async fn element_send_keys(&self, element: &str, text: &str) -> Result<()> {
        self.command(
            reqwest::Method::POST,
            &format!("/element/{element}/value"),
            Some(json!({ "text": text })),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Actuator for WebDriverActuator {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        debug!("navigate {}", url);
        self.command(reqwest::Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn switch_frame(&mut self, frame: &str) -> Result<()> {
        let selector = format!("frame[name='{frame}'], iframe[name='{frame}']");
        let element = self.find_element(&selector).await?;
        self.command(
            reqwest::Method::POST,
            "/frame",
            Some(json!({ "id": { ELEMENT_KEY: element } })),
        )
        .await?;
        Ok(())
    }

    async fn fill(&mut self, field: &str, value: &str) -> Result<()> {
        let element = self.find_element(&format!("[name='{field}']")).await?;
        self.element_send_keys(&element, value).await
    }

    async fn send_keys(&mut self, text: &str) -> Result<()> {
        let element = self.active_element().await?;
        self.element_send_keys(&element, text).await
    }

    async fn press_key(&mut self, key: &str) -> Result<()> {
        let code = key_code(key)
            .ok_or_else(|| Error::Actuator(format!("unknown key: {key}")))?;
        let element = self.active_element().await?;
        self.element_send_keys(&element, code).await
    }

    async fn click_image(&mut self, template: &str) -> Result<()> {
        let selector = resolve_template(&self.image_targets, template)?.to_string();
        let element = self.find_element(&selector).await?;
        self.command(
            reqwest::Method::POST,
            &format!("/element/{element}/click"),
            Some(json!({})),
        )
        .await?;
        Ok(())
    }

    async fn page_text(&mut self) -> Result<String> {
        let value = self.command(reqwest::Method::GET, "/source", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Actuator("page source unavailable".into()))
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>> {
        let value = self
            .command(reqwest::Method::GET, "/screenshot", None)
            .await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| Error::Actuator("screenshot unavailable".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| Error::Actuator(format!("screenshot decode failed: {e}")))
    }

    async fn close(&mut self) -> Result<()> {
        request(
            &self.client,
            reqwest::Method::DELETE,
            &format!("{}/session/{}", self.base, self.session),
            None,
        )
        .await?;
        info!("Closed WebDriver session {}", self.session);
        Ok(())
    }
}

/// Factory opening WebDriver sessions against the configured endpoint
pub struct WebDriverFactory {
    config: EngineConfig,
}

impl WebDriverFactory {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ActuatorFactory for WebDriverFactory {
    async fn create(&self) -> Result<Box<dyn Actuator>> {
        Ok(Box::new(WebDriverActuator::connect(&self.config).await?))
    }
}

/// Issue one WebDriver command and unwrap its `value` envelope
async fn request(
    client: &reqwest::Client,
    method: reqwest::Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value> {
    let mut req = client.request(method, url);
    if let Some(body) = body {
        req = req.json(&body);
    }
    let resp = req
        .send()
        .await
        .map_err(|e| Error::Actuator(format!("webdriver request failed: {e}")))?;

    let status = resp.status();
    let payload: Value = resp
        .json()
        .await
        .map_err(|e| Error::Actuator(format!("webdriver response invalid: {e}")))?;

    if !status.is_success() {
        let message = payload["value"]["message"]
            .as_str()
            .unwrap_or("unknown webdriver error");
        return Err(Error::Actuator(format!("{status}: {message}")));
    }
    Ok(payload["value"].clone())
}
