//! W3C WebDriver client used as the capture backend.
//!
//! Works against chromedriver or geckodriver. Every render opens its own
//! session and deletes it afterwards, so no state survives between captures.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use log::{debug, warn};
use reqwest::{Client, Method};
use serde_json::{Value, json};
use snapinator_config::Browser;
use url::Url;

use crate::{
    backend::{CaptureBackend, RenderRequest},
    errors::CaptureError,
};

/// Largest window height requested for full-page captures.
const MAX_FULL_PAGE_HEIGHT: u32 = 16_384;

const DOCUMENT_HEIGHT_SCRIPT: &str = "return Math.max(\
    document.body ? document.body.scrollHeight : 0, \
    document.documentElement ? document.documentElement.scrollHeight : 0);";

#[derive(Clone)]
pub struct WebDriverBackend {
    client: Client,
    endpoint: Url,
    browser: Browser,
}

impl WebDriverBackend {
    pub fn new(endpoint: &str, browser: Browser) -> Result<Self, CaptureError> {
        let mut endpoint = Url::parse(endpoint).map_err(|err| {
            CaptureError::Browser(format!("invalid WebDriver endpoint '{endpoint}': {err}"))
        })?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let client = Client::builder()
            .build()
            .map_err(|err| CaptureError::Browser(format!("unable to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            endpoint,
            browser,
        })
    }

    fn capabilities(&self, request: &RenderRequest) -> Value {
        match self.browser {
            Browser::Chrome => json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "chrome",
                        "goog:chromeOptions": {
                            "args": [
                                "--headless=new",
                                "--disable-gpu",
                                "--hide-scrollbars",
                                format!("--window-size={},{}", request.width, request.height),
                            ]
                        }
                    }
                }
            }),
            Browser::Firefox => json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "firefox",
                        "moz:firefoxOptions": {
                            "args": [
                                "-headless",
                                format!("--width={}", request.width),
                                format!("--height={}", request.height),
                            ]
                        }
                    }
                }
            }),
        }
    }

    async fn open_session(&self, request: &RenderRequest) -> Result<Session, CaptureError> {
        let value = self
            .command(Method::POST, "session", Some(self.capabilities(request)), request)
            .await?;
        let id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| CaptureError::Browser("WebDriver returned no session id".into()))?;
        debug!("Opened WebDriver session {}", id);

        Ok(Session {
            id: id.to_string(),
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            closed: false,
        })
    }

    async fn drive(&self, session: &Session, request: &RenderRequest) -> Result<Vec<u8>, CaptureError> {
        let millis = request.load_timeout.as_millis() as u64;
        self.command(
            Method::POST,
            &session.path("timeouts"),
            Some(json!({ "pageLoad": millis, "script": millis })),
            request,
        )
        .await?;
        self.resize(session, request, request.height).await?;

        self.command(
            Method::POST,
            &session.path("url"),
            Some(json!({ "url": request.url })),
            request,
        )
        .await?;

        if !request.settle_delay.is_zero() {
            tokio::time::sleep(request.settle_delay).await;
        }

        if request.full_page {
            let height = self
                .command(
                    Method::POST,
                    &session.path("execute/sync"),
                    Some(json!({ "script": DOCUMENT_HEIGHT_SCRIPT, "args": [] })),
                    request,
                )
                .await?
                .as_f64()
                .map(|h| h.ceil() as u32)
                .unwrap_or(request.height);
            let height = height.clamp(request.height, MAX_FULL_PAGE_HEIGHT.max(request.height));
            if height > request.height {
                self.resize(session, request, height).await?;
            }
        }

        let encoded = self
            .command(Method::GET, &session.path("screenshot"), None, request)
            .await?;
        let encoded = encoded
            .as_str()
            .ok_or_else(|| CaptureError::Browser("screenshot response was not a string".into()))?;
        STANDARD
            .decode(encoded)
            .map_err(|err| CaptureError::Browser(format!("screenshot was not valid base64: {err}")))
    }

    async fn resize(&self, session: &Session, request: &RenderRequest, height: u32) -> Result<(), CaptureError> {
        self.command(
            Method::POST,
            &session.path("window/rect"),
            Some(json!({ "width": request.width, "height": height })),
            request,
        )
        .await
        .map(|_| ())
    }

    /// Issues one WebDriver command and unwraps its `value` member.
    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        request: &RenderRequest,
    ) -> Result<Value, CaptureError> {
        let url = self
            .endpoint
            .join(path)
            .map_err(|err| CaptureError::Browser(format!("invalid WebDriver path '{path}': {err}")))?;

        let mut builder = self.client.request(method, url.clone());
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        let response = builder
            .send()
            .await
            .map_err(|err| CaptureError::Browser(format!("WebDriver request to {url} failed: {err}")))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| CaptureError::Browser(format!("unable to read WebDriver response: {err}")))?;
        let mut payload: Value = serde_json::from_slice(&bytes).map_err(|err| {
            CaptureError::Browser(format!("WebDriver returned {status} with a non-JSON body: {err}"))
        })?;
        let value = payload.get_mut("value").map(Value::take).unwrap_or(Value::Null);

        if status.is_success() {
            return Ok(value);
        }

        let code = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
        let message = value.get("message").and_then(Value::as_str).unwrap_or_default();
        Err(classify_failure(code, message, request))
    }
}

#[async_trait]
impl CaptureBackend for WebDriverBackend {
    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, CaptureError> {
        let mut session = self.open_session(request).await?;
        let result = self.drive(&session, request).await;
        session.close().await;
        result
    }
}

/// Maps a WebDriver error code onto the capture error taxonomy.
fn classify_failure(code: &str, message: &str, request: &RenderRequest) -> CaptureError {
    if code == "timeout" || code == "script timeout" {
        return CaptureError::Timeout(request.load_timeout);
    }

    let unreachable = code == "insecure certificate"
        || message.contains("net::ERR_")
        || message.contains("about:neterror")
        || message.contains("Reached error page");
    if unreachable {
        return CaptureError::Network {
            url: request.url.clone(),
            message: message.to_string(),
        };
    }

    CaptureError::Browser(format!("{code}: {message}"))
}

/// Open WebDriver session; deleted on `close`, or in the background if dropped.
struct Session {
    id: String,
    client: Client,
    endpoint: Url,
    closed: bool,
}

impl Session {
    fn path(&self, command: &str) -> String {
        format!("session/{}/{}", self.id, command)
    }

    fn delete_url(&self) -> Option<Url> {
        self.endpoint.join(&format!("session/{}", self.id)).ok()
    }

    async fn close(&mut self) {
        self.closed = true;
        let Some(url) = self.delete_url() else {
            return;
        };
        if let Err(err) = self.client.delete(url).send().await {
            warn!("Unable to delete WebDriver session {}: {}", self.id, err);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Render was cancelled mid-flight (timeout or shutdown).
        let (Some(url), Ok(handle)) = (self.delete_url(), tokio::runtime::Handle::try_current()) else {
            return;
        };
        let client = self.client.clone();
        handle.spawn(async move {
            let _ = client.delete(url).send().await;
        });
    }
}
