use std::time::Duration;

use serde_json::{Value, json};

use crate::error::DriverError;
use crate::plan::browser::BrowserDefinition;

/// An open automation-driver session. Teardown only relies on `quit`.
pub trait DriverSession: Send {
    fn session_id(&self) -> &str;

    /// Send a raw command relative to the session URL
    /// (e.g. `POST url` with `{"url": ...}`).
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] if the driver rejects the command.
    fn command(&mut self, method: &str, path: &str, body: Option<Value>)
    -> Result<Value, DriverError>;

    /// Close the session and release the browser.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] if the driver could not be reached.
    fn quit(&mut self) -> Result<(), DriverError>;
}

/// Opens driver sessions for a browser definition.
pub trait DriverFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns [`DriverError`] when no session can be opened.
    fn open(&self, browser: &BrowserDefinition) -> Result<Box<dyn DriverSession>, DriverError>;
}

/// Factory used when the project has no driver endpoint configured.
pub struct NoDriver;

impl DriverFactory for NoDriver {
    fn open(&self, browser: &BrowserDefinition) -> Result<Box<dyn DriverSession>, DriverError> {
        Err(DriverError::Unavailable(browser.display_name().to_owned()))
    }
}

/// W3C WebDriver over HTTP.
pub struct WebDriverFactory {
    pub url: String,
    pub timeout: Duration,
}

impl WebDriverFactory {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_owned(),
            timeout: Duration::from_secs(60),
        }
    }

    fn agent(&self) -> ureq::Agent {
        let config = ureq::config::Config::builder()
            .http_status_as_error(false)
            .timeout_global(Some(self.timeout))
            .build();
        ureq::Agent::new_with_config(config)
    }
}

impl DriverFactory for WebDriverFactory {
    fn open(&self, browser: &BrowserDefinition) -> Result<Box<dyn DriverSession>, DriverError> {
        let capabilities = if browser.remote {
            Value::Object(browser.capabilities.clone())
        } else {
            json!({ "browserName": browser_name(&browser.name) })
        };
        let body = json!({ "capabilities": { "alwaysMatch": capabilities } });

        let agent = self.agent();
        let response = send(&agent, "POST", &format!("{}/session", self.url), Some(&body))?;
        let session_id = response
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Response(format!("no sessionId in {response}")))?
            .to_owned();

        Ok(Box::new(WebDriverSession {
            agent,
            base: format!("{}/session/{session_id}", self.url),
            session_id,
            closed: false,
        }))
    }
}

/// `chrome-headless` and friends map onto the plain driver browser name.
fn browser_name(name: &str) -> &str {
    name.split('-').next().unwrap_or(name)
}

struct WebDriverSession {
    agent: ureq::Agent,
    base: String,
    session_id: String,
    closed: bool,
}

impl DriverSession for WebDriverSession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn command(
        &mut self,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, DriverError> {
        let url = if path.is_empty() {
            self.base.clone()
        } else {
            format!("{}/{}", self.base, path.trim_start_matches('/'))
        };
        send(&self.agent, method, &url, body.as_ref())
    }

    fn quit(&mut self) -> Result<(), DriverError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        send(&self.agent, "DELETE", &self.base, None).map(|_| ())
    }
}

/// Send a WebDriver request and return the `value` member of the reply.
fn send(
    agent: &ureq::Agent,
    method: &str,
    url: &str,
    body: Option<&Value>,
) -> Result<Value, DriverError> {
    let result = match method {
        "GET" => agent.get(url).call(),
        "DELETE" => agent.delete(url).call(),
        "POST" => {
            let payload = body.cloned().unwrap_or_else(|| json!({})).to_string();
            agent
                .post(url)
                .header("Content-Type", "application/json")
                .send(payload.as_bytes())
        }
        other => {
            return Err(DriverError::Request(format!("unsupported method: {other}")));
        }
    };

    let mut response = result.map_err(|e| DriverError::Request(e.to_string()))?;
    let status = response.status().as_u16();
    let text = response
        .body_mut()
        .read_to_string()
        .map_err(|e| DriverError::Response(e.to_string()))?;
    let parsed: Value = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).map_err(|e| DriverError::Response(e.to_string()))?
    };
    let value = parsed.get("value").cloned().unwrap_or(Value::Null);

    if status >= 400 {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("driver returned an error")
            .to_owned();
        return Err(DriverError::Response(format!("{status}: {message}")));
    }
    // Older drivers put the session id at the top level.
    if let Some(id) = parsed.get("sessionId")
        && value.get("sessionId").is_none()
        && let Value::Object(mut map) = value.clone()
    {
        map.insert("sessionId".into(), id.clone());
        return Ok(Value::Object(map));
    }
    Ok(value)
}
