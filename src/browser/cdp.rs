//! Chrome DevTools Protocol browser
//!
//! Launches a local Chromium with a throw-away profile and drives it over
//! a single DevTools WebSocket:
//! - command replies are correlated by id
//! - events are routed by flattened target session id
//! - `Network.*` events are converted into [`ObservedResponse`]s for observers

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, warn};

use super::{
    Browser, BrowserError, BrowserPage, ObservedResponse, ResponsePredicate, ResponseSubscription,
};
use crate::config::Settings;
use crate::session::Cookie;

const CHROME_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
];

const DEVTOOLS_BANNER: &str = "DevTools listening on ";

/// Launch options for [`ChromeBrowser`].
#[derive(Debug, Clone)]
pub struct ChromeOptions {
    /// Explicit binary; `PATH` is searched when `None`.
    pub executable: Option<PathBuf>,
    pub headless: bool,
    pub user_agent: String,
    pub launch_timeout: Duration,
    pub command_timeout: Duration,
    pub navigation_timeout: Duration,
    /// Idle time after each load event.
    pub settle: Duration,
}

impl ChromeOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            executable: settings.browser.executable.clone(),
            headless: settings.browser.headless,
            user_agent: settings.user_agent.clone(),
            launch_timeout: settings.timing.launch_timeout(),
            command_timeout: settings.timing.command_timeout(),
            navigation_timeout: settings.timing.navigation_timeout(),
            settle: settings.timing.settle(),
        }
    }
}

/// A DevTools event.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub session_id: Option<String>,
    pub method: String,
    pub params: Value,
}

type Reply = Result<Value, BrowserError>;

struct EventListener {
    session_id: String,
    tx: mpsc::UnboundedSender<CdpEvent>,
}

struct ResponseListener {
    session_id: String,
    predicate: ResponsePredicate,
    tx: mpsc::UnboundedSender<ObservedResponse>,
}

/// Where incoming frames go.
#[derive(Default)]
struct Routes {
    pending: HashMap<u64, (String, oneshot::Sender<Reply>)>,
    events: Vec<EventListener>,
    responses: Vec<ResponseListener>,
}

impl Routes {
    fn dispatch(&mut self, message: &Value) {
        if let Some(id) = message.get("id").and_then(Value::as_u64) {
            if let Some((method, tx)) = self.pending.remove(&id) {
                let _ = tx.send(reply_from(&method, message));
            }
            return;
        }

        let Some(method) = message.get("method").and_then(Value::as_str) else {
            return;
        };
        let Some(session_id) = message.get("sessionId").and_then(Value::as_str) else {
            return;
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        if let Some(response) = observed_response(method, &params) {
            self.responses.retain(|l| !l.tx.is_closed());
            for listener in self
                .responses
                .iter()
                .filter(|l| l.session_id == session_id && (l.predicate)(&response))
            {
                let _ = listener.tx.send(response.clone());
            }
        }

        self.events.retain(|l| !l.tx.is_closed());
        let event = CdpEvent {
            session_id: Some(session_id.to_string()),
            method: method.to_string(),
            params,
        };
        for listener in self.events.iter().filter(|l| l.session_id == session_id) {
            let _ = listener.tx.send(event.clone());
        }
    }

    fn fail_all(&mut self) {
        for (_, (_, tx)) in self.pending.drain() {
            let _ = tx.send(Err(BrowserError::Closed));
        }
        self.events.clear();
        self.responses.clear();
    }
}

fn lock(routes: &Mutex<Routes>) -> MutexGuard<'_, Routes> {
    routes.lock().unwrap_or_else(PoisonError::into_inner)
}

fn reply_from(method: &str, message: &Value) -> Reply {
    if let Some(error) = message.get("error") {
        let text = error
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), str::to_string);
        return Err(BrowserError::Protocol {
            method: method.to_string(),
            message: text,
        });
    }
    Ok(message.get("result").cloned().unwrap_or(Value::Null))
}

/// Convert a `Network.*` event into an observed response.
///
/// Redirect hops arrive as `requestWillBeSent` carrying the previous
/// response in `redirectResponse`.
fn observed_response(method: &str, params: &Value) -> Option<ObservedResponse> {
    let response = match method {
        "Network.responseReceived" => params.get("response")?,
        "Network.requestWillBeSent" => params.get("redirectResponse")?,
        _ => return None,
    };

    let request_id = params.get("requestId")?.as_str()?.to_string();
    let url = response.get("url")?.as_str()?.to_string();
    let status = response
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|s| u16::try_from(s).ok())
        .unwrap_or(0);
    let headers = response
        .get("headers")
        .and_then(Value::as_object)
        .map(|h| {
            h.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.to_lowercase(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Some(ObservedResponse {
        request_id,
        url,
        status,
        headers,
    })
}

/// One DevTools WebSocket shared by the browser and all its pages.
struct CdpConnection {
    routes: Arc<Mutex<Routes>>,
    outgoing: mpsc::UnboundedSender<String>,
    next_id: AtomicU64,
    command_timeout: Duration,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl CdpConnection {
    async fn connect(ws_url: &str, command_timeout: Duration) -> Result<Self, BrowserError> {
        let (stream, _response) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| BrowserError::Connect(e.to_string()))?;
        debug!("DevTools socket connected");

        let (mut sink, mut source) = stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let routes = Arc::new(Mutex::new(Routes::default()));

        let writer = tokio::spawn(async move {
            while let Some(text) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("DevTools send failed: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_routes = Arc::clone(&routes);
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Value>(&text) {
                        Ok(message) => lock(&reader_routes).dispatch(&message),
                        Err(e) => debug!("ignoring malformed DevTools frame: {e}"),
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "DevTools socket closed");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("DevTools receive failed: {e}");
                        break;
                    }
                }
            }
            lock(&reader_routes).fail_all();
        });

        Ok(Self {
            routes,
            outgoing,
            next_id: AtomicU64::new(0),
            command_timeout,
            reader,
            writer,
        })
    }

    /// Send a command and wait for its reply.
    async fn call(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value, BrowserError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        let mut message = json!({ "id": id, "method": method, "params": params });
        if let Some(session_id) = session_id {
            message["sessionId"] = Value::String(session_id.to_string());
        }

        let (tx, rx) = oneshot::channel();
        lock(&self.routes)
            .pending
            .insert(id, (method.to_string(), tx));

        if self.outgoing.send(message.to_string()).is_err() {
            lock(&self.routes).pending.remove(&id);
            return Err(BrowserError::Closed);
        }

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(BrowserError::Closed),
            Err(_) => {
                lock(&self.routes).pending.remove(&id);
                Err(BrowserError::Timeout {
                    method: method.to_string(),
                    timeout: self.command_timeout,
                })
            }
        }
    }

    fn listen(&self, session_id: &str) -> mpsc::UnboundedReceiver<CdpEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.routes).events.push(EventListener {
            session_id: session_id.to_string(),
            tx,
        });
        rx
    }

    fn observe(&self, session_id: &str, predicate: ResponsePredicate) -> ResponseSubscription {
        let (tx, subscription) = ResponseSubscription::channel();
        lock(&self.routes).responses.push(ResponseListener {
            session_id: session_id.to_string(),
            predicate,
            tx,
        });
        subscription
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Extract the WebSocket endpoint from Chromium's startup banner.
fn devtools_url(line: &str) -> Option<String> {
    let idx = line.find(DEVTOOLS_BANNER)?;
    let url = line[idx + DEVTOOLS_BANNER.len()..].trim();
    url.starts_with("ws://").then(|| url.to_string())
}

fn find_executable(explicit: Option<&Path>) -> Result<PathBuf, BrowserError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return which::which(path).map_err(|_| BrowserError::NotFound(path.display().to_string()));
    }

    CHROME_CANDIDATES
        .iter()
        .find_map(|name| which::which(name).ok())
        .ok_or_else(|| BrowserError::NotFound(CHROME_CANDIDATES.join(", ")))
}

fn launch_args(options: &ChromeOptions, profile_dir: &Path) -> Vec<String> {
    let mut args = vec![
        "--remote-debugging-port=0".to_string(),
        format!("--user-data-dir={}", profile_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--window-size=1920,1080".to_string(),
        format!("--user-agent={}", options.user_agent),
    ];
    if options.headless {
        args.push("--headless=new".to_string());
    }
    args.push("about:blank".to_string());
    args
}

/// Chromium driven over the DevTools protocol.
pub struct ChromeBrowser {
    conn: Arc<CdpConnection>,
    child: tokio::sync::Mutex<Option<Child>>,
    navigation_timeout: Duration,
    settle: Duration,
    _profile: tempfile::TempDir,
}

impl ChromeBrowser {
    /// Launch Chromium and connect to its DevTools endpoint.
    #[instrument(skip(options), fields(headless = options.headless))]
    pub async fn launch(options: ChromeOptions) -> Result<Self, BrowserError> {
        let executable = find_executable(options.executable.as_deref())?;
        let profile = tempfile::Builder::new().prefix("thuis-chrome-").tempdir()?;
        let args = launch_args(&options, profile.path());
        debug!(executable = %executable.display(), ?args, "launching browser");

        let mut child = Command::new(&executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BrowserError::Launch(format!("{}: {e}", executable.display())))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BrowserError::Launch("failed to capture browser stderr".to_string()))?;
        let mut lines = BufReader::new(stderr).lines();

        let ws_url = tokio::time::timeout(options.launch_timeout, async {
            while let Some(line) = lines.next_line().await? {
                if let Some(url) = devtools_url(&line) {
                    return Ok(Some(url));
                }
                debug!(target: "chrome", "{line}");
            }
            Ok::<_, std::io::Error>(None)
        })
        .await
        .map_err(|_| BrowserError::Timeout {
            method: "DevTools endpoint".to_string(),
            timeout: options.launch_timeout,
        })??
        .ok_or_else(|| {
            BrowserError::Launch("browser exited before announcing its DevTools endpoint".to_string())
        })?;

        // Keep draining stderr so the browser never blocks on a full pipe.
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "chrome", "{line}");
            }
        });

        info!(%ws_url, "browser ready");
        let conn = CdpConnection::connect(&ws_url, options.command_timeout).await?;

        Ok(Self {
            conn: Arc::new(conn),
            child: tokio::sync::Mutex::new(Some(child)),
            navigation_timeout: options.navigation_timeout,
            settle: options.settle,
            _profile: profile,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CdpCookie {
    name: String,
    value: String,
    domain: String,
    #[serde(default)]
    path: Option<String>,
}

fn str_field(value: &Value, field: &str, method: &str) -> Result<String, BrowserError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BrowserError::Protocol {
            method: method.to_string(),
            message: format!("reply lacks {field}"),
        })
}

#[async_trait]
impl Browser for ChromeBrowser {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>, BrowserError> {
        let created = self
            .conn
            .call("Target.createTarget", json!({ "url": "about:blank" }), None)
            .await?;
        let target_id = str_field(&created, "targetId", "Target.createTarget")?;

        let attached = self
            .conn
            .call(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                None,
            )
            .await?;
        let session_id = str_field(&attached, "sessionId", "Target.attachToTarget")?;

        let page = CdpPage {
            conn: Arc::clone(&self.conn),
            target_id,
            session_id,
            navigation_timeout: self.navigation_timeout,
            settle: self.settle,
        };
        page.command("Page.enable", json!({})).await?;
        page.command("Network.enable", json!({})).await?;
        debug!(target_id = %page.target_id, "page opened");

        Ok(Box::new(page))
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, BrowserError> {
        let result = self.conn.call("Storage.getCookies", json!({}), None).await?;
        let cookies: Vec<CdpCookie> =
            serde_json::from_value(result.get("cookies").cloned().unwrap_or(Value::Null))?;

        Ok(cookies
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
            })
            .collect())
    }

    async fn replace_cookies(&self, cookies: &[Cookie]) -> Result<(), BrowserError> {
        self.conn.call("Storage.clearCookies", json!({}), None).await?;
        if cookies.is_empty() {
            return Ok(());
        }

        let params: Vec<Value> = cookies
            .iter()
            .map(|c| {
                json!({
                    "name": c.name,
                    "value": c.value,
                    "domain": c.domain,
                    "path": c.path.as_deref().unwrap_or("/"),
                })
            })
            .collect();
        self.conn
            .call("Storage.setCookies", json!({ "cookies": params }), None)
            .await?;
        debug!(count = cookies.len(), "cookies installed");
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if let Err(e) = self.conn.call("Browser.close", json!({}), None).await {
            debug!("Browser.close: {e}");
        }

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
                Ok(status) => debug!(?status, "browser exited"),
                Err(_) => {
                    warn!("browser did not exit, killing it");
                    child.kill().await?;
                }
            }
        }
        Ok(())
    }
}

/// A flattened DevTools target session.
struct CdpPage {
    conn: Arc<CdpConnection>,
    target_id: String,
    session_id: String,
    navigation_timeout: Duration,
    settle: Duration,
}

impl CdpPage {
    async fn command(&self, method: &str, params: Value) -> Result<Value, BrowserError> {
        self.conn.call(method, params, Some(&self.session_id)).await
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, BrowserError> {
        let result = self
            .command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("uncaught exception");
            return Err(BrowserError::Script(text.to_string()));
        }

        Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }

    /// Run `action` against the first element matching `selector`.
    async fn with_element(&self, selector: &str, action: &str) -> Result<(), BrowserError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; {action} return true; }})()",
            Value::String(selector.to_string())
        );
        match self.evaluate(&script).await?.as_bool() {
            Some(true) => Ok(()),
            _ => Err(BrowserError::ElementNotFound(selector.to_string())),
        }
    }
}

#[async_trait]
impl BrowserPage for CdpPage {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        let mut events = self.conn.listen(&self.session_id);

        let result = self.command("Page.navigate", json!({ "url": url })).await?;
        if let Some(reason) = result
            .get("errorText")
            .and_then(Value::as_str)
            .filter(|e| !e.is_empty())
        {
            return Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: reason.to_string(),
            });
        }

        let loaded = tokio::time::timeout(self.navigation_timeout, async {
            while let Some(event) = events.recv().await {
                if event.method == "Page.loadEventFired" {
                    return true;
                }
            }
            false
        })
        .await;

        match loaded {
            Ok(true) => {}
            Ok(false) => return Err(BrowserError::Closed),
            Err(_) => warn!(url, "no load event within {:?}", self.navigation_timeout),
        }

        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self
            .evaluate("window.location.href")
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn content(&self) -> Result<String, BrowserError> {
        Ok(self
            .evaluate("document.documentElement ? document.documentElement.outerHTML : ''")
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn has_element(&self, selector: &str) -> Result<bool, BrowserError> {
        let script = format!(
            "!!document.querySelector({})",
            Value::String(selector.to_string())
        );
        Ok(self.evaluate(&script).await?.as_bool().unwrap_or(false))
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        self.with_element(selector, "el.focus(); if ('value' in el) { el.value = ''; }")
            .await?;
        self.command("Input.insertText", json!({ "text": text }))
            .await?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        self.with_element(selector, "el.click();").await
    }

    fn observe(&self, predicate: ResponsePredicate) -> ResponseSubscription {
        self.conn.observe(&self.session_id, predicate)
    }

    async fn response_body(&self, request_id: &str) -> Result<String, BrowserError> {
        let result = self
            .command("Network.getResponseBody", json!({ "requestId": request_id }))
            .await?;

        if result
            .get("base64Encoded")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return Err(BrowserError::Protocol {
                method: "Network.getResponseBody".to_string(),
                message: "binary response body".to_string(),
            });
        }
        str_field(&result, "body", "Network.getResponseBody")
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.conn
            .call(
                "Target.closeTarget",
                json!({ "targetId": self.target_id }),
                None,
            )
            .await?;
        debug!(target_id = %self.target_id, "page closed");
        Ok(())
    }
}
