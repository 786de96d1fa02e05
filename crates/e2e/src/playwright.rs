//! Playwright browser automation
//!
//! A small Node bridge script owns the browser and speaks line-delimited JSON
//! over stdio. Commands carry an `id` and get exactly one reply; the bridge
//! also pushes events (intercepted requests, observed responses, page errors)
//! that a background reader task dispatches.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::network::{Interceptor, RouteDecision, Ticket};
use crate::page::{ElementHandle, Page};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for Browser {
    type Err = E2eError;

    fn from_str(s: &str) -> E2eResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" => Ok(Browser::Webkit),
            other => Err(E2eError::Config(format!("unsupported browser: {}", other))),
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaywrightConfig {
    pub browser: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,

    /// Directory where `require('playwright')` is resolved from
    pub project_dir: PathBuf,

    /// Upper bound for one bridge command
    pub command_timeout_ms: u64,

    /// Upper bound for launching the browser
    pub launch_timeout_ms: u64,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            project_dir: PathBuf::from("."),
            command_timeout_ms: 15_000,
            launch_timeout_ms: 60_000,
        }
    }
}

/// Messages coming out of the bridge
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BridgeMessage {
    Reply {
        id: u64,
        ok: bool,
        #[serde(default)]
        value: Value,
        #[serde(default)]
        error: Option<String>,
    },
    Event(BridgeEvent),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum BridgeEvent {
    Ready,
    Request { rid: u64, method: String, url: String },
    Response { rid: u64, status: u16, body: String },
    RouteError { rid: u64, message: String },
    PageError { message: String },
    Fatal { message: String },
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<E2eResult<Value>>>>>;

/// Live browser session driven through the bridge
pub struct PlaywrightSession {
    child: Child,
    stdin: Arc<tokio::sync::Mutex<ChildStdin>>,
    pending: Pending,
    page_errors: Arc<Mutex<Vec<String>>>,
    next_id: AtomicU64,
    command_timeout: Duration,
    // Keeps the bridge script on disk for the lifetime of the process
    _script_dir: tempfile::TempDir,
}

impl PlaywrightSession {
    /// Launch the browser. Requests are routed through `interceptor`.
    pub async fn launch(config: PlaywrightConfig, interceptor: Arc<Interceptor>) -> E2eResult<Self> {
        Self::check_playwright_installed(&config).await?;

        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("bridge.js");
        std::fs::write(&script_path, BRIDGE_JS)?;

        let options = json!({
            "browser": config.browser.as_str(),
            "headless": config.headless,
            "width": config.viewport_width,
            "height": config.viewport_height,
            "actionTimeoutMs": config.command_timeout_ms,
        });

        info!("Launching {} via Playwright bridge", config.browser.as_str());
        let mut child = Command::new("node")
            .arg(&script_path)
            .arg(options.to_string())
            .current_dir(&config.project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| E2eError::ProcessSpawnFailed {
                what: "node".into(),
                reason: e.to_string(),
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::BridgeClosed("stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::BridgeClosed("stdout not captured".into()))?;

        let stdin = Arc::new(tokio::sync::Mutex::new(stdin));
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let page_errors = Arc::new(Mutex::new(Vec::new()));
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::spawn(read_bridge(
            stdout,
            stdin.clone(),
            pending.clone(),
            page_errors.clone(),
            interceptor,
            ready_tx,
        ));

        let launch_timeout = Duration::from_millis(config.launch_timeout_ms);
        match tokio::time::timeout(launch_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(message))) => return Err(E2eError::BridgeClosed(message)),
            Ok(Err(_)) => return Err(E2eError::BridgeClosed("bridge exited during launch".into())),
            Err(_) => return Err(E2eError::timeout("browser launch", launch_timeout)),
        }
        info!("Browser ready");

        Ok(Self {
            child,
            stdin,
            pending,
            page_errors,
            next_id: AtomicU64::new(1),
            command_timeout: Duration::from_millis(config.command_timeout_ms),
            _script_dir: script_dir,
        })
    }

    /// Check if Playwright is resolvable from the project directory
    async fn check_playwright_installed(config: &PlaywrightConfig) -> E2eResult<()> {
        let status = Command::new("node")
            .args(["-e", "require.resolve('playwright', { paths: [process.cwd()] })"])
            .current_dir(&config.project_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    async fn command(&self, cmd: &str, mut args: Value) -> E2eResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        args["id"] = json!(id);
        args["cmd"] = json!(cmd);
        if let Err(e) = write_line(&self.stdin, &args).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(E2eError::BridgeClosed(format!("no reply to {}", cmd))),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(E2eError::timeout(format!("bridge command {}", cmd), self.command_timeout))
            }
        }
    }

    async fn element_command(&self, cmd: &str, element: &ElementHandle) -> E2eResult<Value> {
        self.command(cmd, json!({ "el": element.0 })).await
    }

    /// Close the browser and wait for the bridge to exit
    pub async fn close(mut self) -> E2eResult<()> {
        let _ = self.command("close", json!({})).await;
        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(_) => Ok(()),
            Err(_) => {
                warn!("Bridge did not exit, killing it");
                self.child.kill().await?;
                Ok(())
            }
        }
    }
}

async fn write_line(stdin: &tokio::sync::Mutex<ChildStdin>, msg: &Value) -> E2eResult<()> {
    let mut line = msg.to_string();
    line.push('\n');
    let mut stdin = stdin.lock().await;
    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|e| E2eError::BridgeClosed(e.to_string()))?;
    stdin
        .flush()
        .await
        .map_err(|e| E2eError::BridgeClosed(e.to_string()))
}

/// Reader task: replies go to their waiting command, events are handled here.
async fn read_bridge(
    stdout: ChildStdout,
    stdin: Arc<tokio::sync::Mutex<ChildStdin>>,
    pending: Pending,
    page_errors: Arc<Mutex<Vec<String>>>,
    interceptor: Arc<Interceptor>,
    ready: oneshot::Sender<Result<(), String>>,
) {
    let mut ready = Some(ready);
    let mut observed: HashMap<u64, Ticket> = HashMap::new();
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Reading bridge output failed: {}", e);
                break;
            }
        };

        let message: BridgeMessage = match serde_json::from_str(&line) {
            Ok(m) => m,
            Err(_) => {
                debug!("[bridge] {}", line);
                continue;
            }
        };

        match message {
            BridgeMessage::Reply { id, ok, value, error } => {
                if let Some(tx) = pending.lock().remove(&id) {
                    let result = if ok {
                        Ok(value)
                    } else {
                        Err(E2eError::Driver(error.unwrap_or_else(|| "unknown error".into())))
                    };
                    let _ = tx.send(result);
                }
            }
            BridgeMessage::Event(BridgeEvent::Ready) => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            BridgeMessage::Event(BridgeEvent::Request { rid, method, url }) => {
                let reply = match interceptor.route(&method, &url) {
                    RouteDecision::PassThrough => json!({ "cmd": "route", "rid": rid, "action": "continue" }),
                    RouteDecision::Observe(ticket) => {
                        observed.insert(rid, ticket);
                        json!({ "cmd": "route", "rid": rid, "action": "observe" })
                    }
                    RouteDecision::Fulfill(stub) => json!({
                        "cmd": "route",
                        "rid": rid,
                        "action": "fulfill",
                        "status": stub.status,
                        "body": stub.body_text(),
                        "content_type": stub.content_type(),
                    }),
                };
                if let Err(e) = write_line(&stdin, &reply).await {
                    error!("Failed to answer routed request: {}", e);
                    break;
                }
            }
            BridgeMessage::Event(BridgeEvent::Response { rid, status, body }) => {
                if let Some(ticket) = observed.remove(&rid) {
                    interceptor.complete(ticket, status, body);
                }
            }
            BridgeMessage::Event(BridgeEvent::RouteError { rid, message }) => {
                warn!("Observed request failed: {}", message);
                if let Some(ticket) = observed.remove(&rid) {
                    interceptor.abandon(ticket);
                }
            }
            BridgeMessage::Event(BridgeEvent::PageError { message }) => {
                page_errors.lock().push(message);
            }
            BridgeMessage::Event(BridgeEvent::Fatal { message }) => {
                error!("Bridge failed: {}", message);
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(message));
                }
            }
        }
    }

    // Fail everything still waiting so no command hangs on a dead bridge
    for (_, tx) in pending.lock().drain() {
        let _ = tx.send(Err(E2eError::BridgeClosed("bridge exited".into())));
    }
}

#[async_trait]
impl Page for PlaywrightSession {
    async fn goto(&self, url: &str) -> E2eResult<()> {
        debug!("goto {}", url);
        self.command("goto", json!({ "url": url })).await?;
        Ok(())
    }

    async fn query_all(
        &self,
        css: &str,
        scope: Option<&ElementHandle>,
    ) -> E2eResult<Vec<ElementHandle>> {
        let value = self
            .command("query", json!({ "css": css, "scope": scope.map(|s| s.0.clone()) }))
            .await?;
        let ids: Vec<String> = serde_json::from_value(value)?;
        Ok(ids.into_iter().map(ElementHandle).collect())
    }

    async fn text(&self, element: &ElementHandle) -> E2eResult<String> {
        let value = self.element_command("text", element).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn is_visible(&self, element: &ElementHandle) -> E2eResult<bool> {
        Ok(self.element_command("visible", element).await?.as_bool().unwrap_or(false))
    }

    async fn is_enabled(&self, element: &ElementHandle) -> E2eResult<bool> {
        Ok(self.element_command("enabled", element).await?.as_bool().unwrap_or(false))
    }

    async fn click(&self, element: &ElementHandle) -> E2eResult<()> {
        self.element_command("click", element).await?;
        Ok(())
    }

    async fn double_click(&self, element: &ElementHandle) -> E2eResult<()> {
        self.element_command("dblclick", element).await?;
        Ok(())
    }

    async fn clear(&self, element: &ElementHandle) -> E2eResult<()> {
        self.element_command("clear", element).await?;
        Ok(())
    }

    async fn type_text(&self, element: &ElementHandle, text: &str) -> E2eResult<()> {
        self.command("type", json!({ "el": element.0, "text": text })).await?;
        Ok(())
    }

    fn drain_page_errors(&self) -> Vec<String> {
        std::mem::take(&mut *self.page_errors.lock())
    }
}

const BRIDGE_JS: &str = r#"
const readline = require('readline');
const pw = require(require.resolve('playwright', { paths: [process.cwd()] }));

const opts = JSON.parse(process.argv[2]);
const elements = new Map();
const routes = new Map();
let nextElement = 0;
let nextRoute = 0;
let generation = 0;

function send(msg) {
  process.stdout.write(JSON.stringify(msg) + '\n');
}

function register(handle) {
  const id = 'e' + (++nextElement);
  elements.set(id, { handle, generation });
  return id;
}

function element(id) {
  const entry = elements.get(id);
  if (!entry) throw new Error('stale element ' + id);
  return entry.handle;
}

// Only the previous query's handles and the current scope stay alive.
function releaseStale(scope) {
  generation++;
  if (scope && elements.has(scope)) elements.get(scope).generation = generation;
  for (const [id, entry] of elements) {
    if (entry.generation < generation - 1) {
      elements.delete(id);
      entry.handle.dispose().catch(() => {});
    }
  }
}

function releaseAll() {
  for (const entry of elements.values()) entry.handle.dispose().catch(() => {});
  elements.clear();
}

function message(err) {
  return String((err && err.message) || err);
}

(async () => {
  const browser = await pw[opts.browser].launch({ headless: opts.headless });
  const context = await browser.newContext({
    viewport: { width: opts.width, height: opts.height }
  });
  const page = await context.newPage();
  page.setDefaultTimeout(opts.actionTimeoutMs);
  page.on('pageerror', err => send({ event: 'page_error', message: message(err) }));

  await page.route('**/*', route => {
    const rid = ++nextRoute;
    routes.set(rid, route);
    const req = route.request();
    send({ event: 'request', rid, method: req.method(), url: req.url() });
  });

  async function settle(rid, msg) {
    const route = routes.get(rid);
    routes.delete(rid);
    if (!route) return;
    try {
      if (msg.action === 'fulfill') {
        await route.fulfill({ status: msg.status, body: msg.body, contentType: msg.content_type });
      } else if (msg.action === 'observe') {
        const response = await route.fetch();
        const body = await response.text();
        send({ event: 'response', rid, status: response.status(), body });
        await route.fulfill({ response, body });
      } else {
        await route.continue();
      }
    } catch (err) {
      send({ event: 'route_error', rid, message: message(err) });
      try { await route.abort(); } catch (_) {}
    }
  }

  const handlers = {
    goto: async c => { releaseAll(); await page.goto(c.url, { waitUntil: 'load' }); return null; },
    query: async c => {
      releaseStale(c.scope);
      const root = c.scope ? element(c.scope) : page;
      return (await root.$$(c.css)).map(register);
    },
    text: async c => element(c.el).evaluate(n =>
      (n.tagName === 'TEXTAREA' || n.tagName === 'INPUT') ? n.value : (n.innerText || n.textContent || '')),
    visible: async c => element(c.el).isVisible(),
    enabled: async c => element(c.el).isEnabled(),
    click: async c => { await element(c.el).click(); return null; },
    dblclick: async c => { await element(c.el).dblclick(); return null; },
    clear: async c => { await element(c.el).fill(''); return null; },
    type: async c => { await element(c.el).type(c.text); return null; },
    close: async () => { await browser.close(); setImmediate(() => process.exit(0)); return null; },
  };

  const rl = readline.createInterface({ input: process.stdin });
  rl.on('line', async line => {
    let msg;
    try { msg = JSON.parse(line); } catch (_) { return; }
    if (msg.cmd === 'route') return settle(msg.rid, msg);
    const handler = handlers[msg.cmd];
    if (!handler) return send({ id: msg.id, ok: false, error: 'unknown command ' + msg.cmd });
    try {
      const value = await handler(msg);
      send({ id: msg.id, ok: true, value: value === undefined ? null : value });
    } catch (err) {
      send({ id: msg.id, ok: false, error: message(err) });
    }
  });
  rl.on('close', async () => { await browser.close(); process.exit(0); });

  send({ event: 'ready' });
})().catch(err => {
  send({ event: 'fatal', message: message(err) });
  process.exit(1);
});
"#;
