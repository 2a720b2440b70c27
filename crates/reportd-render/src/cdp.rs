//! Minimal Chrome DevTools Protocol driver.
//!
//! A [`Browser`] is a headless Chromium child process with remote debugging on
//! an ephemeral port. Each render opens its own [`CdpConnection`] to the
//! browser endpoint and drives a fresh target through a flattened session.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use base64::Engine;
use futures::{SinkExt, StreamExt};
use reportd_core::RendererSettings;
use reportd_core::error::{ReportError, Result};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const LAUNCH_TIMEOUT: Duration = Duration::from_secs(20);
const CANDIDATES: [&str; 4] = ["chromium", "chromium-browser", "google-chrome", "google-chrome-stable"];
const MAX_BUFFERED_EVENTS: usize = 256;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// A running headless browser.
pub struct Browser {
    child: tokio::process::Child,
    ws_url: String,
    profile_dir: PathBuf,
}

impl Browser {
    /// Start a browser and wait for its DevTools endpoint.
    pub async fn launch(settings: &RendererSettings) -> Result<Self> {
        let profile_dir = std::env::temp_dir().join(format!(
            "reportd-chrome-{}",
            &uuid::Uuid::new_v4().to_string()[..8]
        ));
        tokio::fs::create_dir_all(&profile_dir).await?;

        let mut args = vec![
            "--remote-debugging-port=0".to_string(),
            format!("--user-data-dir={}", profile_dir.display()),
            "--no-first-run".into(),
            "--no-default-browser-check".into(),
            "--disable-dev-shm-usage".into(),
            "--hide-scrollbars".into(),
            "--mute-audio".into(),
        ];
        if settings.headless {
            args.push("--headless=new".into());
        }
        if settings.disable_gpu {
            args.push("--disable-gpu".into());
        }
        if settings.no_sandbox {
            args.push("--no-sandbox".into());
        }
        if settings.skip_tls_verify {
            args.push("--ignore-certificate-errors".into());
        }
        args.push("about:blank".into());

        let mut child = spawn_first(&executables(settings), &args)?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ReportError::Browser("browser stderr not captured".into()))?;
        let mut lines = BufReader::new(stderr).lines();

        let found = tokio::time::timeout(LAUNCH_TIMEOUT, async {
            while let Some(line) = lines.next_line().await? {
                if let Some(idx) = line.find("ws://") {
                    return Ok::<_, ReportError>(Some(line[idx..].trim().to_string()));
                }
            }
            Ok(None)
        })
        .await;

        let ws_url = match found {
            Ok(Ok(Some(url))) => url,
            Ok(Ok(None)) => {
                return Err(ReportError::Browser(
                    "browser exited before announcing its DevTools endpoint".into(),
                ));
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(ReportError::Browser(format!(
                    "browser did not start within {}s",
                    LAUNCH_TIMEOUT.as_secs()
                )));
            }
        };

        // Drain stderr for the lifetime of the process.
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::trace!("chromium: {line}");
            }
        });

        tracing::info!("🌐 Browser started: {ws_url}");
        Ok(Self {
            child,
            ws_url,
            profile_dir,
        })
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill the process and remove its profile directory.
    pub async fn close(mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!("browser kill: {e}");
        }
        let _ = tokio::fs::remove_dir_all(&self.profile_dir).await;
        tracing::info!("🧹 Browser released");
    }
}

fn executables(settings: &RendererSettings) -> Vec<String> {
    if !settings.chromium_path.trim().is_empty() {
        return vec![settings.chromium_path.clone()];
    }
    if let Ok(bin) = std::env::var("CHROME_BIN") {
        if !bin.trim().is_empty() {
            return vec![bin];
        }
    }
    CANDIDATES.iter().map(|c| c.to_string()).collect()
}

fn spawn_first(candidates: &[String], args: &[String]) -> Result<tokio::process::Child> {
    let mut last_err = None;
    for exe in candidates {
        match tokio::process::Command::new(exe)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => return Ok(child),
            Err(e) => {
                tracing::debug!("browser candidate '{exe}' failed: {e}");
                last_err = Some(format!("{exe}: {e}"));
            }
        }
    }
    Err(ReportError::Browser(format!(
        "no usable browser executable ({})",
        last_err.unwrap_or_else(|| "no candidates".into())
    )))
}

/// One WebSocket connection to the browser endpoint.
pub struct CdpConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: u64,
    events: Vec<Value>,
}

/// An attached page target in its own browser context.
pub struct PageSession {
    pub context_id: String,
    pub target_id: String,
    pub session_id: String,
}

impl CdpConnection {
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (ws, _response) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| ReportError::Browser(format!("DevTools connect failed: {e}")))?;
        Ok(Self {
            ws,
            next_id: 1,
            events: Vec::new(),
        })
    }

    async fn next_message(&mut self) -> Result<Value> {
        loop {
            match self.ws.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    return serde_json::from_str(&text)
                        .map_err(|e| ReportError::Browser(format!("invalid DevTools message: {e}")));
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    return Err(ReportError::Browser("DevTools connection closed".into()));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ReportError::Browser(format!("DevTools read: {e}"))),
            }
        }
    }

    fn buffer_event(&mut self, event: Value) {
        if self.events.len() >= MAX_BUFFERED_EVENTS {
            self.events.remove(0);
        }
        self.events.push(event);
    }

    /// Send a command and wait for its response.
    pub async fn call(&mut self, session: Option<&str>, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;
        let mut msg = json!({ "id": id, "method": method, "params": params });
        if let Some(s) = session {
            msg["sessionId"] = json!(s);
        }
        self.ws
            .send(WsMessage::Text(msg.to_string().into()))
            .await
            .map_err(|e| ReportError::Browser(format!("DevTools send: {e}")))?;

        loop {
            let reply = self.next_message().await?;
            if reply["id"].as_u64() == Some(id) {
                if let Some(err) = reply.get("error") {
                    return Err(ReportError::Browser(format!(
                        "{method}: {}",
                        err["message"].as_str().unwrap_or("unknown error")
                    )));
                }
                return Ok(reply["result"].clone());
            }
            if reply.get("method").is_some() {
                self.buffer_event(reply);
            }
        }
    }

    /// Wait for an event, consuming one already buffered if present.
    pub async fn wait_event(&mut self, session: &str, method: &str) -> Result<Value> {
        let matches = |v: &Value| v["method"] == method && v["sessionId"] == session;
        if let Some(pos) = self.events.iter().position(matches) {
            return Ok(self.events.remove(pos));
        }
        loop {
            let msg = self.next_message().await?;
            if matches(&msg) {
                return Ok(msg);
            }
            if msg.get("method").is_some() {
                self.buffer_event(msg);
            }
        }
    }

    /// Create a blank target and attach to it. The target lives in a fresh
    /// browser context that Chrome disposes when this connection goes away.
    pub async fn open_page(&mut self) -> Result<PageSession> {
        let context = self
            .call(
                None,
                "Target.createBrowserContext",
                json!({ "disposeOnDetach": true }),
            )
            .await?;
        let context_id = context["browserContextId"]
            .as_str()
            .ok_or_else(|| ReportError::Browser("createBrowserContext returned no id".into()))?
            .to_string();
        let created = self
            .call(
                None,
                "Target.createTarget",
                json!({ "url": "about:blank", "browserContextId": context_id }),
            )
            .await?;
        let target_id = created["targetId"]
            .as_str()
            .ok_or_else(|| ReportError::Browser("createTarget returned no targetId".into()))?
            .to_string();
        let attached = self
            .call(
                None,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session_id = attached["sessionId"]
            .as_str()
            .ok_or_else(|| ReportError::Browser("attachToTarget returned no sessionId".into()))?
            .to_string();
        Ok(PageSession {
            context_id,
            target_id,
            session_id,
        })
    }

    /// Close the target and dispose its context. Never blocks longer than
    /// `CLOSE_TIMEOUT`.
    pub async fn close_page(&mut self, page: &PageSession) {
        let close = async {
            self.call(None, "Target.closeTarget", json!({ "targetId": page.target_id }))
                .await?;
            self.call(
                None,
                "Target.disposeBrowserContext",
                json!({ "browserContextId": page.context_id }),
            )
            .await
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, close).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::debug!("closing target {}: {e}", page.target_id),
            Err(_) => tracing::warn!("⚠️ Closing target {} timed out", page.target_id),
        }
    }
}

/// Connect and open a page, giving up after `limit`.
async fn open_session(ws_url: &str, limit: Duration) -> Option<Result<(CdpConnection, PageSession)>> {
    tokio::time::timeout(limit, async {
        let mut conn = CdpConnection::connect(ws_url).await?;
        let page = conn.open_page().await?;
        Ok::<_, ReportError>((conn, page))
    })
    .await
    .ok()
}

/// Navigate to `url` with bearer auth on every request and capture a
/// full-page PNG.
pub async fn capture_png(
    ws_url: &str,
    url: &str,
    token: &str,
    tenant_header: &str,
    settings: &RendererSettings,
) -> Result<Vec<u8>> {
    let timed_out =
        || ReportError::Browser(format!("render timed out after {}ms", settings.timeout_ms));
    let (mut conn, page) = open_session(ws_url, settings.timeout())
        .await
        .ok_or_else(timed_out)??;
    let result = tokio::time::timeout(
        settings.timeout(),
        screenshot(&mut conn, &page, url, token, tenant_header, settings),
    )
    .await;
    conn.close_page(&page).await;
    result.map_err(|_| timed_out())?
}

async fn screenshot(
    conn: &mut CdpConnection,
    page: &PageSession,
    url: &str,
    token: &str,
    tenant_header: &str,
    settings: &RendererSettings,
) -> Result<Vec<u8>> {
    let s = Some(page.session_id.as_str());
    conn.call(s, "Page.enable", json!({})).await?;
    conn.call(s, "Network.enable", json!({})).await?;
    conn.call(
        s,
        "Network.setExtraHTTPHeaders",
        json!({ "headers": {
            "Authorization": format!("Bearer {token}"),
            "X-Grafana-Org-Id": tenant_header,
        }}),
    )
    .await?;
    if settings.skip_tls_verify {
        conn.call(s, "Security.setIgnoreCertificateErrors", json!({ "ignore": true }))
            .await?;
    }
    conn.call(
        s,
        "Emulation.setDeviceMetricsOverride",
        json!({
            "width": settings.viewport_width,
            "height": settings.viewport_height,
            "deviceScaleFactor": settings.device_scale_factor,
            "mobile": false,
        }),
    )
    .await?;

    tracing::debug!("navigate {url}");
    let nav = conn.call(s, "Page.navigate", json!({ "url": url })).await?;
    if let Some(err) = nav["errorText"].as_str().filter(|e| !e.is_empty()) {
        return Err(ReportError::Browser(format!("navigation failed: {err}")));
    }
    conn.wait_event(&page.session_id, "Page.loadEventFired").await?;
    if !settings.delay().is_zero() {
        tokio::time::sleep(settings.delay()).await;
    }

    let metrics = conn.call(s, "Page.getLayoutMetrics", json!({})).await?;
    let content = if metrics["cssContentSize"].is_object() {
        &metrics["cssContentSize"]
    } else {
        &metrics["contentSize"]
    };
    let width = content["width"]
        .as_f64()
        .unwrap_or(0.0)
        .max(settings.viewport_width as f64);
    let height = content["height"]
        .as_f64()
        .unwrap_or(0.0)
        .max(settings.viewport_height as f64);

    let shot = conn
        .call(
            s,
            "Page.captureScreenshot",
            json!({
                "format": "png",
                "captureBeyondViewport": true,
                "clip": { "x": 0, "y": 0, "width": width, "height": height, "scale": 1 },
            }),
        )
        .await?;
    decode_data(&shot)
}

/// Load `html` into a blank page and print it to PDF.
pub async fn print_pdf(
    ws_url: &str,
    html: &str,
    settle: Duration,
    settings: &RendererSettings,
) -> Result<Vec<u8>> {
    let timed_out =
        || ReportError::Convert(format!("print timed out after {}ms", settings.timeout_ms));
    let (mut conn, page) = open_session(ws_url, settings.timeout())
        .await
        .ok_or_else(timed_out)??;
    let result = tokio::time::timeout(
        settings.timeout() + settle,
        print(&mut conn, &page, html, settle, settings),
    )
    .await;
    conn.close_page(&page).await;
    result.map_err(|_| timed_out())?
}

async fn print(
    conn: &mut CdpConnection,
    page: &PageSession,
    html: &str,
    settle: Duration,
    settings: &RendererSettings,
) -> Result<Vec<u8>> {
    let s = Some(page.session_id.as_str());
    conn.call(s, "Page.enable", json!({})).await?;
    let tree = conn.call(s, "Page.getFrameTree", json!({})).await?;
    let frame_id = tree["frameTree"]["frame"]["id"]
        .as_str()
        .ok_or_else(|| ReportError::Convert("page has no main frame".into()))?
        .to_string();
    conn.call(
        s,
        "Page.setDocumentContent",
        json!({ "frameId": frame_id, "html": html }),
    )
    .await?;
    tokio::time::sleep(settle + settings.delay()).await;

    let (paper_w, paper_h) = settings.page_size.dimensions_in();
    let printed = conn
        .call(
            s,
            "Page.printToPDF",
            json!({
                "landscape": settings.orientation.is_landscape(),
                "printBackground": true,
                "paperWidth": paper_w,
                "paperHeight": paper_h,
                "marginTop": 0.4,
                "marginBottom": 0.4,
                "marginLeft": 0.4,
                "marginRight": 0.4,
                "scale": 1.0,
                "preferCSSPageSize": false,
            }),
        )
        .await
        .map_err(|e| ReportError::Convert(e.to_string()))?;
    decode_data(&printed)
}

fn decode_data(result: &Value) -> Result<Vec<u8>> {
    let data = result["data"]
        .as_str()
        .ok_or_else(|| ReportError::Browser("DevTools result carried no data".into()))?;
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| ReportError::Browser(format!("invalid base64 payload: {e}")))
}
