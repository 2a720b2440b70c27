//! Renderer backends.
//!
//! Three variants behind one closed enum:
//! - `chromium`: screenshot of the kiosk dashboard in a headless browser
//! - `native`: dashboard data fetched over the API, rendered to HTML, converted to PDF
//! - `image-renderer`: PNG fetched from the platform's render endpoint
//!
//! Render settings are passed per call; a backend only owns its long-lived
//! resources (the browser process) and must be released explicitly.

use chrono::Utc;
use reportd_core::error::{ReportError, Result};
use reportd_core::{CredentialProvider, Job, OutputFormat, RendererSettings};
use reqwest::Url;
use tokio::sync::Mutex;

use crate::cdp::{self, Browser};
use crate::client::{DashboardClient, dashboard_url};
use crate::convert::{self, CHART_SETTLE, ConverterKind};
use crate::htmlgen::{self, PanelData};
use crate::page::{PageKind, RenderOutput, RenderedPage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Screenshot,
    Document,
    External,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Screenshot => "chromium",
            BackendKind::Document => "native",
            BackendKind::External => "image-renderer",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "chromium" | "screenshot" => Ok(BackendKind::Screenshot),
            "native" | "document" => Ok(BackendKind::Document),
            "image-renderer" | "legacy" | "external" => Ok(BackendKind::External),
            other => Err(ReportError::UnknownBackend(other.to_string())),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Lazily launched browser, shared by every render of one backend.
#[derive(Default)]
pub struct BrowserSlot {
    inner: Mutex<Option<Browser>>,
}

impl BrowserSlot {
    /// DevTools endpoint of the live browser, launching one if needed.
    async fn endpoint(&self, settings: &RendererSettings) -> Result<String> {
        let mut guard = self.inner.lock().await;
        if let Some(browser) = guard.as_mut() {
            if browser.is_alive() {
                return Ok(browser.ws_url().to_string());
            }
            tracing::warn!("⚠️ Browser process exited, relaunching");
        }
        if let Some(dead) = guard.take() {
            dead.close().await;
        }
        let browser = Browser::launch(settings).await?;
        let url = browser.ws_url().to_string();
        *guard = Some(browser);
        Ok(url)
    }

    async fn release(&self) {
        if let Some(browser) = self.inner.lock().await.take() {
            browser.close().await;
        }
    }

    pub async fn is_launched(&self) -> bool {
        self.inner.lock().await.is_some()
    }
}

pub enum Backend {
    Screenshot { platform_url: String, browser: BrowserSlot },
    Document { platform_url: String, browser: BrowserSlot },
    External { platform_url: String },
}

impl Backend {
    pub fn new(kind: BackendKind, platform_url: impl Into<String>) -> Self {
        let platform_url = platform_url.into();
        match kind {
            BackendKind::Screenshot => Backend::Screenshot {
                platform_url,
                browser: BrowserSlot::default(),
            },
            BackendKind::Document => Backend::Document {
                platform_url,
                browser: BrowserSlot::default(),
            },
            BackendKind::External => Backend::External { platform_url },
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Screenshot { .. } => BackendKind::Screenshot,
            Backend::Document { .. } => BackendKind::Document,
            Backend::External { .. } => BackendKind::External,
        }
    }

    /// Name compared against the configured variant when reusing a cached backend.
    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Produce raw pages for `job`.
    pub async fn render(
        &self,
        job: &Job,
        settings: &RendererSettings,
        credentials: &CredentialProvider,
    ) -> Result<RenderOutput> {
        let token = credentials.token()?;
        match self {
            Backend::Screenshot {
                platform_url,
                browser,
            } => {
                let base = parse_base(platform_url)?;
                let url = dashboard_url(&base, "/d", job, settings)?;
                let endpoint = browser.endpoint(settings).await?;
                let png = cdp::capture_png(
                    &endpoint,
                    url.as_str(),
                    &token,
                    &job.tenant_id.to_string(),
                    settings,
                )
                .await?;
                tracing::debug!("📸 Captured {} bytes for job {}", png.len(), job.id);
                Ok(RenderOutput {
                    pages: vec![RenderedPage::new(PageKind::Png, png)?],
                    dashboard_title: None,
                })
            }
            Backend::Document {
                platform_url,
                browser,
            } => render_document(platform_url, browser, job, settings, &token).await,
            Backend::External { platform_url } => {
                let base = if settings.url.trim().is_empty() {
                    platform_url.as_str()
                } else {
                    settings.url.as_str()
                };
                let client = DashboardClient::new(base, settings)?;
                let png = client.render_image(job, settings, &token).await?;
                tracing::debug!("🖼️ Fetched {} bytes for job {}", png.len(), job.id);
                Ok(RenderOutput {
                    pages: vec![RenderedPage::new(PageKind::Png, png)?],
                    dashboard_title: None,
                })
            }
        }
    }

    /// Release automation resources. Idempotent.
    pub async fn release(&self) {
        match self {
            Backend::Screenshot { browser, .. } | Backend::Document { browser, .. } => {
                browser.release().await
            }
            Backend::External { .. } => {}
        }
    }
}

async fn render_document(
    platform_url: &str,
    browser: &BrowserSlot,
    job: &Job,
    settings: &RendererSettings,
    token: &str,
) -> Result<RenderOutput> {
    if job.format == OutputFormat::Png {
        return Err(ReportError::Config(
            "the native backend produces documents; png output needs the chromium or image-renderer backend".into(),
        ));
    }
    let converter: ConverterKind = settings.converter.parse()?;

    let client = DashboardClient::new(platform_url, settings)?;
    let dashboard = client.dashboard(&job.dashboard_uid, job.tenant_id, token).await?;
    let panels = dashboard.report_panels(&job.panel_ids);

    let mut data = Vec::with_capacity(panels.len());
    for panel in panels {
        let frames = match client.query_panel(job, &panel, token).await {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(
                    "⚠️ Panel {} ('{}') query failed, reporting no data: {e}",
                    panel.id,
                    panel.title
                );
                Vec::new()
            }
        };
        data.push(PanelData { panel, frames });
    }

    let title = if dashboard.title.is_empty() {
        job.dashboard_title
            .clone()
            .unwrap_or_else(|| job.dashboard_uid.clone())
    } else {
        dashboard.title.clone()
    };
    let html = htmlgen::generate(&title, &job.dashboard_uid, job, &data, Utc::now());
    tracing::debug!("📝 Generated {} bytes of HTML for {} panels", html.len(), data.len());

    let page = match job.format {
        OutputFormat::Html => RenderedPage::new(PageKind::Html, html.into_bytes())?,
        _ => {
            let pdf = match converter {
                ConverterKind::Chromium => {
                    let endpoint = browser.endpoint(settings).await?;
                    cdp::print_pdf(&endpoint, &html, CHART_SETTLE, settings).await?
                }
                ConverterKind::Wkhtmltopdf => convert::wkhtmltopdf(&html, settings).await?,
            };
            RenderedPage::new(PageKind::Pdf, pdf)?
        }
    };

    Ok(RenderOutput {
        pages: vec![page],
        dashboard_title: Some(title),
    })
}

fn parse_base(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| ReportError::Config(format!("invalid platform URL '{url}': {e}")))
}
