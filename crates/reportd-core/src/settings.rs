//! Per-tenant settings: mail delivery, renderer configuration, limits.

use serde::{Deserialize, Serialize};

use crate::TenantId;
use crate::layout::{Orientation, PaperSize};

/// One record per tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantSettings {
    pub tenant_id: TenantId,
    /// Deliver through the platform-managed SMTP relay when it is configured.
    #[serde(default = "bool_true")]
    pub use_platform_smtp: bool,
    #[serde(default)]
    pub smtp: Option<SmtpSettings>,
    #[serde(default)]
    pub renderer: RendererSettings,
    #[serde(default)]
    pub limits: Limits,
}

impl TenantSettings {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            use_platform_smtp: true,
            smtp: None,
            renderer: RendererSettings::default(),
            limits: Limits::default(),
        }
    }
}

/// Explicit SMTP credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub from: String,
    #[serde(default = "bool_true")]
    pub use_tls: bool,
}

/// Renderer configuration. `backend` selects the variant by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendererSettings {
    #[serde(default = "default_backend")]
    pub backend: String,
    /// HTML to PDF converter for the document backend: `chromium` or `wkhtmltopdf`.
    #[serde(default = "default_converter")]
    pub converter: String,
    /// Base URL of an external image renderer; the platform URL when empty.
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    #[serde(default = "default_scale_factor")]
    pub device_scale_factor: f64,
    #[serde(default)]
    pub skip_tls_verify: bool,
    #[serde(default)]
    pub chromium_path: String,
    #[serde(default = "bool_true")]
    pub headless: bool,
    #[serde(default = "bool_true")]
    pub disable_gpu: bool,
    #[serde(default = "bool_true")]
    pub no_sandbox: bool,
    #[serde(default)]
    pub page_size: PaperSize,
    #[serde(default)]
    pub orientation: Orientation,
}

fn bool_true() -> bool { true }
fn default_smtp_port() -> u16 { 587 }
fn default_backend() -> String { "chromium".into() }
fn default_converter() -> String { "chromium".into() }
fn default_timeout_ms() -> u64 { 30_000 }
fn default_viewport_width() -> u32 { 1920 }
fn default_viewport_height() -> u32 { 1080 }
fn default_scale_factor() -> f64 { 1.0 }

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            converter: default_converter(),
            url: String::new(),
            timeout_ms: default_timeout_ms(),
            delay_ms: 0,
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            device_scale_factor: default_scale_factor(),
            skip_tls_verify: false,
            chromium_path: String::new(),
            headless: true,
            disable_gpu: true,
            no_sandbox: true,
            page_size: PaperSize::default(),
            orientation: Orientation::default(),
        }
    }
}

impl RendererSettings {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }

    pub fn delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.delay_ms)
    }
}

/// Operational limits. The recipient and attachment checks are enforced
/// before delivery; zero disables them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default = "default_max_recipients")]
    pub max_recipients: usize,
    #[serde(default = "default_max_attachment_mb")]
    pub max_attachment_size_mb: u64,
    /// Stored only. Concurrency is capped by the global worker pool.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_renders: usize,
    /// Stored only. Artifacts are not pruned by the engine.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_max_recipients() -> usize { 50 }
fn default_max_attachment_mb() -> u64 { 25 }
fn default_max_concurrent() -> usize { 5 }
fn default_retention_days() -> u32 { 30 }

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_recipients: default_max_recipients(),
            max_attachment_size_mb: default_max_attachment_mb(),
            max_concurrent_renders: default_max_concurrent(),
            retention_days: default_retention_days(),
        }
    }
}

impl Limits {
    pub fn max_attachment_bytes(&self) -> u64 {
        self.max_attachment_size_mb * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_json_gets_defaults() {
        let s: TenantSettings = serde_json::from_str(r#"{"tenant_id": 7}"#).unwrap();
        assert_eq!(s.tenant_id, 7);
        assert!(s.use_platform_smtp);
        assert_eq!(s.renderer.backend, "chromium");
        assert_eq!(s.renderer.timeout_ms, 30_000);
        assert_eq!(s.renderer.viewport_width, 1920);
        assert_eq!(s.limits.max_recipients, 50);
        assert_eq!(s.limits.max_attachment_bytes(), 25 * 1024 * 1024);
    }

    #[test]
    fn test_stored_only_limits_survive_round_trip() {
        let s: TenantSettings = serde_json::from_str(
            r#"{"tenant_id": 3, "limits": {"max_concurrent_renders": 2, "retention_days": 7}}"#,
        )
        .unwrap();
        assert_eq!(s.limits.max_concurrent_renders, 2);
        assert_eq!(s.limits.retention_days, 7);
        assert_eq!(s.limits.max_recipients, 50);

        let back: TenantSettings = serde_json::from_str(&serde_json::to_string(&s).unwrap()).unwrap();
        assert_eq!(back.limits, s.limits);
    }

    #[test]
    fn test_smtp_defaults() {
        let smtp: SmtpSettings =
            serde_json::from_str(r#"{"host":"mail.example.com","from":"reports@example.com"}"#)
                .unwrap();
        assert_eq!(smtp.port, 587);
        assert!(smtp.use_tls);
        assert!(smtp.username.is_empty());
    }
}
