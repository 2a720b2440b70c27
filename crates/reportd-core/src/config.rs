//! reportd daemon configuration (`~/.reportd/config.toml`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::credentials::DEFAULT_TOKEN_ENV;
use crate::error::{ReportError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReporterConfig {
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub platform_smtp: PlatformSmtp,
}

impl ReporterConfig {
    /// Load config from the default path, or defaults when it does not exist.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ReportError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ReportError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to `path`, creating its directory.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ReportError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// The reportd home directory (`~/.reportd`).
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".reportd")
    }
}

/// Expand `~` and environment variables in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    match shellexpand::full(p) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(p).as_ref()),
    }
}

/// Dashboard platform the reports are rendered from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_platform_url")]
    pub url: String,
    /// Environment variable holding the fallback service token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

fn default_platform_url() -> String { "http://localhost:3000".into() }
fn default_token_env() -> String { DEFAULT_TOKEN_ENV.into() }
fn default_token_ttl() -> u64 { 3600 }

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            url: default_platform_url(),
            token_env: default_token_env(),
            token_ttl_secs: default_token_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: String,
}

fn default_db_path() -> String { "~/.reportd/reportd.db".into() }
fn default_artifacts_dir() -> String { "~/.reportd/artifacts".into() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            artifacts_dir: default_artifacts_dir(),
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        expand_path(&self.db_path)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        expand_path(&self.artifacts_dir)
    }
}

/// Poll loop, worker pool and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

fn default_poll_interval() -> u64 { 60 }
fn default_max_concurrent() -> usize { 5 }
fn default_max_attempts() -> u32 { 3 }
fn default_backoff_base_ms() -> u64 { 1000 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_concurrent: default_max_concurrent(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

/// Platform-managed SMTP relay shared by tenants that opt in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSmtp {
    /// `host` or `host:port`; empty means the platform relay is not configured.
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from: String,
}

impl PlatformSmtp {
    /// Apply `REPORTD_SMTP_HOST`, `_USER`, `_PASSWORD` and `_FROM` overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("REPORTD_SMTP_HOST") {
            self.host = v;
        }
        if let Some(v) = lookup("REPORTD_SMTP_USER") {
            self.user = v;
        }
        if let Some(v) = lookup("REPORTD_SMTP_PASSWORD") {
            self.password = v;
        }
        if let Some(v) = lookup("REPORTD_SMTP_FROM") {
            self.from = v;
        }
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.host.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReporterConfig::default();
        assert_eq!(config.scheduler.poll_interval_secs, 60);
        assert_eq!(config.scheduler.max_concurrent, 5);
        assert_eq!(config.scheduler.max_attempts, 3);
        assert_eq!(config.platform.token_env, "REPORTD_SA_TOKEN");
        assert!(!config.platform_smtp.is_configured());
    }

    #[test]
    fn test_partial_toml() {
        let config: ReporterConfig = toml::from_str(
            r#"
            [platform]
            url = "https://grafana.example.com"

            [scheduler]
            max_concurrent = 2

            [platform_smtp]
            host = "smtp.example.com:2525"
            from = "reports@example.com"
            "#,
        )
        .unwrap();
        assert_eq!(config.platform.url, "https://grafana.example.com");
        assert_eq!(config.scheduler.max_concurrent, 2);
        assert_eq!(config.scheduler.max_attempts, 3);
        assert!(config.platform_smtp.is_configured());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = ReporterConfig::default();
        config.storage.artifacts_dir = "/var/lib/reportd/artifacts".into();
        config.save_to(&path).unwrap();

        let loaded = ReporterConfig::load_from(&path).unwrap();
        assert_eq!(loaded.storage.artifacts_dir, "/var/lib/reportd/artifacts");
    }

    #[test]
    fn test_env_overrides() {
        let base = PlatformSmtp {
            host: "file-host:25".into(),
            user: "file-user".into(),
            ..Default::default()
        };
        let merged = base.with_overrides(|key| match key {
            "REPORTD_SMTP_HOST" => Some("env-host:587".into()),
            _ => None,
        });
        assert_eq!(merged.host, "env-host:587");
        assert_eq!(merged.user, "file-user");
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_path("~/reports");
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }
}
