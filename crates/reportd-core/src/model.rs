//! Job definitions and execution records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TenantId;
use crate::error::{ReportError, Result};

/// How often a job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "expression", rename_all = "lowercase")]
pub enum Interval {
    Daily,
    Weekly,
    Monthly,
    /// Five-field cron expression: `MIN HOUR DOM MON DOW`.
    Custom(String),
    /// Kind written by a newer build; scheduled hourly.
    #[serde(other)]
    Unknown,
}

impl Interval {
    pub fn kind(&self) -> &'static str {
        match self {
            Interval::Daily => "daily",
            Interval::Weekly => "weekly",
            Interval::Monthly => "monthly",
            Interval::Custom(_) => "custom",
            Interval::Unknown => "unknown",
        }
    }

    pub fn expression(&self) -> Option<&str> {
        match self {
            Interval::Custom(expr) => Some(expr),
            _ => None,
        }
    }

    /// Rebuild from the (kind, expression) column pair of a stored row.
    pub fn from_parts(kind: &str, expression: Option<String>) -> Self {
        match kind {
            "daily" => Interval::Daily,
            "weekly" => Interval::Weekly,
            "monthly" => Interval::Monthly,
            "custom" | "cron" => Interval::Custom(expression.unwrap_or_default()),
            _ => Interval::Unknown,
        }
    }
}

/// Artifact format requested by a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Pdf,
    Png,
    Html,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Png => "png",
            OutputFormat::Html => "html",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Pdf => "application/pdf",
            OutputFormat::Png => "image/png",
            OutputFormat::Html => "text/html",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Ok(OutputFormat::Pdf),
            "png" => Ok(OutputFormat::Png),
            "html" => Ok(OutputFormat::Html),
            other => Err(ReportError::Config(format!("unknown output format: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipients {
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
}

impl Recipients {
    pub fn to(addresses: &[&str]) -> Self {
        Self {
            to: addresses.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A persisted report schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub id: i64,
    pub tenant_id: TenantId,
    pub name: String,
    pub dashboard_uid: String,
    #[serde(default)]
    pub dashboard_title: Option<String>,
    /// Restrict the report to these panels; empty means all of them.
    #[serde(default)]
    pub panel_ids: Vec<i64>,
    pub range_from: String,
    pub range_to: String,
    pub interval: Interval,
    pub timezone: String,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub recipients: Recipients,
    #[serde(default)]
    pub email_subject: String,
    #[serde(default)]
    pub email_body: String,
    pub enabled: bool,
    #[serde(default)]
    pub owner_user_id: i64,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Daily PDF of the last 24 hours, enabled, no recipients yet.
    pub fn new(tenant_id: TenantId, name: impl Into<String>, dashboard_uid: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            tenant_id,
            name: name.into(),
            dashboard_uid: dashboard_uid.into(),
            dashboard_title: None,
            panel_ids: Vec::new(),
            range_from: "now-24h".into(),
            range_to: "now".into(),
            interval: Interval::Daily,
            timezone: "UTC".into(),
            format: OutputFormat::Pdf,
            variables: BTreeMap::new(),
            recipients: Recipients::default(),
            email_subject: "{{schedule.name}}".into(),
            email_body: "Report for {{dashboard.title}} ({{timerange}})".into(),
            enabled: true,
            owner_user_id: 0,
            last_run_at: None,
            next_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Human-readable time range, as shown in mail templates.
    pub fn time_range(&self) -> String {
        format!("{} to {}", self.range_from, self.range_to)
    }
}

/// Lifecycle state of an execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(ReportError::Store(format!("unknown run status: {other}"))),
        }
    }
}

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed {
        artifact_path: String,
        rendered_pages: u32,
        bytes: u64,
        checksum: String,
    },
    Failed {
        error: String,
    },
}

/// One execution of a job, from claim to terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub job_id: i64,
    pub tenant_id: TenantId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub error: Option<String>,
    pub artifact_path: Option<String>,
    pub rendered_pages: u32,
    pub bytes: u64,
    pub checksum: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Run {
    /// A fresh `running` record for `job`, not yet persisted.
    pub fn start(job: &Job, started_at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            job_id: job.id,
            tenant_id: job.tenant_id,
            started_at,
            finished_at: None,
            status: RunStatus::Running,
            error: None,
            artifact_path: None,
            rendered_pages: 0,
            bytes: 0,
            checksum: None,
            created_at: started_at,
        }
    }

    /// Move to a terminal state. A record can only be finalised once.
    pub fn finish(&mut self, outcome: RunOutcome, finished_at: DateTime<Utc>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(ReportError::RunFinalised(self.id));
        }
        self.finished_at = Some(finished_at);
        match outcome {
            RunOutcome::Completed {
                artifact_path,
                rendered_pages,
                bytes,
                checksum,
            } => {
                self.status = RunStatus::Completed;
                self.artifact_path = Some(artifact_path);
                self.rendered_pages = rendered_pages;
                self.bytes = bytes;
                self.checksum = Some(checksum);
            }
            RunOutcome::Failed { error } => {
                self.status = RunStatus::Failed;
                self.error = Some(error);
            }
        }
        Ok(())
    }
}
