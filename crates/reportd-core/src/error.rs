//! Error types for reportd.

use thiserror::Error;

/// Pipeline stage an attempt failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Settings,
    Backend,
    Render,
    Assemble,
    Persist,
    Mail,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Settings => write!(f, "settings"),
            Stage::Backend => write!(f, "backend"),
            Stage::Render => write!(f, "render"),
            Stage::Assemble => write!(f, "assemble"),
            Stage::Persist => write!(f, "persist"),
            Stage::Mail => write!(f, "mail"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No credential available: {0}")]
    MissingCredential(String),

    #[error("SMTP not configured: {0}")]
    SmtpNotConfigured(String),

    #[error("Unknown renderer backend: {0}")]
    UnknownBackend(String),

    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Conversion error: {0}")]
    Convert(String),

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Job {0} not found")]
    JobNotFound(i64),

    #[error("Run {0} is already finalised")]
    RunFinalised(i64),

    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<ReportError>,
    },

    #[error("all {attempts} attempts failed: {last}")]
    RetriesExhausted { attempts: u32, last: Box<ReportError> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReportError {
    /// Wrap this error with the pipeline stage it happened in.
    pub fn at(self, stage: Stage) -> Self {
        ReportError::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping stage and retry wrappers.
    pub fn root_cause(&self) -> &ReportError {
        match self {
            ReportError::Stage { source, .. } => source.root_cause(),
            ReportError::RetriesExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;
