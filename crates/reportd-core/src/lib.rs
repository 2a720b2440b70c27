//! # reportd core
//!
//! Shared vocabulary for the report engine: job definitions, execution records,
//! per-tenant settings, the error taxonomy, daemon configuration and the
//! credential provider handed to every execution.

pub mod config;
pub mod credentials;
pub mod error;
pub mod layout;
pub mod model;
pub mod settings;

pub use config::ReporterConfig;
pub use credentials::CredentialProvider;
pub use error::{ReportError, Result, Stage};
pub use layout::{Orientation, PaperSize};
pub use model::{Interval, Job, OutputFormat, Recipients, Run, RunOutcome, RunStatus};
pub use settings::{Limits, RendererSettings, SmtpSettings, TenantSettings};

/// Tenant (organisation) identifier.
pub type TenantId = i64;
