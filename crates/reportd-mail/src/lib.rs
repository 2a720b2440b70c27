//! # reportd mail
//!
//! Delivery of finished artifacts: which SMTP server a tenant uses, how the
//! subject and body templates are filled in, and the `Mailer` seam the
//! orchestrator sends through.

pub mod mailer;
pub mod smtp;
pub mod template;

pub use mailer::{Mailer, ReportEmail, SmtpMailer};
pub use smtp::resolve_smtp;
pub use template::{TemplateVars, interpolate};
