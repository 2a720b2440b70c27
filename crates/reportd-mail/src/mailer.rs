//! Mail transport seam and its SMTP implementation (async lettre).

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message};
use reportd_core::error::{ReportError, Result};
use reportd_core::{Recipients, SmtpSettings};

const SEND_TIMEOUT: Duration = Duration::from_secs(60);

/// One outgoing report email.
#[derive(Debug, Clone, Copy)]
pub struct ReportEmail<'a> {
    pub recipients: &'a Recipients,
    pub subject: &'a str,
    /// HTML body.
    pub body: &'a str,
    pub attachment: &'a [u8],
    pub filename: &'a str,
}

/// Delivers report emails.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_report(&self, smtp: &SmtpSettings, email: ReportEmail<'_>) -> Result<()>;
}

/// MIME type for an attachment, from its extension.
pub fn attachment_mime(filename: &str) -> &'static str {
    let ext = filename.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        _ => "application/octet-stream",
    }
}

fn mailbox(addr: &str, role: &str) -> Result<Mailbox> {
    addr.trim()
        .parse()
        .map_err(|e| ReportError::Mail(format!("Invalid {role} address {addr:?}: {e}")))
}

/// Build the MIME message without sending it.
pub fn build_message(smtp: &SmtpSettings, email: &ReportEmail<'_>) -> Result<Message> {
    if email.recipients.to.is_empty() {
        return Err(ReportError::Mail("no recipients specified".into()));
    }

    let mut builder = Message::builder()
        .from(mailbox(&smtp.from, "from")?)
        .subject(email.subject);
    for addr in &email.recipients.to {
        builder = builder.to(mailbox(addr, "to")?);
    }
    for addr in &email.recipients.cc {
        builder = builder.cc(mailbox(addr, "cc")?);
    }
    for addr in &email.recipients.bcc {
        builder = builder.bcc(mailbox(addr, "bcc")?);
    }

    let mut body = MultiPart::mixed().singlepart(SinglePart::html(email.body.to_string()));
    if !email.attachment.is_empty() {
        let content_type = ContentType::parse(attachment_mime(email.filename))
            .map_err(|e| ReportError::Mail(format!("Attachment type: {e}")))?;
        body = body.singlepart(
            Attachment::new(email.filename.to_string()).body(email.attachment.to_vec(), content_type),
        );
    }

    builder
        .multipart(body)
        .map_err(|e| ReportError::Mail(format!("Build email: {e}")))
}

/// SMTP delivery. `use_tls` requires STARTTLS with a verified certificate;
/// otherwise STARTTLS is attempted without verification and plain SMTP is
/// accepted.
#[derive(Debug, Clone, Default)]
pub struct SmtpMailer;

impl SmtpMailer {
    pub fn new() -> Self {
        Self
    }

    fn transport(smtp: &SmtpSettings) -> Result<AsyncSmtpTransport<lettre::Tokio1Executor>> {
        let builder = if smtp.use_tls {
            AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(&smtp.host)
                .map_err(|e| ReportError::Mail(format!("SMTP relay: {e}")))?
        } else {
            let tls = TlsParameters::builder(smtp.host.clone())
                .dangerous_accept_invalid_certs(true)
                .build()
                .map_err(|e| ReportError::Mail(format!("SMTP TLS: {e}")))?;
            AsyncSmtpTransport::<lettre::Tokio1Executor>::builder_dangerous(&smtp.host)
                .tls(Tls::Opportunistic(tls))
        };

        let mut builder = builder.port(smtp.port).timeout(Some(SEND_TIMEOUT));
        if !smtp.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                smtp.username.clone(),
                smtp.password.clone(),
            ));
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_report(&self, smtp: &SmtpSettings, email: ReportEmail<'_>) -> Result<()> {
        let message = build_message(smtp, &email)?;
        let transport = Self::transport(smtp)?;

        transport
            .send(message)
            .await
            .map_err(|e| ReportError::Mail(format!("SMTP send: {e}")))?;

        tracing::info!(
            "📤 Report {} sent to {} recipient(s) via {}:{}",
            email.filename,
            email.recipients.len(),
            smtp.host,
            smtp.port
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smtp() -> SmtpSettings {
        SmtpSettings {
            host: "localhost".into(),
            port: 2525,
            username: String::new(),
            password: String::new(),
            from: "Reports <reports@example.com>".into(),
            use_tls: false,
        }
    }

    #[test]
    fn test_mime_from_extension() {
        assert_eq!(attachment_mime("a-20260101-000000.pdf"), "application/pdf");
        assert_eq!(attachment_mime("a.PNG"), "image/png");
        assert_eq!(attachment_mime("a.html"), "text/html; charset=utf-8");
        assert_eq!(attachment_mime("noext"), "application/octet-stream");
    }

    #[test]
    fn test_no_recipients() {
        let recipients = Recipients {
            cc: vec!["cc@example.com".into()],
            ..Default::default()
        };
        let email = ReportEmail {
            recipients: &recipients,
            subject: "s",
            body: "<p>b</p>",
            attachment: b"%PDF-1.7",
            filename: "r.pdf",
        };
        let err = build_message(&smtp(), &email).unwrap_err();
        assert_eq!(err.to_string(), "Mail error: no recipients specified");
    }

    #[test]
    fn test_message_carries_attachment_and_all_recipients() {
        let recipients = Recipients {
            to: vec!["a@example.com".into()],
            cc: vec!["b@example.com".into()],
            bcc: vec!["c@example.com".into()],
        };
        let email = ReportEmail {
            recipients: &recipients,
            subject: "Weekly KPIs",
            body: "<p>Report attached</p>",
            attachment: b"%PDF-1.7 fake",
            filename: "weekly-20261016-063000.pdf",
        };
        let message = build_message(&smtp(), &email).unwrap();
        assert_eq!(message.envelope().to().len(), 3);

        let raw = String::from_utf8_lossy(&message.formatted()).to_string();
        assert!(raw.contains("Subject: Weekly KPIs"));
        assert!(raw.contains("text/html"));
        assert!(raw.contains("application/pdf"));
        assert!(raw.contains("weekly-20261016-063000.pdf"));
        assert!(!raw.contains("c@example.com"));
    }

    #[test]
    fn test_bad_address_is_mail_error() {
        let recipients = Recipients::to(&["not an address"]);
        let email = ReportEmail {
            recipients: &recipients,
            subject: "s",
            body: "b",
            attachment: &[],
            filename: "r.pdf",
        };
        assert!(matches!(build_message(&smtp(), &email), Err(ReportError::Mail(_))));
    }
}
