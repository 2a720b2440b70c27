//! One scheduled job, from due detection to a delivered PDF.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::Path;
use axum::http::HeaderMap;
use axum::routing::get;
use chrono::Utc;
use reportd_core::config::PlatformSmtp;
use reportd_core::error::Result;
use reportd_core::{CredentialProvider, Job, Recipients, RunStatus, SmtpSettings, TenantSettings};
use reportd_mail::{Mailer, ReportEmail};
use reportd_scheduler::{
    Orchestrator, OrchestratorConfig, ReportStore, RetryPolicy, SqliteStore,
};

const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0";

#[derive(Debug, Clone)]
struct Delivered {
    host: String,
    subject: String,
    body: String,
    filename: String,
    attachment: Vec<u8>,
}

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<Delivered>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_report(&self, smtp: &SmtpSettings, email: ReportEmail<'_>) -> Result<()> {
        self.sent.lock().unwrap().push(Delivered {
            host: smtp.host.clone(),
            subject: email.subject.to_string(),
            body: email.body.to_string(),
            filename: email.filename.to_string(),
            attachment: email.attachment.to_vec(),
        });
        Ok(())
    }
}

async fn fake_renderer(seen: Arc<Mutex<Vec<(String, String)>>>) -> String {
    let app = Router::new().route(
        "/render/d/{uid}",
        get(move |Path(uid): Path<String>, headers: HeaderMap| {
            let seen = seen.clone();
            async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                seen.lock().unwrap().push((uid, auth));
                FAKE_PNG.to_vec()
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_daily_pdf_report_is_rendered_stored_and_mailed() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let url = fake_renderer(seen.clone()).await;
    let artifacts = tempfile::tempdir().unwrap();
    let db = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(&db.path().join("reports.db")).unwrap());

    let mut settings = TenantSettings::new(42);
    settings.renderer.backend = "image-renderer".into();
    settings.renderer.url = url;
    store.upsert_settings(&settings).await.unwrap();

    let mut job = Job::new(42, "Ops daily", "ops-overview");
    job.dashboard_title = Some("Ops Overview".into());
    job.panel_ids = vec![1];
    job.recipients = Recipients::to(&["ops@example.com"]);
    job.email_subject = "{{schedule.name}}: {{dashboard.title}}".into();
    job.email_body = "<p>Range {{timerange}}</p>".into();
    let job = store.create_job(job).await.unwrap();

    let config = OrchestratorConfig {
        platform_url: "http://platform.invalid".into(),
        poll_interval: Duration::from_secs(60),
        max_concurrent: 4,
        retry: RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
        },
        artifacts_dir: artifacts.path().to_path_buf(),
        platform_smtp: PlatformSmtp {
            host: "relay.internal:2525".into(),
            from: "reports@example.com".into(),
            ..Default::default()
        },
    };
    let mailer = Arc::new(RecordingMailer::default());
    let orchestrator = Orchestrator::new(
        config,
        store.clone(),
        mailer.clone(),
        CredentialProvider::new(None, Duration::from_secs(600)),
    );
    orchestrator.handoff_credentials("handoff-token");

    let before = Utc::now();
    let handles = orchestrator.check_due_jobs().await.unwrap();
    assert_eq!(handles.len(), 1);
    let mut runs = Vec::new();
    for handle in handles {
        runs.push(handle.await.unwrap().unwrap());
    }
    let run = &runs[0];

    assert_eq!(run.status, RunStatus::Completed, "{:?}", run.error);
    assert_eq!(run.rendered_pages, 1);
    assert!(run.bytes > 0);
    let checksum = run.checksum.as_deref().unwrap();
    assert_eq!(checksum.len(), 64);
    assert!(checksum.chars().all(|c| c.is_ascii_hexdigit()));
    let path = run.artifact_path.as_deref().unwrap();
    assert!(path.ends_with(".pdf"));
    assert!(path.contains("tenant_42"));
    let on_disk = std::fs::read(path).unwrap();
    assert_eq!(on_disk.len() as u64, run.bytes);
    assert!(on_disk.starts_with(b"%PDF-"));

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen, vec![("ops-overview".to_string(), "Bearer handoff-token".to_string())]);

    let sent = mailer.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].host, "relay.internal");
    assert_eq!(sent[0].subject, "Ops daily: Ops Overview");
    assert_eq!(sent[0].body, "<p>Range now-24h to now</p>");
    assert!(sent[0].filename.starts_with("Ops_daily-"));
    assert_eq!(sent[0].attachment, on_disk);

    let stored = store.get_job(42, job.id).await.unwrap();
    assert!(stored.last_run_at.is_some());
    assert!(stored.next_run_at.unwrap() >= before + chrono::Duration::hours(24));

    let history = store.list_runs(42, job.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].checksum.as_deref(), Some(checksum));

    orchestrator.shutdown().await;
}
