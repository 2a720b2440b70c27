//! Run orchestrator: due-job polling, the worker pool and the retry loop.
//!
//! ```text
//! poll tick ─▶ list due jobs ─▶ set next_run ─▶ spawn ─┐
//! trigger_now ────────────────────────────────▶ spawn ─┤
//!                                                      ▼
//!                     wait for pool slot ─▶ create run (running)
//!                                                      │
//!         ┌──────────── attempt 1..=max_attempts ──────┤
//!         │  settings ─▶ backend ─▶ render ─▶ assemble │
//!         │  ─▶ limits ─▶ persist ─▶ mail              │
//!         └────────────────────────────────────────────┘
//!                                                      ▼
//!                          finish run ─▶ set last_run = started_at
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reportd_artifact::{AssembleOptions, assemble, persist};
use reportd_core::config::{PlatformSmtp, ReporterConfig};
use reportd_core::error::{ReportError, Result, Stage};
use reportd_core::{CredentialProvider, Job, Run, RunOutcome};
use reportd_mail::{Mailer, ReportEmail, TemplateVars, interpolate, resolve_smtp};
use reportd_render::BackendManager;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::interval;
use crate::pool::{PoolStats, WorkerPool};
use crate::store::ReportStore;

/// How many times an execution is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt` (0-based): `attempt² × backoff_base`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(attempt.saturating_mul(attempt))
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub platform_url: String,
    pub poll_interval: Duration,
    pub max_concurrent: usize,
    pub retry: RetryPolicy,
    pub artifacts_dir: PathBuf,
    pub platform_smtp: PlatformSmtp,
}

impl OrchestratorConfig {
    pub fn from_config(config: &ReporterConfig) -> Self {
        Self {
            platform_url: config.platform.url.clone(),
            poll_interval: Duration::from_secs(config.scheduler.poll_interval_secs.max(1)),
            max_concurrent: config.scheduler.max_concurrent,
            retry: RetryPolicy {
                max_attempts: config.scheduler.max_attempts,
                backoff_base: Duration::from_millis(config.scheduler.backoff_base_ms),
            },
            artifacts_dir: config.storage.artifacts_dir(),
            platform_smtp: config.platform_smtp.clone(),
        }
    }
}

struct Inner {
    config: OrchestratorConfig,
    store: Arc<dyn ReportStore>,
    mailer: Arc<dyn Mailer>,
    credentials: CredentialProvider,
    backends: BackendManager,
    pool: WorkerPool,
}

pub struct Orchestrator {
    inner: Arc<Inner>,
    shutdown_tx: watch::Sender<bool>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn ReportStore>,
        mailer: Arc<dyn Mailer>,
        credentials: CredentialProvider,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let inner = Inner {
            backends: BackendManager::new(config.platform_url.clone()),
            pool: WorkerPool::new(config.max_concurrent),
            config,
            store,
            mailer,
            credentials,
        };
        Self {
            inner: Arc::new(inner),
            shutdown_tx,
            poller: Mutex::new(None),
        }
    }

    /// Spawn the poll loop. Calling it again while it runs does nothing.
    pub fn start(&self) {
        let mut poller = self.poller.lock().unwrap_or_else(|e| e.into_inner());
        if poller.is_some() {
            return;
        }
        let inner = self.inner.clone();
        let mut stop = self.shutdown_tx.subscribe();
        let every = inner.config.poll_interval;
        tracing::info!("⏰ Report scheduler started (check every {}s)", every.as_secs());

        *poller = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                if *stop.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = Inner::check_due_jobs(&inner, Utc::now()).await {
                            tracing::error!("Due-job check failed: {e}");
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
            tracing::info!("⏹️ Report scheduler stopped");
        }));
    }

    /// Run one due-job check now. Returns the spawned executions.
    pub async fn check_due_jobs(&self) -> Result<Vec<JoinHandle<Option<Run>>>> {
        Inner::check_due_jobs(&self.inner, Utc::now()).await
    }

    /// Execute `job` right away, outside the schedule. The `enabled` flag is
    /// not consulted.
    pub fn trigger_now(&self, job: Job) -> JoinHandle<Option<Run>> {
        tracing::info!(job_id = %job.id, "▶️ Manual run of '{}'", job.name);
        tokio::spawn(self.inner.clone().execute(job))
    }

    /// When `job` should next run, seen from now.
    pub fn compute_next_run(&self, job: &Job) -> DateTime<Utc> {
        interval::compute_next_run(&job.interval, Utc::now())
    }

    /// Hand a fresh platform token to every future execution.
    pub fn handoff_credentials(&self, token: impl Into<String>) {
        self.inner.credentials.seed(token);
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// Stop polling and release every cached backend. Executions already
    /// spawned run to completion.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let poller = self
            .poller
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = poller {
            if let Err(e) = handle.await {
                tracing::warn!("Poll loop ended abnormally: {e}");
            }
        }
        self.inner.backends.release_all().await;
        tracing::info!("🛑 Orchestrator shut down, backends released");
    }
}

impl Inner {
    async fn check_due_jobs(
        this: &Arc<Self>,
        now: DateTime<Utc>,
    ) -> Result<Vec<JoinHandle<Option<Run>>>> {
        let due = this.store.list_due_jobs(now).await?;
        if !due.is_empty() {
            tracing::info!("🔔 {} job(s) due", due.len());
        }

        let mut spawned = Vec::with_capacity(due.len());
        for mut job in due {
            let next = interval::compute_next_run(&job.interval, now);
            if let Err(e) = this.store.set_next_run(job.tenant_id, job.id, next).await {
                tracing::error!(job_id = %job.id, "Failed to advance next run, skipping: {e}");
                continue;
            }
            job.next_run_at = Some(next);
            tracing::debug!(job_id = %job.id, "Next run at {next}");
            spawned.push(tokio::spawn(this.clone().execute(job)));
        }
        Ok(spawned)
    }

    async fn execute(self: Arc<Self>, job: Job) -> Option<Run> {
        let _slot = self.pool.acquire().await?;

        let started_at = Utc::now();
        let mut run = match self.store.create_run(Run::start(&job, started_at)).await {
            Ok(run) => run,
            Err(e) => {
                tracing::error!(job_id = %job.id, "Failed to create run record: {e}");
                return None;
            }
        };

        let outcome = match self.run_with_retry(&job, started_at).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(job_id = %job.id, run_id = %run.id, "❌ Report failed: {e}");
                RunOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        if let Err(e) = run.finish(outcome, Utc::now()) {
            tracing::error!(run_id = %run.id, "{e}");
        } else if let Err(e) = self.store.finish_run(&run).await {
            tracing::error!(run_id = %run.id, "Failed to update run record: {e}");
        }
        if let Err(e) = self
            .store
            .set_last_run(job.tenant_id, job.id, started_at)
            .await
        {
            tracing::error!(job_id = %job.id, "Failed to update last run time: {e}");
        }
        Some(run)
    }

    async fn run_with_retry(&self, job: &Job, started_at: DateTime<Utc>) -> Result<RunOutcome> {
        let policy = self.config.retry;
        let attempts = policy.attempts();
        let mut last = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = policy.delay(attempt);
                tracing::info!(
                    job_id = %job.id,
                    "🔁 Retrying (attempt {}/{attempts}) after {backoff:?}",
                    attempt + 1
                );
                tokio::time::sleep(backoff).await;
            }
            match self.attempt(job, started_at).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    tracing::warn!(job_id = %job.id, "Attempt {} failed: {e}", attempt + 1);
                    last = Some(e);
                }
            }
        }

        Err(ReportError::RetriesExhausted {
            attempts,
            last: Box::new(last.unwrap_or_else(|| ReportError::Config("no attempt made".into()))),
        })
    }

    /// One pass through the whole pipeline.
    async fn attempt(&self, job: &Job, started_at: DateTime<Utc>) -> Result<RunOutcome> {
        let settings = self
            .store
            .get_settings(job.tenant_id)
            .await
            .map_err(|e| e.at(Stage::Settings))?
            .ok_or_else(|| {
                ReportError::Config(format!("no settings configured for tenant {}", job.tenant_id))
                    .at(Stage::Settings)
            })?;

        let backend = self
            .backends
            .acquire(job.tenant_id, &settings.renderer)
            .await
            .map_err(|e| e.at(Stage::Backend))?;
        tracing::debug!(job_id = %job.id, "Rendering with {} backend", backend.name());

        let output = backend
            .render(job, &settings.renderer, &self.credentials)
            .await
            .map_err(|e| e.at(Stage::Render))?;
        let title = output
            .dashboard_title
            .clone()
            .or_else(|| job.dashboard_title.clone())
            .unwrap_or_else(|| job.dashboard_uid.clone());

        let artifact = assemble(
            job,
            output.pages,
            Utc::now(),
            AssembleOptions::from(&settings.renderer),
        )
        .map_err(|e| e.at(Stage::Assemble))?;

        let limits = &settings.limits;
        if limits.max_recipients > 0 && job.recipients.len() > limits.max_recipients {
            return Err(ReportError::LimitExceeded(format!(
                "{} recipients, limit is {}",
                job.recipients.len(),
                limits.max_recipients
            ))
            .at(Stage::Mail));
        }
        if limits.max_attachment_size_mb > 0 && artifact.size() > limits.max_attachment_bytes() {
            return Err(ReportError::LimitExceeded(format!(
                "attachment is {} bytes, limit is {} MB",
                artifact.size(),
                limits.max_attachment_size_mb
            ))
            .at(Stage::Mail));
        }

        let path = persist(&self.config.artifacts_dir, job.tenant_id, &artifact)
            .await
            .map_err(|e| e.at(Stage::Persist))?;

        let smtp = resolve_smtp(&settings, &self.config.platform_smtp).map_err(|e| e.at(Stage::Mail))?;
        let vars = TemplateVars::for_run(job, &title, started_at);
        let subject = interpolate(&job.email_subject, &vars);
        let body = interpolate(&job.email_body, &vars);
        self.mailer
            .send_report(
                &smtp,
                ReportEmail {
                    recipients: &job.recipients,
                    subject: &subject,
                    body: &body,
                    attachment: &artifact.bytes,
                    filename: &artifact.filename,
                },
            )
            .await
            .map_err(|e| e.at(Stage::Mail))?;

        tracing::info!(
            job_id = %job.id,
            "✅ Report '{}' delivered ({} bytes, {} page(s))",
            job.name,
            artifact.size(),
            artifact.rendered_pages
        );
        Ok(RunOutcome::Completed {
            artifact_path: path.display().to_string(),
            rendered_pages: artifact.rendered_pages,
            bytes: artifact.size(),
            checksum: artifact.checksum,
        })
    }
}
