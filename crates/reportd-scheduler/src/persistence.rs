//! SQLite-backed `ReportStore`.
//!
//! Nested values (recipients, variables, panel ids, SMTP, renderer config,
//! limits) are JSON text columns. Timestamps are RFC 3339 UTC with fixed
//! microsecond precision, so string comparison orders them correctly.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use reportd_core::error::{ReportError, Result};
use reportd_core::{Interval, Job, OutputFormat, Run, RunStatus, TenantId, TenantSettings};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::de::DeserializeOwned;

use crate::store::ReportStore;

const JOB_COLUMNS: &str = "id, tenant_id, name, dashboard_uid, dashboard_title, panel_ids, \
     range_from, range_to, interval_kind, interval_expr, timezone, format, variables, \
     recipients, email_subject, email_body, enabled, owner_user_id, last_run_at, next_run_at, \
     created_at, updated_at";

const RUN_COLUMNS: &str = "id, job_id, tenant_id, started_at, finished_at, status, error_text, \
     artifact_path, rendered_pages, bytes, checksum, created_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let conn = Connection::open(path).map_err(store_err("DB open"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::with_connection(conn)
    }

    /// Private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err("DB open"))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(store_err("Pragma"))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                dashboard_uid TEXT NOT NULL,
                dashboard_title TEXT,
                panel_ids TEXT NOT NULL DEFAULT '[]',
                range_from TEXT NOT NULL,
                range_to TEXT NOT NULL,
                interval_kind TEXT NOT NULL,     -- daily, weekly, monthly, custom
                interval_expr TEXT,              -- cron expression for custom
                timezone TEXT NOT NULL,
                format TEXT NOT NULL,
                variables TEXT NOT NULL DEFAULT '{}',
                recipients TEXT NOT NULL,
                email_subject TEXT NOT NULL,
                email_body TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                owner_user_id INTEGER NOT NULL DEFAULT 0,
                last_run_at TEXT,
                next_run_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_tenant ON jobs(tenant_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs(enabled, next_run_at);

            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL,
                tenant_id INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                status TEXT NOT NULL,            -- running, completed, failed
                error_text TEXT,
                artifact_path TEXT,
                rendered_pages INTEGER NOT NULL DEFAULT 0,
                bytes INTEGER NOT NULL DEFAULT 0,
                checksum TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_runs_job ON runs(job_id);

            CREATE TABLE IF NOT EXISTS tenant_settings (
                tenant_id INTEGER PRIMARY KEY,
                use_platform_smtp INTEGER NOT NULL DEFAULT 1,
                smtp_config TEXT,
                renderer_config TEXT NOT NULL,
                limits TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )
        .map_err(store_err("Migration"))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ReportError::Store(format!("Lock: {e}")))
    }
}

fn store_err(what: &'static str) -> impl Fn(rusqlite::Error) -> ReportError {
    move |e| ReportError::Store(format!("{what}: {e}"))
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_err(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn time_col(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn opt_time_col(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

fn json_col<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_err(idx, e))
}

fn job_from_row(row: &Row) -> rusqlite::Result<Job> {
    let kind: String = row.get(8)?;
    let expr: Option<String> = row.get(9)?;
    let format: String = row.get(11)?;
    Ok(Job {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        dashboard_uid: row.get(3)?,
        dashboard_title: row.get(4)?,
        panel_ids: json_col(row, 5)?,
        range_from: row.get(6)?,
        range_to: row.get(7)?,
        interval: Interval::from_parts(&kind, expr),
        timezone: row.get(10)?,
        format: format.parse::<OutputFormat>().map_err(|e| conversion_err(11, e))?,
        variables: json_col(row, 12)?,
        recipients: json_col(row, 13)?,
        email_subject: row.get(14)?,
        email_body: row.get(15)?,
        enabled: row.get::<_, i32>(16)? != 0,
        owner_user_id: row.get(17)?,
        last_run_at: opt_time_col(row, 18)?,
        next_run_at: opt_time_col(row, 19)?,
        created_at: time_col(row, 20)?,
        updated_at: time_col(row, 21)?,
    })
}

fn run_from_row(row: &Row) -> rusqlite::Result<Run> {
    let status: String = row.get(5)?;
    Ok(Run {
        id: row.get(0)?,
        job_id: row.get(1)?,
        tenant_id: row.get(2)?,
        started_at: time_col(row, 3)?,
        finished_at: opt_time_col(row, 4)?,
        status: status.parse::<RunStatus>().map_err(|e| conversion_err(5, e))?,
        error: row.get(6)?,
        artifact_path: row.get(7)?,
        rendered_pages: row.get(8)?,
        bytes: row.get::<_, i64>(9)? as u64,
        checksum: row.get(10)?,
        created_at: time_col(row, 11)?,
    })
}

fn settings_from_row(row: &Row) -> rusqlite::Result<TenantSettings> {
    let smtp: Option<String> = row.get(2)?;
    Ok(TenantSettings {
        tenant_id: row.get(0)?,
        use_platform_smtp: row.get::<_, i32>(1)? != 0,
        smtp: smtp
            .map(|s| serde_json::from_str(&s).map_err(|e| conversion_err(2, e)))
            .transpose()?,
        renderer: json_col(row, 3)?,
        limits: json_col(row, 4)?,
    })
}

#[async_trait]
impl ReportStore for SqliteStore {
    async fn create_job(&self, mut job: Job) -> Result<Job> {
        let now = Utc::now().trunc_subsecs(6);
        job.created_at = now;
        job.updated_at = now;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO jobs (tenant_id, name, dashboard_uid, dashboard_title, panel_ids,
                range_from, range_to, interval_kind, interval_expr, timezone, format, variables,
                recipients, email_subject, email_body, enabled, owner_user_id, last_run_at,
                next_run_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                ?18, ?19, ?20, ?21)",
            params![
                job.tenant_id,
                job.name,
                job.dashboard_uid,
                job.dashboard_title,
                serde_json::to_string(&job.panel_ids)?,
                job.range_from,
                job.range_to,
                job.interval.kind(),
                job.interval.expression(),
                job.timezone,
                job.format.extension(),
                serde_json::to_string(&job.variables)?,
                serde_json::to_string(&job.recipients)?,
                job.email_subject,
                job.email_body,
                job.enabled as i32,
                job.owner_user_id,
                job.last_run_at.map(ts),
                job.next_run_at.map(ts),
                ts(job.created_at),
                ts(job.updated_at),
            ],
        )
        .map_err(store_err("Create job"))?;
        job.id = conn.last_insert_rowid();
        tracing::debug!("💾 Created job {} '{}' for tenant {}", job.id, job.name, job.tenant_id);
        Ok(job)
    }

    async fn get_job(&self, tenant: TenantId, id: i64) -> Result<Job> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1 AND tenant_id = ?2"),
            params![id, tenant],
            job_from_row,
        )
        .optional()
        .map_err(store_err("Get job"))?
        .ok_or(ReportError::JobNotFound(id))
    }

    async fn list_jobs(&self, tenant: TenantId) -> Result<Vec<Job>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE tenant_id = ?1 ORDER BY id"
            ))
            .map_err(store_err("List jobs"))?;
        let rows = stmt
            .query_map([tenant], job_from_row)
            .map_err(store_err("List jobs"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err("List jobs"))
    }

    async fn update_job(&self, job: &Job) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE jobs SET name = ?1, dashboard_uid = ?2, dashboard_title = ?3,
                    panel_ids = ?4, range_from = ?5, range_to = ?6, interval_kind = ?7,
                    interval_expr = ?8, timezone = ?9, format = ?10, variables = ?11,
                    recipients = ?12, email_subject = ?13, email_body = ?14, enabled = ?15,
                    owner_user_id = ?16, next_run_at = ?17, updated_at = ?18
                 WHERE id = ?19 AND tenant_id = ?20",
                params![
                    job.name,
                    job.dashboard_uid,
                    job.dashboard_title,
                    serde_json::to_string(&job.panel_ids)?,
                    job.range_from,
                    job.range_to,
                    job.interval.kind(),
                    job.interval.expression(),
                    job.timezone,
                    job.format.extension(),
                    serde_json::to_string(&job.variables)?,
                    serde_json::to_string(&job.recipients)?,
                    job.email_subject,
                    job.email_body,
                    job.enabled as i32,
                    job.owner_user_id,
                    job.next_run_at.map(ts),
                    ts(Utc::now()),
                    job.id,
                    job.tenant_id,
                ],
            )
            .map_err(store_err("Update job"))?;
        if changed == 0 {
            return Err(ReportError::JobNotFound(job.id));
        }
        Ok(())
    }

    async fn delete_job(&self, tenant: TenantId, id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM jobs WHERE id = ?1 AND tenant_id = ?2",
            params![id, tenant],
        )
        .map_err(store_err("Delete job"))?;
        Ok(())
    }

    async fn list_due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs
                 WHERE enabled = 1 AND (next_run_at IS NULL OR next_run_at <= ?1)
                 ORDER BY next_run_at ASC, id ASC"
            ))
            .map_err(store_err("Due jobs"))?;
        let rows = stmt
            .query_map([ts(now)], job_from_row)
            .map_err(store_err("Due jobs"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err("Due jobs"))
    }

    async fn set_next_run(&self, tenant: TenantId, id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE jobs SET next_run_at = ?1 WHERE id = ?2 AND tenant_id = ?3",
                params![ts(at), id, tenant],
            )
            .map_err(store_err("Set next run"))?;
        if changed == 0 {
            return Err(ReportError::JobNotFound(id));
        }
        Ok(())
    }

    async fn set_last_run(&self, tenant: TenantId, id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE jobs SET last_run_at = ?1 WHERE id = ?2 AND tenant_id = ?3",
                params![ts(at), id, tenant],
            )
            .map_err(store_err("Set last run"))?;
        if changed == 0 {
            return Err(ReportError::JobNotFound(id));
        }
        Ok(())
    }

    async fn create_run(&self, mut run: Run) -> Result<Run> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO runs (job_id, tenant_id, started_at, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run.job_id,
                run.tenant_id,
                ts(run.started_at),
                run.status.to_string(),
                ts(run.created_at),
            ],
        )
        .map_err(store_err("Create run"))?;
        run.id = conn.last_insert_rowid();
        Ok(run)
    }

    async fn finish_run(&self, run: &Run) -> Result<()> {
        if !run.status.is_terminal() {
            return Err(ReportError::Store(format!("run {} is still running", run.id)));
        }
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE runs SET finished_at = ?1, status = ?2, error_text = ?3,
                    artifact_path = ?4, rendered_pages = ?5, bytes = ?6, checksum = ?7
                 WHERE id = ?8 AND tenant_id = ?9 AND status = 'running'",
                params![
                    run.finished_at.map(ts),
                    run.status.to_string(),
                    run.error,
                    run.artifact_path,
                    run.rendered_pages,
                    run.bytes as i64,
                    run.checksum,
                    run.id,
                    run.tenant_id,
                ],
            )
            .map_err(store_err("Finish run"))?;
        if changed == 0 {
            return Err(ReportError::RunFinalised(run.id));
        }
        Ok(())
    }

    async fn get_run(&self, tenant: TenantId, id: i64) -> Result<Run> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1 AND tenant_id = ?2"),
            params![id, tenant],
            run_from_row,
        )
        .optional()
        .map_err(store_err("Get run"))?
        .ok_or_else(|| ReportError::Store(format!("run {id} not found")))
    }

    async fn list_runs(&self, tenant: TenantId, job_id: i64) -> Result<Vec<Run>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM runs WHERE job_id = ?1 AND tenant_id = ?2
                 ORDER BY started_at DESC, id DESC"
            ))
            .map_err(store_err("List runs"))?;
        let rows = stmt
            .query_map(params![job_id, tenant], run_from_row)
            .map_err(store_err("List runs"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err("List runs"))
    }

    async fn get_settings(&self, tenant: TenantId) -> Result<Option<TenantSettings>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT tenant_id, use_platform_smtp, smtp_config, renderer_config, limits
             FROM tenant_settings WHERE tenant_id = ?1",
            [tenant],
            settings_from_row,
        )
        .optional()
        .map_err(store_err("Get settings"))
    }

    async fn upsert_settings(&self, settings: &TenantSettings) -> Result<()> {
        let smtp = settings
            .smtp
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = ts(Utc::now());
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tenant_settings
                (tenant_id, use_platform_smtp, smtp_config, renderer_config, limits, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(tenant_id) DO UPDATE SET
                use_platform_smtp = excluded.use_platform_smtp,
                smtp_config = excluded.smtp_config,
                renderer_config = excluded.renderer_config,
                limits = excluded.limits,
                updated_at = excluded.updated_at",
            params![
                settings.tenant_id,
                settings.use_platform_smtp as i32,
                smtp,
                serde_json::to_string(&settings.renderer)?,
                serde_json::to_string(&settings.limits)?,
                now,
            ],
        )
        .map_err(store_err("Upsert settings"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use reportd_core::{Recipients, RunOutcome, SmtpSettings};

    fn job(tenant: TenantId, name: &str) -> Job {
        let mut job = Job::new(tenant, name, "dash-uid");
        job.recipients = Recipients::to(&["ops@example.com"]);
        job
    }

    #[tokio::test]
    async fn test_job_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        let mut new = job(1, "Weekly KPIs");
        new.interval = Interval::Custom("0 8 * * 1".into());
        new.format = OutputFormat::Html;
        new.panel_ids = vec![2, 4];
        new.variables.insert("region".into(), "eu".into());
        new.dashboard_title = Some("KPIs".into());

        let created = store.create_job(new).await.unwrap();
        assert!(created.id > 0);

        let loaded = store.get_job(1, created.id).await.unwrap();
        assert_eq!(loaded.interval, Interval::Custom("0 8 * * 1".into()));
        assert_eq!(loaded.format, OutputFormat::Html);
        assert_eq!(loaded.panel_ids, vec![2, 4]);
        assert_eq!(loaded.variables["region"], "eu");
        assert_eq!(loaded.recipients.to, vec!["ops@example.com"]);
        assert_eq!(loaded.created_at, created.created_at);

        // Other tenants cannot see it.
        assert!(matches!(
            store.get_job(2, created.id).await,
            Err(ReportError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = SqliteStore::in_memory().unwrap();
        let mut job = store.create_job(job(1, "a")).await.unwrap();
        job.name = "renamed".into();
        job.enabled = false;
        store.update_job(&job).await.unwrap();
        let loaded = store.get_job(1, job.id).await.unwrap();
        assert_eq!(loaded.name, "renamed");
        assert!(!loaded.enabled);

        store.delete_job(1, job.id).await.unwrap();
        assert!(store.list_jobs(1).await.unwrap().is_empty());
        assert!(store.update_job(&job).await.is_err());
    }

    #[tokio::test]
    async fn test_due_jobs() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap();

        let never_ran = store.create_job(job(1, "never ran")).await.unwrap();
        let past = store.create_job(job(1, "past")).await.unwrap();
        store.set_next_run(1, past.id, now - Duration::minutes(5)).await.unwrap();
        let exact = store.create_job(job(2, "exact")).await.unwrap();
        store.set_next_run(2, exact.id, now).await.unwrap();
        let future = store.create_job(job(1, "future")).await.unwrap();
        store.set_next_run(1, future.id, now + Duration::seconds(1)).await.unwrap();
        let mut disabled = job(1, "disabled");
        disabled.enabled = false;
        store.create_job(disabled).await.unwrap();

        let due: Vec<String> = store
            .list_due_jobs(now)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.name)
            .collect();
        assert_eq!(due, vec!["never ran", "past", "exact"]);
        assert_eq!(never_ran.next_run_at, None);
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let store = SqliteStore::in_memory().unwrap();
        let job = store.create_job(job(1, "r")).await.unwrap();
        let started = Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap();

        let mut run = store.create_run(Run::start(&job, started)).await.unwrap();
        assert_eq!(store.get_run(1, run.id).await.unwrap().status, RunStatus::Running);

        run.finish(
            RunOutcome::Completed {
                artifact_path: "/tmp/r.pdf".into(),
                rendered_pages: 2,
                bytes: 1234,
                checksum: "ab".repeat(32),
            },
            started + Duration::seconds(3),
        )
        .unwrap();
        store.finish_run(&run).await.unwrap();

        let loaded = store.get_run(1, run.id).await.unwrap();
        assert_eq!(loaded, run);

        // A finished record cannot be finalised again.
        assert!(matches!(
            store.finish_run(&run).await,
            Err(ReportError::RunFinalised(_))
        ));

        store.set_last_run(1, job.id, started).await.unwrap();
        assert_eq!(store.get_job(1, job.id).await.unwrap().last_run_at, Some(started));
        assert_eq!(store.list_runs(1, job.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_settings_upsert() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.get_settings(5).await.unwrap().is_none());

        let mut settings = TenantSettings::new(5);
        settings.renderer.backend = "native".into();
        store.upsert_settings(&settings).await.unwrap();

        settings.use_platform_smtp = false;
        settings.smtp = Some(SmtpSettings {
            host: "smtp.example.com".into(),
            port: 465,
            username: "u".into(),
            password: "p".into(),
            from: "r@example.com".into(),
            use_tls: true,
        });
        settings.limits.max_recipients = 3;
        store.upsert_settings(&settings).await.unwrap();

        assert_eq!(store.get_settings(5).await.unwrap(), Some(settings));
    }

    #[tokio::test]
    async fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("reportd.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.create_job(job(1, "persisted")).await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.list_jobs(1).await.unwrap()[0].name, "persisted");
    }
}
