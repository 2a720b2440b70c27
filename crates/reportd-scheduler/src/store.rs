//! Persistence contract for jobs, runs and tenant settings.
//!
//! Every lookup is scoped by tenant except due-job detection, which scans
//! all tenants.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reportd_core::error::Result;
use reportd_core::{Job, Run, TenantId, TenantSettings};

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Insert `job` and return it with its assigned id and timestamps.
    async fn create_job(&self, job: Job) -> Result<Job>;

    async fn get_job(&self, tenant: TenantId, id: i64) -> Result<Job>;

    async fn list_jobs(&self, tenant: TenantId) -> Result<Vec<Job>>;

    /// Overwrite the stored definition. `JobNotFound` if it does not exist.
    async fn update_job(&self, job: &Job) -> Result<()>;

    async fn delete_job(&self, tenant: TenantId, id: i64) -> Result<()>;

    /// Enabled jobs whose next run is unset or at or before `now`, oldest first.
    async fn list_due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>>;

    async fn set_next_run(&self, tenant: TenantId, id: i64, at: DateTime<Utc>) -> Result<()>;

    async fn set_last_run(&self, tenant: TenantId, id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Insert a `running` record and return it with its id.
    async fn create_run(&self, run: Run) -> Result<Run>;

    /// Persist a finished run. Fails with `RunFinalised` if the stored row
    /// has already left `running`.
    async fn finish_run(&self, run: &Run) -> Result<()>;

    async fn get_run(&self, tenant: TenantId, id: i64) -> Result<Run>;

    /// Runs of one job, newest first.
    async fn list_runs(&self, tenant: TenantId, job_id: i64) -> Result<Vec<Run>>;

    async fn get_settings(&self, tenant: TenantId) -> Result<Option<TenantSettings>>;

    async fn upsert_settings(&self, settings: &TenantSettings) -> Result<()>;
}
