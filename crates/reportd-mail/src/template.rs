//! `{{placeholder}}` substitution for report subjects and bodies.

use chrono::{DateTime, Utc};
use reportd_core::Job;

/// Placeholder values available to a report email.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    vars: Vec<(&'static str, String)>,
}

impl TemplateVars {
    /// The standard set for one execution of `job`.
    pub fn for_run(job: &Job, dashboard_title: &str, started_at: DateTime<Utc>) -> Self {
        Self::default()
            .with("schedule.name", job.name.clone())
            .with("dashboard.title", dashboard_title.to_string())
            .with("timerange", job.time_range())
            .with(
                "run.started_at",
                started_at.format("%a, %d %b %Y %H:%M:%S UTC").to_string(),
            )
    }

    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.vars.push((key, value.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Replace every `{{key}}` with its value. Unknown placeholders stay as they are.
pub fn interpolate(template: &str, vars: &TemplateVars) -> String {
    let mut out = template.to_string();
    for (key, value) in &vars.vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}
