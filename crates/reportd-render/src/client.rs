//! Dashboard platform HTTP client.
//!
//! Three calls: dashboard definition (`/api/dashboards/uid/{uid}`), per-panel
//! data query (`/api/ds/query`) and the legacy image renderer
//! (`/render/d/{uid}`). Every request carries `Authorization: Bearer` and
//! `X-Grafana-Org-Id`.

use std::collections::BTreeMap;

use reportd_core::error::{ReportError, Result};
use reportd_core::{Job, RendererSettings, TenantId};
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Clone, Deserialize)]
pub struct Dashboard {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub panels: Vec<Panel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Panel {
    #[serde(default)]
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub datasource: Option<Value>,
    #[serde(default)]
    pub targets: Vec<Value>,
    /// Children of a collapsed row.
    #[serde(default)]
    pub panels: Vec<Panel>,
}

impl Panel {
    pub fn is_row(&self) -> bool {
        self.kind == "row"
    }

    pub fn is_table(&self) -> bool {
        self.kind == "table"
    }
}

impl Dashboard {
    /// Panels worth querying: rows flattened away, target-less panels
    /// skipped, restricted to `only` when it is non-empty.
    pub fn report_panels(&self, only: &[i64]) -> Vec<Panel> {
        let mut out = Vec::new();
        collect_panels(&self.panels, only, &mut out);
        out
    }
}

fn collect_panels(panels: &[Panel], only: &[i64], out: &mut Vec<Panel>) {
    for panel in panels {
        if panel.is_row() {
            collect_panels(&panel.panels, only, out);
            continue;
        }
        if panel.targets.is_empty() {
            continue;
        }
        if !only.is_empty() && !only.contains(&panel.id) {
            continue;
        }
        out.push(panel.clone());
    }
}

/// One column of a data frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Field {
    pub name: String,
    pub kind: String,
    pub values: Vec<Value>,
    pub labels: BTreeMap<String, String>,
}

/// A named set of equally long columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub name: String,
    pub fields: Vec<Field>,
}

impl Frame {
    /// Accepts both the wire layout (`schema` + `data.values`) and the flat
    /// layout with values inlined in each field.
    pub fn from_value(v: &Value) -> Self {
        let name = v["schema"]["name"]
            .as_str()
            .or_else(|| v["name"].as_str())
            .unwrap_or("")
            .to_string();

        let schema_fields = v["schema"]["fields"].as_array();
        let fields = match schema_fields {
            Some(defs) => {
                let columns = v["data"]["values"].as_array();
                defs.iter()
                    .enumerate()
                    .map(|(i, def)| Field {
                        name: def["name"].as_str().unwrap_or("").to_string(),
                        kind: def["type"].as_str().unwrap_or("").to_string(),
                        values: columns
                            .and_then(|c| c.get(i))
                            .and_then(|c| c.as_array())
                            .cloned()
                            .unwrap_or_default(),
                        labels: labels_of(&def["labels"]),
                    })
                    .collect()
            }
            None => v["fields"]
                .as_array()
                .map(|fs| {
                    fs.iter()
                        .map(|f| Field {
                            name: f["name"].as_str().unwrap_or("").to_string(),
                            kind: f["type"].as_str().unwrap_or("").to_string(),
                            values: f["values"].as_array().cloned().unwrap_or_default(),
                            labels: labels_of(&f["labels"]),
                        })
                        .collect()
                })
                .unwrap_or_default(),
        };
        Frame { name, fields }
    }

    pub fn row_count(&self) -> usize {
        self.fields.first().map(|f| f.values.len()).unwrap_or(0)
    }
}

fn labels_of(v: &Value) -> BTreeMap<String, String> {
    v.as_object()
        .map(|m| {
            m.iter()
                .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
                .collect()
        })
        .unwrap_or_default()
}

pub struct DashboardClient {
    http: reqwest::Client,
    base_url: Url,
}

impl DashboardClient {
    pub fn new(base_url: &str, settings: &RendererSettings) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ReportError::Config(format!("invalid platform URL '{base_url}': {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .danger_accept_invalid_certs(settings.skip_tls_verify)
            .build()
            .map_err(|e| ReportError::Http(format!("client build: {e}")))?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let prefix = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{prefix}{path}"));
        url.set_query(None);
        url
    }

    /// Fetch a dashboard definition.
    pub async fn dashboard(&self, uid: &str, tenant: TenantId, token: &str) -> Result<Dashboard> {
        let url = self.endpoint(&format!("/api/dashboards/uid/{uid}"));
        tracing::debug!("GET {url}");
        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .header("X-Grafana-Org-Id", tenant.to_string())
            .send()
            .await
            .map_err(|e| ReportError::Http(format!("dashboard fetch: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ReportError::Http(format!(
                "dashboard fetch failed with status {}: {}",
                status.as_u16(),
                truncate(&body, 200)
            )));
        }

        let envelope: Value = resp
            .json()
            .await
            .map_err(|e| ReportError::Http(format!("dashboard decode: {e}")))?;
        let dashboard: Dashboard = serde_json::from_value(envelope["dashboard"].clone())?;
        Ok(dashboard)
    }

    /// Run every visible target of `panel` over the job's time range.
    pub async fn query_panel(&self, job: &Job, panel: &Panel, token: &str) -> Result<Vec<Frame>> {
        let url = self.endpoint("/api/ds/query");
        let mut frames = Vec::new();

        for (i, target) in panel.targets.iter().enumerate() {
            if target["hide"].as_bool().unwrap_or(false) {
                continue;
            }
            let mut query = target.clone();
            let ref_id = target["refId"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| ((b'A' + (i % 26) as u8) as char).to_string());
            if let Some(obj) = query.as_object_mut() {
                obj.insert("refId".into(), json!(ref_id));
                if obj.get("datasource").map(Value::is_null).unwrap_or(true) {
                    if let Some(ds) = &panel.datasource {
                        obj.insert("datasource".into(), ds.clone());
                    }
                }
            }

            let mut body = json!({
                "from": job.range_from,
                "to": job.range_to,
                "queries": [query],
            });
            if !job.variables.is_empty() {
                let scoped: serde_json::Map<String, Value> = job
                    .variables
                    .iter()
                    .map(|(k, v)| (k.clone(), json!({ "text": v, "value": v })))
                    .collect();
                body["scopedVars"] = Value::Object(scoped);
            }

            let resp = self
                .http
                .post(url.clone())
                .bearer_auth(token)
                .header("X-Grafana-Org-Id", job.tenant_id.to_string())
                .json(&body)
                .send()
                .await
                .map_err(|e| ReportError::Http(format!("panel query: {e}")))?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(ReportError::Http(format!(
                    "panel query failed with status {}: {}",
                    status.as_u16(),
                    truncate(&text, 200)
                )));
            }

            let result: Value = resp
                .json()
                .await
                .map_err(|e| ReportError::Http(format!("panel query decode: {e}")))?;
            if let Some(found) = result["results"][ref_id.as_str()]["frames"].as_array() {
                frames.extend(found.iter().map(Frame::from_value));
            }
        }
        Ok(frames)
    }

    /// Fetch a PNG from the platform's image renderer.
    pub async fn render_image(
        &self,
        job: &Job,
        settings: &RendererSettings,
        token: &str,
    ) -> Result<Vec<u8>> {
        let url = dashboard_url(&self.base_url, "/render/d", job, settings)?;
        tracing::debug!("GET {url}");
        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .header("X-Grafana-Org-Id", job.tenant_id.to_string())
            .send()
            .await
            .map_err(|e| ReportError::Http(format!("render request: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ReportError::Http(format!(
                "render failed with status {}: {}",
                status.as_u16(),
                truncate(&body, 200)
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ReportError::Http(format!("render body: {e}")))?;
        Ok(bytes.to_vec())
    }
}

/// Kiosk-mode dashboard URL: `{base}{prefix}/{uid}?from&to&orgId&tz&width&height&theme&kiosk&var-*`.
pub fn dashboard_url(
    base: &Url,
    prefix: &str,
    job: &Job,
    settings: &RendererSettings,
) -> Result<Url> {
    let mut url = base.clone();
    let root = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{root}{prefix}/{}", job.dashboard_uid));
    url.set_query(None);
    {
        let mut q = url.query_pairs_mut();
        q.append_pair("from", &job.range_from)
            .append_pair("to", &job.range_to)
            .append_pair("orgId", &job.tenant_id.to_string())
            .append_pair("width", &settings.viewport_width.to_string())
            .append_pair("height", &settings.viewport_height.to_string())
            .append_pair("theme", "light")
            .append_pair("kiosk", "true");
        if !job.timezone.is_empty() {
            q.append_pair("tz", &job.timezone);
        }
        for (name, value) in &job.variables {
            q.append_pair(&format!("var-{name}"), value);
        }
    }
    if url.cannot_be_a_base() {
        return Err(ReportError::Config(format!("invalid dashboard URL: {url}")));
    }
    Ok(url)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
