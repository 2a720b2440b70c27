//! Self-contained HTML report: one section per panel, Chart.js charts for
//! series, plain tables for table panels.

use chrono::{DateTime, TimeZone, Utc};
use reportd_core::Job;
use serde_json::{Value, json};
use std::fmt::Write;

use crate::client::{Frame, Panel};

const CHART_JS: &str = "https://cdn.jsdelivr.net/npm/chart.js@4.4.0/dist/chart.umd.min.js";

const COLORS: [(u8, u8, u8); 6] = [
    (54, 162, 235),
    (255, 99, 132),
    (75, 192, 192),
    (255, 205, 86),
    (153, 102, 255),
    (255, 159, 64),
];

/// A panel together with the frames its queries returned.
#[derive(Debug, Clone)]
pub struct PanelData {
    pub panel: Panel,
    pub frames: Vec<Frame>,
}

/// Chart.js chart type for a dashboard panel type.
pub fn chart_type(panel_type: &str) -> &'static str {
    match panel_type {
        "graph" | "timeseries" => "line",
        "bargauge" | "barchart" => "bar",
        "piechart" => "pie",
        "stat" | "gauge" => "doughnut",
        _ => "line",
    }
}

fn color(index: usize, alpha: Option<f32>) -> String {
    let (r, g, b) = COLORS[index % COLORS.len()];
    match alpha {
        Some(a) => format!("rgba({r}, {g}, {b}, {a})"),
        None => format!("rgb({r}, {g}, {b})"),
    }
}

/// Chart.js `data` object: labels from the first time column, one dataset
/// per frame with a time and a number column.
pub fn chart_data(frames: &[Frame]) -> Value {
    let mut labels: Vec<Value> = Vec::new();
    let mut datasets: Vec<Value> = Vec::new();

    for frame in frames {
        let time = frame.fields.iter().find(|f| f.kind == "time");
        let value = frame.fields.iter().find(|f| f.kind == "number");
        let (Some(time), Some(value)) = (time, value) else {
            continue;
        };

        if labels.is_empty() {
            labels = time.values.iter().filter_map(time_label).collect();
        }

        let label = if !frame.name.is_empty() {
            frame.name.clone()
        } else if !value.labels.is_empty() {
            value
                .labels
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ")
        } else {
            value.name.clone()
        };

        datasets.push(json!({
            "label": label,
            "data": value.values,
            "borderColor": color(datasets.len(), None),
            "backgroundColor": color(datasets.len(), Some(0.2)),
            "borderWidth": 2,
            "fill": false,
        }));
    }

    json!({ "labels": labels, "datasets": datasets })
}

fn time_label(v: &Value) -> Option<Value> {
    if let Some(ms) = v.as_f64() {
        let at = Utc.timestamp_millis_opt(ms as i64).single()?;
        return Some(json!(at.format("%H:%M:%S").to_string()));
    }
    v.as_str().map(|s| json!(s))
}

/// Render the report page.
pub fn generate(
    title: &str,
    dashboard_uid: &str,
    job: &Job,
    panels: &[PanelData],
    generated_at: DateTime<Utc>,
) -> String {
    let mut body = String::new();
    for (index, data) in panels.iter().enumerate() {
        let _ = write!(
            body,
            "<div class=\"panel\">\n<div class=\"panel-header\">{}</div>\n",
            escape(&data.panel.title)
        );
        if data.frames.iter().all(|f| f.fields.is_empty()) {
            body.push_str("<div class=\"no-data\">No data available</div>\n");
        } else if data.panel.is_table() {
            write_table(&mut body, &data.frames);
        } else {
            write_chart(&mut body, index, &data.panel.kind, &data.frames);
        }
        body.push_str("</div>\n");
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<meta name="generator" content="reportd">
<meta name="dashboard" content="{uid}">
<title>{title} - Report</title>
<script src="{chart_js}"></script>
<style>{style}</style>
</head>
<body>
<div class="container">
<div class="header">
<h1>{title}</h1>
<div class="meta">
<span class="meta-item"><strong>Generated:</strong> {generated}</span>
<span class="meta-item"><strong>Time Range:</strong> {range}</span>
</div>
</div>
{body}</div>
</body>
</html>
"#,
        uid = escape(dashboard_uid),
        title = escape(title),
        chart_js = CHART_JS,
        style = STYLE,
        generated = generated_at.to_rfc2822(),
        range = escape(&job.time_range()),
        body = body,
    )
}

fn write_table(out: &mut String, frames: &[Frame]) {
    out.push_str("<div class=\"table-container\">\n<table>\n<thead><tr>");
    for field in frames.iter().flat_map(|f| f.fields.iter()) {
        let _ = write!(out, "<th>{}</th>", escape(&field.name));
    }
    out.push_str("</tr></thead>\n<tbody>\n");
    for frame in frames {
        for row in 0..frame.row_count() {
            out.push_str("<tr>");
            for field in &frame.fields {
                let cell = field.values.get(row).map(cell_text).unwrap_or_default();
                let _ = write!(out, "<td>{}</td>", escape(&cell));
            }
            out.push_str("</tr>\n");
        }
    }
    out.push_str("</tbody>\n</table>\n</div>\n");
}

fn write_chart(out: &mut String, index: usize, panel_type: &str, frames: &[Frame]) {
    let data = script_safe(&chart_data(frames).to_string());
    let kind = chart_type(panel_type);
    let _ = write!(
        out,
        r#"<div class="chart-container"><canvas id="chart-{index}"></canvas></div>
<script>
(function() {{
  const type = '{kind}';
  new Chart(document.getElementById('chart-{index}'), {{
    type: type,
    data: {data},
    options: {{
      responsive: true,
      maintainAspectRatio: false,
      animation: false,
      plugins: {{ legend: {{ display: true, position: 'top' }}, title: {{ display: false }} }},
      scales: (type === 'line' || type === 'bar') ? {{ y: {{ beginAtZero: true }} }} : {{}}
    }}
  }});
}})();
</script>
"#
    );
}

fn cell_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Escape text for element content and attribute values.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// JSON may hold `</script>` inside strings.
fn script_safe(json: &str) -> String {
    json.replace("</", "<\\/")
}

const STYLE: &str = "
* { margin: 0; padding: 0; box-sizing: border-box; }
body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif; background: white; color: #333; padding: 40px 20px; }
.container { max-width: 1200px; margin: 0 auto; }
.header { border-bottom: 2px solid #f0f0f0; padding-bottom: 20px; margin-bottom: 40px; }
h1 { font-size: 32px; margin-bottom: 10px; color: #000; }
.meta { color: #666; font-size: 14px; }
.meta-item { display: inline-block; margin-right: 20px; }
.panel { margin-bottom: 40px; page-break-inside: avoid; }
.panel-header { font-size: 20px; font-weight: 600; margin-bottom: 15px; color: #000; }
.chart-container { position: relative; height: 400px; margin-bottom: 20px; border: 1px solid #e0e0e0; border-radius: 4px; padding: 20px; background: #fafafa; }
.table-container { overflow-x: auto; border: 1px solid #e0e0e0; border-radius: 4px; }
table { width: 100%; border-collapse: collapse; background: white; }
th, td { padding: 12px; text-align: left; border-bottom: 1px solid #e0e0e0; }
th { background: #f5f5f5; font-weight: 600; }
tr:last-child td { border-bottom: none; }
.no-data { padding: 40px; text-align: center; color: #999; font-style: italic; }
@media print { body { padding: 0; } .panel { page-break-inside: avoid; } }
";
