//! HTML to PDF converters for the document backend.

use std::path::Path;
use std::time::Duration;

use reportd_core::RendererSettings;
use reportd_core::error::{ReportError, Result};

/// Time given to Chart.js before the page is printed.
pub const CHART_SETTLE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConverterKind {
    /// Print-to-PDF through the headless browser.
    Chromium,
    /// Standalone `wkhtmltopdf` process.
    Wkhtmltopdf,
}

impl std::str::FromStr for ConverterKind {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "chromium" | "chrome" => Ok(ConverterKind::Chromium),
            "wkhtmltopdf" => Ok(ConverterKind::Wkhtmltopdf),
            other => Err(ReportError::Config(format!("unknown HTML converter: {other}"))),
        }
    }
}

impl std::fmt::Display for ConverterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConverterKind::Chromium => write!(f, "chromium"),
            ConverterKind::Wkhtmltopdf => write!(f, "wkhtmltopdf"),
        }
    }
}

fn wkhtmltopdf_args(settings: &RendererSettings, input: &Path, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--quiet".into(),
        "--dpi".into(),
        "300".into(),
        "--page-size".into(),
        settings.page_size.as_str().into(),
        "--orientation".into(),
        settings.orientation.as_str().into(),
    ];
    for side in ["--margin-top", "--margin-bottom", "--margin-left", "--margin-right"] {
        args.push(side.into());
        args.push("10mm".into());
    }
    args.extend(
        [
            "--enable-local-file-access",
            "--print-media-type",
            "--background",
            "--load-error-handling",
            "ignore",
            "--load-media-error-handling",
            "ignore",
            "--javascript-delay",
        ]
        .map(String::from),
    );
    let delay = CHART_SETTLE + settings.delay();
    args.push(delay.as_millis().to_string());
    args.push(input.display().to_string());
    args.push(output.display().to_string());
    args
}

/// Convert `html` with the `wkhtmltopdf` binary (`WKHTMLTOPDF_BIN` overrides the path).
pub async fn wkhtmltopdf(html: &str, settings: &RendererSettings) -> Result<Vec<u8>> {
    let bin = std::env::var("WKHTMLTOPDF_BIN").unwrap_or_else(|_| "wkhtmltopdf".into());
    let stem = format!("reportd-{}", &uuid::Uuid::new_v4().to_string()[..8]);
    let dir = std::env::temp_dir();
    let input = dir.join(format!("{stem}.html"));
    let output = dir.join(format!("{stem}.pdf"));

    tokio::fs::write(&input, html).await?;
    let result = run_wkhtmltopdf(&bin, settings, &input, &output).await;
    let _ = tokio::fs::remove_file(&input).await;
    let _ = tokio::fs::remove_file(&output).await;
    result
}

async fn run_wkhtmltopdf(
    bin: &str,
    settings: &RendererSettings,
    input: &Path,
    output: &Path,
) -> Result<Vec<u8>> {
    let args = wkhtmltopdf_args(settings, input, output);
    let limit = settings.timeout() + CHART_SETTLE + settings.delay();
    let run = tokio::process::Command::new(bin)
        .args(&args)
        .kill_on_drop(true)
        .output();

    let out = match tokio::time::timeout(limit, run).await {
        Ok(Ok(out)) => out,
        Ok(Err(e)) => return Err(ReportError::Convert(format!("{bin} not runnable: {e}"))),
        Err(_) => {
            return Err(ReportError::Convert(format!(
                "{bin} timed out after {}s",
                limit.as_secs()
            )));
        }
    };

    // wkhtmltopdf exits 1 on ignored load errors but still writes the file.
    let pdf = tokio::fs::read(output).await.unwrap_or_default();
    if pdf.is_empty() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(ReportError::Convert(format!(
            "{bin} failed ({}): {}",
            out.status,
            stderr.trim()
        )));
    }
    tracing::debug!("📄 Converted HTML to PDF: {} bytes", pdf.len());
    Ok(pdf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reportd_core::{Orientation, PaperSize};

    #[test]
    fn test_converter_names() {
        assert_eq!("".parse::<ConverterKind>().unwrap(), ConverterKind::Chromium);
        assert_eq!("WKHTMLTOPDF".parse::<ConverterKind>().unwrap(), ConverterKind::Wkhtmltopdf);
        assert!("prince".parse::<ConverterKind>().is_err());
    }

    #[test]
    fn test_wkhtmltopdf_args() {
        let settings = RendererSettings {
            page_size: PaperSize::Letter,
            orientation: Orientation::Portrait,
            delay_ms: 500,
            ..Default::default()
        };
        let args = wkhtmltopdf_args(&settings, Path::new("/tmp/in.html"), Path::new("/tmp/out.pdf"));
        let joined = args.join(" ");
        assert!(joined.contains("--page-size Letter"));
        assert!(joined.contains("--orientation Portrait"));
        assert!(joined.contains("--margin-left 10mm"));
        assert!(joined.contains("--javascript-delay 3500"));
        assert_eq!(args[args.len() - 2], "/tmp/in.html");
        assert_eq!(args[args.len() - 1], "/tmp/out.pdf");
    }

    #[tokio::test]
    async fn test_missing_binary_is_convert_error() {
        let dir = std::env::temp_dir();
        let err = run_wkhtmltopdf(
            "/nonexistent/wkhtmltopdf",
            &RendererSettings::default(),
            &dir.join("none.html"),
            &dir.join("none.pdf"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ReportError::Convert(_)));
    }
}
