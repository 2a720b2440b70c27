//! Raw pages in, final artifact out.

use std::path::{Path, PathBuf};

use base64::Engine;
use chrono::{DateTime, Utc};
use reportd_core::error::{ReportError, Result};
use reportd_core::{Job, Orientation, OutputFormat, PaperSize, RendererSettings, TenantId};
use reportd_render::htmlgen::escape;
use reportd_render::{PageKind, RenderedPage};
use sha2::{Digest, Sha256};

use crate::pdf::{self, PdfOptions};

/// Page geometry for PDF output.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssembleOptions {
    pub page_size: PaperSize,
    pub orientation: Orientation,
}

impl From<&RendererSettings> for AssembleOptions {
    fn from(settings: &RendererSettings) -> Self {
        Self {
            page_size: settings.page_size,
            orientation: settings.orientation,
        }
    }
}

/// Final bytes plus everything the run record needs about them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub format: OutputFormat,
    pub rendered_pages: u32,
    pub checksum: String,
}

impl Artifact {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Lowercase hex SHA-256.
pub fn checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Keep `[A-Za-z0-9._-]`, replace everything else with `_`.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "report".into()
    } else {
        cleaned.to_string()
    }
}

/// `{name}-{YYYYMMDD-HHMMSS}.{ext}`
pub fn artifact_filename(job_name: &str, format: OutputFormat, at: DateTime<Utc>) -> String {
    format!(
        "{}-{}.{}",
        sanitize_name(job_name),
        at.format("%Y%m%d-%H%M%S"),
        format.extension()
    )
}

/// Assemble `pages` into the job's output format.
pub fn assemble(
    job: &Job,
    pages: Vec<RenderedPage>,
    completed_at: DateTime<Utc>,
    options: AssembleOptions,
) -> Result<Artifact> {
    if pages.is_empty() {
        return Err(ReportError::Integrity("backend returned no pages".into()));
    }
    let page_count = pages.len();

    let (bytes, rendered_pages) = match job.format {
        OutputFormat::Pdf => {
            if page_count == 1 && pages[0].kind() == PageKind::Pdf {
                let mut pages = pages;
                (pages.remove(0).into_data(), 1)
            } else {
                if let Some(odd) = pages.iter().find(|p| p.kind() != PageKind::Png) {
                    return Err(ReportError::Integrity(format!(
                        "cannot embed a {} page into a pdf report",
                        odd.kind()
                    )));
                }
                let images: Vec<&[u8]> = pages.iter().map(|p| p.data()).collect();
                let opts = PdfOptions {
                    page_size: options.page_size,
                    orientation: options.orientation,
                    title: job.name.clone(),
                    generated_at: completed_at,
                };
                (pdf::compose(&images, &opts), page_count as u32)
            }
        }
        OutputFormat::Png => {
            let first = single(pages, job)?;
            if first.kind() != PageKind::Png {
                return Err(ReportError::Integrity(format!(
                    "png output needs a png page, got {}",
                    first.kind()
                )));
            }
            (first.into_data(), 1)
        }
        OutputFormat::Html => {
            let first = single(pages, job)?;
            match first.kind() {
                PageKind::Html => (first.into_data(), 1),
                PageKind::Png => (wrap_image(&job.name, first.data()).into_bytes(), 1),
                PageKind::Pdf => {
                    return Err(ReportError::Integrity(
                        "html output cannot be built from a pdf page".into(),
                    ));
                }
            }
        }
    };

    let artifact = Artifact {
        checksum: checksum(&bytes),
        filename: artifact_filename(&job.name, job.format, completed_at),
        format: job.format,
        rendered_pages,
        bytes,
    };
    tracing::debug!(
        "📦 Assembled {} ({} bytes, {} pages)",
        artifact.filename,
        artifact.size(),
        artifact.rendered_pages
    );
    Ok(artifact)
}

fn single(mut pages: Vec<RenderedPage>, job: &Job) -> Result<RenderedPage> {
    if pages.len() > 1 {
        tracing::warn!(
            "Job {} produced {} pages, {} output keeps the first",
            job.id,
            pages.len(),
            job.format
        );
    }
    if pages.is_empty() {
        return Err(ReportError::Integrity("backend returned no pages".into()));
    }
    Ok(pages.swap_remove(0))
}

/// A standalone HTML page showing a PNG screenshot.
fn wrap_image(title: &str, png: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(png);
    let title = escape(title);
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n<title>{title}</title>\n</head>\n\
         <body style=\"margin:0\">\n<img alt=\"{title}\" style=\"max-width:100%\" src=\"data:image/png;base64,{encoded}\">\n</body>\n</html>\n"
    )
}

/// `<root>/tenant_<id>`
pub fn tenant_dir(root: &Path, tenant: TenantId) -> PathBuf {
    root.join(format!("tenant_{tenant}"))
}

/// Write the artifact under the tenant's directory and return its path.
pub async fn persist(root: &Path, tenant: TenantId, artifact: &Artifact) -> Result<PathBuf> {
    let dir = tenant_dir(root, tenant);
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join(&artifact.filename);
    tokio::fs::write(&path, &artifact.bytes).await?;
    tracing::info!("💾 Artifact saved: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::png::encode_test_png;
    use chrono::TimeZone;

    const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0";

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 9, 5, 7).unwrap()
    }

    fn job(format: OutputFormat) -> Job {
        let mut job = Job::new(3, "Sales / EMEA weekly", "uid");
        job.format = format;
        job
    }

    fn png_page(data: &[u8]) -> RenderedPage {
        RenderedPage::new(PageKind::Png, data.to_vec()).unwrap()
    }

    #[test]
    fn test_filename() {
        assert_eq!(
            artifact_filename("Sales / EMEA weekly", OutputFormat::Pdf, at()),
            "Sales___EMEA_weekly-20261016-090507.pdf"
        );
        assert_eq!(artifact_filename("../..", OutputFormat::Png, at()), "_-20261016-090507.png");
        assert_eq!(sanitize_name("   "), "report");
    }

    #[test]
    fn test_checksum_known_value() {
        assert_eq!(
            checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_pdf_from_fake_raster() {
        let artifact = assemble(
            &job(OutputFormat::Pdf),
            vec![png_page(FAKE_PNG)],
            at(),
            AssembleOptions::default(),
        )
        .unwrap();
        assert_eq!(artifact.rendered_pages, 1);
        assert!(artifact.bytes.starts_with(b"%PDF"));
        assert_eq!(artifact.checksum.len(), 64);
        assert!(artifact.filename.ends_with(".pdf"));
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let png = encode_test_png(16, 9, 2, 2);
        let make = || {
            assemble(
                &job(OutputFormat::Pdf),
                vec![png_page(&png), png_page(&png)],
                at(),
                AssembleOptions::default(),
            )
            .unwrap()
        };
        let (a, b) = (make(), make());
        assert_eq!(a.bytes, b.bytes);
        assert_eq!(a.checksum, b.checksum);
        assert_eq!(a.rendered_pages, 2);
    }

    #[test]
    fn test_pdf_page_passthrough() {
        let doc = b"%PDF-1.7\n...".to_vec();
        let page = RenderedPage::new(PageKind::Pdf, doc.clone()).unwrap();
        let artifact =
            assemble(&job(OutputFormat::Pdf), vec![page], at(), AssembleOptions::default()).unwrap();
        assert_eq!(artifact.bytes, doc);
        assert_eq!(artifact.checksum, checksum(&doc));
    }

    #[test]
    fn test_png_returned_unmodified() {
        let png = encode_test_png(2, 2, 2, 0);
        let artifact = assemble(
            &job(OutputFormat::Png),
            vec![png_page(&png), png_page(FAKE_PNG)],
            at(),
            AssembleOptions::default(),
        )
        .unwrap();
        assert_eq!(artifact.bytes, png);
        assert_eq!(artifact.rendered_pages, 1);
        assert!(artifact.filename.ends_with(".png"));
    }

    #[test]
    fn test_html_wraps_screenshot() {
        let artifact = assemble(
            &job(OutputFormat::Html),
            vec![png_page(FAKE_PNG)],
            at(),
            AssembleOptions::default(),
        )
        .unwrap();
        let html = String::from_utf8(artifact.bytes).unwrap();
        assert!(html.contains("data:image/png;base64,iVBORw0KGgoAAA=="));
        assert!(artifact.filename.ends_with(".html"));
    }

    #[test]
    fn test_mismatched_pages_rejected() {
        let html = RenderedPage::new(PageKind::Html, b"<p>hi</p>".to_vec()).unwrap();
        let err = assemble(&job(OutputFormat::Pdf), vec![html], at(), AssembleOptions::default())
            .unwrap_err();
        assert!(matches!(err, ReportError::Integrity(_)));
        assert!(assemble(&job(OutputFormat::Png), Vec::new(), at(), AssembleOptions::default()).is_err());
    }

    #[tokio::test]
    async fn test_persist_creates_tenant_dir() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = assemble(
            &job(OutputFormat::Png),
            vec![png_page(FAKE_PNG)],
            at(),
            AssembleOptions::default(),
        )
        .unwrap();
        let path = persist(dir.path(), 3, &artifact).await.unwrap();
        assert_eq!(path.parent().unwrap(), dir.path().join("tenant_3"));
        assert_eq!(std::fs::read(&path).unwrap(), FAKE_PNG);
    }
}
