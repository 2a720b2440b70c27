//! Raw pages produced by a backend, before artifact assembly.

use reportd_core::error::{ReportError, Result};

const PNG_MAGIC: &[u8] = b"\x89PNG";
const PDF_MAGIC: &[u8] = b"%PDF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Png,
    Pdf,
    Html,
}

impl std::fmt::Display for PageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageKind::Png => write!(f, "png"),
            PageKind::Pdf => write!(f, "pdf"),
            PageKind::Html => write!(f, "html"),
        }
    }
}

/// One rendered page whose bytes passed the magic-bytes check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    kind: PageKind,
    data: Vec<u8>,
}

impl RenderedPage {
    /// Wrap `data` after checking it looks like `kind`.
    pub fn new(kind: PageKind, data: Vec<u8>) -> Result<Self> {
        let ok = match kind {
            PageKind::Png => data.starts_with(PNG_MAGIC),
            PageKind::Pdf => data.starts_with(PDF_MAGIC),
            PageKind::Html => !data.is_empty() && data.contains(&b'<'),
        };
        if !ok {
            let head: String = String::from_utf8_lossy(&data[..data.len().min(32)])
                .chars()
                .filter(|c| !c.is_control())
                .collect();
            return Err(ReportError::Integrity(format!(
                "expected {kind} content, got {} bytes starting with {head:?}",
                data.len()
            )));
        }
        Ok(Self { kind, data })
    }

    pub fn kind(&self) -> PageKind {
        self.kind
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// What a backend hands back for one job.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub pages: Vec<RenderedPage>,
    /// Dashboard title discovered while rendering, if the backend fetched it.
    pub dashboard_title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_magic() {
        let page = RenderedPage::new(PageKind::Png, b"\x89PNG\r\n\x1a\n\0\0".to_vec()).unwrap();
        assert_eq!(page.len(), 10);
        assert!(RenderedPage::new(PageKind::Png, b"<html>".to_vec()).is_err());
    }

    #[test]
    fn test_pdf_and_html_checks() {
        assert!(RenderedPage::new(PageKind::Pdf, b"%PDF-1.4\n".to_vec()).is_ok());
        assert!(RenderedPage::new(PageKind::Html, b"<!DOCTYPE html>".to_vec()).is_ok());
        let err = RenderedPage::new(PageKind::Pdf, b"{\"message\":\"denied\"}".to_vec()).unwrap_err();
        assert!(matches!(err, ReportError::Integrity(_)));
        assert!(RenderedPage::new(PageKind::Html, Vec::new()).is_err());
    }
}
