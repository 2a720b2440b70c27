//! Deterministic PDF writer for image reports.
//!
//! One page per image, fitted inside a 10 mm margin under a header with the
//! report name and above a `Generated at <time> - Page N` footer. No random
//! document IDs: identical input gives identical bytes.

use chrono::{DateTime, Utc};
use reportd_core::{Orientation, PaperSize};
use std::fmt::Write;

use crate::png::{ImagePlanes, PngImage};

const MM: f64 = 72.0 / 25.4;
const MARGIN_MM: f64 = 10.0;
const HEADER_SIZE: f64 = 12.0;
const FOOTER_SIZE: f64 = 8.0;
const HEADER_GAP: f64 = 8.0;
const FOOTER_GAP: f64 = 6.0;

#[derive(Debug, Clone)]
pub struct PdfOptions {
    pub page_size: PaperSize,
    pub orientation: Orientation,
    pub title: String,
    pub generated_at: DateTime<Utc>,
}

/// Object table; ids are 1-based indexes.
struct PdfWriter {
    objects: Vec<Vec<u8>>,
}

impl PdfWriter {
    fn new() -> Self {
        Self {
            objects: Vec::new(),
        }
    }

    fn reserve(&mut self) -> usize {
        self.objects.push(Vec::new());
        self.objects.len()
    }

    fn set(&mut self, id: usize, body: Vec<u8>) {
        self.objects[id - 1] = body;
    }

    fn add(&mut self, body: Vec<u8>) -> usize {
        self.objects.push(body);
        self.objects.len()
    }

    fn add_stream(&mut self, dict: &str, data: &[u8]) -> usize {
        let mut body = format!("<< {dict} /Length {} >>\nstream\n", data.len()).into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(b"\nendstream");
        self.add(body)
    }

    fn finish(self, root: usize, info: usize) -> Vec<u8> {
        let mut out: Vec<u8> = b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n".to_vec();
        let mut offsets = Vec::with_capacity(self.objects.len());
        for (i, body) in self.objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n", i + 1).as_bytes());
            out.extend_from_slice(body);
            out.extend_from_slice(b"\nendobj\n");
        }
        let xref = out.len();
        let mut table = format!("xref\n0 {}\n0000000000 65535 f \n", self.objects.len() + 1);
        for offset in offsets {
            let _ = write!(table, "{offset:010} 00000 n \n");
        }
        let _ = write!(
            table,
            "trailer\n<< /Size {} /Root {root} 0 R /Info {info} 0 R >>\nstartxref\n{xref}\n%%EOF\n",
            self.objects.len() + 1
        );
        out.extend_from_slice(table.as_bytes());
        out
    }
}

/// Escape a PDF literal string; characters outside Latin-1 become `?`.
fn pdf_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('(');
    for c in s.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 => out.push(' '),
            c if (c as u32) < 0x7f => out.push(c),
            c if (c as u32) <= 0xff => {
                let _ = write!(out, "\\{:03o}", c as u32);
            }
            _ => out.push('?'),
        }
    }
    out.push(')');
    out
}

fn pdf_date(at: &DateTime<Utc>) -> String {
    at.format("D:%Y%m%d%H%M%SZ").to_string()
}

/// Footer timestamp, RFC 1123 style.
pub fn footer_time(at: &DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S UTC").to_string()
}

fn text_op(out: &mut String, font: &str, size: f64, x: f64, y: f64, text: &str) {
    let _ = writeln!(out, "BT /{font} {size:.1} Tf {x:.2} {y:.2} Td {} Tj ET", pdf_text(text));
}

/// Lay out `images` one per page. Images that cannot be decoded become a
/// placeholder page explaining so.
pub fn compose(images: &[&[u8]], opts: &PdfOptions) -> Vec<u8> {
    let (w_mm, h_mm) = opts.orientation.apply(opts.page_size.dimensions_mm());
    let (page_w, page_h) = (w_mm * MM, h_mm * MM);
    let margin = MARGIN_MM * MM;

    let mut pdf = PdfWriter::new();
    let catalog = pdf.reserve();
    let pages = pdf.reserve();
    let font = pdf.add(b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_vec());
    let font_italic =
        pdf.add(b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Oblique >>".to_vec());
    let info = pdf.add(
        format!(
            "<< /Title {} /Creator (reportd) /Producer (reportd) /CreationDate ({}) >>",
            pdf_text(&opts.title),
            pdf_date(&opts.generated_at)
        )
        .into_bytes(),
    );

    let generated = footer_time(&opts.generated_at);
    let mut kids = Vec::with_capacity(images.len());

    for (index, data) in images.iter().enumerate() {
        let number = index + 1;
        let mut content = String::new();
        text_op(&mut content, "F1", HEADER_SIZE, margin, page_h - margin - HEADER_SIZE, &opts.title);
        text_op(
            &mut content,
            "F2",
            FOOTER_SIZE,
            margin,
            margin,
            &format!("Generated at {generated} - Page {number}"),
        );

        let box_x = margin;
        let box_y = margin + FOOTER_SIZE + FOOTER_GAP;
        let box_w = page_w - 2.0 * margin;
        let box_h = page_h - 2.0 * margin - HEADER_SIZE - HEADER_GAP - FOOTER_SIZE - FOOTER_GAP;

        let image = PngImage::parse(data).and_then(|img| img.planes().map(|p| (img, p)));
        let xobject = match image {
            Some((img, planes)) => {
                let id = add_image(&mut pdf, &img, planes);
                let scale = (box_w / img.width as f64).min(box_h / img.height as f64);
                let (w, h) = (img.width as f64 * scale, img.height as f64 * scale);
                let x = box_x + (box_w - w) / 2.0;
                let y = box_y + box_h - h;
                let _ = writeln!(content, "q {w:.2} 0 0 {h:.2} {x:.2} {y:.2} cm /Im{number} Do Q");
                Some(id)
            }
            None => {
                tracing::warn!("⚠️ Page {number} is not an embeddable PNG, using placeholder");
                text_op(
                    &mut content,
                    "F2",
                    HEADER_SIZE,
                    box_x,
                    box_y + box_h / 2.0,
                    &format!("Page {number} could not be embedded ({} bytes of unreadable image data)", data.len()),
                );
                None
            }
        };

        let stream = pdf.add_stream("", content.as_bytes());
        let xobjects = xobject
            .map(|id| format!("/XObject << /Im{number} {id} 0 R >> "))
            .unwrap_or_default();
        let page = pdf.add(
            format!(
                "<< /Type /Page /Parent {pages} 0 R /MediaBox [0 0 {page_w:.2} {page_h:.2}] \
                 /Resources << /Font << /F1 {font} 0 R /F2 {font_italic} 0 R >> {xobjects}>> \
                 /Contents {stream} 0 R >>"
            )
            .into_bytes(),
        );
        kids.push(page);
    }

    let kid_refs: Vec<String> = kids.iter().map(|k| format!("{k} 0 R")).collect();
    pdf.set(
        pages,
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kid_refs.join(" "),
            kids.len()
        )
        .into_bytes(),
    );
    pdf.set(catalog, format!("<< /Type /Catalog /Pages {pages} 0 R >>").into_bytes());
    pdf.finish(catalog, info)
}

fn add_image(pdf: &mut PdfWriter, img: &PngImage, planes: ImagePlanes) -> usize {
    let (w, h) = (img.width, img.height);
    match planes {
        ImagePlanes::Predicted { colors, data } => {
            let color_space = if img.color_type == 3 {
                format!("[/Indexed /DeviceRGB {} <{}>]", (img.palette.len() / 3).saturating_sub(1), hex(&img.palette))
            } else if colors == 1 {
                "/DeviceGray".to_string()
            } else {
                "/DeviceRGB".to_string()
            };
            let dict = format!(
                "/Type /XObject /Subtype /Image /Width {w} /Height {h} /ColorSpace {color_space} \
                 /BitsPerComponent {bpc} /Filter /FlateDecode \
                 /DecodeParms << /Predictor 15 /Colors {colors} /BitsPerComponent {bpc} /Columns {w} >>",
                bpc = img.bit_depth
            );
            pdf.add_stream(&dict, &data)
        }
        ImagePlanes::Split {
            colors,
            color,
            alpha,
        } => {
            let mask = pdf.add_stream(
                &format!(
                    "/Type /XObject /Subtype /Image /Width {w} /Height {h} /ColorSpace /DeviceGray \
                     /BitsPerComponent 8 /Filter /FlateDecode"
                ),
                &alpha,
            );
            let color_space = if colors == 1 { "/DeviceGray" } else { "/DeviceRGB" };
            pdf.add_stream(
                &format!(
                    "/Type /XObject /Subtype /Image /Width {w} /Height {h} /ColorSpace {color_space} \
                     /BitsPerComponent 8 /Filter /FlateDecode /SMask {mask} 0 R"
                ),
                &color,
            )
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02X}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::png::encode_test_png;
    use chrono::TimeZone;

    fn opts() -> PdfOptions {
        PdfOptions {
            page_size: PaperSize::A4,
            orientation: Orientation::Landscape,
            title: "Weekly (ops) report".into(),
            generated_at: Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap(),
        }
    }

    fn text(pdf: &[u8]) -> String {
        String::from_utf8_lossy(pdf).into_owned()
    }

    #[test]
    fn test_structure_and_footer() {
        let png = encode_test_png(8, 4, 2, 1);
        let pdf = compose(&[&png, &png], &opts());
        let s = text(&pdf);
        assert!(s.starts_with("%PDF-1.4"));
        assert!(s.trim_end().ends_with("%%EOF"));
        assert!(s.contains("/Count 2"));
        assert!(s.contains("(Weekly \\(ops\\) report)"));
        assert!(s.contains("Generated at Mon, 02 Mar 2026 08:00:00 UTC - Page 2"));
        assert!(s.contains("/Predictor 15 /Colors 3"));
        // A4 landscape in points.
        assert!(s.contains("/MediaBox [0 0 841.89 595.28]"));
    }

    #[test]
    fn test_xref_offsets_point_at_objects() {
        let png = encode_test_png(3, 3, 0, 0);
        let pdf = compose(&[&png], &opts());
        let s = text(&pdf);
        let xref_at: usize = s
            .rsplit("startxref\n")
            .next()
            .and_then(|tail| tail.lines().next())
            .and_then(|n| n.parse().ok())
            .unwrap();
        assert!(s[xref_at..].starts_with("xref\n"));
        let first_entry = s[xref_at..].lines().nth(3).unwrap();
        let offset: usize = first_entry[..10].parse().unwrap();
        assert!(s[offset..].starts_with("1 0 obj"));
    }

    #[test]
    fn test_deterministic() {
        let png = encode_test_png(6, 6, 6, 4);
        let a = compose(&[&png], &opts());
        let b = compose(&[&png], &opts());
        assert_eq!(a, b);
        assert!(text(&a).contains("/SMask"));
    }

    #[test]
    fn test_placeholder_for_undecodable_page() {
        let fake = b"\x89PNG\r\n\x1a\n\0\0";
        let pdf = compose(&[fake], &opts());
        let s = text(&pdf);
        assert!(s.contains("/Count 1"));
        assert!(s.contains("could not be embedded"));
        assert!(!s.contains("/XObject"));
    }

    #[test]
    fn test_pdf_text_escaping() {
        assert_eq!(pdf_text("a(b)c\\"), "(a\\(b\\)c\\\\)");
        assert_eq!(pdf_text("café"), "(caf\\351)");
        assert_eq!(pdf_text("日本"), "(??)");
    }
}
