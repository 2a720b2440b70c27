//! Just enough PNG to place a screenshot into a PDF.
//!
//! Opaque images keep their zlib stream: PDF's Flate filter with PNG
//! predictors reads IDAT data as is. Images with an alpha channel are
//! unfiltered and split into a colour plane and a soft mask.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

const SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PngImage {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: u8,
    pub palette: Vec<u8>,
    pub idat: Vec<u8>,
}

/// PDF-ready planes for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePlanes {
    /// IDAT stream with PNG predictors; `colors` samples per pixel.
    Predicted { colors: u8, data: Vec<u8> },
    /// Zlib streams without predictors: colour (`colors` per pixel) and 8-bit alpha.
    Split { colors: u8, color: Vec<u8>, alpha: Vec<u8> },
}

impl PngImage {
    /// Parse the chunks; `None` for anything we cannot embed.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if !data.starts_with(SIGNATURE) {
            return None;
        }
        let mut pos = SIGNATURE.len();
        let mut header: Option<(u32, u32, u8, u8, u8)> = None;
        let mut palette = Vec::new();
        let mut idat = Vec::new();

        while pos + 8 <= data.len() {
            let len = u32::from_be_bytes(data[pos..pos + 4].try_into().ok()?) as usize;
            let kind = &data[pos + 4..pos + 8];
            let body_start = pos + 8;
            let body_end = body_start.checked_add(len)?;
            if body_end + 4 > data.len() {
                return None;
            }
            let body = &data[body_start..body_end];
            match kind {
                b"IHDR" if len >= 13 => {
                    let width = u32::from_be_bytes(body[0..4].try_into().ok()?);
                    let height = u32::from_be_bytes(body[4..8].try_into().ok()?);
                    header = Some((width, height, body[8], body[9], body[12]));
                }
                b"PLTE" => palette = body.to_vec(),
                b"IDAT" => idat.extend_from_slice(body),
                b"IEND" => break,
                _ => {}
            }
            pos = body_end + 4;
        }

        let (width, height, bit_depth, color_type, interlace) = header?;
        if width == 0 || height == 0 || idat.is_empty() || interlace != 0 {
            return None;
        }
        if color_type == 3 && palette.is_empty() {
            return None;
        }
        Some(Self {
            width,
            height,
            bit_depth,
            color_type,
            palette,
            idat,
        })
    }

    pub fn planes(&self) -> Option<ImagePlanes> {
        match (self.color_type, self.bit_depth) {
            (0, 1 | 2 | 4 | 8 | 16) | (3, 1 | 2 | 4 | 8) => Some(ImagePlanes::Predicted {
                colors: 1,
                data: self.idat.clone(),
            }),
            (2, 8 | 16) => Some(ImagePlanes::Predicted {
                colors: 3,
                data: self.idat.clone(),
            }),
            (4, 8) => self.split(1),
            (6, 8) => self.split(3),
            _ => None,
        }
    }

    fn split(&self, colors: usize) -> Option<ImagePlanes> {
        let bpp = colors + 1;
        let raw = inflate(&self.idat)?;
        let pixels = unfilter(&raw, self.width as usize, self.height as usize, bpp)?;

        let count = self.width as usize * self.height as usize;
        let mut color = Vec::with_capacity(count * colors);
        let mut alpha = Vec::with_capacity(count);
        for px in pixels.chunks_exact(bpp) {
            color.extend_from_slice(&px[..colors]);
            alpha.push(px[colors]);
        }
        Some(ImagePlanes::Split {
            colors: colors as u8,
            color: deflate(&color)?,
            alpha: deflate(&alpha)?,
        })
    }
}

fn inflate(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data).read_to_end(&mut out).ok()?;
    Some(out)
}

fn deflate(data: &[u8]) -> Option<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).ok()?;
    encoder.finish().ok()
}

/// Undo per-scanline PNG filters for 8-bit samples.
fn unfilter(raw: &[u8], width: usize, height: usize, bpp: usize) -> Option<Vec<u8>> {
    let stride = width.checked_mul(bpp)?;
    if raw.len() < height.checked_mul(stride + 1)? {
        return None;
    }
    let mut out = vec![0u8; stride * height];
    for y in 0..height {
        let filter = raw[y * (stride + 1)];
        let line = &raw[y * (stride + 1) + 1..(y + 1) * (stride + 1)];
        let (done, rest) = out.split_at_mut(y * stride);
        let prev = if y == 0 { None } else { Some(&done[(y - 1) * stride..]) };
        let cur = &mut rest[..stride];
        for x in 0..stride {
            let a = if x >= bpp { cur[x - bpp] as i16 } else { 0 };
            let b = prev.map(|p| p[x] as i16).unwrap_or(0);
            let c = match prev {
                Some(p) if x >= bpp => p[x - bpp] as i16,
                _ => 0,
            };
            let predicted = match filter {
                0 => 0,
                1 => a,
                2 => b,
                3 => (a + b) / 2,
                4 => paeth(a, b, c),
                _ => return None,
            };
            cur[x] = line[x].wrapping_add(predicted as u8);
        }
    }
    Some(out)
}

fn paeth(a: i16, b: i16, c: i16) -> i16 {
    let p = a + b - c;
    let pa = (p - a).abs();
    let pb = (p - b).abs();
    let pc = (p - c).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Hand-built PNG, used by tests across the crate.
#[cfg(test)]
pub(crate) fn encode_test_png(width: u32, height: u32, color_type: u8, filter: u8) -> Vec<u8> {
    let bpp = match color_type {
        0 => 1,
        2 => 3,
        4 => 2,
        6 => 4,
        _ => panic!("unsupported test color type"),
    };
    let mut raw = Vec::new();
    for y in 0..height {
        raw.push(filter);
        for x in 0..width * bpp {
            raw.push(((x * 7 + y * 13) % 251) as u8);
        }
    }
    let mut png = SIGNATURE.to_vec();
    let mut ihdr = Vec::new();
    ihdr.extend_from_slice(&width.to_be_bytes());
    ihdr.extend_from_slice(&height.to_be_bytes());
    ihdr.extend_from_slice(&[8, color_type, 0, 0, 0]);
    for (kind, body) in [
        (&b"IHDR"[..], ihdr),
        (&b"IDAT"[..], deflate(&raw).unwrap()),
        (&b"IEND"[..], Vec::new()),
    ] {
        png.extend_from_slice(&(body.len() as u32).to_be_bytes());
        png.extend_from_slice(kind);
        png.extend_from_slice(&body);
        png.extend_from_slice(&[0, 0, 0, 0]);
    }
    png
}
