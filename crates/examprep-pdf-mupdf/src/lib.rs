use std::io::Cursor;

use mupdf::{Colorspace, Document, Matrix, Page, Pixmap, TextPageFlags};

use examprep_core::{BackendError, PdfBackend};

/// PDF user space is 72 units per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// MuPDF-based implementation of [`PdfBackend`].
///
/// This crate is the sole AGPL island: it isolates the mupdf dependency
/// (which is AGPL-3.0) so that the rest of the workspace does not
/// transitively depend on it.
#[derive(Debug, Default)]
pub struct MupdfBackend;

impl MupdfBackend {
    pub fn new() -> Self {
        Self
    }
}

fn open(bytes: &[u8]) -> Result<Document, BackendError> {
    let document =
        Document::from_bytes(bytes, "application/pdf").map_err(|e| BackendError::OpenError(e.to_string()))?;
    let count = document
        .page_count()
        .map_err(|e| BackendError::OpenError(e.to_string()))?;
    if count <= 0 {
        return Err(BackendError::NoPages);
    }
    Ok(document)
}

fn pages(document: &Document) -> Result<Vec<Page>, BackendError> {
    document
        .pages()
        .map_err(|e| BackendError::ExtractionError(e.to_string()))?
        .map(|page| page.map_err(|e| BackendError::ExtractionError(e.to_string())))
        .collect()
}

fn page_text(page: &Page) -> Result<String, BackendError> {
    let text_page = page
        .to_text_page(TextPageFlags::empty())
        .map_err(|e| BackendError::ExtractionError(e.to_string()))?;

    let mut text = String::new();
    for block in text_page.blocks() {
        for line in block.lines() {
            text.extend(line.chars().map(|c| c.char().unwrap_or('\u{FFFD}')));
            text.push('\n');
        }
    }
    Ok(text)
}

/// Bytes needed for an RGBA buffer, computed in `usize` so large renders
/// do not overflow.
fn rgba_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

/// Convert a pixmap (RGB or RGBA samples) to an encoded PNG.
fn encode_png(pixmap: &Pixmap, page: usize) -> Result<Vec<u8>, BackendError> {
    let width = pixmap.width() as u32;
    let height = pixmap.height() as u32;
    let samples = pixmap.samples();
    let n = (pixmap.n() as usize).max(1);

    let mut rgba = Vec::with_capacity(rgba_len(width, height));
    for pixel in samples.chunks(n) {
        let r = pixel.first().copied().unwrap_or(0);
        let g = pixel.get(1).copied().unwrap_or(r);
        let b = pixel.get(2).copied().unwrap_or(r);
        let a = if n >= 4 { pixel.get(3).copied().unwrap_or(255) } else { 255 };
        rgba.extend_from_slice(&[r, g, b, a]);
    }

    let image = image::RgbaImage::from_raw(width, height, rgba).ok_or_else(|| BackendError::RenderError {
        page,
        message: format!("pixmap size mismatch ({width}x{height})"),
    })?;

    let mut png = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| BackendError::RenderError {
            page,
            message: e.to_string(),
        })?;
    Ok(png)
}

impl PdfBackend for MupdfBackend {
    fn name(&self) -> &str {
        "mupdf"
    }

    fn page_texts(&self, bytes: &[u8]) -> Result<Vec<String>, BackendError> {
        let document = open(bytes)?;
        pages(&document)?.iter().map(page_text).collect()
    }

    fn render_pages(&self, bytes: &[u8], dpi: u32) -> Result<Vec<Vec<u8>>, BackendError> {
        let document = open(bytes)?;
        let scale = dpi.max(1) as f32 / POINTS_PER_INCH;
        let matrix = Matrix::new_scale(scale, scale);
        let colorspace = Colorspace::device_rgb();

        let pages = pages(&document)?;
        tracing::debug!(pages = pages.len(), dpi, "rendering pages for OCR");

        pages
            .iter()
            .enumerate()
            .map(|(index, page)| {
                let pixmap = page
                    .to_pixmap(&matrix, &colorspace, false, false)
                    .map_err(|e| BackendError::RenderError {
                        page: index + 1,
                        message: e.to_string(),
                    })?;
                encode_png(&pixmap, index + 1)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn rgba_len_does_not_overflow_u32() {
        // A letter page at 1200 dpi is 10200 x 13200 pixels.
        assert_eq!(rgba_len(10_200, 13_200), 538_560_000);
        assert_eq!(rgba_len(40_000, 40_000), 6_400_000_000);
    }

    /// A one-page PDF with a single line of Helvetica text and a valid xref.
    fn sample_pdf(text: &str) -> Vec<u8> {
        let content = format!("BT /F1 24 Tf 72 700 Td ({text}) Tj ET");
        let objects = [
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Resources << /Font << /F1 5 0 R >> >> /Contents 4 0 R >>"
                .to_string(),
            format!("<< /Length {} >>\nstream\n{content}\nendstream", content.len()),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
        ];

        let mut pdf = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", i + 1).as_bytes());
        }
        let xref_at = pdf.len();
        pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
        for offset in offsets {
            pdf.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
        }
        pdf.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
                objects.len() + 1
            )
            .as_bytes(),
        );
        pdf
    }

    #[test]
    fn reads_text_layer() {
        let pages = MupdfBackend::new()
            .page_texts(&sample_pdf("Cell membranes are selectively permeable"))
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].contains("Cell membranes are selectively permeable"));
    }

    #[test]
    fn garbage_is_an_invalid_document() {
        let err = MupdfBackend::new()
            .page_texts(b"definitely not a pdf")
            .unwrap_err();
        assert!(err.is_invalid_document(), "got {err:?}");
    }

    #[test]
    fn renders_png_per_page() {
        let images = MupdfBackend::new()
            .render_pages(&sample_pdf("render me"), 36)
            .unwrap();
        assert_eq!(images.len(), 1);
        assert!(images[0].starts_with(b"\x89PNG\r\n\x1a\n"));
    }
}
