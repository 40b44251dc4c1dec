//! Validation of uploaded bytes before any parser sees them.

use crate::extract::ExtractError;

/// Largest accepted upload: 50 MiB.
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// The PDF header may be preceded by junk; readers tolerate up to 1 KiB of it.
const PDF_HEADER_WINDOW: usize = 1024;

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_MAGIC: &[u8] = b"\xff\xd8\xff";

/// An uploaded file held in memory for the duration of one interaction.
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Read a file from disk, keeping only its file name for display.
    /// Oversize files are rejected from their metadata, before any read.
    pub fn from_path(path: &std::path::Path) -> Result<Self, ExtractError> {
        let size = std::fs::metadata(path)?.len();
        let size = usize::try_from(size).unwrap_or(usize::MAX);
        if size > MAX_UPLOAD_BYTES {
            return Err(ExtractError::Oversize {
                size,
                limit: MAX_UPLOAD_BYTES,
            });
        }
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, bytes })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
}

impl ImageKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Png => "png",
            ImageKind::Jpeg => "jpg",
        }
    }
}

pub fn check_size(bytes: &[u8]) -> Result<(), ExtractError> {
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(ExtractError::Oversize {
            size: bytes.len(),
            limit: MAX_UPLOAD_BYTES,
        });
    }
    Ok(())
}

/// Whether `bytes` start with a PDF header (`%PDF-`) within the first KiB.
pub fn looks_like_pdf(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
    window.windows(5).any(|w| w == b"%PDF-")
}

/// Reject oversize uploads first, then anything that is not a PDF.
pub fn validate_pdf_upload(bytes: &[u8]) -> Result<(), ExtractError> {
    check_size(bytes)?;
    if bytes.is_empty() {
        return Err(ExtractError::InvalidPdf("file is empty".into()));
    }
    if !looks_like_pdf(bytes) {
        return Err(ExtractError::InvalidPdf("missing %PDF- header".into()));
    }
    Ok(())
}

pub fn detect_image_kind(bytes: &[u8]) -> Option<ImageKind> {
    if bytes.starts_with(PNG_MAGIC) {
        Some(ImageKind::Png)
    } else if bytes.starts_with(JPEG_MAGIC) {
        Some(ImageKind::Jpeg)
    } else {
        None
    }
}

pub fn validate_image_upload(bytes: &[u8]) -> Result<ImageKind, ExtractError> {
    check_size(bytes)?;
    detect_image_kind(bytes).ok_or(ExtractError::UnsupportedImage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_pdf_header() {
        assert!(validate_pdf_upload(b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n1 0 obj").is_ok());
    }

    #[test]
    fn accepts_header_after_leading_junk() {
        let mut bytes = vec![b' '; 200];
        bytes.extend_from_slice(b"%PDF-1.4\n");
        assert!(looks_like_pdf(&bytes));
    }

    #[test]
    fn rejects_header_beyond_window() {
        let mut bytes = vec![b'x'; PDF_HEADER_WINDOW + 10];
        bytes.extend_from_slice(b"%PDF-1.4\n");
        assert!(!looks_like_pdf(&bytes));
    }

    #[test]
    fn rejects_plain_text() {
        let err = validate_pdf_upload(b"These are my lecture notes.\nChapter 1\n").unwrap_err();
        assert!(matches!(err, ExtractError::InvalidPdf(_)));
    }

    #[test]
    fn rejects_empty() {
        assert!(matches!(
            validate_pdf_upload(b""),
            Err(ExtractError::InvalidPdf(_))
        ));
    }

    #[test]
    fn oversize_is_checked_before_content() {
        let bytes = vec![0u8; MAX_UPLOAD_BYTES + 1];
        match validate_pdf_upload(&bytes) {
            Err(ExtractError::Oversize { size, limit }) => {
                assert_eq!(size, MAX_UPLOAD_BYTES + 1);
                assert_eq!(limit, MAX_UPLOAD_BYTES);
            }
            other => panic!("expected Oversize, got {other:?}"),
        }
    }

    #[test]
    fn exactly_at_limit_is_not_oversize() {
        let mut bytes = b"%PDF-1.5\n".to_vec();
        bytes.resize(MAX_UPLOAD_BYTES, b' ');
        assert!(validate_pdf_upload(&bytes).is_ok());
    }

    #[test]
    fn oversize_file_is_rejected_from_metadata() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // Sparse: the length is set without writing any data.
        file.as_file().set_len(MAX_UPLOAD_BYTES as u64 + 1).unwrap();
        match Upload::from_path(file.path()) {
            Err(ExtractError::Oversize { size, .. }) => assert_eq!(size, MAX_UPLOAD_BYTES + 1),
            other => panic!("expected Oversize, got {other:?}"),
        }
    }

    #[test]
    fn from_path_keeps_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lecture-3.pdf");
        std::fs::write(&path, b"%PDF-1.4\n").unwrap();
        let upload = Upload::from_path(&path).unwrap();
        assert_eq!(upload.name, "lecture-3.pdf");
        assert_eq!(upload.bytes, b"%PDF-1.4\n");

        assert!(matches!(
            Upload::from_path(&dir.path().join("missing.pdf")),
            Err(ExtractError::Read(_))
        ));
    }

    #[test]
    fn detects_image_kinds() {
        assert_eq!(
            detect_image_kind(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"),
            Some(ImageKind::Png)
        );
        assert_eq!(detect_image_kind(b"\xff\xd8\xff\xe0\0\x10JFIF"), Some(ImageKind::Jpeg));
        assert_eq!(detect_image_kind(b"GIF89a"), None);
        assert!(matches!(
            validate_image_upload(b"%PDF-1.4"),
            Err(ExtractError::UnsupportedImage)
        ));
    }
}
