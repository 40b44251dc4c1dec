use std::future::Future;
use std::io::Write;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use examprep_core::upload::{ImageKind, detect_image_kind};
use examprep_core::{OcrEngine, OcrError};

pub const DEFAULT_COMMAND: &str = "tesseract";
pub const DEFAULT_LANGUAGE: &str = "eng";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Runs the `tesseract` CLI on each image, reading the text from stdout.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    command: String,
    language: String,
    timeout: Duration,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            command: DEFAULT_COMMAND.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl TesseractOcr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_command(mut self, command: &str) -> Self {
        self.command = command.to_string();
        self
    }

    /// Tesseract language code(s), e.g. `eng` or `eng+deu`.
    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether the configured command can be started at all.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.command)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok_and(|s| s.success())
    }

    async fn run(&self, image: &[u8]) -> Result<String, OcrError> {
        // Rendered pages are PNG; tesseract picks its decoder from the suffix.
        let kind = detect_image_kind(image).unwrap_or(ImageKind::Png);
        let mut file = tempfile::Builder::new()
            .prefix("examprep-ocr-")
            .suffix(&format!(".{}", kind.extension()))
            .tempfile()?;
        file.write_all(image)?;
        file.flush()?;

        let child = Command::new(&self.command)
            .arg(file.path())
            .arg("stdout")
            .args(["-l", self.language.as_str(), "--psm", "3"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OcrError::Spawn(format!("{}: {e}", self.command)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| OcrError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(OcrError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize<'a>(
        &'a self,
        image: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<String, OcrError>> + Send + 'a>> {
        Box::pin(self.run(image))
    }
}
