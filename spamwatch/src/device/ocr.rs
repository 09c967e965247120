//! Tesseract-backed text extraction.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::TextExtractor;
use crate::{Error, Result};

const DEFAULT_OCR_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs `tesseract stdin stdout` on captured screenshots.
pub struct TesseractExtractor {
    binary: String,
    languages: String,
    timeout: Duration,
}

impl TesseractExtractor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            languages: "eng".to_string(),
            timeout: DEFAULT_OCR_TIMEOUT,
        }
    }

    /// Tesseract language list, e.g. `eng+rus`.
    pub fn with_languages(mut self, languages: impl Into<String>) -> Self {
        self.languages = languages.into();
        self
    }

    async fn run(&self, evidence: &[u8]) -> Result<String> {
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", self.languages.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(evidence).await?;
            // Closing stdin lets tesseract start.
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(Error::Other(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl TextExtractor for TesseractExtractor {
    async fn extract_text(&self, evidence: &[u8]) -> Result<String> {
        tokio::time::timeout(self.timeout, self.run(evidence))
            .await
            .map_err(|_| Error::Timeout("tesseract".to_string()))?
    }
}
