//! Paper full text: PDF download, extraction and an on-disk cache.

use crate::models::{Paper, PipelineError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const DOWNLOAD_ATTEMPTS: u32 = 3;

/// Turns a PDF file into plain text.
#[async_trait]
pub trait PdfTextExtractor: Send + Sync {
    async fn extract_text(&self, pdf: &Path) -> Result<String>;
}

/// Extractor that shells out to poppler's `pdftotext`.
#[derive(Debug, Clone)]
pub struct PdftotextExtractor {
    program: PathBuf,
    timeout: Duration,
}

impl Default for PdftotextExtractor {
    fn default() -> Self {
        Self {
            program: PathBuf::from("pdftotext"),
            timeout: Duration::from_secs(120),
        }
    }
}

#[async_trait]
impl PdfTextExtractor for PdftotextExtractor {
    async fn extract_text(&self, pdf: &Path) -> Result<String> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.program)
                .arg("-enc")
                .arg("UTF-8")
                .arg(pdf)
                .arg("-")
                .output(),
        )
        .await
        .map_err(|_| PipelineError::Timeout(self.timeout))?
        .map_err(|e| PipelineError::PdfExtraction(format!("failed to run {}: {e}", self.program.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::PdfExtraction(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Full text per paper, cached as `{cache}/{paper_id}.pdf` and
/// `{cache}/{paper_id}.md` so later runs skip the download.
pub struct PaperTextSource {
    cache_dir: PathBuf,
    client: reqwest::Client,
    extractor: Arc<dyn PdfTextExtractor>,
    retry_base: Duration,
}

impl PaperTextSource {
    pub fn new(cache_dir: impl Into<PathBuf>, extractor: Arc<dyn PdfTextExtractor>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir).map_err(|e| PipelineError::io("creating PDF cache dir", e))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .user_agent(concat!("raspberry/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(PipelineError::Network)?;

        Ok(Self {
            cache_dir,
            client,
            extractor,
            retry_base: Duration::from_secs(2),
        })
    }

    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }

    fn file_stem(paper_id: &str) -> String {
        paper_id.replace('/', "_")
    }

    pub fn pdf_path(&self, paper_id: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.pdf", Self::file_stem(paper_id)))
    }

    pub fn text_path(&self, paper_id: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.md", Self::file_stem(paper_id)))
    }

    /// Cached text if present, otherwise download and extract.
    pub async fn text_for(&self, paper: &Paper) -> Result<String> {
        let text_path = self.text_path(&paper.paper_id);
        if let Ok(text) = tokio::fs::read_to_string(&text_path).await {
            if !text.trim().is_empty() {
                debug!(paper_id = %paper.paper_id, "Using cached paper text");
                return Ok(text);
            }
        }

        let pdf_path = self.ensure_pdf(paper).await?;
        let text = self.extractor.extract_text(&pdf_path).await?;
        if text.trim().is_empty() {
            return Err(PipelineError::PdfExtraction(format!(
                "{}: no text extracted",
                paper.paper_id
            )));
        }

        write_atomic(&text_path, text.as_bytes(), "paper text").await?;
        Ok(text)
    }

    async fn ensure_pdf(&self, paper: &Paper) -> Result<PathBuf> {
        let path = self.pdf_path(&paper.paper_id);
        if tokio::fs::metadata(&path).await.is_ok_and(|m| m.len() > 0) {
            return Ok(path);
        }

        let bytes = self.download(paper).await?;
        write_atomic(&path, &bytes, "downloaded PDF").await?;

        info!(paper_id = %paper.paper_id, bytes = bytes.len(), "Downloaded PDF");
        Ok(path)
    }

    async fn download(&self, paper: &Paper) -> Result<Vec<u8>> {
        let mut last_error = None;

        for attempt in 0..DOWNLOAD_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(self.retry_base.saturating_mul(2u32.pow(attempt - 1))).await;
            }

            match self.fetch_pdf(&paper.paper_url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    warn!(paper_id = %paper.paper_id, attempt, error = %e, "PDF download failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| PipelineError::Internal("no download attempt made".to_string())))
    }

    async fn fetch_pdf(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::PdfExtraction(format!("GET {url} returned HTTP {status}")));
        }
        let bytes = response.bytes().await?;
        if !bytes.starts_with(b"%PDF") {
            return Err(PipelineError::PdfExtraction(format!("{url} did not return a PDF")));
        }
        Ok(bytes.to_vec())
    }
}

/// Write through a uniquely named sibling and rename it into place, so a
/// cached file is either absent or complete.
async fn write_atomic(path: &Path, bytes: &[u8], what: &str) -> Result<()> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_extension(format!("{extension}.{}.tmp", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&temp, bytes)
        .await
        .map_err(|e| PipelineError::io(format!("writing {what}"), e))?;
    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(PipelineError::io(format!("renaming {what}"), e));
    }
    Ok(())
}
