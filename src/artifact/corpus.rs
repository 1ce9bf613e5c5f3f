//! Consolidated training corpus plus per-preset Markdown companions.

use crate::models::{Paper, PipelineError, Result, TrainingExample};
use glob::Pattern;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Appends to `{stem}.jsonl` and `{stem}-{preset}.md`, starting from empty.
pub struct CorpusWriter {
    path: PathBuf,
    dir: PathBuf,
    stem: String,
    jsonl: BufWriter<File>,
    written: usize,
}

impl CorpusWriter {
    /// Truncate the corpus and delete every Markdown companion from a
    /// previous run.
    pub fn create(path: &Path) -> Result<Self> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| {
                PipelineError::InvalidInput(format!("corpus path has no file name: {}", path.display()))
            })?;

        fs::create_dir_all(&dir).map_err(|e| PipelineError::io("creating corpus dir", e))?;

        let pattern = format!(
            "{}/{}-*.md",
            Pattern::escape(&dir.to_string_lossy()),
            Pattern::escape(&stem)
        );
        let companions = glob::glob(&pattern)
            .map_err(|e| PipelineError::Internal(format!("Invalid companion pattern: {e}")))?;
        for entry in companions {
            let companion = entry.map_err(|e| PipelineError::io("listing corpus companions", e.into_error()))?;
            fs::remove_file(&companion).map_err(|e| PipelineError::io("removing corpus companion", e))?;
            debug!(path = %companion.display(), "Removed stale corpus companion");
        }

        let file = File::create(path).map_err(|e| PipelineError::io("creating corpus file", e))?;

        Ok(Self {
            path: path.to_path_buf(),
            dir,
            stem,
            jsonl: BufWriter::new(file),
            written: 0,
        })
    }

    /// Path of the Markdown companion for `preset`.
    pub fn companion_path(&self, preset: &str) -> PathBuf {
        let preset: String = preset
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}-{preset}.md", self.stem))
    }

    /// Append one example to the corpus and to its preset's companion.
    pub fn append(&mut self, paper: &Paper, example: &TrainingExample, preset: &str) -> Result<()> {
        let line = serde_json::to_string(example)
            .map_err(|e| PipelineError::Internal(format!("Serializing training example: {e}")))?;
        writeln!(self.jsonl, "{line}").map_err(|e| PipelineError::io("appending to corpus", e))?;

        let companion = self.companion_path(preset);
        let fresh = !companion.exists();
        let mut md = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&companion)
            .map_err(|e| PipelineError::io("opening corpus companion", e))?;
        if fresh {
            writeln!(md, "# {} ({preset})\n", self.stem)
                .map_err(|e| PipelineError::io("writing corpus companion", e))?;
        }
        md.write_all(example.to_markdown(&paper.paper_id, &paper.paper_url).as_bytes())
            .map_err(|e| PipelineError::io("writing corpus companion", e))?;

        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// Flush the corpus and return its path.
    pub fn finish(mut self) -> Result<PathBuf> {
        self.jsonl
            .flush()
            .map_err(|e| PipelineError::io("flushing corpus", e))?;
        Ok(self.path)
    }
}
