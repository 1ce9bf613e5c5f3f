//! Named artifact files under the inference and training directories.

use super::ArtifactDocument;
use crate::models::{PipelineError, Result, TrainingExample};
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Every file a stage can leave behind for a paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Profiling,
    CotInitialExtraction,
    CotCritique,
    CotRefinement,
    CotQualityAssessment,
    CotVoicing,
    CotVoicingAssessment,
    TrainingData,
}

impl ArtifactKind {
    fn suffix(self) -> &'static str {
        match self {
            Self::Profiling => "paper-profiling.txt",
            Self::CotInitialExtraction => "cot-initial-extraction.txt",
            Self::CotCritique => "cot-critique.txt",
            Self::CotRefinement => "cot-refinement.txt",
            Self::CotQualityAssessment => "cot-quality-assessment.txt",
            Self::CotVoicing => "cot-voicing.txt",
            Self::CotVoicingAssessment => "cot-voicing-assessment.txt",
            Self::TrainingData => "training-data.jsonl",
        }
    }

    pub fn is_training(self) -> bool {
        self == Self::TrainingData
    }
}

/// File name of an artifact, independent of where it is stored.
pub fn artifact_name(paper_id: &str, kind: ArtifactKind) -> String {
    format!("{paper_id}-{}", kind.suffix())
}

/// Reads and atomically writes per-paper artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    inference_dir: PathBuf,
    training_dir: PathBuf,
}

impl ArtifactStore {
    /// Create the store, making both directories if needed.
    pub fn new(inference_dir: impl Into<PathBuf>, training_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            inference_dir: inference_dir.into(),
            training_dir: training_dir.into(),
        };
        fs::create_dir_all(&store.inference_dir)
            .map_err(|e| PipelineError::io("creating inference artifact dir", e))?;
        fs::create_dir_all(&store.training_dir)
            .map_err(|e| PipelineError::io("creating training artifact dir", e))?;
        Ok(store)
    }

    pub fn training_dir(&self) -> &Path {
        &self.training_dir
    }

    pub fn path(&self, paper_id: &str, kind: ArtifactKind) -> PathBuf {
        let dir = if kind.is_training() {
            &self.training_dir
        } else {
            &self.inference_dir
        };
        dir.join(artifact_name(paper_id, kind))
    }

    pub fn exists(&self, paper_id: &str, kind: ArtifactKind) -> bool {
        self.path(paper_id, kind).is_file()
    }

    /// Replace the artifact's content in one step.
    ///
    /// Content goes to a uniquely named temp file in the same directory,
    /// which is then renamed over the target.
    pub fn write(&self, paper_id: &str, kind: ArtifactKind, content: &str) -> Result<PathBuf> {
        let path = self.path(paper_id, kind);
        let temp_path = path.with_file_name(format!(
            ".{}.{}.tmp",
            artifact_name(paper_id, kind),
            uuid::Uuid::new_v4().simple()
        ));

        let written = write_file(&temp_path, content).and_then(|()| {
            fs::rename(&temp_path, &path).map_err(|e| PipelineError::io("renaming artifact", e))
        });
        if written.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        written?;

        debug!(path = %path.display(), bytes = content.len(), "Artifact written");
        Ok(path)
    }

    pub fn write_document(
        &self,
        paper_id: &str,
        kind: ArtifactKind,
        document: &ArtifactDocument,
    ) -> Result<PathBuf> {
        self.write(paper_id, kind, &document.render())
    }

    /// Read an artifact; a missing file is [`PipelineError::MissingArtifact`].
    pub fn read(&self, paper_id: &str, kind: ArtifactKind) -> Result<String> {
        let path = self.path(paper_id, kind);
        fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => PipelineError::MissingArtifact {
                name: artifact_name(paper_id, kind),
            },
            _ => PipelineError::io(format!("reading {}", path.display()), e),
        })
    }

    pub fn read_document(&self, paper_id: &str, kind: ArtifactKind) -> Result<ArtifactDocument> {
        Ok(ArtifactDocument::parse(&self.read(paper_id, kind)?))
    }

    /// Write the paper's training example as a single JSON line.
    pub fn write_training(&self, paper_id: &str, example: &TrainingExample) -> Result<PathBuf> {
        let mut line = serde_json::to_string(example)
            .map_err(|e| PipelineError::Internal(format!("Serializing training example: {e}")))?;
        line.push('\n');
        self.write(paper_id, ArtifactKind::TrainingData, &line)
    }

    /// Read the paper's training example (first non-empty line).
    pub fn read_training(&self, paper_id: &str) -> Result<TrainingExample> {
        let content = self.read(paper_id, ArtifactKind::TrainingData)?;
        let line = content
            .lines()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| PipelineError::ParseError(format!("{paper_id}: empty training artifact")))?;
        serde_json::from_str(line)
            .map_err(|e| PipelineError::ParseError(format!("{paper_id}: invalid training artifact: {e}")))
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    let file = File::create(path).map_err(|e| PipelineError::io("creating temp artifact", e))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(content.as_bytes())
        .and_then(|()| writer.flush())
        .map_err(|e| PipelineError::io("writing temp artifact", e))
}
