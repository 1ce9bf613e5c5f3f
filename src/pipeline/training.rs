//! Consolidate voiced, well-scored examples into the training corpus.

use crate::artifact::{ArtifactKind, ArtifactStore, CorpusWriter};
use crate::catalog::CancellationToken;
use crate::models::{Config, Paper, PaperStatus, PipelineError, Result};
use crate::store::{PaperStore, SelectionStrategy};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

const UNKNOWN_PRESET: &str = "unknown";

/// Counters for one corpus build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrainingStats {
    pub written: usize,
    pub below_threshold: usize,
    pub missing_artifact: usize,
    pub cancelled: bool,
}

impl TrainingStats {
    pub fn skipped(&self) -> usize {
        self.below_threshold + self.missing_artifact
    }
}

/// Rebuilds `{training_dir}/{output.training_file}` from scratch.
pub struct TrainingDataGenerator {
    config: Arc<Config>,
    artifacts: ArtifactStore,
}

impl TrainingDataGenerator {
    pub fn new(config: Arc<Config>, artifacts: ArtifactStore) -> Self {
        Self { config, artifacts }
    }

    pub fn corpus_path(&self) -> PathBuf {
        self.artifacts
            .training_dir()
            .join(&self.config.output.training_file)
    }

    fn qualifies(&self, paper: &Paper) -> bool {
        let thresholds = &self.config.thresholds;
        paper.cot_quality_assessment_suitability_score.unwrap_or(0) >= thresholds.quality
            && paper.cot_voicing_assessment_suitability_score.unwrap_or(0) >= thresholds.voicing
    }

    fn preset_for(&self, paper: &Paper) -> String {
        self.artifacts
            .read_document(&paper.paper_id, ArtifactKind::CotVoicing)
            .ok()
            .and_then(|doc| doc.header("Model preset").map(str::to_string))
            .filter(|preset| !preset.is_empty())
            .unwrap_or_else(|| UNKNOWN_PRESET.to_string())
    }

    pub fn run(&self, store: &PaperStore, cancel: &CancellationToken) -> Result<TrainingStats> {
        let papers = store.fetch_by_status(
            PaperStatus::CotVoicingScored,
            None,
            SelectionStrategy::Sequential,
        )?;
        let mut writer = CorpusWriter::create(&self.corpus_path())?;
        let mut stats = TrainingStats::default();

        info!(
            papers = papers.len(),
            quality = self.config.thresholds.quality,
            voicing = self.config.thresholds.voicing,
            "Generating training data"
        );

        for paper in &papers {
            if cancel.is_cancelled() {
                warn!(written = stats.written, "Training data generation interrupted");
                stats.cancelled = true;
                break;
            }

            if !self.qualifies(paper) {
                stats.below_threshold += 1;
                continue;
            }

            let example = match self.artifacts.read_training(&paper.paper_id) {
                Ok(example) => example,
                Err(PipelineError::MissingArtifact { name }) => {
                    warn!(paper_id = %paper.paper_id, artifact = %name, "Training artifact not found");
                    stats.missing_artifact += 1;
                    continue;
                }
                Err(e) if !e.is_fatal() => {
                    warn!(paper_id = %paper.paper_id, error = %e, "Unreadable training artifact");
                    stats.missing_artifact += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            writer.append(paper, &example, &self.preset_for(paper))?;
            stats.written += 1;
            if stats.written % 100 == 0 {
                info!(written = stats.written, skipped = stats.skipped(), "Progress");
            }
        }

        let path = writer.finish()?;
        if stats.written == 0 {
            warn!(path = %path.display(), "No training data was generated");
        } else {
            info!(
                written = stats.written,
                skipped = stats.skipped(),
                path = %path.display(),
                "Training data generation complete"
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::{COT_QUALITY, COT_VOICING};
    use crate::models::{DiscoveredPaper, TrainingExample};
    use crate::store::PaperUpdate;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: PaperStore,
        generator: TrainingDataGenerator,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let artifacts = ArtifactStore::new(dir.path().join("inference"), dir.path().join("training")).unwrap();
        Fixture {
            generator: TrainingDataGenerator::new(Arc::new(Config::default()), artifacts),
            store: PaperStore::open_in_memory().unwrap(),
            _dir: dir,
        }
    }

    impl Fixture {
        fn add(&self, paper_id: &str, quality: u32, voicing: u32, preset: Option<&str>) {
            self.store
                .insert_papers(
                    "cs.AI",
                    &[DiscoveredPaper {
                        paper_id: paper_id.to_string(),
                        paper_url: format!("https://export.arxiv.org/pdf/{paper_id}.pdf"),
                    }],
                )
                .unwrap();
            let paper = self.store.get_paper(paper_id).unwrap().unwrap();
            self.store
                .update_paper(
                    paper.id,
                    PaperStatus::CotVoicingScored,
                    &PaperUpdate::new()
                        .with_score(&COT_QUALITY, quality)
                        .with_score(&COT_VOICING, voicing),
                )
                .unwrap();

            let artifacts = &self.generator.artifacts;
            artifacts
                .write_training(paper_id, &TrainingExample::new("sys", "Q?", "R.", paper_id))
                .unwrap();
            if let Some(preset) = preset {
                let doc = crate::artifact::ArtifactDocument::new("<results></results>")
                    .with_header("Model preset", preset);
                artifacts
                    .write_document(paper_id, ArtifactKind::CotVoicing, &doc)
                    .unwrap();
            }
        }
    }

    #[test]
    fn test_only_papers_passing_both_thresholds_are_written() {
        let f = fixture();
        f.add("good", 14, 9, Some("default"));
        f.add("weak-voicing", 14, 8, Some("default"));
        f.add("weak-quality", 13, 10, Some("default"));

        let stats = f.generator.run(&f.store, &CancellationToken::new()).unwrap();
        assert_eq!(stats.written, 1);
        assert_eq!(stats.below_threshold, 2);

        let corpus = fs::read_to_string(f.generator.corpus_path()).unwrap();
        let lines: Vec<_> = corpus.lines().collect();
        assert_eq!(lines.len(), 1);
        let example: TrainingExample = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(example.assistant, "R.\n\nAnswer: good");
    }

    #[test]
    fn test_companions_follow_voicing_preset() {
        let f = fixture();
        f.add("a", 16, 10, Some("fast"));
        f.add("b", 16, 10, None);

        f.generator.run(&f.store, &CancellationToken::new()).unwrap();
        let training_dir = f.generator.artifacts.training_dir();
        let fast = fs::read_to_string(training_dir.join("consolidated-training-data-fast.md")).unwrap();
        assert!(fast.contains("## a"));
        let unknown = fs::read_to_string(training_dir.join("consolidated-training-data-unknown.md")).unwrap();
        assert!(unknown.contains("## b"));
    }

    #[test]
    fn test_missing_training_artifact_is_counted() {
        let f = fixture();
        f.add("a", 16, 10, None);
        fs::remove_file(f.generator.artifacts.path("a", ArtifactKind::TrainingData)).unwrap();

        let stats = f.generator.run(&f.store, &CancellationToken::new()).unwrap();
        assert_eq!(stats.written, 0);
        assert_eq!(stats.missing_artifact, 1);
        assert_eq!(fs::read_to_string(f.generator.corpus_path()).unwrap(), "");
    }

    #[test]
    fn test_rerun_rebuilds_corpus() {
        let f = fixture();
        f.add("a", 16, 10, None);
        f.generator.run(&f.store, &CancellationToken::new()).unwrap();
        f.generator.run(&f.store, &CancellationToken::new()).unwrap();

        let corpus = fs::read_to_string(f.generator.corpus_path()).unwrap();
        assert_eq!(corpus.lines().count(), 1);
    }
}
