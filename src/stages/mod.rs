//! Stage runners: one per transition of the paper state machine.
//!
//! Every runner consumes papers in one status and, per paper, either
//! advances it, skips it (no status change), or routes it to the stage's
//! failure status. Store errors abort the batch; everything else is a
//! per-paper failure.

mod assess;
mod extract;
mod profile;
mod score;
mod voice;

pub use assess::{CotQualityAssessor, CotVoicingAssessor};
pub use extract::CotExtractor;
pub use profile::PaperProfiler;
pub use score::ScoreRunner;
pub use voice::CotVoicer;

use crate::artifact::{ArtifactDocument, ArtifactKind, ArtifactStore};
use crate::catalog::CancellationToken;
use crate::client::{PaperTextSource, TemplateOutput, TemplateOverrides, TemplateRunner, TemplateVars};
use crate::markup;
use crate::models::{Config, CotTriple, Paper, PaperStatus, PipelineError, Result, StepConfig};
use crate::store::{PaperStore, PaperUpdate, ScoreFloor, SelectionStrategy};
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What happened to one paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Status moved forward
    Advanced,
    /// Left untouched (below a threshold)
    Skipped,
}

/// Counters for one stage run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub stage: String,
    pub processed: usize,
    pub advanced: usize,
    pub skipped: usize,
    pub failed: usize,
    /// The run stopped early on cancellation
    pub cancelled: bool,
}

impl BatchReport {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            ..Default::default()
        }
    }
}

/// How a batch selects papers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOptions {
    pub limit: Option<usize>,
    pub strategy: SelectionStrategy,
    pub show_progress: bool,
}

impl BatchOptions {
    pub fn limit(limit: Option<usize>) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }
}

/// Dependencies shared by the LLM-driven stages.
#[derive(Clone)]
pub struct StageContext {
    pub config: Arc<Config>,
    pub templates: Arc<dyn TemplateRunner>,
    pub texts: Arc<PaperTextSource>,
    pub artifacts: ArtifactStore,
}

impl StageContext {
    /// Run a configured step with its preset override.
    pub(crate) async fn run_step(&self, step: &StepConfig, vars: &TemplateVars) -> Result<TemplateOutput> {
        let overrides = TemplateOverrides::preset(step.preset.clone());
        self.templates
            .run_template(&step.template, vars, &overrides)
            .await
    }

    /// Write an artifact with the paper URL and preset as headers.
    pub(crate) fn write_artifact(
        &self,
        paper: &Paper,
        kind: ArtifactKind,
        preset: &str,
        body: String,
    ) -> Result<()> {
        let document = ArtifactDocument::new(body)
            .with_header("Paper URL", &paper.paper_url)
            .with_header("Model preset", preset);
        self.artifacts.write_document(&paper.paper_id, kind, &document)?;
        Ok(())
    }

    /// The refined triple a previous stage left for this paper.
    pub(crate) fn refined_triple(&self, paper: &Paper) -> Result<CotTriple> {
        let document = self
            .artifacts
            .read_document(&paper.paper_id, ArtifactKind::CotRefinement)?;
        let triple = markup::parse_cot_triple(&document.body)?;
        if triple.question.is_empty() {
            return Err(PipelineError::MissingTag {
                tag: "question".to_string(),
            });
        }
        Ok(triple)
    }
}

/// One transition of the paper state machine.
#[async_trait(?Send)]
pub trait StageRunner {
    fn name(&self) -> &'static str;

    /// Status of papers this stage consumes.
    fn input_status(&self) -> PaperStatus;

    /// Status written when a paper fails; `None` leaves it in place.
    fn failure_status(&self) -> Option<PaperStatus>;

    /// Score a paper must reach to be selected at all.
    fn score_floor(&self) -> Option<ScoreFloor> {
        None
    }

    /// Log a progress line every this many papers (0 disables).
    fn log_every(&self) -> usize {
        0
    }

    async fn process(&self, store: &PaperStore, paper: &Paper) -> Result<Disposition>;
}

pub(crate) fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}",
    )
    .map(|s| s.progress_chars("##-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

/// Drive `runner` over every paper in its input status.
pub async fn run_stage<R: StageRunner + ?Sized>(
    runner: &R,
    store: &PaperStore,
    cancel: &CancellationToken,
    options: &BatchOptions,
) -> Result<BatchReport> {
    let stage = runner.name();
    let papers = store.fetch_eligible(
        runner.input_status(),
        runner.score_floor(),
        options.limit,
        options.strategy,
    )?;
    let mut report = BatchReport::new(stage);

    info!(stage, papers = papers.len(), status = %runner.input_status(), "Starting stage");
    let pb = progress_bar(papers.len(), options.show_progress);
    pb.set_message(stage);

    for paper in &papers {
        if cancel.is_cancelled() {
            warn!(stage, processed = report.processed, "Stage interrupted");
            report.cancelled = true;
            break;
        }

        report.processed += 1;
        match runner.process(store, paper).await {
            Ok(Disposition::Advanced) => report.advanced += 1,
            Ok(Disposition::Skipped) => report.skipped += 1,
            Err(e) if e.is_fatal() => {
                pb.abandon();
                error!(stage, paper_id = %paper.paper_id, error = %e, "Aborting stage");
                return Err(e);
            }
            Err(e) => {
                warn!(stage, paper_id = %paper.paper_id, error = %e, "Paper failed");
                if let Some(status) = runner.failure_status() {
                    store.update_paper(paper.id, status, &PaperUpdate::new())?;
                }
                report.failed += 1;
            }
        }
        pb.inc(1);

        let every = runner.log_every();
        if every > 0 && report.processed % every == 0 {
            info!(stage, processed = report.processed, total = papers.len(), "Progress");
        }
    }
    pb.finish_and_clear();

    info!(
        stage,
        processed = report.processed,
        advanced = report.advanced,
        skipped = report.skipped,
        failed = report.failed,
        "Stage complete"
    );
    Ok(report)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fakes shared by the stage tests.

    use super::*;
    use crate::client::FixedExtractor;
    use crate::models::DiscoveredPaper;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Template runner answering from a per-template script.
    #[derive(Default)]
    pub(crate) struct ScriptedTemplates {
        responses: Mutex<HashMap<String, Vec<String>>>,
        pub(crate) calls: Mutex<Vec<(String, TemplateVars)>>,
    }

    impl ScriptedTemplates {
        /// Queue a response; the last queued one repeats.
        pub(crate) fn respond(&self, template: &str, response: impl Into<String>) {
            self.responses
                .lock()
                .unwrap()
                .entry(template.to_string())
                .or_default()
                .push(response.into());
        }

        pub(crate) fn calls_to(&self, template: &str) -> Vec<TemplateVars> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(name, _)| name == template)
                .map(|(_, vars)| vars.clone())
                .collect()
        }
    }

    #[async_trait]
    impl TemplateRunner for ScriptedTemplates {
        async fn run_template(
            &self,
            name: &str,
            vars: &TemplateVars,
            overrides: &TemplateOverrides,
        ) -> Result<TemplateOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), vars.clone()));
            let mut responses = self.responses.lock().unwrap();
            let queue = responses
                .get_mut(name)
                .ok_or_else(|| PipelineError::InvalidInput(format!("no script for {name}")))?;
            let content = if queue.len() > 1 {
                queue.remove(0)
            } else {
                queue[0].clone()
            };
            Ok(TemplateOutput {
                content,
                preset: overrides.preset.clone().unwrap_or_else(|| "default".to_string()),
            })
        }
    }

    pub(crate) struct Harness {
        pub(crate) _dir: TempDir,
        pub(crate) store: PaperStore,
        pub(crate) templates: Arc<ScriptedTemplates>,
        pub(crate) ctx: StageContext,
    }

    impl Harness {
        pub(crate) fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let mut config = Config::default();
            config.paths.pdf_cache_dir = dir.path().join("pdfs");
            config.paths.inference_artifacts_dir = dir.path().join("inference");
            config.paths.training_artifacts_dir = dir.path().join("training");

            let templates = Arc::new(ScriptedTemplates::default());
            let extractor = Arc::new(FixedExtractor {
                text: "Full paper text.".to_string(),
                ..Default::default()
            });
            let texts = PaperTextSource::new(&config.paths.pdf_cache_dir, extractor).unwrap();
            let artifacts = ArtifactStore::new(
                &config.paths.inference_artifacts_dir,
                &config.paths.training_artifacts_dir,
            )
            .unwrap();

            let ctx = StageContext {
                config: Arc::new(config),
                templates: templates.clone(),
                texts: Arc::new(texts),
                artifacts,
            };
            Self {
                _dir: dir,
                store: PaperStore::open_in_memory().unwrap(),
                templates,
                ctx,
            }
        }

        /// Insert a paper, cache its text, and move it to `status`.
        pub(crate) fn add_paper(&self, paper_id: &str, status: PaperStatus, update: PaperUpdate) -> Paper {
            self.store
                .insert_papers(
                    "cs.AI",
                    &[DiscoveredPaper {
                        paper_id: paper_id.to_string(),
                        paper_url: format!("https://export.arxiv.org/pdf/{paper_id}.pdf"),
                    }],
                )
                .unwrap();
            std::fs::write(
                self.ctx.texts.text_path(paper_id),
                format!("Text of {paper_id}."),
            )
            .unwrap();
            let paper = self.paper(paper_id);
            self.store.update_paper(paper.id, status, &update).unwrap();
            self.paper(paper_id)
        }

        pub(crate) fn paper(&self, paper_id: &str) -> Paper {
            self.store.get_paper(paper_id).unwrap().unwrap()
        }

        pub(crate) fn write_refinement(&self, paper: &Paper, triple: &CotTriple) {
            self.ctx
                .write_artifact(
                    paper,
                    ArtifactKind::CotRefinement,
                    "default",
                    triple.to_results_block(),
                )
                .unwrap();
        }
    }

    pub(crate) fn triple() -> CotTriple {
        CotTriple {
            question: "Why does the estimator converge?".to_string(),
            chain_of_reasoning: "Step 1: bound the variance.\nStep 2: apply Chebyshev.".to_string(),
            answer: "Because its variance vanishes.".to_string(),
        }
    }

    /// A `<results>` block answering every criterion of `criteria` with
    /// `yes`, except those listed in `no`.
    pub(crate) fn criteria_response(criteria: &[&str], no: &[&str]) -> String {
        let mut out = String::from("Assessment follows.\n<results>\n");
        for name in criteria {
            let value = if no.contains(name) { "no" } else { "yes" };
            out.push_str(&format!("  <{name}>{value}</{name}>\n"));
        }
        out.push_str("</results>\n");
        out
    }
}
