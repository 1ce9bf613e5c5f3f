//! profile_scored -> cot_extracted | failed_cot_extraction

use super::{Disposition, StageContext, StageRunner};
use crate::artifact::ArtifactKind;
use crate::client::TemplateVars;
use crate::criteria::PROFILE;
use crate::markup::{self, extract_results_block};
use crate::models::{CotTriple, Paper, PaperStatus, PipelineError, Result, TrainingExample};
use crate::store::{PaperStore, PaperUpdate, ScoreFloor};
use async_trait::async_trait;
use quick_xml::escape::escape;
use tracing::{debug, info};

/// Extraction, critique and refinement of a question / reasoning / answer
/// triple from a well-profiled paper.
pub struct CotExtractor {
    ctx: StageContext,
}

impl CotExtractor {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    fn triple_vars(paper_text: &str, triple: &CotTriple) -> TemplateVars {
        TemplateVars::new()
            .with("paper", paper_text)
            .with("question", &triple.question)
            .with("chain_of_reasoning", &triple.chain_of_reasoning)
            .with("answer", &triple.answer)
    }
}

#[async_trait(?Send)]
impl StageRunner for CotExtractor {
    fn name(&self) -> &'static str {
        "extract-cot"
    }

    fn input_status(&self) -> PaperStatus {
        PaperStatus::ProfileScored
    }

    fn failure_status(&self) -> Option<PaperStatus> {
        Some(PaperStatus::FailedCotExtraction)
    }

    fn score_floor(&self) -> Option<ScoreFloor> {
        Some(ScoreFloor {
            column: PROFILE.score_column,
            min: self.ctx.config.thresholds.profile,
        })
    }

    async fn process(&self, store: &PaperStore, paper: &Paper) -> Result<Disposition> {
        let threshold = self.ctx.config.thresholds.profile;
        let score = paper.profiler_suitability_score.unwrap_or(0);
        if score < threshold {
            debug!(paper_id = %paper.paper_id, score, threshold, "Below profile threshold");
            return Ok(Disposition::Skipped);
        }

        let stages = &self.ctx.config.stages;
        let text = self.ctx.texts.text_for(paper).await?;

        let extraction = self
            .ctx
            .run_step(&stages.extraction, &TemplateVars::new().with("paper", text.as_str()))
            .await?;
        let initial = markup::parse_cot_triple(&extraction.content)?;
        if initial.question.is_empty() {
            return Err(PipelineError::MissingTag {
                tag: "question".to_string(),
            });
        }
        self.ctx.write_artifact(
            paper,
            ArtifactKind::CotInitialExtraction,
            &extraction.preset,
            format!("{}\n\n{}", initial.to_results_block(), extraction.content),
        )?;

        let critique_output = self
            .ctx
            .run_step(&stages.critique, &Self::triple_vars(&text, &initial))
            .await?;
        let critique_block =
            extract_results_block(&critique_output.content).unwrap_or(&critique_output.content);
        let critique = markup::required_tag(critique_block, "critique")?;
        self.ctx.write_artifact(
            paper,
            ArtifactKind::CotCritique,
            &critique_output.preset,
            format!(
                "<critique>\n{}\n</critique>\n\n{}",
                escape(&critique),
                critique_output.content
            ),
        )?;

        let refinement = self
            .ctx
            .run_step(
                &stages.refinement,
                &Self::triple_vars(&text, &initial).with("critique", critique.as_str()),
            )
            .await?;
        let mut refined = markup::parse_cot_triple(&refinement.content)?;
        if refined.question.is_empty() {
            refined.question = initial.question.clone();
        }
        self.ctx.write_artifact(
            paper,
            ArtifactKind::CotRefinement,
            &refinement.preset,
            format!("{}\n\n{}", refined.to_results_block(), refinement.content),
        )?;

        let draft = TrainingExample::new(
            stages.system_message.as_str(),
            &refined.question,
            &refined.chain_of_reasoning,
            &refined.answer,
        );
        self.ctx.artifacts.write_training(&paper.paper_id, &draft)?;

        store.update_paper(paper.id, PaperStatus::CotExtracted, &PaperUpdate::new())?;
        info!(paper_id = %paper.paper_id, "Extracted chain of thought");
        Ok(Disposition::Advanced)
    }
}
