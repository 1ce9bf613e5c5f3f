//! cot_quality_scored -> cot_voiced | failed_cot_voicing

use super::{Disposition, StageContext, StageRunner};
use crate::artifact::ArtifactKind;
use crate::client::TemplateVars;
use crate::criteria::COT_QUALITY;
use crate::markup::parse_voiced_content;
use crate::models::{CotTriple, Paper, PaperStatus, Result, TrainingExample};
use crate::store::{PaperStore, PaperUpdate, ScoreFloor};
use async_trait::async_trait;
use tracing::{debug, info};

/// Rewrites the refined reasoning and answer as a first-person train of
/// thought, then replaces the draft training example with the voiced one.
pub struct CotVoicer {
    ctx: StageContext,
}

impl CotVoicer {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }
}

#[async_trait(?Send)]
impl StageRunner for CotVoicer {
    fn name(&self) -> &'static str {
        "voice"
    }

    fn input_status(&self) -> PaperStatus {
        PaperStatus::CotQualityScored
    }

    fn failure_status(&self) -> Option<PaperStatus> {
        Some(PaperStatus::FailedCotVoicing)
    }

    fn score_floor(&self) -> Option<ScoreFloor> {
        Some(ScoreFloor {
            column: COT_QUALITY.score_column,
            min: self.ctx.config.thresholds.quality,
        })
    }

    async fn process(&self, store: &PaperStore, paper: &Paper) -> Result<Disposition> {
        let threshold = self.ctx.config.thresholds.quality;
        let score = paper.cot_quality_assessment_suitability_score.unwrap_or(0);
        if score < threshold {
            debug!(paper_id = %paper.paper_id, score, threshold, "Below quality threshold");
            return Ok(Disposition::Skipped);
        }

        let refined = self.ctx.refined_triple(paper)?;
        let vars = TemplateVars::new()
            .with("question", refined.question.as_str())
            .with("chain_of_reasoning", refined.chain_of_reasoning.as_str())
            .with("answer", refined.answer.as_str());
        let output = self
            .ctx
            .run_step(&self.ctx.config.stages.voicing, &vars)
            .await?;

        let voiced = parse_voiced_content(&output.content)?;
        let voiced = CotTriple {
            question: String::new(),
            ..voiced
        };
        self.ctx.write_artifact(
            paper,
            ArtifactKind::CotVoicing,
            &output.preset,
            format!("{}\n\n{}", voiced.to_results_block(), output.content),
        )?;

        let example = TrainingExample::new(
            self.ctx.config.stages.system_message.as_str(),
            &refined.question,
            &voiced.chain_of_reasoning,
            &voiced.answer,
        );
        self.ctx.artifacts.write_training(&paper.paper_id, &example)?;

        store.update_paper(paper.id, PaperStatus::CotVoiced, &PaperUpdate::new())?;
        info!(paper_id = %paper.paper_id, "Voiced chain of thought");
        Ok(Disposition::Advanced)
    }
}
