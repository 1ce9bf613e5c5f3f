//! LLM assessment of the refined and voiced chains of thought.
//!
//! cot_extracted -> cot_quality_assessed | failed_cot_quality_assessment
//! cot_voiced -> cot_voicing_assessed | failed_cot_voicing_assessment

use super::{Disposition, StageContext, StageRunner};
use crate::artifact::ArtifactKind;
use crate::client::TemplateVars;
use crate::criteria::{COT_QUALITY, COT_VOICING, StageDescriptor, evaluate};
use crate::markup::{extract_results_block, parse_cot_triple};
use crate::models::{CriteriaError, Paper, PaperStatus, Result, StepConfig};
use crate::store::{PaperStore, PaperUpdate};
use async_trait::async_trait;
use tracing::debug;

/// Run one rubric step, keep its artifact, and store the criteria.
#[allow(clippy::too_many_arguments)]
async fn assess(
    ctx: &StageContext,
    store: &PaperStore,
    paper: &Paper,
    step: &StepConfig,
    vars: &TemplateVars,
    descriptor: &StageDescriptor,
    kind: ArtifactKind,
    next: PaperStatus,
) -> Result<Disposition> {
    let output = ctx.run_step(step, vars).await?;
    let block = extract_results_block(&output.content).ok_or(CriteriaError::MissingResults)?;
    let criteria = evaluate(descriptor, block)?;

    ctx.write_artifact(
        paper,
        kind,
        &output.preset,
        format!(
            "Criteria:\n{}\n\n{}",
            criteria.render_rubric(descriptor),
            output.content
        ),
    )?;
    store.update_paper(
        paper.id,
        next,
        &PaperUpdate::new().with_criteria(descriptor, &criteria),
    )?;

    debug!(paper_id = %paper.paper_id, stage = descriptor.name, "Assessed");
    Ok(Disposition::Advanced)
}

/// Grades the refined triple against the source paper.
pub struct CotQualityAssessor {
    ctx: StageContext,
}

impl CotQualityAssessor {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }
}

#[async_trait(?Send)]
impl StageRunner for CotQualityAssessor {
    fn name(&self) -> &'static str {
        "assess-quality"
    }

    fn input_status(&self) -> PaperStatus {
        PaperStatus::CotExtracted
    }

    fn failure_status(&self) -> Option<PaperStatus> {
        Some(PaperStatus::FailedCotQualityAssessment)
    }

    async fn process(&self, store: &PaperStore, paper: &Paper) -> Result<Disposition> {
        let triple = self.ctx.refined_triple(paper)?;
        let text = self.ctx.texts.text_for(paper).await?;
        let vars = TemplateVars::new()
            .with("paper", text)
            .with("question", triple.question)
            .with("chain_of_reasoning", triple.chain_of_reasoning)
            .with("answer", triple.answer);

        assess(
            &self.ctx,
            store,
            paper,
            &self.ctx.config.stages.quality_assessment,
            &vars,
            &COT_QUALITY,
            ArtifactKind::CotQualityAssessment,
            PaperStatus::CotQualityAssessed,
        )
        .await
    }
}

/// Checks that voicing kept the reasoning and answer of the refined triple.
pub struct CotVoicingAssessor {
    ctx: StageContext,
}

impl CotVoicingAssessor {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }
}

#[async_trait(?Send)]
impl StageRunner for CotVoicingAssessor {
    fn name(&self) -> &'static str {
        "assess-voicing"
    }

    fn input_status(&self) -> PaperStatus {
        PaperStatus::CotVoiced
    }

    fn failure_status(&self) -> Option<PaperStatus> {
        Some(PaperStatus::FailedCotVoicingAssessment)
    }

    async fn process(&self, store: &PaperStore, paper: &Paper) -> Result<Disposition> {
        let refined = self.ctx.refined_triple(paper)?;
        let voicing = self
            .ctx
            .artifacts
            .read_document(&paper.paper_id, ArtifactKind::CotVoicing)?;
        let voiced = parse_cot_triple(&voicing.body)?;

        let vars = TemplateVars::new()
            .with("question", refined.question)
            .with("chain_of_reasoning", refined.chain_of_reasoning)
            .with("answer", refined.answer)
            .with("voiced_chain_of_reasoning", voiced.chain_of_reasoning)
            .with("voiced_answer", voiced.answer);

        assess(
            &self.ctx,
            store,
            paper,
            &self.ctx.config.stages.voicing_assessment,
            &vars,
            &COT_VOICING,
            ArtifactKind::CotVoicingAssessment,
            PaperStatus::CotVoicingAssessed,
        )
        .await
    }
}
