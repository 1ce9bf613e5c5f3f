//! downloaded -> profiled | failed_profiling

use super::{Disposition, StageContext, StageRunner};
use crate::artifact::ArtifactKind;
use crate::client::TemplateVars;
use crate::criteria::{PROFILE, evaluate};
use crate::markup::extract_results_block;
use crate::models::{CriteriaError, Paper, PaperStatus, Result};
use crate::store::{PaperStore, PaperUpdate};
use async_trait::async_trait;
use tracing::debug;

/// Asks the model whether a paper can yield a self-contained reasoning
/// question, and stores its answers to the profiling rubric.
pub struct PaperProfiler {
    ctx: StageContext,
}

impl PaperProfiler {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }
}

#[async_trait(?Send)]
impl StageRunner for PaperProfiler {
    fn name(&self) -> &'static str {
        "profile"
    }

    fn input_status(&self) -> PaperStatus {
        PaperStatus::Downloaded
    }

    fn failure_status(&self) -> Option<PaperStatus> {
        Some(PaperStatus::FailedProfiling)
    }

    async fn process(&self, store: &PaperStore, paper: &Paper) -> Result<Disposition> {
        let text = self.ctx.texts.text_for(paper).await?;
        let vars = TemplateVars::new().with("paper", text);
        let output = self
            .ctx
            .run_step(&self.ctx.config.stages.profiling, &vars)
            .await?;

        let block = extract_results_block(&output.content).ok_or(CriteriaError::MissingResults)?;
        let criteria = evaluate(&PROFILE, block)?;

        self.ctx.write_artifact(
            paper,
            ArtifactKind::Profiling,
            &output.preset,
            format!(
                "Criteria:\n{}\n\n{}",
                criteria.render_rubric(&PROFILE),
                output.content
            ),
        )?;
        store.update_paper(
            paper.id,
            PaperStatus::Profiled,
            &PaperUpdate::new().with_criteria(&PROFILE, &criteria),
        )?;

        debug!(paper_id = %paper.paper_id, "Profiled");
        Ok(Disposition::Advanced)
    }
}
