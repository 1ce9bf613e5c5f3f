//! Pure scoring stages: stored criteria in, suitability score out.

use super::{Disposition, StageRunner};
use crate::criteria::{StageDescriptor, suitability_score};
use crate::models::{Paper, PaperStatus, Result};
use crate::store::{PaperStore, PaperUpdate};
use async_trait::async_trait;
use tracing::debug;

/// Scores every paper waiting in `descriptor.input_status`.
///
/// No model calls. A NULL criteria column is a store contract violation and
/// aborts the batch; papers already scored keep their new status.
pub struct ScoreRunner {
    descriptor: &'static StageDescriptor,
}

impl ScoreRunner {
    pub fn new(descriptor: &'static StageDescriptor) -> Self {
        Self { descriptor }
    }
}

#[async_trait(?Send)]
impl StageRunner for ScoreRunner {
    fn name(&self) -> &'static str {
        self.descriptor.name
    }

    fn input_status(&self) -> PaperStatus {
        self.descriptor.input_status
    }

    fn failure_status(&self) -> Option<PaperStatus> {
        None
    }

    fn log_every(&self) -> usize {
        1000
    }

    async fn process(&self, store: &PaperStore, paper: &Paper) -> Result<Disposition> {
        let criteria = store.load_criteria(paper, self.descriptor)?;
        let score = suitability_score(self.descriptor, &criteria)?;
        store.update_paper(
            paper.id,
            self.descriptor.scored_status,
            &PaperUpdate::new().with_score(self.descriptor, score),
        )?;
        debug!(paper_id = %paper.paper_id, stage = self.descriptor.name, score, "Scored");
        Ok(Disposition::Advanced)
    }
}
