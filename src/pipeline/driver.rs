//! End-to-end run: every stage once, in state-machine order.

use super::training::{TrainingDataGenerator, TrainingStats};
use crate::catalog::CancellationToken;
use crate::criteria::{COT_QUALITY, COT_VOICING, PROFILE};
use crate::models::Result;
use crate::stages::{
    BatchOptions, BatchReport, CotExtractor, CotQualityAssessor, CotVoicer, CotVoicingAssessor,
    PaperProfiler, ScoreRunner, StageContext, StageRunner, run_stage,
};
use crate::store::PaperStore;
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub stages: Vec<BatchReport>,
    /// `None` when the run stopped before training generation
    pub training: Option<TrainingStats>,
    pub cancelled: bool,
    pub runtime_secs: f64,
}

pub struct PipelineDriver {
    ctx: StageContext,
}

impl PipelineDriver {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    /// Profiling takes `options` as given; later stages process every
    /// paper waiting in their input status.
    pub async fn run(
        &self,
        store: &PaperStore,
        cancel: &CancellationToken,
        options: &BatchOptions,
    ) -> Result<PipelineReport> {
        let start = Instant::now();
        let rest = BatchOptions {
            limit: None,
            strategy: Default::default(),
            show_progress: options.show_progress,
        };

        let ctx = &self.ctx;
        let stages: Vec<(Box<dyn StageRunner>, &BatchOptions)> = vec![
            (Box::new(PaperProfiler::new(ctx.clone())), options),
            (Box::new(ScoreRunner::new(&PROFILE)), &rest),
            (Box::new(CotExtractor::new(ctx.clone())), &rest),
            (Box::new(CotQualityAssessor::new(ctx.clone())), &rest),
            (Box::new(ScoreRunner::new(&COT_QUALITY)), &rest),
            (Box::new(CotVoicer::new(ctx.clone())), &rest),
            (Box::new(CotVoicingAssessor::new(ctx.clone())), &rest),
            (Box::new(ScoreRunner::new(&COT_VOICING)), &rest),
        ];

        let mut report = PipelineReport::default();
        for (runner, batch) in &stages {
            if cancel.is_cancelled() {
                break;
            }
            let stage = run_stage(runner.as_ref(), store, cancel, batch).await?;
            report.stages.push(stage);
        }

        if cancel.is_cancelled() {
            warn!(completed = report.stages.len(), "Pipeline interrupted");
            report.cancelled = true;
        } else {
            let generator = TrainingDataGenerator::new(ctx.config.clone(), ctx.artifacts.clone());
            let training = generator.run(store, cancel)?;
            report.cancelled = training.cancelled;
            report.training = Some(training);
        }

        report.runtime_secs = start.elapsed().as_secs_f64();
        info!(
            stages = report.stages.len(),
            written = report.training.as_ref().map_or(0, |t| t.written),
            runtime_secs = format!("{:.1}", report.runtime_secs),
            "Pipeline complete"
        );
        Ok(report)
    }
}
