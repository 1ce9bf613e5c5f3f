//! Whole-run orchestration and training corpus output.

mod driver;
mod prepare;
mod training;

pub use driver::{PipelineDriver, PipelineReport};
pub use prepare::{
    SplitSummary, TRAINING_SPLIT_FILE, VALIDATION_SPLIT_FILE, load_examples, prepare_training_data,
};
pub use training::{TrainingDataGenerator, TrainingStats};
