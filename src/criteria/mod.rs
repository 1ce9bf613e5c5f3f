//! Criteria evaluation and suitability scoring.
//!
//! Each LLM-assessed stage answers a fixed rubric of yes/no criteria. A
//! [`StageDescriptor`] names the rubric, the required subset that gates the
//! score, and where the values live on the paper record.

mod descriptor;
mod evaluator;
mod scorer;

pub use descriptor::*;
pub use evaluator::*;
pub use scorer::*;
