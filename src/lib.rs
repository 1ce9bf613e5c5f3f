//! raspberry - chain-of-thought training data from arXiv papers.
//!
//! ## Architecture
//!
//! Papers move through a persistent state machine stored in SQLite:
//!
//! - **Catalog**: harvest arXiv listings per category into the store
//! - **Stages**: profile, extract, assess, voice, each an LLM call per paper
//! - **Scorers**: turn stored rubric answers into suitability scores
//! - **Training**: consolidate voiced, well-scored examples into a corpus
//!
//! Every stage reads papers in one status and writes the next, so any
//! stage can be rerun in isolation and an interrupted run resumes where it
//! stopped.

pub mod artifact;
pub mod catalog;
pub mod client;
pub mod criteria;
pub mod markup;
pub mod models;
pub mod pipeline;
pub mod stages;
pub mod store;

// Re-exports for convenience
pub use artifact::{ArtifactKind, ArtifactStore, CorpusWriter};
pub use catalog::{CancellationToken, CatalogFetcher, FetchSummary};
pub use client::{LlmClient, LlmTemplateRunner, PaperTextSource, PdftotextExtractor, RateLimiter};
pub use models::{Config, Paper, PaperStatus, PipelineError, Result, TrainingExample};
pub use pipeline::{PipelineDriver, PipelineReport, TrainingDataGenerator, TrainingStats};
pub use stages::{BatchOptions, BatchReport, StageContext, run_stage};
pub use store::{PaperStore, SelectionStrategy};
