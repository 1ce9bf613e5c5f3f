//! Per-paper artifact files and the consolidated training corpus.

mod corpus;
mod document;
mod store;

pub use corpus::CorpusWriter;
pub use document::ArtifactDocument;
pub use store::{ArtifactKind, ArtifactStore, artifact_name};
