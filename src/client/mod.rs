//! External collaborators: the LLM backend, prompt templates and paper text.

mod llm_client;
mod pdf;
mod rate_limiter;
mod templates;

pub use llm_client::{Completion, LlmClient, Message};
pub use pdf::{PaperTextSource, PdfTextExtractor, PdftotextExtractor};
pub use rate_limiter::{RateLimiter, RateLimiterStats};
pub use templates::{
    LlmTemplateRunner, TemplateOutput, TemplateOverrides, TemplateRunner, TemplateVars, render,
};

#[cfg(test)]
pub(crate) use pdf::tests::FixedExtractor;
