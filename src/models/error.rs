//! Error types for raspberry.
//!
//! Taxonomy:
//! - Content failures: one paper's LLM output or artifacts are unusable.
//!   Stage runners route the paper to its failure status and move on.
//! - Infrastructure failures: network, timeouts, rate limits. Retried with
//!   backoff, then surfaced.
//! - Store and schema violations: abort the batch (see [`PipelineError::is_fatal`]).

use thiserror::Error;

/// Top-level error type for raspberry.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ═══════════════════════════════════════════════════════════════════
    // CONTENT — expected per-paper failures
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Response is missing <{tag}> element")]
    MissingTag { tag: String },

    #[error("Criteria error: {0}")]
    Criteria(#[from] CriteriaError),

    #[error("Artifact not found: {name}")]
    MissingArtifact { name: String },

    #[error("PDF text extraction failed: {0}")]
    PdfExtraction(String),

    // ═══════════════════════════════════════════════════════════════════
    // INFRASTRUCTURE — bounded by retry and backoff
    // ═══════════════════════════════════════════════════════════════════
    #[error("LLM API error: {0}")]
    LlmApi(#[from] LlmError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: f64 },

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Operation cancelled")]
    Cancelled,

    // ═══════════════════════════════════════════════════════════════════
    // STORE / SCHEMA — abort the batch
    // ═══════════════════════════════════════════════════════════════════
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Criteria parsing and scoring errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CriteriaError {
    /// The LLM response did not mention a criterion at all.
    #[error("{stage}: criterion '{criterion}' not found in response")]
    MissingCriterion { stage: String, criterion: String },

    /// A criteria set handed to the scorer lacks a value.
    #[error("{stage}: no value recorded for criterion '{criterion}'")]
    MissingValue { stage: String, criterion: String },

    #[error("Response contains no <results> block")]
    MissingResults,
}

/// SQLite store errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Unknown processing status '{value}'")]
    InvalidStatus { value: String },

    #[error("Unknown papers column '{0}'")]
    UnknownColumn(String),

    #[error("Paper {paper_id}: column '{column}' has no value")]
    MissingField { paper_id: String, column: String },

    #[error("Paper not found: {0}")]
    NotFound(String),

    #[error("Failed to create database directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// OpenAI-compatible LLM backend errors.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Rate limited by backend: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<f64>,
    },

    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

/// arXiv export API errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog returned HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Malformed feed: {0}")]
    MalformedFeed(String),

    #[error("Catalog API reported an error: {0}")]
    ApiError(String),

    #[error("Catalog request failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl CatalogError {
    /// Feed-level failures degrade the page size instead of failing the fetch.
    pub fn is_feed_error(&self) -> bool {
        matches!(self, Self::MalformedFeed(_) | Self::ApiError(_))
    }
}

impl PipelineError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Errors that must abort a whole batch instead of failing one paper.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Internal(_) | Self::Cancelled)
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::RateLimited { .. }
                | Self::Network(_)
                | Self::LlmApi(LlmError::RateLimited { .. })
                | Self::Catalog(CatalogError::HttpStatus { .. })
        )
    }

    /// Get retry delay hint in seconds, if applicable.
    pub fn retry_after(&self) -> Option<f64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            Self::LlmApi(LlmError::RateLimited {
                retry_after_secs, ..
            }) => *retry_after_secs,
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::Sqlite(e))
    }
}

/// Result type alias for raspberry.
pub type Result<T> = std::result::Result<T, PipelineError>;
