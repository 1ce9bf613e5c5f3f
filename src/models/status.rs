//! Processing status of a paper.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a paper is in the pipeline.
///
/// The set is closed: the store refuses to load any other string. Each
/// LLM-driven stage has a forward status and a terminal failure status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperStatus {
    Downloaded,
    Profiled,
    FailedProfiling,
    ProfileScored,
    CotExtracted,
    FailedCotExtraction,
    CotQualityAssessed,
    FailedCotQualityAssessment,
    CotQualityScored,
    CotVoiced,
    FailedCotVoicing,
    CotVoicingAssessed,
    FailedCotVoicingAssessment,
    CotVoicingScored,
}

impl PaperStatus {
    pub const ALL: [PaperStatus; 14] = [
        Self::Downloaded,
        Self::Profiled,
        Self::FailedProfiling,
        Self::ProfileScored,
        Self::CotExtracted,
        Self::FailedCotExtraction,
        Self::CotQualityAssessed,
        Self::FailedCotQualityAssessment,
        Self::CotQualityScored,
        Self::CotVoiced,
        Self::FailedCotVoicing,
        Self::CotVoicingAssessed,
        Self::FailedCotVoicingAssessment,
        Self::CotVoicingScored,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Downloaded => "downloaded",
            Self::Profiled => "profiled",
            Self::FailedProfiling => "failed_profiling",
            Self::ProfileScored => "profile_scored",
            Self::CotExtracted => "cot_extracted",
            Self::FailedCotExtraction => "failed_cot_extraction",
            Self::CotQualityAssessed => "cot_quality_assessed",
            Self::FailedCotQualityAssessment => "failed_cot_quality_assessment",
            Self::CotQualityScored => "cot_quality_scored",
            Self::CotVoiced => "cot_voiced",
            Self::FailedCotVoicing => "failed_cot_voicing",
            Self::CotVoicingAssessed => "cot_voicing_assessed",
            Self::FailedCotVoicingAssessment => "failed_cot_voicing_assessment",
            Self::CotVoicingScored => "cot_voicing_scored",
        }
    }

    /// Failure statuses are terminal for automatic processing.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::FailedProfiling
                | Self::FailedCotExtraction
                | Self::FailedCotQualityAssessment
                | Self::FailedCotVoicing
                | Self::FailedCotVoicingAssessment
        )
    }
}

impl fmt::Display for PaperStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown processing status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for PaperStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

impl ToSql for PaperStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for PaperStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        s.parse().map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}
