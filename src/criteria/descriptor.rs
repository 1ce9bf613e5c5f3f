//! Typed per-stage rubric descriptors.

use crate::models::PaperStatus;

/// Everything the evaluator, scorer and store need to know about one rubric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDescriptor {
    /// Stage label used in logs and errors
    pub name: &'static str,

    /// Every recognized criterion, in rubric order
    pub criteria: &'static [&'static str],

    /// Criteria that must all be 1 for a non-zero score
    pub required: &'static [&'static str],

    /// Prefix of the criteria columns on the papers table
    pub column_prefix: &'static str,

    /// Status of papers waiting to be scored
    pub input_status: PaperStatus,

    /// Status written once the score is stored
    pub scored_status: PaperStatus,

    /// Column holding the suitability score
    pub score_column: &'static str,
}

impl StageDescriptor {
    /// Storage column for one criterion.
    pub fn column(&self, criterion: &str) -> String {
        format!("{}{}", self.column_prefix, criterion)
    }

    /// All criteria columns, in rubric order.
    pub fn columns(&self) -> Vec<String> {
        self.criteria.iter().map(|c| self.column(c)).collect()
    }

    pub fn is_required(&self, criterion: &str) -> bool {
        self.required.contains(&criterion)
    }

    /// Highest score a paper can reach on this rubric.
    pub fn max_score(&self) -> u32 {
        self.criteria.len() as u32
    }
}

pub const PROFILING_CRITERIA: &[&str] = &[
    "clear_question",
    "definitive_answer",
    "complex_reasoning",
    "coherent_structure",
    "layperson_comprehensible",
    "minimal_jargon",
    "illustrative_examples",
    "significant_insights",
    "verifiable_steps",
    "overall_suitability",
];

pub const REQUIRED_PROFILING_CRITERIA: &[&str] =
    &["clear_question", "definitive_answer", "complex_reasoning"];

/// Source fidelity, reasoning integrity, training utility and structure.
pub const COT_QUALITY_CRITERIA: &[&str] = &[
    "factual_accuracy",
    "source_alignment",
    "no_hallucinated_content",
    "logical_flow",
    "step_completeness",
    "valid_inferences",
    "assumptions_stated",
    "question_clarity",
    "answer_correctness",
    "answer_supported_by_reasoning",
    "generalizable_reasoning",
    "appropriate_difficulty",
    "self_contained",
    "consistent_terminology",
    "concise_steps",
    "well_formatted",
];

pub const REQUIRED_COT_QUALITY_CRITERIA: &[&str] = &[
    "factual_accuracy",
    "logical_flow",
    "answer_correctness",
    "answer_supported_by_reasoning",
];

pub const COT_VOICING_CRITERIA: &[&str] = &[
    "first_person_voice",
    "natural_thought_flow",
    "preserves_reasoning_steps",
    "preserves_factual_content",
    "preserves_answer",
    "no_source_references",
    "exploratory_tone",
    "consistent_voice",
    "readable_narrative",
    "answer_matches_original",
];

pub const REQUIRED_COT_VOICING_CRITERIA: &[&str] = &[
    "preserves_reasoning_steps",
    "preserves_factual_content",
    "preserves_answer",
];

/// Paper profiling rubric.
pub const PROFILE: StageDescriptor = StageDescriptor {
    name: "profile",
    criteria: PROFILING_CRITERIA,
    required: REQUIRED_PROFILING_CRITERIA,
    column_prefix: "profiler_criteria_",
    input_status: PaperStatus::Profiled,
    scored_status: PaperStatus::ProfileScored,
    score_column: "profiler_suitability_score",
};

/// Chain-of-thought quality rubric.
pub const COT_QUALITY: StageDescriptor = StageDescriptor {
    name: "cot_quality",
    criteria: COT_QUALITY_CRITERIA,
    required: REQUIRED_COT_QUALITY_CRITERIA,
    column_prefix: "cot_quality_assessment_criteria_",
    input_status: PaperStatus::CotQualityAssessed,
    scored_status: PaperStatus::CotQualityScored,
    score_column: "cot_quality_assessment_suitability_score",
};

/// Voicing faithfulness rubric.
pub const COT_VOICING: StageDescriptor = StageDescriptor {
    name: "cot_voicing",
    criteria: COT_VOICING_CRITERIA,
    required: REQUIRED_COT_VOICING_CRITERIA,
    column_prefix: "cot_voicing_assessment_",
    input_status: PaperStatus::CotVoicingAssessed,
    scored_status: PaperStatus::CotVoicingScored,
    score_column: "cot_voicing_assessment_suitability_score",
};

pub const ALL_DESCRIPTORS: [&StageDescriptor; 3] = [&PROFILE, &COT_QUALITY, &COT_VOICING];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_required_is_subset_of_criteria() {
        for descriptor in ALL_DESCRIPTORS {
            for required in descriptor.required {
                assert!(
                    descriptor.criteria.contains(required),
                    "{}: {required} not in rubric",
                    descriptor.name
                );
            }
        }
    }

    #[test]
    fn test_columns_are_unique_across_stages() {
        let mut seen = HashSet::new();
        for descriptor in ALL_DESCRIPTORS {
            for column in descriptor.columns() {
                assert!(seen.insert(column.clone()), "duplicate column {column}");
            }
            assert!(seen.insert(descriptor.score_column.to_string()));
        }
    }

    #[test]
    fn test_profile_column_names() {
        assert_eq!(PROFILE.column("clear_question"), "profiler_criteria_clear_question");
        assert_eq!(PROFILE.max_score(), 10);
        assert!(PROFILE.is_required("definitive_answer"));
        assert!(!PROFILE.is_required("minimal_jargon"));
    }
}
