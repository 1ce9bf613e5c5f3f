//! Suitability scoring.

use super::{CriteriaSet, StageDescriptor};
use crate::models::CriteriaError;

/// Gate on the required subset, then sum the full rubric.
///
/// Any required criterion at 0 yields 0. Otherwise the score is the sum of
/// every criterion in the rubric, required ones included. A criterion absent
/// from `criteria` is a lookup failure, never an implicit 0.
pub fn suitability_score(
    descriptor: &StageDescriptor,
    criteria: &CriteriaSet,
) -> Result<u32, CriteriaError> {
    let lookup = |name: &str| {
        criteria
            .get(name)
            .ok_or_else(|| CriteriaError::MissingValue {
                stage: descriptor.name.to_string(),
                criterion: name.to_string(),
            })
    };

    for name in descriptor.required {
        if lookup(*name)? == 0 {
            return Ok(0);
        }
    }

    let mut score = 0u32;
    for name in descriptor.criteria {
        score += u32::from(lookup(*name)?);
    }
    Ok(score)
}
