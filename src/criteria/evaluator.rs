//! Parse a `<results>` block into a complete criteria set.

use super::StageDescriptor;
use crate::markup::extract_tag;
use crate::models::CriteriaError;

/// Ordered criterion-name to 0/1 mapping for one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CriteriaSet {
    values: Vec<(String, u8)>,
}

impl CriteriaSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value, replacing any earlier one for the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: u8) {
        let name = name.into();
        let value = u8::from(value != 0);
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<u8> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u8)> {
        self.values.iter().map(|(n, v)| (n.as_str(), *v))
    }

    /// Column-prefixed values ready for `PaperUpdate`.
    pub fn columns(&self, descriptor: &StageDescriptor) -> Vec<(String, i64)> {
        self.iter()
            .map(|(name, value)| (descriptor.column(name), i64::from(value)))
            .collect()
    }

    /// `name: Yes|No` lines in rubric order, for artifacts.
    pub fn render_rubric(&self, descriptor: &StageDescriptor) -> String {
        descriptor
            .criteria
            .iter()
            .map(|name| {
                let answer = match self.get(name) {
                    Some(1) => "Yes",
                    Some(_) => "No",
                    None => "(missing)",
                };
                format!("  {name}: {answer}")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl<S: Into<String>> FromIterator<(S, u8)> for CriteriaSet {
    fn from_iter<I: IntoIterator<Item = (S, u8)>>(iter: I) -> Self {
        let mut set = CriteriaSet::new();
        for (name, value) in iter {
            set.insert(name, value);
        }
        set
    }
}

/// Interpret one criterion answer: "yes" or "y" (any case) is 1.
pub fn parse_flag(value: &str) -> u8 {
    let value = value.trim().to_ascii_lowercase();
    u8::from(value == "yes" || value == "y")
}

/// Read every criterion of `descriptor` from a `<results>` block.
///
/// Partial sets are never returned: the first criterion without an element
/// fails the whole evaluation.
pub fn evaluate(descriptor: &StageDescriptor, block: &str) -> Result<CriteriaSet, CriteriaError> {
    let mut set = CriteriaSet::new();
    for name in descriptor.criteria {
        let value = extract_tag(block, name).ok_or_else(|| CriteriaError::MissingCriterion {
            stage: descriptor.name.to_string(),
            criterion: name.to_string(),
        })?;
        set.insert(*name, parse_flag(&value));
    }
    Ok(set)
}
