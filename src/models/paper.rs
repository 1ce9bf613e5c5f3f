//! Paper and training example types.
//!
//! These are the records that flow between the store, the stage runners
//! and the corpus writer.

use super::PaperStatus;
use serde::{Deserialize, Serialize};

/// One paper as stored in the pipeline database.
///
/// Scores are `None` until the corresponding scorer has run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paper {
    /// Surrogate key
    pub id: i64,

    /// arXiv identifier, e.g. "2001.00001v1"
    pub paper_id: String,

    /// Canonical PDF URL
    pub paper_url: String,

    pub processing_status: PaperStatus,

    #[serde(default)]
    pub profiler_suitability_score: Option<u32>,

    #[serde(default)]
    pub cot_quality_assessment_suitability_score: Option<u32>,

    #[serde(default)]
    pub cot_voicing_assessment_suitability_score: Option<u32>,
}

/// A catalog entry ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveredPaper {
    pub paper_id: String,
    pub paper_url: String,
}

/// A question / chain of reasoning / answer triple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CotTriple {
    /// Empty for voiced content, which only rewrites reasoning and answer
    pub question: String,
    pub chain_of_reasoning: String,
    pub answer: String,
}

impl CotTriple {
    /// Render as a `<results>` block that `parse_cot_triple` reads back.
    pub fn to_results_block(&self) -> String {
        use quick_xml::escape::escape;

        let mut block = String::from("<results>\n");
        if !self.question.is_empty() {
            block.push_str(&format!("<question>\n{}\n</question>\n", escape(&self.question)));
        }
        block.push_str(&format!(
            "<chain_of_reasoning>\n{}\n</chain_of_reasoning>\n",
            escape(&self.chain_of_reasoning)
        ));
        block.push_str(&format!("<answer>\n{}\n</answer>\n", escape(&self.answer)));
        block.push_str("</results>");
        block
    }
}

/// One supervised example in {system, user, assistant} shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub system: String,
    pub user: String,
    pub assistant: String,
}

impl TrainingExample {
    /// Build from a question and (possibly voiced) reasoning and answer.
    pub fn new(
        system: impl Into<String>,
        question: &str,
        chain_of_reasoning: &str,
        answer: &str,
    ) -> Self {
        Self {
            system: system.into(),
            user: question.to_string(),
            assistant: format!("{chain_of_reasoning}\n\nAnswer: {answer}"),
        }
    }

    /// Human-readable rendering for the per-preset Markdown companions.
    pub fn to_markdown(&self, paper_id: &str, paper_url: &str) -> String {
        format!(
            "## {paper_id}\n\nPaper URL: {paper_url}\n\n### User\n\n{}\n\n### Assistant\n\n{}\n\n---\n\n",
            self.user.trim(),
            self.assistant.trim()
        )
    }

    /// Convert to chat-messages form, dropping empty roles.
    pub fn to_messages(&self) -> ChatExample {
        let messages = [
            ("system", &self.system),
            ("user", &self.user),
            ("assistant", &self.assistant),
        ]
        .into_iter()
        .filter(|(_, content)| !content.is_empty())
        .map(|(role, content)| ChatTurn {
            role: role.to_string(),
            content: content.clone(),
        })
        .collect();

        ChatExample { messages }
    }
}

/// Chat-format training record (`{"messages": [...]}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatExample {
    pub messages: Vec<ChatTurn>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}
