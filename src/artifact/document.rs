//! `Key: Value` header block followed by free text.

use regex::Regex;
use std::sync::LazyLock;

static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9 _-]*): (.*)$").expect("valid header regex")
});

/// An artifact as written to disk: headers, a blank line, then the body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactDocument {
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl ArtifactDocument {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// First header named `key`, case-insensitively.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn render(&self) -> String {
        if self.headers.is_empty() {
            return self.body.clone();
        }
        let mut out = String::new();
        for (key, value) in &self.headers {
            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out
    }

    /// Split a rendered document back into headers and body.
    ///
    /// Headers only count when every line up to the first blank line is one;
    /// otherwise the whole text is body.
    pub fn parse(text: &str) -> Self {
        let Some((head, body)) = text.split_once("\n\n") else {
            return Self::new(text);
        };

        let mut headers = Vec::new();
        for line in head.lines() {
            match HEADER.captures(line) {
                Some(caps) => headers.push((caps[1].to_string(), caps[2].trim().to_string())),
                None => return Self::new(text),
            }
        }

        Self {
            headers,
            body: body.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_then_parse() {
        let doc = ArtifactDocument::new("<results>\n</results>\n")
            .with_header("Paper URL", "https://export.arxiv.org/pdf/2001.00001v1.pdf")
            .with_header("Model preset", "default");

        let parsed = ArtifactDocument::parse(&doc.render());
        assert_eq!(parsed, doc);
        assert_eq!(parsed.header("model preset"), Some("default"));
    }

    #[test]
    fn test_plain_text_has_no_headers() {
        let text = "The model answered:\n<results>\n\n</results>";
        let doc = ArtifactDocument::parse(text);
        assert!(doc.headers.is_empty());
        assert_eq!(doc.body, text);
    }

    #[test]
    fn test_body_keeps_colons() {
        let text = "Paper: 2001.00001v1\n\nStep 1: assume x.\n\nStep 2: done";
        let doc = ArtifactDocument::parse(text);
        assert_eq!(doc.header("Paper"), Some("2001.00001v1"));
        assert_eq!(doc.body, "Step 1: assume x.\n\nStep 2: done");
    }
}
