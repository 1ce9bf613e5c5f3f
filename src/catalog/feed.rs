//! arXiv Atom feed parsing.

use crate::models::CatalogError;
use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

/// One `<entry>` of a search result page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    /// Abstract URL, e.g. `http://arxiv.org/abs/2001.00001v1`
    pub id: String,
    pub updated: DateTime<Utc>,
    /// Href of the `title="pdf"` link, if the entry has one
    pub pdf_link: Option<String>,
}

/// A parsed search result page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Feed {
    /// `opensearch:totalResults`
    pub total_results: Option<u64>,
    pub entries: Vec<FeedEntry>,
}

#[derive(Default)]
struct PartialEntry {
    id: String,
    updated: String,
    title: String,
    summary: String,
    pdf_link: Option<String>,
}

/// `(cat:a OR cat:b)`; a single category is still parenthesized.
pub fn build_search_query<S: AsRef<str>>(categories: &[S]) -> String {
    let terms: Vec<String> = categories
        .iter()
        .map(|c| format!("cat:{}", c.as_ref()))
        .collect();
    format!("({})", terms.join(" OR "))
}

/// Last path segment of an entry id.
pub fn paper_id_from_entry(id: &str) -> String {
    id.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(id)
        .to_string()
}

/// Rebase a PDF link onto the export host, ensuring a `.pdf` suffix.
pub fn canonical_pdf_url(export_base: &str, link: &str) -> String {
    let path = match reqwest::Url::parse(link) {
        Ok(url) => url.path().to_string(),
        Err(_) => link.to_string(),
    };
    let path = path.trim_start_matches('/');
    let base = export_base.trim_end_matches('/');
    if path.ends_with(".pdf") {
        format!("{base}/{path}")
    } else {
        format!("{base}/{path}.pdf")
    }
}

fn malformed(e: impl std::fmt::Display) -> CatalogError {
    CatalogError::MalformedFeed(e.to_string())
}

fn pdf_href(element: &BytesStart<'_>) -> Result<Option<String>, CatalogError> {
    let mut href = None;
    let mut titled_pdf = false;
    let mut typed_pdf = false;
    for attr in element.attributes() {
        let attr = attr.map_err(malformed)?;
        let value = attr.unescape_value().map_err(malformed)?;
        match attr.key.local_name().as_ref() {
            b"href" => href = Some(value.into_owned()),
            b"title" => titled_pdf = value == "pdf",
            b"type" => typed_pdf = value == "application/pdf",
            _ => {}
        }
    }
    Ok(href.filter(|_| titled_pdf && typed_pdf))
}

fn finish_entry(entry: PartialEntry) -> Result<FeedEntry, CatalogError> {
    if entry.id.contains("/api/errors") {
        let message = if entry.summary.is_empty() {
            entry.title
        } else {
            entry.summary
        };
        return Err(CatalogError::ApiError(message));
    }
    if entry.id.is_empty() {
        return Err(malformed("entry without <id>"));
    }
    let updated = DateTime::parse_from_rfc3339(&entry.updated)
        .map_err(|e| malformed(format!("entry {}: bad <updated> '{}': {e}", entry.id, entry.updated)))?
        .with_timezone(&Utc);

    Ok(FeedEntry {
        id: entry.id,
        updated,
        pdf_link: entry.pdf_link,
    })
}

/// Parse one page of the export API.
///
/// Documents that are not well-formed, truncated, or lack a `<feed>` root
/// are [`CatalogError::MalformedFeed`]; error feeds become
/// [`CatalogError::ApiError`].
pub fn parse_feed(xml: &str) -> Result<Feed, CatalogError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut feed = Feed::default();
    let mut stack: Vec<String> = Vec::new();
    let mut entry: Option<PartialEntry> = None;
    let mut saw_root = false;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if stack.is_empty() {
                    if name != "feed" {
                        return Err(malformed(format!("unexpected root <{name}>")));
                    }
                    saw_root = true;
                }
                if name == "entry" && stack.len() == 1 {
                    entry = Some(PartialEntry::default());
                }
                if name == "link" {
                    if let (Some(current), Some(href)) = (entry.as_mut(), pdf_href(&e)?) {
                        current.pdf_link = Some(href);
                    }
                }
                stack.push(name);
            }
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"link" {
                    if let (Some(current), Some(href)) = (entry.as_mut(), pdf_href(&e)?) {
                        current.pdf_link = Some(href);
                    }
                }
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(malformed)?;
                let Some(name) = stack.last() else { continue };
                match (stack.len(), entry.as_mut()) {
                    (2, _) if name == "totalResults" => {
                        let total = text
                            .trim()
                            .parse::<u64>()
                            .map_err(|e| malformed(format!("totalResults '{text}': {e}")))?;
                        feed.total_results = Some(total);
                    }
                    (3, Some(current)) => match name.as_str() {
                        "id" => current.id.push_str(text.trim()),
                        "updated" => current.updated.push_str(text.trim()),
                        "title" => current.title.push_str(text.trim()),
                        "summary" => current.summary.push_str(text.trim()),
                        _ => {}
                    },
                    _ => {}
                }
            }
            Event::End(_) => {
                let closed = stack.pop();
                if closed.as_deref() == Some("entry") && stack.len() == 1 {
                    if let Some(done) = entry.take() {
                        feed.entries.push(finish_entry(done)?);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(malformed("no <feed> element"));
    }
    if !stack.is_empty() {
        return Err(malformed(format!("document ends inside <{}>", stack.join("><"))));
    }
    Ok(feed)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a feed document from `(id, updated)` pairs.
    pub(crate) fn feed_xml(total: u64, entries: &[(&str, &str)]) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/">
  <title type="html">ArXiv Query</title>
"#,
        );
        xml.push_str(&format!("  <opensearch:totalResults>{total}</opensearch:totalResults>\n"));
        for (id, updated) in entries {
            xml.push_str(&format!(
                r#"  <entry>
    <id>http://arxiv.org/abs/{id}</id>
    <updated>{updated}</updated>
    <title>Paper {id}</title>
    <link href="http://arxiv.org/abs/{id}" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/{id}" rel="related" type="application/pdf"/>
  </entry>
"#
            ));
        }
        xml.push_str("</feed>\n");
        xml
    }

    #[test]
    fn test_parse_entries() {
        let xml = feed_xml(
            3,
            &[
                ("2001.00001v1", "2020-01-01T10:00:00Z"),
                ("2001.00002v2", "2020-01-01T12:30:00Z"),
            ],
        );
        let feed = parse_feed(&xml).unwrap();

        assert_eq!(feed.total_results, Some(3));
        assert_eq!(feed.entries.len(), 2);
        assert_eq!(feed.entries[0].id, "http://arxiv.org/abs/2001.00001v1");
        assert_eq!(
            feed.entries[1].pdf_link.as_deref(),
            Some("http://arxiv.org/pdf/2001.00002v2")
        );
        assert_eq!(
            feed.entries[1].updated.date_naive(),
            chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
        );
    }

    #[test]
    fn test_empty_feed() {
        let feed = parse_feed(&feed_xml(0, &[])).unwrap();
        assert_eq!(feed.total_results, Some(0));
        assert!(feed.entries.is_empty());
    }

    #[test]
    fn test_error_feed() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <opensearch:totalResults xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/">1</opensearch:totalResults>
  <entry>
    <id>http://arxiv.org/api/errors#incorrect_id_format_for_1234</id>
    <title>Error</title>
    <summary>incorrect id format for 1234</summary>
    <updated>2020-01-01T00:00:00-05:00</updated>
  </entry>
</feed>"#;
        let err = parse_feed(xml).unwrap_err();
        assert!(matches!(err, CatalogError::ApiError(ref m) if m == "incorrect id format for 1234"));
        assert!(err.is_feed_error());
    }

    #[test]
    fn test_truncated_and_garbage_documents() {
        let xml = feed_xml(1, &[("2001.00001v1", "2020-01-01T10:00:00Z")]);
        let truncated = &xml[..xml.len() / 2];
        assert!(matches!(
            parse_feed(truncated),
            Err(CatalogError::MalformedFeed(_))
        ));
        assert!(matches!(
            parse_feed("Internal Server Error"),
            Err(CatalogError::MalformedFeed(_))
        ));
        assert!(matches!(
            parse_feed("<html><body>busy</body></html>"),
            Err(CatalogError::MalformedFeed(_))
        ));
    }

    #[test]
    fn test_pdf_link_needs_title_and_type() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/abs/2001.00001v1</id>
    <updated>2020-01-01T10:00:00Z</updated>
    <link title="pdf" href="http://arxiv.org/pdf/2001.00001v1" rel="related"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2001.00002v1</id>
    <updated>2020-01-01T11:00:00Z</updated>
    <link href="http://arxiv.org/pdf/2001.00002v1" rel="related" type="application/pdf"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2001.00003v1</id>
    <updated>2020-01-01T12:00:00Z</updated>
    <link title="pdf" href="http://arxiv.org/pdf/2001.00003v1" rel="related" type="application/pdf"/>
  </entry>
</feed>"#;
        let feed = parse_feed(xml).unwrap();
        let links: Vec<_> = feed.entries.iter().map(|e| e.pdf_link.as_deref()).collect();
        assert_eq!(links, vec![None, None, Some("http://arxiv.org/pdf/2001.00003v1")]);
    }

    #[test]
    fn test_search_query() {
        assert_eq!(build_search_query(&["cs.AI"]), "(cat:cs.AI)");
        assert_eq!(
            build_search_query(&["cs.AI", "math.CO"]),
            "(cat:cs.AI OR cat:math.CO)"
        );
    }

    #[test]
    fn test_identifiers_and_urls() {
        assert_eq!(
            paper_id_from_entry("http://arxiv.org/abs/2001.00001v1"),
            "2001.00001v1"
        );
        assert_eq!(
            canonical_pdf_url("https://export.arxiv.org/", "http://arxiv.org/pdf/2001.00001v1"),
            "https://export.arxiv.org/pdf/2001.00001v1.pdf"
        );
        assert_eq!(
            canonical_pdf_url("https://export.arxiv.org", "http://arxiv.org/pdf/2001.00001v1.pdf"),
            "https://export.arxiv.org/pdf/2001.00001v1.pdf"
        );
    }
}
