//! Paged category harvesting from the arXiv export API.

use super::CancellationToken;
use super::feed::{self, Feed};
use crate::models::{ArxivConfig, CatalogError, DiscoveredPaper, PipelineError, Result};
use crate::store::PaperStore;
use chrono::NaiveDate;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Exponential backoff bounds for page requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ArxivConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            min_backoff: Duration::from_secs(config.min_backoff_secs),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.min_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Outcome of a multi-category fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub categories_fetched: usize,
    pub categories_skipped: usize,
    pub papers: usize,
}

/// Harvests category listings and records them in the store.
pub struct CatalogFetcher {
    client: reqwest::Client,
    config: ArxivConfig,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl CatalogFetcher {
    pub fn new(config: ArxivConfig, cancel: CancellationToken) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("raspberry/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(PipelineError::Network)?;

        Ok(Self {
            client,
            retry: RetryPolicy::from_config(&config),
            config,
            cancel,
        })
    }

    /// Fetch every category in turn over the configured date window, each
    /// listing starting at offset `start`.
    pub async fn fetch_categories<S: AsRef<str>>(
        &self,
        store: &PaperStore,
        categories: &[S],
        begin: NaiveDate,
        end: NaiveDate,
        start: u64,
    ) -> Result<FetchSummary> {
        let mut summary = FetchSummary::default();

        for category in categories {
            self.cancel.checkpoint()?;
            let category = category.as_ref();

            if store.category_exists(category)? {
                info!(category, "Category already fetched, skipping");
                summary.categories_skipped += 1;
                continue;
            }

            let papers = self.fetch_category(store, category, begin, end, start).await?;
            summary.categories_fetched += 1;
            summary.papers += papers.len();
        }

        info!(
            fetched = summary.categories_fetched,
            skipped = summary.categories_skipped,
            papers = summary.papers,
            "Catalog fetch complete"
        );
        Ok(summary)
    }

    /// Page through one category's listing, keeping entries updated within
    /// `[begin, end)`.
    ///
    /// Returns nothing without touching the network when the category
    /// already has papers. The listing is saved in one transaction once the
    /// last page is in; a failed or cancelled fetch saves nothing.
    pub async fn fetch_category(
        &self,
        store: &PaperStore,
        category: &str,
        begin: NaiveDate,
        end: NaiveDate,
        start: u64,
    ) -> Result<Vec<DiscoveredPaper>> {
        if store.category_exists(category)? {
            info!(category, "Category already fetched, skipping");
            return Ok(Vec::new());
        }
        if begin > end {
            return Err(PipelineError::InvalidInput(format!(
                "begin date {begin} is after end date {end}"
            )));
        }

        info!(category, %begin, %end, "Fetching category");

        let mut offset = start;
        let mut page_size = self.config.max_results;
        let mut fallback_used = false;
        let mut empty_pages = 0u32;
        let mut seen = HashSet::new();
        let mut papers = Vec::new();

        loop {
            self.cancel.checkpoint()?;

            let feed = match self.fetch_page(category, offset, page_size).await {
                Ok(feed) => feed,
                Err(PipelineError::Catalog(e)) if e.is_feed_error() => {
                    warn!(category, offset, page_size, error = %e, "Unusable catalog page");
                    if !fallback_used && page_size > self.config.fallback_max_results {
                        page_size = self.config.fallback_max_results;
                        fallback_used = true;
                        continue;
                    }
                    if !self.note_empty_page(&mut empty_pages).await {
                        break;
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            if feed.entries.is_empty() {
                if feed.total_results.is_some_and(|total| offset >= total) {
                    break;
                }
                debug!(category, offset, "Empty catalog page");
                if !self.note_empty_page(&mut empty_pages).await {
                    break;
                }
                continue;
            }
            empty_pages = 0;

            let page = self.consume_page(&feed, begin, end);
            for paper in page.papers {
                if seen.insert(paper.paper_id.clone()) {
                    papers.push(paper);
                }
            }
            offset += page.consumed;

            debug!(category, offset, total = ?feed.total_results, kept = papers.len(), "Catalog page consumed");

            if page.reached_end {
                break;
            }
            if feed.total_results.is_some_and(|total| offset >= total) {
                break;
            }
        }

        if !papers.is_empty() {
            store.insert_papers(category, &papers)?;
        }
        info!(category, papers = papers.len(), "Category fetched");
        Ok(papers)
    }

    /// Count an empty page; false once the budget is spent.
    async fn note_empty_page(&self, empty_pages: &mut u32) -> bool {
        *empty_pages += 1;
        if *empty_pages >= self.config.max_empty_attempts {
            warn!(attempts = *empty_pages, "Too many empty catalog pages, giving up");
            return false;
        }
        tokio::time::sleep(Duration::from_millis(self.config.empty_page_delay_ms)).await;
        true
    }

    fn consume_page(&self, feed: &Feed, begin: NaiveDate, end: NaiveDate) -> ConsumedPage {
        let mut page = ConsumedPage::default();

        for entry in &feed.entries {
            let updated = entry.updated.date_naive();
            if updated >= end {
                page.reached_end = true;
                break;
            }
            page.consumed += 1;
            if updated < begin {
                continue;
            }
            let Some(link) = entry.pdf_link.as_deref() else {
                warn!(id = %entry.id, "Entry has no PDF link, skipping");
                continue;
            };
            page.papers.push(DiscoveredPaper {
                paper_id: feed::paper_id_from_entry(&entry.id),
                paper_url: feed::canonical_pdf_url(&self.config.base_url, link),
            });
        }
        page
    }

    /// Request and parse one page, retrying transport and HTTP failures.
    async fn fetch_page(&self, category: &str, offset: u64, page_size: u32) -> Result<Feed> {
        let mut last_error = String::new();

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                let backoff = self.retry.backoff(attempt);
                debug!(
                    category,
                    attempt,
                    backoff_secs = backoff.as_secs(),
                    "Retrying catalog request"
                );
                tokio::time::sleep(backoff).await;
            }

            match self.request_page(category, offset, page_size).await {
                Ok(body) => return Ok(feed::parse_feed(&body)?),
                Err(e) if e.is_retryable() => {
                    warn!(category, attempt, error = %e, "Catalog request failed");
                    last_error = match e {
                        PipelineError::Catalog(inner) => inner.to_string(),
                        other => other.to_string(),
                    };
                }
                Err(e) => return Err(e),
            }
        }

        Err(CatalogError::RetriesExhausted {
            attempts: self.retry.max_attempts,
            last_error,
        }
        .into())
    }

    async fn request_page(&self, category: &str, offset: u64, page_size: u32) -> Result<String> {
        let url = format!("{}/api/query", self.config.base_url.trim_end_matches('/'));
        let query = feed::build_search_query(&[category]);
        let start = offset.to_string();
        let max_results = page_size.to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("search_query", query.as_str()),
                ("start", start.as_str()),
                ("max_results", max_results.as_str()),
                ("sortBy", "lastUpdatedDate"),
                ("sortOrder", "ascending"),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::Timeout(Duration::from_secs(self.config.timeout_secs))
                } else {
                    PipelineError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::HttpStatus {
                status: status.as_u16(),
                url: response.url().to_string(),
            }
            .into());
        }
        Ok(response.text().await?)
    }
}

#[derive(Default)]
struct ConsumedPage {
    papers: Vec<DiscoveredPaper>,
    consumed: u64,
    reached_end: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::feed::tests::feed_xml;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn config(server: &MockServer) -> ArxivConfig {
        ArxivConfig {
            base_url: server.uri(),
            max_results: 1000,
            fallback_max_results: 100,
            max_empty_attempts: 3,
            max_retries: 3,
            min_backoff_secs: 0,
            max_backoff_secs: 0,
            empty_page_delay_ms: 0,
            timeout_secs: 5,
            ..ArxivConfig::default()
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn three_entries() -> String {
        feed_xml(
            3,
            &[
                ("2001.00001v1", "2020-01-01T08:00:00Z"),
                ("2001.00002v1", "2020-01-01T09:00:00Z"),
                ("2001.00003v1", "2020-01-02T09:00:00Z"),
            ],
        )
    }

    #[tokio::test]
    async fn test_window_stops_at_end_date() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .and(query_param("search_query", "(cat:cs.AI)"))
            .and(query_param("start", "0"))
            .and(query_param("sortBy", "lastUpdatedDate"))
            .respond_with(ResponseTemplate::new(200).set_body_string(three_entries()))
            .expect(1)
            .mount(&server)
            .await;

        let store = PaperStore::open_in_memory().unwrap();
        let fetcher = CatalogFetcher::new(config(&server), CancellationToken::new()).unwrap();
        let papers = fetcher
            .fetch_category(&store, "cs.AI", date(2020, 1, 1), date(2020, 1, 2), 0)
            .await
            .unwrap();

        let ids: Vec<_> = papers.iter().map(|p| p.paper_id.as_str()).collect();
        assert_eq!(ids, vec!["2001.00001v1", "2001.00002v1"]);
        assert_eq!(
            papers[0].paper_url,
            format!("{}/pdf/2001.00001v1.pdf", server.uri())
        );
        assert_eq!(store.count().unwrap(), 2);
        assert!(store.category_exists("cs.AI").unwrap());
    }

    #[tokio::test]
    async fn test_second_run_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .respond_with(ResponseTemplate::new(200).set_body_string(three_entries()))
            .expect(1)
            .mount(&server)
            .await;

        let store = PaperStore::open_in_memory().unwrap();
        let fetcher = CatalogFetcher::new(config(&server), CancellationToken::new()).unwrap();
        let window = (date(2020, 1, 1), date(2020, 1, 2));

        let first = fetcher
            .fetch_category(&store, "cs.AI", window.0, window.1, 0)
            .await
            .unwrap();
        let second = fetcher
            .fetch_category(&store, "cs.AI", window.0, window.1, 0)
            .await
            .unwrap();

        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
        assert_eq!(store.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_pages_advance_offset_and_skip_before_begin() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("start", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_string(feed_xml(
                3,
                &[
                    ("1912.00001v1", "2019-12-31T23:00:00Z"),
                    ("2001.00001v1", "2020-01-01T08:00:00Z"),
                ],
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("start", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(feed_xml(
                3,
                &[("2001.00002v1", "2020-01-01T09:00:00Z")],
            )))
            .mount(&server)
            .await;

        let store = PaperStore::open_in_memory().unwrap();
        let fetcher = CatalogFetcher::new(config(&server), CancellationToken::new()).unwrap();
        let papers = fetcher
            .fetch_category(&store, "cs.LG", date(2020, 1, 1), date(2021, 1, 1), 0)
            .await
            .unwrap();

        let ids: Vec<_> = papers.iter().map(|p| p.paper_id.as_str()).collect();
        assert_eq!(ids, vec!["2001.00001v1", "2001.00002v1"]);
    }

    #[tokio::test]
    async fn test_unusable_page_falls_back_to_smaller_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("max_results", "1000"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<feed><entry>"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("max_results", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_string(three_entries()))
            .expect(1)
            .mount(&server)
            .await;

        let store = PaperStore::open_in_memory().unwrap();
        let fetcher = CatalogFetcher::new(config(&server), CancellationToken::new()).unwrap();
        let papers = fetcher
            .fetch_category(&store, "cs.AI", date(2020, 1, 1), date(2021, 1, 1), 0)
            .await
            .unwrap();
        assert_eq!(papers.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_page_budget_ends_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(feed_xml(50, &[])))
            .expect(3)
            .mount(&server)
            .await;

        let store = PaperStore::open_in_memory().unwrap();
        let fetcher = CatalogFetcher::new(config(&server), CancellationToken::new()).unwrap();
        let papers = fetcher
            .fetch_category(&store, "cs.AI", date(2020, 1, 1), date(2021, 1, 1), 0)
            .await
            .unwrap();
        assert!(papers.is_empty());
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(three_entries()))
            .mount(&server)
            .await;

        let store = PaperStore::open_in_memory().unwrap();
        let fetcher = CatalogFetcher::new(config(&server), CancellationToken::new()).unwrap();
        let papers = fetcher
            .fetch_category(&store, "cs.AI", date(2020, 1, 1), date(2021, 1, 1), 0)
            .await
            .unwrap();
        assert_eq!(papers.len(), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let store = PaperStore::open_in_memory().unwrap();
        let fetcher = CatalogFetcher::new(config(&server), CancellationToken::new()).unwrap();
        let err = fetcher
            .fetch_category(&store, "cs.AI", date(2020, 1, 1), date(2021, 1, 1), 0)
            .await
            .unwrap_err();

        assert_eq!(err.to_string().matches("Catalog error").count(), 1);
        match err {
            PipelineError::Catalog(CatalogError::RetriesExhausted { attempts, last_error }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.starts_with("Catalog returned HTTP 500"), "{last_error}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_page_saves_nothing_and_rerun_completes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("start", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_string(feed_xml(
                2,
                &[("2001.00001v1", "2020-01-01T08:00:00Z")],
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("start", "1"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(3)
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("start", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(feed_xml(
                2,
                &[("2001.00002v1", "2020-01-01T09:00:00Z")],
            )))
            .mount(&server)
            .await;

        let store = PaperStore::open_in_memory().unwrap();
        let fetcher = CatalogFetcher::new(config(&server), CancellationToken::new()).unwrap();
        let window = (date(2020, 1, 1), date(2021, 1, 1));

        let err = fetcher
            .fetch_category(&store, "cs.AI", window.0, window.1, 0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Catalog(CatalogError::RetriesExhausted { .. })
        ));
        assert_eq!(store.count().unwrap(), 0);
        assert!(!store.category_exists("cs.AI").unwrap());

        let papers = fetcher
            .fetch_category(&store, "cs.AI", window.0, window.1, 0)
            .await
            .unwrap();
        assert_eq!(papers.len(), 2);
        assert_eq!(store.count().unwrap(), 2);
    }

    /// Serves a page and trips the token, as an interrupt arriving while
    /// the page was in flight would.
    struct CancelWhileServing {
        cancel: CancellationToken,
        body: String,
    }

    impl Respond for CancelWhileServing {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            self.cancel.cancel();
            ResponseTemplate::new(200).set_body_string(self.body.clone())
        }
    }

    #[tokio::test]
    async fn test_cancel_between_pages_stops_and_saves_nothing() {
        let server = MockServer::start().await;
        let cancel = CancellationToken::new();
        Mock::given(method("GET"))
            .and(query_param("start", "0"))
            .respond_with(CancelWhileServing {
                cancel: cancel.clone(),
                body: feed_xml(2, &[("2001.00001v1", "2020-01-01T08:00:00Z")]),
            })
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("start", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(feed_xml(
                2,
                &[("2001.00002v1", "2020-01-01T09:00:00Z")],
            )))
            .expect(0)
            .mount(&server)
            .await;

        let store = PaperStore::open_in_memory().unwrap();
        let fetcher = CatalogFetcher::new(config(&server), cancel).unwrap();
        let err = fetcher
            .fetch_categories(&store, &["cs.AI"], date(2020, 1, 1), date(2021, 1, 1), 0)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(store.count().unwrap(), 0);
        assert!(!store.category_exists("cs.AI").unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_before_first_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(three_entries()))
            .expect(0)
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let store = PaperStore::open_in_memory().unwrap();
        let fetcher = CatalogFetcher::new(config(&server), cancel).unwrap();
        let err = fetcher
            .fetch_categories(&store, &["cs.AI"], date(2020, 1, 1), date(2021, 1, 1), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn test_fetch_categories_summary() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("search_query", "(cat:cs.CL)"))
            .respond_with(ResponseTemplate::new(200).set_body_string(three_entries()))
            .expect(1)
            .mount(&server)
            .await;

        let store = PaperStore::open_in_memory().unwrap();
        store
            .insert_papers(
                "cs.AI",
                &[DiscoveredPaper {
                    paper_id: "x".into(),
                    paper_url: "u".into(),
                }],
            )
            .unwrap();

        let fetcher = CatalogFetcher::new(config(&server), CancellationToken::new()).unwrap();
        let summary = fetcher
            .fetch_categories(&store, &["cs.AI", "cs.CL"], date(2020, 1, 1), date(2021, 1, 1), 0)
            .await
            .unwrap();

        assert_eq!(
            summary,
            FetchSummary {
                categories_fetched: 1,
                categories_skipped: 1,
                papers: 3,
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_categories_starts_at_offset() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("start", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_string(three_entries()))
            .expect(1)
            .mount(&server)
            .await;

        let store = PaperStore::open_in_memory().unwrap();
        let fetcher = CatalogFetcher::new(config(&server), CancellationToken::new()).unwrap();
        let summary = fetcher
            .fetch_categories(&store, &["cs.AI"], date(2020, 1, 1), date(2021, 1, 1), 5)
            .await
            .unwrap();
        assert_eq!(summary.papers, 3);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            min_backoff: Duration::from_secs(4),
            max_backoff: Duration::from_secs(60),
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(4));
        assert_eq!(policy.backoff(2), Duration::from_secs(8));
        assert_eq!(policy.backoff(4), Duration::from_secs(32));
        assert_eq!(policy.backoff(5), Duration::from_secs(60));
        assert_eq!(policy.backoff(40), Duration::from_secs(60));
    }
}
