//! arXiv catalog harvesting.

mod cancel;
mod feed;
mod fetcher;

pub use cancel::CancellationToken;
pub use feed::{Feed, FeedEntry, build_search_query, canonical_pdf_url, paper_id_from_entry, parse_feed};
pub use fetcher::{CatalogFetcher, FetchSummary, RetryPolicy};
