mod fetcher;
mod parser;

use async_trait::async_trait;
use url::Url;

use crate::error::FetchError;
use crate::models::ArchiveMonth;

pub use fetcher::ArchiveFetcher;
pub use parser::parse_month_page;

/// Where archive pages come from.
///
/// The orchestrator only sees this port, so tests can drive the month-walking
/// logic from canned pages instead of a live server.
#[async_trait]
pub trait MonthSource: Send + Sync {
    /// Fetch one month's index page, returning the page URL it was served
    /// from together with the decoded HTML.
    async fn fetch_month(&self, month: ArchiveMonth) -> Result<(Url, String), FetchError>;

    /// Fetch the single-permalink page for one entry.
    async fn fetch_entry(&self, entry_id: i64) -> Result<(Url, String), FetchError>;
}
