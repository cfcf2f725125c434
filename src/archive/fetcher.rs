use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use super::MonthSource;
use crate::config::Config;
use crate::error::{FetchError, Result};
use crate::models::ArchiveMonth;

/// Fetches month-index and permalink pages from the remote archive.
///
/// Stateless beyond the base URL; the archive-epoch boundary is enforced by
/// the orchestrator, never here.
pub struct ArchiveFetcher {
    client: Client,
    base_url: Url,
}

impl ArchiveFetcher {
    pub fn new(base_url: Url, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("backscroll/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, base_url }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let base_url = Url::parse(&config.archive_url).map_err(FetchError::UrlConstruction)?;
        Ok(Self::new(
            base_url,
            Duration::from_secs(config.fetch_timeout_secs),
        ))
    }

    fn month_url(&self, month: ArchiveMonth) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut().clear().append_pair("mon", &month.key());
        url
    }

    fn entry_url(&self, entry_id: i64) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .clear()
            .append_pair("ts", &format!("{entry_id:x}"));
        url
    }

    /// GET a page, require a 2xx status, and decode the body using the
    /// response's declared charset (reqwest falls back to UTF-8).
    async fn fetch(&self, url: Url) -> std::result::Result<(Url, String), FetchError> {
        let response = self.client.get(url.clone()).send().await.map_err(FetchError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http(status));
        }

        let html = response.text().await.map_err(FetchError::from)?;
        tracing::debug!("fetched {} ({} bytes)", url, html.len());
        Ok((url, html))
    }
}

#[async_trait]
impl MonthSource for ArchiveFetcher {
    async fn fetch_month(&self, month: ArchiveMonth) -> std::result::Result<(Url, String), FetchError> {
        self.fetch(self.month_url(month)).await
    }

    async fn fetch_entry(&self, entry_id: i64) -> std::result::Result<(Url, String), FetchError> {
        self.fetch(self.entry_url(entry_id)).await
    }
}
