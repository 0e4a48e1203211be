//! Public relay directory.
//!
//! The directory is an HTML page grouping relay endpoints by region. The
//! region heading is an element with `id="country"` whose text is the region
//! label; every following row marked `class="statusgood"` until the next
//! heading is an online relay, and its `id="address"` cell holds the endpoint
//! URI.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("relay directory request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("relay directory returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("relay directory has no section for region {0:?}")]
    RegionMissing(String),
}

/// Source of advertised relay endpoints.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    /// Fetch every online endpoint advertised for the configured region.
    async fn fetch_endpoints(&self) -> Result<Vec<String>, DirectoryError>;
}

/// HTTP-backed directory.
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    url: String,
    region: String,
    client: Client,
}

impl HttpDirectory {
    pub fn new(
        url: impl Into<String>,
        region: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DirectoryError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            region: region.into(),
            client,
        })
    }
}

#[async_trait]
impl DirectorySource for HttpDirectory {
    async fn fetch_endpoints(&self) -> Result<Vec<String>, DirectoryError> {
        let resp = self.client.get(&self.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DirectoryError::Status(status));
        }
        let body = resp.text().await?;
        let endpoints = parse_directory(&body, &self.region)?;
        debug!(
            url = %self.url,
            region = %self.region,
            count = endpoints.len(),
            "fetched relay directory"
        );
        Ok(endpoints)
    }
}

/// Fixed endpoint list, for offline runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    endpoints: Vec<String>,
}

impl StaticDirectory {
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl DirectorySource for StaticDirectory {
    async fn fetch_endpoints(&self) -> Result<Vec<String>, DirectoryError> {
        Ok(self.endpoints.clone())
    }
}

/// Extract the online endpoints listed under `region`.
pub fn parse_directory(html: &str, region: &str) -> Result<Vec<String>, DirectoryError> {
    let doc = Html::parse_document(html);
    let mut endpoints = Vec::new();
    let mut region_seen = false;
    let mut in_region = false;

    for el in doc.root_element().descendants().filter_map(ElementRef::wrap) {
        if el.value().id() == Some("country") {
            in_region = first_text(el) == Some(region);
            region_seen |= in_region;
            continue;
        }
        if !in_region || !el.value().classes().any(|c| c == "statusgood") {
            continue;
        }
        for cell in el.descendants().filter_map(ElementRef::wrap) {
            if cell.value().id() == Some("address")
                && let Some(addr) = first_text(cell)
            {
                endpoints.push(addr.to_string());
            }
        }
    }

    if !region_seen {
        return Err(DirectoryError::RegionMissing(region.to_string()));
    }
    Ok(endpoints)
}

fn first_text(el: ElementRef<'_>) -> Option<&str> {
    el.text().map(str::trim).find(|t| !t.is_empty())
}
