use std::sync::Arc;
use vt_core::{Coordinates, Discovery, FetchError, Page};

use crate::{
    client::HttpFetch,
    query::QueryBuilder,
    response::{parse_page, parse_page_count},
};

/// Photo metadata search around a location.
#[async_trait::async_trait]
pub trait PhotoSearch: std::fmt::Debug + Send + Sync + 'static {
    /// Learns how many result pages exist around `at`.
    async fn page_count(&self, at: Coordinates) -> Result<Discovery, FetchError>;

    /// Fetches one 1-based page of results around `at`.
    async fn page(&self, at: Coordinates, page: u32) -> Result<Page, FetchError>;
}

#[derive(Debug, Clone)]
pub struct FlickrSearch {
    http: Arc<dyn HttpFetch>,
    query: QueryBuilder,
}

impl FlickrSearch {
    pub fn new(http: Arc<dyn HttpFetch>, query: QueryBuilder) -> Self {
        Self { http, query }
    }

    pub fn query(&self) -> &QueryBuilder {
        &self.query
    }
}

#[async_trait::async_trait]
impl PhotoSearch for FlickrSearch {
    async fn page_count(&self, at: Coordinates) -> Result<Discovery, FetchError> {
        let url = self.query.url(at, None);
        let body = self.http.get(&url).await?;
        let discovery = parse_page_count(&body)?;
        tracing::debug!(%at, pages = discovery.total_pages(), "discovered page count");
        Ok(discovery)
    }

    async fn page(&self, at: Coordinates, page: u32) -> Result<Page, FetchError> {
        let url = self.query.url(at, Some(page));
        let body = self.http.get(&url).await?;
        let page = parse_page(page, &body)?;
        tracing::debug!(
            %at,
            page = page.number,
            photos = page.descriptors.len(),
            skipped = page.skipped,
            "fetched page"
        );
        Ok(page)
    }
}
