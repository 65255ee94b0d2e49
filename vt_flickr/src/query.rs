//! Search query construction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;
use vt_core::Coordinates;

pub const DEFAULT_ENDPOINT: &str = "https://api.flickr.com/services/rest/";
pub const SEARCH_METHOD: &str = "flickr.photos.search";
/// Extra field carrying the medium-size asset URL of each result.
pub const URL_EXTRA: &str = "url_m";

/// Parameter name to value, ordered so built URLs are stable.
pub type ParameterSet = BTreeMap<&'static str, String>;

/// Keys present in every query, page or not.
pub const FIXED_KEYS: [&str; 10] = [
    "method",
    "api_key",
    "safe_search",
    "extras",
    "format",
    "nojsoncallback",
    "radius",
    "radius_units",
    "lat",
    "lon",
];

/// Keys added only when a page number is requested.
pub const PAGE_KEYS: [&str; 2] = ["page", "per_page"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub endpoint: Url,
    pub api_key: String,
    pub radius_km: f64,
    pub per_page: u32,
    pub safe_search: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: String::new(),
            radius_km: 1.0,
            per_page: 100,
            safe_search: "1".into(),
        }
    }
}

fn default_endpoint() -> Url {
    match Url::parse(DEFAULT_ENDPOINT) {
        Ok(url) => url,
        Err(_) => unreachable!("DEFAULT_ENDPOINT is a valid URL"),
    }
}

/// Builds search requests for one API endpoint and credential.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    config: SearchConfig,
}

impl QueryBuilder {
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Assembles the parameters for a search around `at`.
    ///
    /// Without a page number the query is a discovery query: the response
    /// carries the page count. Coordinates are passed through unvalidated.
    pub fn build(&self, at: Coordinates, page: Option<u32>) -> ParameterSet {
        let mut params = ParameterSet::new();
        params.insert("method", SEARCH_METHOD.into());
        params.insert("api_key", self.config.api_key.clone());
        params.insert("safe_search", self.config.safe_search.clone());
        params.insert("extras", URL_EXTRA.into());
        params.insert("format", "json".into());
        params.insert("nojsoncallback", "1".into());
        params.insert("radius", self.config.radius_km.to_string());
        params.insert("radius_units", "km".into());
        params.insert("lat", at.latitude.to_string());
        params.insert("lon", at.longitude.to_string());

        if let Some(page) = page {
            params.insert("page", page.to_string());
            params.insert("per_page", self.config.per_page.to_string());
        }
        params
    }

    /// The request URL for [`QueryBuilder::build`]'s parameters.
    pub fn url(&self, at: Coordinates, page: Option<u32>) -> Url {
        let mut url = self.config.endpoint.clone();
        url.query_pairs_mut().extend_pairs(self.build(at, page));
        url
    }
}
