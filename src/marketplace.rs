//! Marketplace search client.
//!
//! Subscriptions store the catalog URL a user copied from the website. The
//! client rewrites it into the JSON search endpoint and returns one page of
//! raw listings.
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config;
use crate::model::RawItem;

const SEARCH_PATH: &str = "api/v2/catalog/items";
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid search url: {0}")]
    InvalidUrl(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("marketplace returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("invalid search response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[async_trait]
pub trait Marketplace: Send + Sync {
    /// Fetch one page of listings for a subscription URL, newest first.
    async fn search(&self, url: &str, per_page: u32) -> Result<Vec<RawItem>, FetchError>;
}

#[derive(Clone)]
pub struct VintedClient {
    http: Client,
    api_base: Option<Url>,
}

impl fmt::Debug for VintedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VintedClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl VintedClient {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            api_base: None,
        })
    }

    pub fn from_config(cfg: &config::Marketplace) -> anyhow::Result<Self> {
        let client = Self::new(
            &cfg.user_agent,
            Duration::from_secs(cfg.request_timeout_seconds),
        )?;
        match cfg.api_base.as_deref() {
            Some(base) => Ok(client.with_api_base(Url::parse(base)?)),
            None => Ok(client),
        }
    }

    /// Send every search to `base` instead of the subscription URL's origin.
    pub fn with_api_base(mut self, base: Url) -> Self {
        self.api_base = Some(base);
        self
    }
}

#[async_trait]
impl Marketplace for VintedClient {
    async fn search(&self, url: &str, per_page: u32) -> Result<Vec<RawItem>, FetchError> {
        let api_url = search_api_url(url, self.api_base.as_ref(), per_page)?;
        debug!(url = %api_url, "searching marketplace");

        let res = self
            .http
            .get(api_url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            let mut body = res.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(FetchError::Status { status, body });
        }

        let body = res.text().await?;
        decode_items(&body)
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<Value>,
}

/// Decode a search response. Elements that do not look like a listing at all
/// are logged and dropped; the rest of the page is kept.
pub fn decode_items(body: &str) -> Result<Vec<RawItem>, FetchError> {
    let response: SearchResponse = serde_json::from_str(body)?;
    let items = response
        .items
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value::<RawItem>(value) {
            Ok(item) => Some(item),
            Err(err) => {
                warn!(index, %err, "skipping undecodable listing");
                None
            }
        })
        .collect();
    Ok(items)
}

/// Translate a catalog URL into the search API URL.
///
/// `brand_ids[]=1&brand_ids[]=2` becomes `brand_ids=1,2`, `catalog[]` becomes
/// `catalog_ids`, paging parameters are replaced and `order=newest_first` is
/// added unless the URL picks an order itself.
pub fn search_api_url(
    search_url: &str,
    api_base: Option<&Url>,
    per_page: u32,
) -> Result<Url, FetchError> {
    let parsed = Url::parse(search_url.trim())
        .map_err(|e| FetchError::InvalidUrl(format!("{search_url}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(FetchError::InvalidUrl(search_url.to_string()));
    }

    let mut api = match api_base {
        Some(base) => base.clone(),
        None => {
            let mut origin = parsed.clone();
            origin.set_path("/");
            origin.set_query(None);
            origin.set_fragment(None);
            origin
        }
    };
    api = api
        .join(SEARCH_PATH)
        .map_err(|e| FetchError::InvalidUrl(format!("{api}: {e}")))?;

    let mut params: Vec<(String, String)> = Vec::new();
    for (key, value) in parsed.query_pairs() {
        let (key, is_array) = match key.strip_suffix("[]") {
            Some(stripped) => (stripped.to_string(), true),
            None => (key.to_string(), false),
        };
        let key = if is_array && key == "catalog" {
            "catalog_ids".to_string()
        } else {
            key
        };
        if matches!(key.as_str(), "per_page" | "page" | "time") {
            continue;
        }
        if is_array {
            if let Some((_, existing)) = params.iter_mut().find(|(k, _)| *k == key) {
                existing.push(',');
                existing.push_str(&value);
                continue;
            }
        }
        params.push((key, value.into_owned()));
    }
    if !params.iter().any(|(k, _)| k == "order") {
        params.push(("order".to_string(), "newest_first".to_string()));
    }
    params.push(("per_page".to_string(), per_page.to_string()));

    api.query_pairs_mut().clear().extend_pairs(params);
    Ok(api)
}
