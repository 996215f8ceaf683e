//! Paginated JSON listing over HTTP
//!
//! `GET {base_url}?{page_param}={page}`; the body is either a JSON array of
//! records or an object holding them under `items_field`. A 404 ends the
//! listing.

use std::time::Duration;

use reqwest::StatusCode;
use scrapeline_core::{ExtractionError, ExtractionSource, Page, RawEntity};
use serde_json::Value;

use crate::record::{DEFAULT_IDENTITY_FIELD, raw_entity_from_json};

/// Connect timeout; the whole request is bounded by the pipeline's page timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_PAGE_PARAM: &str = "page";
const DEFAULT_ITEMS_FIELD: &str = "items";

fn from_reqwest(e: &reqwest::Error) -> ExtractionError {
    ExtractionError::Http {
        status: e.status().map(|s| s.as_u16()),
        message: e.to_string(),
    }
}

pub struct HttpJsonSource {
    client: reqwest::Client,
    base_url: String,
    page_param: String,
    items_field: String,
    identity_field: String,
    bearer_token: Option<String>,
}

impl HttpJsonSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_max_idle_per_host(2)
            .user_agent(concat!("scrapeline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| from_reqwest(&e))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            page_param: DEFAULT_PAGE_PARAM.to_string(),
            items_field: DEFAULT_ITEMS_FIELD.to_string(),
            identity_field: DEFAULT_IDENTITY_FIELD.to_string(),
            bearer_token: None,
        })
    }

    pub fn page_param(mut self, name: impl Into<String>) -> Self {
        self.page_param = name.into();
        self
    }

    pub fn items_field(mut self, name: impl Into<String>) -> Self {
        self.items_field = name.into();
        self
    }

    pub fn identity_field(mut self, name: impl Into<String>) -> Self {
        self.identity_field = name.into();
        self
    }

    pub fn bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Decode one response body into records.
    pub fn parse_body(&self, body: &[u8]) -> Result<Vec<RawEntity>, ExtractionError> {
        let items = match serde_json::from_slice::<Value>(body)? {
            Value::Array(items) => items,
            Value::Object(mut obj) => match obj.remove(&self.items_field) {
                Some(Value::Array(items)) => items,
                Some(_) => {
                    return Err(ExtractionError::Parse(format!(
                        "field {:?} is not an array",
                        self.items_field
                    )));
                }
                None => {
                    return Err(ExtractionError::Parse(format!(
                        "response has no {:?} field",
                        self.items_field
                    )));
                }
            },
            _ => {
                return Err(ExtractionError::Parse(
                    "response is neither an array nor an object".to_string(),
                ));
            }
        };
        items
            .into_iter()
            .map(|v| raw_entity_from_json(v, &self.identity_field))
            .collect()
    }
}

impl ExtractionSource for HttpJsonSource {
    async fn fetch_page(&self, page: u32) -> Result<Page, ExtractionError> {
        let mut request = self
            .client
            .get(&self.base_url)
            .query(&[(self.page_param.as_str(), page)]);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await.map_err(|e| from_reqwest(&e))?;
        if resp.status() == StatusCode::NOT_FOUND {
            log::debug!("page {page}: 404, end of listing");
            return Ok(Page::End);
        }
        let resp = resp.error_for_status().map_err(|e| from_reqwest(&e))?;
        let body = resp.bytes().await.map_err(|e| from_reqwest(&e))?;
        Ok(Page::Records(self.parse_body(&body)?))
    }
}
