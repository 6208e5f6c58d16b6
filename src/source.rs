//! Source catalog client.
//!
//! Lists record identifiers and fetches full metadata from a remote
//! open-data portal over HTTP. Listing pagination is consumed completely
//! before the gather stage proceeds. Errors are classified along the retry
//! boundary: network failures and 5xx responses are transient, 4xx
//! responses mean the source configuration or credentials are wrong and
//! abort the job (408/429 excepted, which are operationally transient).
//!
//! # Endpoints
//!
//! ```text
//! GET {endpoint}/datasets?offset=N&limit=M
//!     -> { "total": n, "datasets": [ { "identifier": "..." }, ... ] }
//! GET {endpoint}/datasets/{guid}
//!     -> full record detail (raw JSON blob, shape profile-specific)
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use crate::config::SourceConfig;
use crate::error::HarvestError;

/// A remote catalog the pipeline can harvest from.
///
/// `list` and `fetch` must not mutate local state; all persistence happens
/// in the job runner through the object store.
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    /// All record GUIDs the source currently lists, every page consumed.
    async fn list(&self) -> Result<Vec<String>, HarvestError>;

    /// Full metadata for one record, as a raw JSON blob.
    async fn fetch(&self, guid: &str) -> Result<String, HarvestError>;
}

#[derive(Debug, Deserialize)]
struct ListingPage {
    total: usize,
    #[serde(default)]
    datasets: Vec<ListingEntry>,
}

#[derive(Debug, Deserialize)]
struct ListingEntry {
    identifier: String,
}

/// HTTP implementation against a DCAT-style JSON catalog API.
pub struct DcatJsonSource {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    page_size: usize,
}

impl DcatJsonSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let api_key = match &config.api_key_env {
            Some(var) => Some(std::env::var(var).with_context(|| {
                format!("API key environment variable {} not set", var)
            })?),
            None => None,
        };

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key,
            page_size: config.page_size,
        })
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.get(url);
        if let Some(ref key) = self.api_key {
            builder = builder.header("Authorization", key);
        }
        builder
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, HarvestError> {
        let response = self
            .request(url)
            .send()
            .await
            .map_err(|e| HarvestError::TransientFetch(format!("GET {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, url));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| HarvestError::TransientFetch(format!("GET {}: invalid body: {}", url, e)))
    }
}

/// Map an HTTP error status onto the harvest error taxonomy.
fn classify_status(status: StatusCode, url: &str) -> HarvestError {
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        HarvestError::TransientFetch(format!("GET {}: HTTP {}", url, status))
    } else {
        HarvestError::FatalConfig(format!("GET {}: HTTP {}", url, status))
    }
}

#[async_trait]
impl SourceCatalog for DcatJsonSource {
    async fn list(&self) -> Result<Vec<String>, HarvestError> {
        let mut guids = Vec::new();
        let mut offset = 0usize;

        loop {
            let url = format!(
                "{}/datasets?offset={}&limit={}",
                self.endpoint, offset, self.page_size
            );
            let page: ListingPage = self.get_json(&url).await?;
            let count = page.datasets.len();
            guids.extend(page.datasets.into_iter().map(|e| e.identifier));

            offset += count;
            if count == 0 || offset >= page.total {
                break;
            }
        }

        tracing::debug!(count = guids.len(), "listing complete");
        Ok(guids)
    }

    async fn fetch(&self, guid: &str) -> Result<String, HarvestError> {
        let url = format!("{}/datasets/{}", self.endpoint, guid);
        let response = self
            .request(&url)
            .send()
            .await
            .map_err(|e| HarvestError::TransientFetch(format!("GET {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, &url));
        }

        response
            .text()
            .await
            .map_err(|e| HarvestError::TransientFetch(format!("GET {}: body read: {}", url, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        assert!(classify_status(StatusCode::INTERNAL_SERVER_ERROR, "u").is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "u").is_retryable());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "u").is_retryable());
    }

    #[test]
    fn client_errors_are_fatal() {
        for status in [
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
            StatusCode::BAD_REQUEST,
        ] {
            assert!(
                matches!(classify_status(status, "u"), HarvestError::FatalConfig(_)),
                "{} should be fatal",
                status
            );
        }
    }

    #[test]
    fn listing_page_parses() {
        let page: ListingPage = serde_json::from_str(
            r#"{"total": 2, "datasets": [{"identifier": "a"}, {"identifier": "b"}]}"#,
        )
        .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.datasets[1].identifier, "b");
    }
}
