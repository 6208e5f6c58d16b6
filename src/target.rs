//! Target catalog client.
//!
//! The pipeline only touches the target catalog through this trait:
//! lookups by source GUID, dataset create/update keyed by the
//! target-assigned identifier, and soft-delete flagging for records that
//! disappeared from the source listing. The HTTP implementation speaks a
//! CKAN-style dataset API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::TargetConfig;
use crate::error::HarvestError;
use crate::models::{MappedRecord, TargetDataset};

/// Create/update/flag operations against the target catalog.
#[async_trait]
pub trait TargetCatalog: Send + Sync {
    /// Every dataset whose cross-reference field equals `guid`. More than
    /// one result is a reconciliation conflict the caller must surface.
    async fn find_by_guid(&self, guid: &str) -> Result<Vec<TargetDataset>, HarvestError>;

    /// Create a dataset; the target assigns the identifier.
    async fn create(&self, record: &MappedRecord, fingerprint: &str)
        -> Result<TargetDataset, HarvestError>;

    /// Replace the mapped content of an existing dataset, preserving the
    /// target identifier and target-only fields.
    async fn update(
        &self,
        dataset_id: &str,
        record: &MappedRecord,
        fingerprint: &str,
    ) -> Result<TargetDataset, HarvestError>;

    /// Mark a dataset whose GUID vanished from the source listing, or whose
    /// record carries a withdrawal signal. Never deletes.
    async fn flag_missing(&self, dataset_id: &str) -> Result<(), HarvestError>;
}

/// Wire form of a dataset write: the mapped fields plus the cross-reference
/// GUID and fingerprint the target stores for the next reconciliation.
#[derive(Debug, Serialize)]
struct DatasetWrite<'a> {
    #[serde(flatten)]
    record: &'a MappedRecord,
    harvest_guid: &'a str,
    harvest_fingerprint: &'a str,
}

#[derive(Debug, Deserialize)]
struct DatasetRow {
    id: String,
    harvest_guid: String,
    #[serde(default)]
    harvest_fingerprint: Option<String>,
}

impl From<DatasetRow> for TargetDataset {
    fn from(row: DatasetRow) -> Self {
        TargetDataset {
            id: row.id,
            guid: row.harvest_guid,
            fingerprint: row.harvest_fingerprint,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DatasetList {
    #[serde(default)]
    datasets: Vec<DatasetRow>,
}

/// HTTP implementation against the target catalog's dataset API.
pub struct HttpTargetCatalog {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTargetCatalog {
    pub fn new(config: &TargetConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
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
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", key),
            None => builder,
        }
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response, HarvestError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = format!(
            "{} failed with HTTP {}: {}",
            what,
            status,
            body.chars().take(500).collect::<String>()
        );
        // Server-side failures go through the shared retry policy; the rest
        // need operator attention.
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(HarvestError::TransientFetch(detail))
        } else {
            Err(HarvestError::Target(detail))
        }
    }
}

#[async_trait]
impl TargetCatalog for HttpTargetCatalog {
    async fn find_by_guid(&self, guid: &str) -> Result<Vec<TargetDataset>, HarvestError> {
        let url = format!("{}/datasets?guid={}", self.endpoint, guid);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| HarvestError::TransientFetch(format!("GET {}: {}", url, e)))?;
        let response = Self::check(response, "dataset lookup").await?;
        let list: DatasetList = response
            .json()
            .await
            .map_err(|e| HarvestError::Target(format!("dataset lookup: invalid body: {}", e)))?;
        Ok(list.datasets.into_iter().map(TargetDataset::from).collect())
    }

    async fn create(
        &self,
        record: &MappedRecord,
        fingerprint: &str,
    ) -> Result<TargetDataset, HarvestError> {
        let url = format!("{}/datasets", self.endpoint);
        let body = DatasetWrite {
            record,
            harvest_guid: &record.guid,
            harvest_fingerprint: fingerprint,
        };
        let response = self
            .authorized(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| HarvestError::TransientFetch(format!("POST {}: {}", url, e)))?;
        let response = Self::check(response, "dataset create").await?;
        let row: DatasetRow = response
            .json()
            .await
            .map_err(|e| HarvestError::Target(format!("dataset create: invalid body: {}", e)))?;
        Ok(row.into())
    }

    async fn update(
        &self,
        dataset_id: &str,
        record: &MappedRecord,
        fingerprint: &str,
    ) -> Result<TargetDataset, HarvestError> {
        let url = format!("{}/datasets/{}", self.endpoint, dataset_id);
        let body = DatasetWrite {
            record,
            harvest_guid: &record.guid,
            harvest_fingerprint: fingerprint,
        };
        let response = self
            .authorized(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| HarvestError::TransientFetch(format!("POST {}: {}", url, e)))?;
        let response = Self::check(response, "dataset update").await?;
        let row: DatasetRow = response
            .json()
            .await
            .map_err(|e| HarvestError::Target(format!("dataset update: invalid body: {}", e)))?;
        Ok(row.into())
    }

    async fn flag_missing(&self, dataset_id: &str) -> Result<(), HarvestError> {
        let url = format!("{}/datasets/{}/flag-missing", self.endpoint, dataset_id);
        let response = self
            .authorized(self.client.post(&url))
            .send()
            .await
            .map_err(|e| HarvestError::TransientFetch(format!("POST {}: {}", url, e)))?;
        Self::check(response, "dataset flag-missing").await?;
        Ok(())
    }
}
