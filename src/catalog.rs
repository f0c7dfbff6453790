use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::domain::DatasetRecord;
use crate::error::SyncError;

pub const DEFAULT_METADATA_URL: &str =
    "https://data.cms.gov/provider-data/api/1/metastore/schemas/dataset/items";

pub trait CatalogClient: Send + Sync {
    fn fetch_metadata(&self, url: &str) -> Result<Vec<DatasetRecord>, SyncError>;
    fn fetch_csv(&self, url: &str) -> Result<Vec<u8>, SyncError>;
}

#[derive(Clone)]
pub struct CatalogHttpClient {
    client: Client,
}

impl CatalogHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("catalog-sync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::CatalogHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| SyncError::CatalogHttp(err.to_string()))?;
        Ok(Self { client })
    }
}

impl CatalogClient for CatalogHttpClient {
    fn fetch_metadata(&self, url: &str) -> Result<Vec<DatasetRecord>, SyncError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| SyncError::CatalogHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "catalog request failed".to_string());
            return Err(SyncError::CatalogStatus { status, message });
        }
        let body = response
            .bytes()
            .map_err(|err| SyncError::CatalogHttp(err.to_string()))?;
        serde_json::from_slice(&body).map_err(|err| SyncError::CatalogParse(err.to_string()))
    }

    fn fetch_csv(&self, url: &str) -> Result<Vec<u8>, SyncError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| SyncError::CsvHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "CSV request failed".to_string());
            return Err(SyncError::CsvStatus { status, message });
        }
        let bytes = response
            .bytes()
            .map_err(|err| SyncError::CsvHttp(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}
