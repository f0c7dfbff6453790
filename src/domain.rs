use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// One catalog entry as published by the metadata endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub identifier: String,
    #[serde(default, rename = "keyword")]
    pub keywords: Vec<String>,
    pub modified: String,
    #[serde(default, rename = "distribution")]
    pub distributions: Vec<Distribution>,
}

impl DatasetRecord {
    /// Only the first distribution is ever downloaded.
    pub fn download_url(&self) -> Option<&str> {
        self.distributions
            .first()
            .and_then(|dist| dist.download_url.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    #[serde(default, rename = "downloadURL")]
    pub download_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Processing,
    Completed,
    Failed,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Processing => "processing",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DownloadStatus {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "processing" => Ok(DownloadStatus::Processing),
            "completed" => Ok(DownloadStatus::Completed),
            "failed" => Ok(DownloadStatus::Failed),
            other => Err(SyncError::InvalidStatus(other.to_string())),
        }
    }
}

/// A download still needed in this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkItem {
    pub id: String,
    pub url: String,
    pub last_modified: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlRow {
    pub id: String,
    pub last_modified: String,
    pub status: DownloadStatus,
}

/// Result of atomically claiming a version for download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// No row existed; one was inserted as processing.
    Inserted,
    /// A failed row was moved back to processing.
    Retried,
    /// Another attempt is running or the version is already downloaded.
    Busy(DownloadStatus),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            DownloadStatus::Processing,
            DownloadStatus::Completed,
            DownloadStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<DownloadStatus>().unwrap(), status);
        }
        assert!("done".parse::<DownloadStatus>().is_err());
    }

    #[test]
    fn record_uses_first_distribution() {
        let json = r#"{
            "identifier": "xubh-q36u",
            "keyword": ["Hospitals"],
            "modified": "2024-01-02",
            "distribution": [
                {"downloadURL": "https://example.org/a.csv"},
                {"downloadURL": "https://example.org/b.csv"}
            ],
            "title": "ignored"
        }"#;
        let record: DatasetRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.download_url(), Some("https://example.org/a.csv"));
    }

    #[test]
    fn record_without_distribution_has_no_url() {
        let json = r#"{"identifier": "x", "modified": "2024-01-02"}"#;
        let record: DatasetRecord = serde_json::from_str(json).unwrap();
        assert!(record.keywords.is_empty());
        assert_eq!(record.download_url(), None);
    }
}
