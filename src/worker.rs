use std::collections::HashSet;
use std::fs;
use std::io::BufWriter;
use std::sync::{Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::Url;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::catalog::CatalogClient;
use crate::columns::normalize_column;
use crate::control::ControlStore;
use crate::domain::{Claim, DownloadStatus, WorkItem};
use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum DownloadOutcome {
    Downloaded { path: Utf8PathBuf },
    Skipped { status: DownloadStatus },
    Failed { error: String },
}

/// Runs single downloads and records each outcome in the control store.
pub struct Downloader<'a, C: ?Sized, S: ?Sized> {
    client: &'a C,
    store: &'a S,
    data_dir: &'a Utf8Path,
    // Versions this downloader moved to processing and has not finished yet.
    claimed: Mutex<HashSet<(String, String)>>,
}

impl<'a, C, S> Downloader<'a, C, S>
where
    C: CatalogClient + ?Sized,
    S: ControlStore + ?Sized,
{
    pub fn new(client: &'a C, store: &'a S, data_dir: &'a Utf8Path) -> Self {
        Self {
            client,
            store,
            data_dir,
            claimed: Mutex::new(HashSet::new()),
        }
    }

    /// Never returns an error: failures come back as `DownloadOutcome::Failed`
    /// and, when the version was claimed, are recorded as `failed`.
    pub fn download(&self, item: &WorkItem) -> DownloadOutcome {
        let id = item.id.as_str();
        let last_modified = item.last_modified.as_str();
        info!(id, last_modified, "starting download");

        match self.store.claim(id, last_modified) {
            Ok(Claim::Busy(status)) => {
                info!(id, last_modified, %status, "skipping, version already claimed");
                return DownloadOutcome::Skipped { status };
            }
            Ok(Claim::Retried) => info!(id, last_modified, "retrying failed download"),
            Ok(Claim::Inserted) => {}
            Err(err) => {
                error!(id, last_modified, error = %err, "failed to claim download");
                return DownloadOutcome::Failed {
                    error: err.to_string(),
                };
            }
        }
        self.claimed_set().insert(claim_key(item));

        match self.fetch_and_write(item) {
            Ok(path) => match self.finish(item, DownloadStatus::Completed) {
                Ok(true) => {
                    info!(id, last_modified, path = %path, "done downloading");
                    DownloadOutcome::Downloaded { path }
                }
                Ok(false) => DownloadOutcome::Failed {
                    error: format!(
                        "control row for {id} {last_modified} was no longer processing"
                    ),
                },
                Err(err) => {
                    // Written but unrecorded: leave the version retryable.
                    let _ = self.finish(item, DownloadStatus::Failed);
                    DownloadOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            },
            Err(err) => {
                error!(id, last_modified, error = %err, "failed downloading");
                let _ = self.finish(item, DownloadStatus::Failed);
                DownloadOutcome::Failed {
                    error: err.to_string(),
                }
            }
        }
    }

    /// Reports a task that panicked. The row is marked failed only when this
    /// downloader claimed it and had not finished it.
    pub fn record_panic(&self, item: &WorkItem, err: &SyncError) -> DownloadOutcome {
        error!(
            id = %item.id,
            last_modified = %item.last_modified,
            error = %err,
            "download panicked"
        );
        if self.claimed_set().contains(&claim_key(item)) {
            let _ = self.finish(item, DownloadStatus::Failed);
        }
        DownloadOutcome::Failed {
            error: err.to_string(),
        }
    }

    fn fetch_and_write(&self, item: &WorkItem) -> Result<Utf8PathBuf, SyncError> {
        let destination = self.data_dir.join(output_file_name(&item.url)?);
        info!(
            id = %item.id,
            last_modified = %item.last_modified,
            url = %item.url,
            "downloading"
        );
        let body = self.client.fetch_csv(&item.url)?;
        write_normalized_csv(&body, &destination)?;
        Ok(destination)
    }

    /// Moves a claimed row out of processing. `Ok(false)` means the row was
    /// no longer processing.
    fn finish(&self, item: &WorkItem, to: DownloadStatus) -> Result<bool, SyncError> {
        let id = item.id.as_str();
        let last_modified = item.last_modified.as_str();
        info!(id, last_modified, status = %to, "updating download status");
        let result = self
            .store
            .transition(id, last_modified, DownloadStatus::Processing, to);
        match &result {
            Ok(true) => {
                self.claimed_set().remove(&claim_key(item));
            }
            Ok(false) => {
                self.claimed_set().remove(&claim_key(item));
                warn!(
                    id,
                    last_modified,
                    status = %to,
                    "control row was no longer processing"
                );
            }
            Err(err) => error!(
                id,
                last_modified,
                status = %to,
                error = %err,
                "failed to record download status"
            ),
        }
        result
    }

    fn claimed_set(&self) -> MutexGuard<'_, HashSet<(String, String)>> {
        self.claimed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn claim_key(item: &WorkItem) -> (String, String) {
    (item.id.clone(), item.last_modified.clone())
}

/// Final path segment of the download url, without query or fragment.
pub fn output_file_name(url: &str) -> Result<String, SyncError> {
    let parsed = Url::parse(url).map_err(|err| SyncError::InvalidUrl(format!("{url}: {err}")))?;
    let name = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .ok_or_else(|| SyncError::InvalidUrl(format!("{url}: no file name in path")))?;
    Ok(name.to_string())
}

/// Writes `body` to `destination` with normalized headers.
///
/// The file appears only once fully written; on error nothing is left at
/// `destination`.
pub fn write_normalized_csv(body: &[u8], destination: &Utf8Path) -> Result<(), SyncError> {
    let parent = destination
        .parent()
        .ok_or_else(|| SyncError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| SyncError::Filesystem(err.to_string()))?;

    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(body);
    let headers = reader
        .headers()?
        .iter()
        .map(normalize_column)
        .collect::<Vec<_>>();

    let temp = tempfile::Builder::new()
        .prefix("catalog-sync")
        .suffix(".csv.tmp")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    {
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(BufWriter::new(temp.as_file()));
        writer.write_record(&headers)?;
        for record in reader.byte_records() {
            writer.write_byte_record(&record?)?;
        }
        writer
            .flush()
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    }
    temp.persist(destination.as_std_path())
        .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_is_last_path_segment() {
        let url = "https://data.cms.gov/provider-data/sites/default/files/hospital_general.csv?v=2";
        assert_eq!(output_file_name(url).unwrap(), "hospital_general.csv");
    }

    #[test]
    fn file_name_requires_a_segment() {
        assert!(output_file_name("https://example.org/").is_err());
        assert!(output_file_name("not a url").is_err());
    }

    #[test]
    fn rewrites_only_the_header_row() {
        let temp = tempfile::tempdir().unwrap();
        let destination = Utf8PathBuf::from_path_buf(temp.path().join("out.csv")).unwrap();
        let body = b"Facility ID,Patient's  Name \n010001,\"Smith, Jo\"\n";
        write_normalized_csv(body, &destination).unwrap();

        let written = fs::read_to_string(destination.as_std_path()).unwrap();
        assert_eq!(written, "facility_id,patients_name\n010001,\"Smith, Jo\"\n");
    }
}
