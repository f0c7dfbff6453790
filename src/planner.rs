use tracing::{info, warn};

use crate::control::ControlStore;
use crate::domain::{DatasetRecord, WorkItem};
use crate::error::SyncError;

/// Builds the worklist for one run.
///
/// A record is planned when nothing is completed for its id yet, or when the
/// newest completed version compares lower than the record's `modified`.
/// Versions are compared as strings, which is only meaningful for
/// lexicographically ordered stamps such as ISO-8601 dates.
pub fn plan_downloads<'a, I, S>(records: I, store: &S) -> Result<Vec<WorkItem>, SyncError>
where
    I: IntoIterator<Item = &'a DatasetRecord>,
    S: ControlStore + ?Sized,
{
    let mut worklist = Vec::new();
    for record in records {
        let id = record.identifier.as_str();
        let last_modified = record.modified.as_str();
        let Some(url) = record.download_url() else {
            warn!(id, last_modified, "skipping dataset without a download url");
            continue;
        };

        info!(id, "finding latest completed download");
        match store.latest_completed(id)? {
            Some(latest) if latest.as_str() >= last_modified => {
                info!(id, last_modified, latest = %latest, "skipping, already downloaded");
            }
            _ => {
                info!(id, last_modified, "adding to download list");
                worklist.push(WorkItem {
                    id: id.to_string(),
                    url: url.to_string(),
                    last_modified: last_modified.to_string(),
                });
            }
        }
    }
    Ok(worklist)
}
