use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::info;

use crate::catalog::CatalogClient;
use crate::control::ControlStore;
use crate::dispatch::dispatch;
use crate::domain::{ControlRow, DatasetRecord, WorkItem};
use crate::error::SyncError;
use crate::filter::KeywordFilter;
use crate::planner::plan_downloads;
use crate::worker::{DownloadOutcome, Downloader};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub metadata_url: String,
    pub data_dir: Utf8PathBuf,
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub pattern: String,
    pub started_at: String,
    pub finished_at: String,
    pub matched: usize,
    pub planned: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub items: Vec<SyncItemResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncItemResult {
    pub id: String,
    pub last_modified: String,
    pub url: String,
    #[serde(flatten)]
    pub outcome: DownloadOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanResult {
    pub pattern: String,
    pub matched: usize,
    pub items: Vec<WorkItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    pub rows: Vec<ControlRow>,
}

pub struct App<C: CatalogClient, S: ControlStore> {
    client: C,
    store: S,
    options: SyncOptions,
}

impl<C: CatalogClient, S: ControlStore> App<C, S> {
    pub fn new(client: C, store: S, options: SyncOptions) -> Self {
        Self {
            client,
            store,
            options,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fetches, filters, plans and downloads. Only a metadata or planning
    /// failure is returned as an error; per-item failures land in the report.
    pub fn sync(&self, filter: &KeywordFilter) -> Result<SyncReport, SyncError> {
        let started_at = now();
        let (matched, worklist) = self.build_worklist(filter)?;

        let downloader = Downloader::new(&self.client, &self.store, &self.options.data_dir);
        info!(
            items = worklist.len(),
            workers = self.options.workers,
            "dispatching downloads"
        );
        let outcomes = dispatch(
            &worklist,
            self.options.workers,
            |item| downloader.download(item),
            |item, err| downloader.record_panic(item, &err),
        );

        let items = worklist
            .into_iter()
            .zip(outcomes)
            .map(|(item, outcome)| SyncItemResult {
                id: item.id,
                last_modified: item.last_modified,
                url: item.url,
                outcome,
            })
            .collect::<Vec<_>>();

        let count = |pred: fn(&DownloadOutcome) -> bool| {
            items.iter().filter(|item| pred(&item.outcome)).count()
        };
        let report = SyncReport {
            pattern: filter.as_str().to_string(),
            started_at,
            finished_at: now(),
            matched,
            planned: items.len(),
            downloaded: count(|outcome| matches!(outcome, DownloadOutcome::Downloaded { .. })),
            skipped: count(|outcome| matches!(outcome, DownloadOutcome::Skipped { .. })),
            failed: count(|outcome| matches!(outcome, DownloadOutcome::Failed { .. })),
            items,
        };
        info!(
            planned = report.planned,
            downloaded = report.downloaded,
            skipped = report.skipped,
            failed = report.failed,
            "sync finished"
        );
        Ok(report)
    }

    /// Same worklist `sync` would dispatch, without downloading anything.
    pub fn plan(&self, filter: &KeywordFilter) -> Result<PlanResult, SyncError> {
        let (matched, items) = self.build_worklist(filter)?;
        Ok(PlanResult {
            pattern: filter.as_str().to_string(),
            matched,
            items,
        })
    }

    pub fn status(&self) -> Result<StatusResult, SyncError> {
        Ok(StatusResult {
            rows: self.store.rows()?,
        })
    }

    fn build_worklist(
        &self,
        filter: &KeywordFilter,
    ) -> Result<(usize, Vec<WorkItem>), SyncError> {
        let records = self.fetch_metadata()?;
        let matched = filter.filter(&records).collect::<Vec<&DatasetRecord>>();
        info!(
            total = records.len(),
            matched = matched.len(),
            pattern = filter.as_str(),
            "filtered catalog"
        );
        let worklist = plan_downloads(matched.iter().copied(), &self.store)?;
        Ok((matched.len(), worklist))
    }

    fn fetch_metadata(&self) -> Result<Vec<DatasetRecord>, SyncError> {
        info!(url = %self.options.metadata_url, "downloading metadata");
        let records = self.client.fetch_metadata(&self.options.metadata_url)?;
        info!(records = records.len(), "finished downloading metadata");
        Ok(records)
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
