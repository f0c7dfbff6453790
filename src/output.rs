use std::io::{self, Write};

use serde::Serialize;

use crate::app::{PlanResult, StatusResult, SyncReport};
use crate::worker::DownloadOutcome;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_sync(report: &SyncReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_plan(result: &PlanResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_status(result: &StatusResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_sync(report: &SyncReport) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        writeln!(
            stdout,
            "pattern {:?}: {} matched, {} planned",
            report.pattern, report.matched, report.planned
        )?;
        writeln!(
            stdout,
            "downloaded {}, skipped {}, failed {}",
            report.downloaded, report.skipped, report.failed
        )?;
        for item in &report.items {
            match &item.outcome {
                DownloadOutcome::Downloaded { path } => {
                    writeln!(stdout, "  ok      {} {} -> {path}", item.id, item.last_modified)?
                }
                DownloadOutcome::Skipped { status } => {
                    writeln!(stdout, "  skip    {} {} ({status})", item.id, item.last_modified)?
                }
                DownloadOutcome::Failed { error } => {
                    writeln!(stdout, "  failed  {} {}: {error}", item.id, item.last_modified)?
                }
            }
        }
        Ok(())
    }

    pub fn print_plan(result: &PlanResult) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        writeln!(
            stdout,
            "pattern {:?}: {} matched, {} to download",
            result.pattern,
            result.matched,
            result.items.len()
        )?;
        for item in &result.items {
            writeln!(stdout, "  {} {} {}", item.id, item.last_modified, item.url)?;
        }
        Ok(())
    }

    pub fn print_status(result: &StatusResult) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        for row in &result.rows {
            writeln!(stdout, "{}\t{}\t{}", row.id, row.last_modified, row.status)?;
        }
        Ok(())
    }
}
