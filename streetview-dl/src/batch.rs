//! Processing of a list of links.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use streetview::{CancelToken, StreetViewError};

use crate::pipeline::{Pipeline, Target};

/// Result counts of a batch run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
    /// The run was interrupted before every link was processed.
    pub cancelled: bool,
}

impl BatchReport {
    /// A batch fails only if none of its links could be processed.
    pub fn is_failure(&self) -> bool {
        self.succeeded == 0 && self.failed > 0
    }
}

/// Reads the links of a batch file. Blank lines and lines starting with `#` are skipped.
pub fn read_batch(path: &Path) -> anyhow::Result<Vec<String>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read batch file {}", path.display()))?;
    let links = parse_batch(&contents);
    if links.is_empty() {
        bail!("batch file {} contains no links", path.display());
    }
    Ok(links)
}

fn parse_batch(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Processes every link in turn. A failing link is reported and skipped, cancellation stops the
/// run.
pub async fn run_batch(pipeline: &Pipeline, links: &[String], cancel: &CancelToken) -> BatchReport {
    let mut report = BatchReport::default();
    let total = links.len();

    for (index, link) in links.iter().enumerate() {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }

        log::info!("[{}/{total}] {link}", index + 1);
        match pipeline.run(&Target::Link(link.clone()), None, cancel).await {
            Ok(outcome) => {
                outcome.print();
                report.succeeded += 1;
            }
            Err(err) if is_cancellation(&err) => {
                report.cancelled = true;
                break;
            }
            Err(err) => {
                log::error!("Failed to process {link}: {err:#}");
                report.failed += 1;
            }
        }
    }

    log::info!(
        "Batch finished: {} succeeded, {} failed{}",
        report.succeeded,
        report.failed,
        if report.cancelled { ", cancelled" } else { "" }
    );
    report
}

/// Returns true if `err` was caused by the run being cancelled.
pub fn is_cancellation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<StreetViewError>(),
        Some(StreetViewError::Cancelled)
    )
}
