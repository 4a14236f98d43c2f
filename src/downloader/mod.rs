//! Rate-limited acquisition of archive resources
//!
//! A [`FetchQueue`] gates every request behind a shared [`RateLimiter`] so the
//! archive's request ceiling is never exceeded; a [`DownloadClient`] streams
//! each resource to the local working directory.

pub mod client;
pub mod edgar;
pub mod errors;
pub mod metrics;
pub mod queue;
pub mod timer;

pub use client::DownloadClient;
pub use edgar::{sync_company_tickers, CompanyTicker, TickerSyncError};
pub use errors::{DownloadError, QueueError};
pub use metrics::{FetchMetrics, InFlightGuard, MetricsSnapshot};
pub use queue::FetchQueue;
pub use timer::RateLimiter;

use std::path::Path;
use tracing::debug;

/// Delete every file under the working directory, keeping the directory itself.
pub fn flush_local_artifacts(dir: &Path) -> std::io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in walkdir::WalkDir::new(dir).min_depth(1).contents_first(true) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_dir() {
            std::fs::remove_dir(entry.path())?;
        } else {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }

    debug!("Flushed {} local artifacts from {}", removed, dir.display());
    Ok(removed)
}
