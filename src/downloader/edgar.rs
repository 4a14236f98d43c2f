//! SEC company ticker listing, synced into the filing store.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::downloader::client::DownloadClient;
use crate::downloader::errors::DownloadError;
use crate::downloader::queue::FetchQueue;
use crate::models::DownloadRequest;
use crate::storage::{FilingStore, StoreError};

/// One entry of the SEC `company_tickers.json` listing.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CompanyTicker {
    pub cik_str: u64,
    pub ticker: String,
    pub title: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TickerSyncError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("Failed to read ticker listing {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse ticker listing: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Parse the listing, keyed by position (`{"0": {...}, "1": {...}}`).
pub fn parse_company_tickers(json: &str) -> Result<Vec<CompanyTicker>, serde_json::Error> {
    let listing: HashMap<String, CompanyTicker> = serde_json::from_str(json)?;
    let mut entries: Vec<(u64, CompanyTicker)> = listing
        .into_iter()
        .map(|(key, entry)| (key.parse().unwrap_or(u64::MAX), entry))
        .collect();
    entries.sort_by_key(|(position, _)| *position);
    Ok(entries.into_iter().map(|(_, entry)| entry).collect())
}

/// Download the ticker listing through the rate-limited queue and upsert it.
pub async fn sync_company_tickers<S>(
    store: &S,
    client: &DownloadClient,
    queue: &mut FetchQueue,
    tickers_url: &str,
) -> Result<usize, TickerSyncError>
where
    S: FilingStore + ?Sized,
{
    info!("Syncing company tickers from {}", tickers_url);

    queue.wait_turn().await;
    let stored = client
        .fetch(&DownloadRequest::new(tickers_url, "company_tickers.json"))
        .await?;

    let json = read_listing(&stored.path).await;
    let _ = tokio::fs::remove_file(&stored.path).await;
    let tickers = parse_company_tickers(&json?)?;
    debug!("Parsed {} ticker entries", tickers.len());

    let mut synced = 0;
    for entry in &tickers {
        if entry.ticker.trim().is_empty() {
            warn!("Skipping ticker entry without symbol for CIK {}", entry.cik_str);
            continue;
        }
        store
            .upsert_company_ticker(entry.cik_str, &entry.ticker.to_uppercase(), &entry.title)
            .await?;
        synced += 1;
    }

    info!("Synced {} company tickers", synced);
    Ok(synced)
}

async fn read_listing(path: &Path) -> Result<String, TickerSyncError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| TickerSyncError::Read {
            path: path.display().to_string(),
            source,
        })
}
