//! Streaming HTTP fetch of archive resources to the local working directory.

use futures::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::downloader::errors::{DownloadError, QueueError};
use crate::downloader::metrics::FetchMetrics;
use crate::downloader::queue::FetchQueue;
use crate::models::{DownloadRequest, StoredFile};

/// Fetches one resource at a time into `download_dir`.
#[derive(Debug, Clone)]
pub struct DownloadClient {
    client: Client,
    download_dir: PathBuf,
    request_timeout: Duration,
    write_timeout: Duration,
    metrics: Arc<FetchMetrics>,
}

/// Bound on waiting for response headers unless configured otherwise.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

impl DownloadClient {
    pub fn new(client: Client, download_dir: impl Into<PathBuf>, write_timeout: Duration) -> Self {
        Self {
            client,
            download_dir: download_dir.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            write_timeout,
            metrics: FetchMetrics::new(),
        }
    }

    /// Bound connecting and waiting for response headers; the body is bounded
    /// by the write timeout alone.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(&config.http.user_agent)
            .connect_timeout(config.http_timeout())
            .build()?;
        Ok(Self::new(client, &config.download_dir, config.write_timeout())
            .with_request_timeout(config.http_timeout()))
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn metrics(&self) -> &Arc<FetchMetrics> {
        &self.metrics
    }

    /// GET `request.url` and stream the body to `<download_dir>/<file_name>`.
    pub async fn fetch(&self, request: &DownloadRequest) -> Result<StoredFile, DownloadError> {
        if request.file_name.is_empty() || request.file_name.contains(['/', '\\']) {
            return Err(DownloadError::InvalidRequest(format!(
                "unusable file name '{}' for {}",
                request.file_name, request.url
            )));
        }

        let _in_flight = self.metrics.track_fetch();
        let result = self.fetch_to_disk(request).await;
        match &result {
            Ok(_) => self.metrics.record_success(),
            Err(_) => self.metrics.record_failure(),
        }
        result
    }

    async fn fetch_to_disk(&self, request: &DownloadRequest) -> Result<StoredFile, DownloadError> {
        debug!("Fetching {}", request.url);

        let response = tokio::time::timeout(self.request_timeout, self.client.get(&request.url).send())
            .await
            .map_err(|_| DownloadError::RequestTimeout {
                url: request.url.clone(),
                timeout: self.request_timeout,
            })?
            .map_err(|e| DownloadError::network(&request.url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Upstream {
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }

        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .map_err(|e| DownloadError::write(&self.download_dir, e))?;
        let path = self.download_dir.join(&request.file_name);

        let _writing = self.metrics.track_write();
        let outcome = tokio::time::timeout(
            self.write_timeout,
            stream_to_file(response, &request.url, &path),
        )
        .await;

        let bytes = match outcome {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(e);
            }
            Err(_) => {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(DownloadError::WriteTimeout {
                    url: request.url.clone(),
                    timeout: self.write_timeout,
                });
            }
        };

        debug!("Stored {} bytes from {} at {}", bytes, request.url, path.display());
        Ok(StoredFile {
            path,
            url: request.url.clone(),
        })
    }

    /// Fetch everything in `queue`, rate-limited, skipping requests that fail.
    pub async fn drain_all(&self, queue: &mut FetchQueue) -> Vec<StoredFile> {
        let total = queue.len();
        let mut stored = Vec::with_capacity(total);

        loop {
            let request = match queue.dequeue_rate_limited().await {
                Ok(request) => request,
                Err(QueueError::Empty) => break,
            };

            match self.fetch(&request).await {
                Ok(file) => stored.push(file),
                Err(e) => warn!("Skipping {}: {}", request.url, e),
            }
        }

        info!("Fetched {}/{} queued resources", stored.len(), total);
        stored
    }
}

async fn stream_to_file(
    response: reqwest::Response,
    url: &str,
    path: &Path,
) -> Result<u64, DownloadError> {
    let file = File::create(path)
        .await
        .map_err(|e| DownloadError::write(path, e))?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DownloadError::network(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::write(path, e))?;
        written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::write(path, e))?;

    Ok(written)
}
