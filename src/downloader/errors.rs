//! Download and queue error types

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Upstream returned HTTP {status} for {url}")]
    Upstream { url: String, status: u16 },

    #[error("HTTP request failed for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No response headers from {url} within {timeout:?}")]
    RequestTimeout { url: String, timeout: Duration },

    #[error("Writing {url} to disk exceeded {timeout:?}")]
    WriteTimeout { url: String, timeout: Duration },

    #[error("Invalid download request: {0}")]
    InvalidRequest(String),
}

impl DownloadError {
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        DownloadError::Network {
            url: url.into(),
            source,
        }
    }

    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DownloadError::Write {
            path: path.into(),
            source,
        }
    }

    /// Whether a later attempt at the same URL could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DownloadError::Network { .. }
            | DownloadError::RequestTimeout { .. }
            | DownloadError::WriteTimeout { .. } => true,
            DownloadError::Upstream { status, .. } => *status == 429 || *status >= 500,
            DownloadError::Write { .. } | DownloadError::InvalidRequest(_) => false,
        }
    }
}

/// Signals that a queue has nothing left to hand out.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("Fetch queue is empty")]
    Empty,
}
