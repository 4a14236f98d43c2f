//! Centralized configuration management for edgar-harvest

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::models::FormType;

pub const DEFAULT_INDEX_ROOT: &str = "https://www.sec.gov/Archives/edgar/full-index";
pub const DEFAULT_FILING_ROOT: &str = "https://www.sec.gov/Archives/";
pub const DEFAULT_TICKERS_URL: &str = "https://www.sec.gov/files/company_tickers.json";
pub const DEFAULT_USER_AGENT: &str = "edgar-harvest/0.1.0 (admin@example.com)";

/// Fatal configuration problems, raised before any work starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse environment variable {name} = '{value}': {reason}")]
    InvalidVar {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid year range: start year {start} is after end year {end}")]
    InvalidYearRange { start: i32, end: i32 },

    #[error("Cannot create download directory {path}: {source}")]
    DownloadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Which embedded XBRL body of a container feeds the structured parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocumentPolicy {
    /// Parse only the first embedded document; later ones are ignored.
    #[default]
    FirstOnly,
    /// Try embedded documents in order and keep the first one that parses.
    FirstParsable,
}

impl FromStr for DocumentPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "first-only" | "first" => Ok(DocumentPolicy::FirstOnly),
            "first-parsable" | "first-parseable" => Ok(DocumentPolicy::FirstParsable),
            other => Err(format!(
                "unsupported document policy '{}', expected first-only or first-parsable",
                other
            )),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_path: PathBuf,
    /// Working directory for index files and filing containers
    pub download_dir: PathBuf,
    /// Archive roots and lookup URLs
    pub archive: ArchiveConfig,
    /// Rate limiting configuration
    pub rate_limits: RateLimits,
    /// HTTP client configuration
    pub http: HttpConfig,
    /// Form types kept when parsing index files
    pub form_types: Vec<FormType>,
    /// Embedded document selection
    pub document_policy: DocumentPolicy,
    /// Log harvest progress every N filings
    pub progress_every: usize,
}

#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Root of the quarterly full-index tree
    pub index_root: String,
    /// Root that partial filing paths are appended to
    pub filing_root: String,
    /// SEC company ticker listing
    pub tickers_url: String,
}

/// Rate limiting configuration for the archive
#[derive(Debug, Clone)]
pub struct RateLimits {
    /// Minimum delay between two archive requests (milliseconds)
    pub request_interval_ms: u64,
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Upper bound on streaming one response body to disk
    pub write_timeout_seconds: u64,
    /// User agent string; the archive rejects anonymous clients
    pub user_agent: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            index_root: DEFAULT_INDEX_ROOT.to_string(),
            filing_root: DEFAULT_FILING_ROOT.to_string(),
            tickers_url: DEFAULT_TICKERS_URL.to_string(),
        }
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            request_interval_ms: 100,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
            write_timeout_seconds: 300,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./edgar-harvest.db"),
            download_dir: PathBuf::from("./downloads"),
            archive: ArchiveConfig::default(),
            rate_limits: RateLimits::default(),
            http: HttpConfig::default(),
            form_types: vec![FormType::TenK, FormType::TenQ],
            document_policy: DocumentPolicy::default(),
            progress_every: 25,
        }
    }
}

impl Config {
    /// Load configuration from environment variables and defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let database_path = std::env::var("EDGAR_HARVEST_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.database_path);

        let download_dir = std::env::var("EDGAR_HARVEST_DOWNLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.download_dir);

        let archive = ArchiveConfig {
            index_root: std::env::var("EDGAR_HARVEST_INDEX_ROOT")
                .unwrap_or(defaults.archive.index_root),
            filing_root: std::env::var("EDGAR_HARVEST_FILING_ROOT")
                .unwrap_or(defaults.archive.filing_root),
            tickers_url: std::env::var("EDGAR_HARVEST_TICKERS_URL")
                .unwrap_or(defaults.archive.tickers_url),
        };

        let rate_limits = RateLimits {
            request_interval_ms: parse_env_var("EDGAR_HARVEST_REQUEST_INTERVAL_MS")?
                .unwrap_or(defaults.rate_limits.request_interval_ms),
        };

        let http = HttpConfig {
            timeout_seconds: parse_env_var("EDGAR_HARVEST_HTTP_TIMEOUT_SECONDS")?
                .unwrap_or(defaults.http.timeout_seconds),
            write_timeout_seconds: parse_env_var("EDGAR_HARVEST_WRITE_TIMEOUT_SECONDS")?
                .unwrap_or(defaults.http.write_timeout_seconds),
            user_agent: std::env::var("EDGAR_HARVEST_USER_AGENT")
                .unwrap_or(defaults.http.user_agent),
        };

        let form_types = match std::env::var("EDGAR_HARVEST_FORM_TYPES") {
            Ok(value) => parse_form_types(&value).map_err(|reason| ConfigError::InvalidVar {
                name: "EDGAR_HARVEST_FORM_TYPES".to_string(),
                value: value.clone(),
                reason,
            })?,
            Err(_) => defaults.form_types,
        };

        Ok(Config {
            database_path,
            download_dir,
            archive,
            rate_limits,
            http,
            form_types,
            document_policy: parse_env_var("EDGAR_HARVEST_DOCUMENT_POLICY")?
                .unwrap_or(defaults.document_policy),
            progress_every: parse_env_var("EDGAR_HARVEST_PROGRESS_EVERY")?
                .unwrap_or(defaults.progress_every),
        })
    }

    /// Get database path as string
    pub fn database_path_str(&self) -> &str {
        self.database_path.to_str().unwrap_or("./edgar-harvest.db")
    }

    /// Get the minimum request interval as Duration
    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.rate_limits.request_interval_ms)
    }

    /// Get HTTP timeout as Duration
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_seconds)
    }

    /// Get the body write timeout as Duration
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.http.write_timeout_seconds)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check_archive()?;

        std::fs::create_dir_all(&self.download_dir).map_err(|source| ConfigError::DownloadDir {
            path: self.download_dir.clone(),
            source,
        })?;

        Ok(())
    }

    /// Checks the archive roots and form types without touching the filesystem.
    pub fn check_archive(&self) -> Result<(), ConfigError> {
        if self.archive.index_root.trim().is_empty() {
            return Err(ConfigError::Missing("index root URL"));
        }
        if self.archive.filing_root.trim().is_empty() {
            return Err(ConfigError::Missing("filing root URL"));
        }
        if self.form_types.is_empty() {
            return Err(ConfigError::Missing("at least one form type"));
        }
        Ok(())
    }
}

/// Parse a comma separated list of form types such as `10-K,10-Q/A`.
pub fn parse_form_types(value: &str) -> Result<Vec<FormType>, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| token.parse::<FormType>().map_err(|e| e.to_string()))
        .collect()
}

/// Helper function to parse environment variable as a specific type
fn parse_env_var<T>(var_name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var_name) {
        Ok(val) => val.parse().map(Some).map_err(|e: T::Err| ConfigError::InvalidVar {
            name: var_name.to_string(),
            value: val.clone(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(None),
    }
}
