//! Rate-limited harvester for XBRL financial disclosures in the SEC EDGAR archive.

pub mod config;
pub mod downloader;
pub mod extractor;
pub mod harvester;
pub mod index;
pub mod models;
pub mod storage;
pub mod xbrl;

pub use config::Config;
pub use harvester::{Harvester, HarvestError, HarvestPhase, HarvestSummary};
pub use storage::{FilingStore, SqliteStore};
pub use xbrl::{StructuredParser, XbrlParser};
