//! Ingestion orchestrator
//!
//! Drives acquisition over a year range: quarterly index files are fetched
//! and parsed into descriptors, and every descriptor whose URL is not yet in
//! the visited-link ledger is fetched, extracted, parsed and persisted. The
//! ledger makes repeated runs idempotent and lets failed filings be retried
//! on their own.

use futures::StreamExt;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Config, ConfigError, DocumentPolicy};
use crate::downloader::{
    flush_local_artifacts, sync_company_tickers, DownloadClient, DownloadError, FetchQueue,
    TickerSyncError,
};
use crate::extractor::{EmbeddedDocuments, ExtractError};
use crate::index::{index_file_name, index_url, parse_index, read_index_file, QUARTERS};
use crate::models::{
    DownloadRequest, FilingDescriptor, FinancialRecord, FormType, VisitStatus,
};
use crate::storage::{FilingStore, StoreError};
use crate::xbrl::{StructuredParser, XbrlError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestPhase {
    Idle,
    CollectingIndices,
    ParsingIndices,
    FetchingFilings,
    RetryingErrors,
    Done,
}

/// Aggregate outcome of one batch. Individual failures live in the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarvestSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Why a single filing could not be ingested. Recorded, never fatal.
#[derive(Error, Debug)]
pub enum FilingFailure {
    #[error(transparent)]
    Fetch(#[from] DownloadError),

    #[error(transparent)]
    Extraction(#[from] ExtractError),

    #[error(transparent)]
    Parse(#[from] XbrlError),
}

impl FilingFailure {
    pub fn stage(&self) -> &'static str {
        match self {
            FilingFailure::Fetch(_) => "fetch",
            FilingFailure::Extraction(_) => "extract",
            FilingFailure::Parse(_) => "parse",
        }
    }

    /// Whether a later retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FilingFailure::Fetch(e) if e.is_transient())
    }

    /// Error detail stored in the ledger.
    pub fn ledger_detail(&self) -> String {
        format!("{}: {}", self.stage(), self)
    }
}

/// Batch-level failure; aborts the run.
#[derive(Error, Debug)]
pub enum HarvestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Local I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Harvester<S, P> {
    config: Config,
    client: DownloadClient,
    queue: FetchQueue,
    store: Arc<S>,
    parser: P,
    phase: HarvestPhase,
    stop: Arc<AtomicBool>,
}

impl<S, P> Harvester<S, P>
where
    S: FilingStore,
    P: StructuredParser,
{
    pub fn new(config: Config, client: DownloadClient, store: Arc<S>, parser: P) -> Self {
        let queue = FetchQueue::new(config.request_interval());
        Self {
            config,
            client,
            queue,
            store,
            parser,
            phase: HarvestPhase::Idle,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn phase(&self) -> HarvestPhase {
        self.phase
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Flag checked before every filing; setting it ends the batch early.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn set_phase(&mut self, phase: HarvestPhase) {
        if self.phase != phase {
            info!("Harvest phase: {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn flush_downloads(&self) -> Result<(), HarvestError> {
        flush_local_artifacts(self.client.download_dir())?;
        Ok(())
    }

    /// Ingest every wanted filing listed in the indices of `start_year..=end_year`.
    pub async fn add_new_filings(
        &mut self,
        start_year: i32,
        end_year: i32,
    ) -> Result<HarvestSummary, HarvestError> {
        if start_year > end_year {
            return Err(ConfigError::InvalidYearRange {
                start: start_year,
                end: end_year,
            }
            .into());
        }
        self.config.check_archive()?;
        self.flush_downloads()?;

        let descriptors = self.collect_descriptors(start_year, end_year).await?;
        self.flush_downloads()?;

        self.set_phase(HarvestPhase::FetchingFilings);
        let total = descriptors.len();
        let progress_every = self.config.progress_every.max(1);
        let mut summary = HarvestSummary::default();

        for (position, descriptor) in descriptors.iter().enumerate() {
            if self.stop_requested() {
                info!("Stop requested, leaving {} filings unvisited", total - position);
                break;
            }

            let url = descriptor.url();
            if self.store.find_visited_link(url).await?.is_some() {
                debug!("Already visited {}", url);
                summary.skipped += 1;
            } else {
                summary.attempted += 1;
                match self.ingest(&descriptor.download_request()).await {
                    Ok(record) => {
                        let filing_id = self.persist(record, Some(descriptor), url).await?;
                        self.store
                            .insert_visited_link(url, VisitStatus::Ok, None, Some(filing_id))
                            .await?;
                        summary.succeeded += 1;
                    }
                    Err(failure) => {
                        warn!(
                            "Filing {} failed at {}{}: {}",
                            url,
                            failure.stage(),
                            if failure.is_transient() { " (transient)" } else { "" },
                            failure
                        );
                        self.store
                            .insert_visited_link(
                                url,
                                VisitStatus::Error,
                                Some(&failure.ledger_detail()),
                                None,
                            )
                            .await?;
                        summary.failed += 1;
                    }
                }
                self.flush_downloads()?;
            }

            if (position + 1) % progress_every == 0 {
                info!(
                    "Progress: {}/{} filings ({} ok, {} failed, {} skipped)",
                    position + 1,
                    total,
                    summary.succeeded,
                    summary.failed,
                    summary.skipped
                );
            }
        }

        self.set_phase(HarvestPhase::Done);
        let fetches = self.client.metrics().snapshot();
        debug!("Fetches so far: {} completed, {} failed", fetches.completed, fetches.failed);
        info!(
            "Harvest {}-{} finished: {} attempted, {} ok, {} failed, {} skipped",
            start_year,
            end_year,
            summary.attempted,
            summary.succeeded,
            summary.failed,
            summary.skipped
        );
        Ok(summary)
    }

    async fn collect_descriptors(
        &mut self,
        start_year: i32,
        end_year: i32,
    ) -> Result<Vec<FilingDescriptor>, HarvestError> {
        self.set_phase(HarvestPhase::CollectingIndices);
        let root = &self.config.archive.index_root;
        let requests: Vec<DownloadRequest> = (start_year..=end_year)
            .flat_map(|year| {
                QUARTERS.iter().map(move |&quarter| {
                    DownloadRequest::new(
                        index_url(root, year, quarter),
                        index_file_name(year, quarter),
                    )
                })
            })
            .collect();
        info!("Collecting {} index files for {}-{}", requests.len(), start_year, end_year);
        self.queue.enqueue(requests);
        let index_files = self.client.drain_all(&mut self.queue).await;

        self.set_phase(HarvestPhase::ParsingIndices);
        let wanted: HashSet<FormType> = self.config.form_types.iter().copied().collect();
        let mut descriptors = Vec::new();
        for file in &index_files {
            let contents = read_index_file(&file.path).await?;
            let parsed = parse_index(&contents, &self.config.archive.filing_root, &wanted);
            debug!("{} wanted filings in {}", parsed.len(), file.url);
            descriptors.extend(parsed);
        }

        info!(
            "Parsed {} index files into {} filing descriptors",
            index_files.len(),
            descriptors.len()
        );
        Ok(descriptors)
    }

    /// Re-drive every ERROR ledger record; OK records are never touched.
    pub async fn retry_problematic_filings(&mut self) -> Result<HarvestSummary, HarvestError> {
        self.config.check_archive()?;
        self.set_phase(HarvestPhase::RetryingErrors);
        self.flush_downloads()?;

        let store = Arc::clone(&self.store);
        let mut links = store.stream_visited_links(VisitStatus::Error);
        let mut summary = HarvestSummary::default();

        while let Some(link) = links.next().await {
            let link = link?;
            if self.stop_requested() {
                info!("Stop requested, ending retry pass");
                break;
            }

            summary.attempted += 1;
            match self.ingest(&DownloadRequest::for_url(&link.url)).await {
                Ok(record) => {
                    let filing_id = self.persist(record, None, &link.url).await?;
                    store
                        .update_visited_link(link.id, VisitStatus::Ok, None, Some(filing_id))
                        .await?;
                    summary.succeeded += 1;
                }
                Err(failure) => {
                    warn!("Retry of {} failed at {}: {}", link.url, failure.stage(), failure);
                    store
                        .update_visited_link(
                            link.id,
                            VisitStatus::Error,
                            Some(&failure.ledger_detail()),
                            None,
                        )
                        .await?;
                    summary.failed += 1;
                }
            }
            self.flush_downloads()?;

            if summary.attempted % self.config.progress_every.max(1) == 0 {
                info!(
                    "Retry progress: {} attempted, {} recovered",
                    summary.attempted, summary.succeeded
                );
            }
        }

        self.set_phase(HarvestPhase::Done);
        info!(
            "Retry finished: {} attempted, {} recovered, {} still failing",
            summary.attempted, summary.succeeded, summary.failed
        );
        Ok(summary)
    }

    /// Refresh the ticker table through the harvester's rate-limited queue.
    pub async fn sync_company_tickers(&mut self) -> Result<usize, TickerSyncError> {
        let tickers_url = self.config.archive.tickers_url.clone();
        sync_company_tickers(self.store.as_ref(), &self.client, &mut self.queue, &tickers_url).await
    }

    /// Fetch one container and turn it into a record.
    async fn ingest(&mut self, request: &DownloadRequest) -> Result<FinancialRecord, FilingFailure> {
        self.queue.wait_turn().await;
        let stored = self.client.fetch(request).await?;
        self.parse_container(&stored.path)
    }

    fn parse_container(&self, path: &Path) -> Result<FinancialRecord, FilingFailure> {
        let mut documents = EmbeddedDocuments::open(path);
        let no_document = || ExtractError::NoEmbeddedDocument(path.display().to_string());

        match self.config.document_policy {
            DocumentPolicy::FirstOnly => {
                let body = documents.next().ok_or_else(no_document)??;
                Ok(self.parser.parse(&body)?)
            }
            DocumentPolicy::FirstParsable => {
                let mut first_error = None;
                for body in documents {
                    match self.parser.parse(&body?) {
                        Ok(record) => return Ok(record),
                        Err(e) => {
                            debug!("Skipping unparsable embedded document: {}", e);
                            first_error.get_or_insert(e);
                        }
                    }
                }
                Err(match first_error {
                    Some(e) => FilingFailure::Parse(e),
                    None => FilingFailure::Extraction(no_document()),
                })
            }
        }
    }

    async fn persist(
        &self,
        mut record: FinancialRecord,
        descriptor: Option<&FilingDescriptor>,
        url: &str,
    ) -> Result<i64, StoreError> {
        match descriptor {
            Some(descriptor) => record.attach_descriptor(descriptor),
            None => record.source_url = Some(url.to_string()),
        }
        if let Some(cik) = record.cik {
            if let Some(symbol) = self.store.find_trading_symbol(cik).await? {
                record.trading_symbol = Some(symbol);
            }
        }
        record.compute_ratios();
        self.store.insert_filing(&record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use futures::TryStreamExt;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CONTAINER: &str = "<SEC-DOCUMENT>\n<XBRL>\nfirst\n</XBRL>\n<XBRL>\nsecond\n</XBRL>\n";

    fn stub_parser(raw: &str) -> Result<FinancialRecord, XbrlError> {
        if raw == "second" {
            return Ok(FinancialRecord {
                net_income: Some(10.0),
                assets: Some(100.0),
                ..Default::default()
            });
        }
        Err(XbrlError::Unsupported(format!("cannot read '{}'", raw)))
    }

    async fn harvester(
        server: &MockServer,
        temp: &TempDir,
        policy: DocumentPolicy,
    ) -> Harvester<SqliteStore, fn(&str) -> Result<FinancialRecord, XbrlError>> {
        let mut config = Config::default();
        config.download_dir = temp.path().join("downloads");
        config.archive.index_root = format!("{}/full-index", server.uri());
        config.archive.filing_root = format!("{}/", server.uri());
        config.rate_limits.request_interval_ms = 0;
        config.document_policy = policy;

        let client = DownloadClient::new(
            reqwest::Client::new(),
            &config.download_dir,
            Duration::from_secs(5),
        );
        let store = Arc::new(SqliteStore::new_in_memory().await.unwrap());
        Harvester::new(config, client, store, stub_parser as fn(&str) -> _)
    }

    async fn mount_index(server: &MockServer, body: &str) {
        Mock::given(method("GET"))
            .and(path("/full-index/2019/QTR1/master.idx"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
            .mount(server)
            .await;
        // Other quarters are missing upstream and skipped.
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(server)
            .await;
    }

    async fn mount_container(server: &MockServer, at: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_inverted_year_range_fetches_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let temp = TempDir::new().unwrap();
        let mut harvester = harvester(&server, &temp, DocumentPolicy::FirstOnly).await;

        let result = harvester.add_new_filings(2020, 2019).await;
        assert!(matches!(
            result,
            Err(HarvestError::Config(ConfigError::InvalidYearRange { start: 2020, end: 2019 }))
        ));
        assert_eq!(harvester.phase(), HarvestPhase::Idle);
    }

    #[tokio::test]
    async fn test_missing_filing_root_fails_before_any_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let temp = TempDir::new().unwrap();
        let mut harvester = harvester(&server, &temp, DocumentPolicy::FirstOnly).await;
        harvester.config.archive.filing_root = String::new();

        let result = harvester.add_new_filings(2019, 2019).await;
        assert!(matches!(result, Err(HarvestError::Config(ConfigError::Missing(_)))));

        let result = harvester.retry_problematic_filings().await;
        assert!(matches!(result, Err(HarvestError::Config(ConfigError::Missing(_)))));

        assert_eq!(harvester.phase(), HarvestPhase::Idle);
        assert!(!temp.path().join("downloads").exists());
        for status in [VisitStatus::Ok, VisitStatus::Error] {
            assert_eq!(harvester.store().count_visited_links(status).await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_missing_index_root_fails_before_any_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let temp = TempDir::new().unwrap();
        let mut harvester = harvester(&server, &temp, DocumentPolicy::FirstOnly).await;
        harvester.config.archive.index_root = "  ".to_string();

        let result = harvester.add_new_filings(2019, 2019).await;
        assert!(matches!(result, Err(HarvestError::Config(ConfigError::Missing(_)))));
        assert_eq!(harvester.phase(), HarvestPhase::Idle);
    }

    #[tokio::test]
    async fn test_filing_listed_in_two_quarters_is_fetched_once() {
        let server = MockServer::start().await;
        let line = "7|SEVEN CORP|10-K|2019-02-01|edgar/data/7/a.txt\n";
        Mock::given(method("GET"))
            .and(path("/edgar/data/7/a.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CONTAINER))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/full-index/2019/QTR2/master.idx"))
            .respond_with(ResponseTemplate::new(200).set_body_string(line))
            .mount(&server)
            .await;
        mount_index(&server, line).await;
        let temp = TempDir::new().unwrap();
        let mut harvester = harvester(&server, &temp, DocumentPolicy::FirstParsable).await;

        let summary = harvester.add_new_filings(2019, 2019).await.unwrap();
        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(
            harvester.store().count_visited_links(VisitStatus::Ok).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_sync_company_tickers_fetches_listing_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/company_tickers.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"0": {"cik_str": 320193, "ticker": "AAPL", "title": "Apple Inc."}}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;
        let temp = TempDir::new().unwrap();
        let mut harvester = harvester(&server, &temp, DocumentPolicy::FirstOnly).await;
        harvester.config.archive.tickers_url = format!("{}/files/company_tickers.json", server.uri());

        assert_eq!(harvester.sync_company_tickers().await.unwrap(), 1);
        assert_eq!(
            harvester.store().find_trading_symbol(320193).await.unwrap().as_deref(),
            Some("AAPL")
        );
    }

    #[tokio::test]
    async fn test_first_parsable_policy_uses_later_document() {
        let server = MockServer::start().await;
        mount_container(&server, "/edgar/data/7/a.txt", CONTAINER).await;
        mount_index(&server, "7|SEVEN CORP|10-K|2019-02-01|edgar/data/7/a.txt\n").await;
        let temp = TempDir::new().unwrap();
        let mut harvester = harvester(&server, &temp, DocumentPolicy::FirstParsable).await;

        let summary = harvester.add_new_filings(2019, 2019).await.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(harvester.phase(), HarvestPhase::Done);

        let link = harvester
            .store()
            .find_visited_link(&format!("{}/edgar/data/7/a.txt", server.uri()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(link.status, VisitStatus::Ok);
        assert!(link.filing_id.is_some());
    }

    #[tokio::test]
    async fn test_first_only_policy_records_parse_failure() {
        let server = MockServer::start().await;
        mount_container(&server, "/edgar/data/7/a.txt", CONTAINER).await;
        mount_index(&server, "7|SEVEN CORP|10-K|2019-02-01|edgar/data/7/a.txt\n").await;
        let temp = TempDir::new().unwrap();
        let mut harvester = harvester(&server, &temp, DocumentPolicy::FirstOnly).await;

        let summary = harvester.add_new_filings(2019, 2019).await.unwrap();
        assert_eq!(summary.failed, 1);

        let errors: Vec<_> = harvester
            .store()
            .stream_visited_links(VisitStatus::Error)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].error.as_deref(),
            Some("parse: Unsupported XBRL document: cannot read 'first'")
        );
    }

    #[tokio::test]
    async fn test_container_without_xbrl_is_extract_failure() {
        let server = MockServer::start().await;
        mount_container(&server, "/edgar/data/8/b.txt", "<SEC-DOCUMENT>\nplain\n").await;
        mount_index(&server, "8|EIGHT CORP|10-Q|2019-03-01|edgar/data/8/b.txt\n").await;
        let temp = TempDir::new().unwrap();
        let mut harvester = harvester(&server, &temp, DocumentPolicy::FirstParsable).await;

        harvester.add_new_filings(2019, 2019).await.unwrap();

        let link = harvester
            .store()
            .find_visited_link(&format!("{}/edgar/data/8/b.txt", server.uri()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(link.status, VisitStatus::Error);
        assert!(link.error.unwrap().starts_with("extract: No embedded document"));
    }

    #[tokio::test]
    async fn test_stop_flag_ends_batch_before_next_filing() {
        let server = MockServer::start().await;
        mount_index(&server, "7|SEVEN CORP|10-K|2019-02-01|edgar/data/7/a.txt\n").await;
        let temp = TempDir::new().unwrap();
        let mut harvester = harvester(&server, &temp, DocumentPolicy::FirstOnly).await;

        harvester.stop_handle().store(true, Ordering::SeqCst);
        let summary = harvester.add_new_filings(2019, 2019).await.unwrap();

        assert_eq!(summary, HarvestSummary::default());
        assert_eq!(
            harvester.store().count_visited_links(VisitStatus::Error).await.unwrap(),
            0
        );
    }

    #[test]
    fn test_failure_stage_prefixes_ledger_detail() {
        let failure = FilingFailure::from(DownloadError::Upstream {
            url: "u".to_string(),
            status: 503,
        });
        assert_eq!(failure.stage(), "fetch");
        assert!(failure.ledger_detail().starts_with("fetch: "));
        assert!(failure.ledger_detail().contains("503"));
        assert!(failure.is_transient());
        assert!(!FilingFailure::from(XbrlError::Unsupported("x".to_string())).is_transient());
    }
}
