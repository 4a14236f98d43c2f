pub mod session;

pub use session::{SessionState, StoreSession};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::models::{FinancialRecord, VisitStatus, VisitedLink};

/// Rows fetched per page when streaming the ledger.
const LEDGER_PAGE_SIZE: i64 = 100;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store is offline")]
    Offline,

    #[error("Corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },
}

/// Persistence collaborator of the harvester.
#[async_trait]
pub trait FilingStore: Send + Sync {
    /// Persist a parsed filing and return its id.
    async fn insert_filing(&self, record: &FinancialRecord) -> Result<i64, StoreError>;

    async fn find_visited_link(&self, url: &str) -> Result<Option<VisitedLink>, StoreError>;

    async fn insert_visited_link(
        &self,
        url: &str,
        status: VisitStatus,
        error: Option<&str>,
        filing_id: Option<i64>,
    ) -> Result<i64, StoreError>;

    /// Ledger records with `status`, in id order.
    fn stream_visited_links(
        &self,
        status: VisitStatus,
    ) -> BoxStream<'_, Result<VisitedLink, StoreError>>;

    async fn update_visited_link(
        &self,
        id: i64,
        status: VisitStatus,
        error: Option<&str>,
        filing_id: Option<i64>,
    ) -> Result<(), StoreError>;

    /// Every ticker listed for `cik`, sorted and joined with `;`.
    async fn find_trading_symbol(&self, cik: u64) -> Result<Option<String>, StoreError>;

    async fn count_visited_links(&self, status: VisitStatus) -> Result<i64, StoreError>;

    async fn upsert_company_ticker(
        &self,
        cik: u64,
        ticker: &str,
        title: &str,
    ) -> Result<(), StoreError>;
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS filings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        cik INTEGER,
        company_name TEXT,
        form_type TEXT,
        date_filed TEXT,
        period_end TEXT,
        fiscal_year INTEGER,
        fiscal_period TEXT,
        trading_symbol TEXT,
        assets REAL,
        liabilities REAL,
        equity REAL,
        revenues REAL,
        net_income REAL,
        return_on_assets REAL,
        return_on_equity REAL,
        return_on_sales REAL,
        source_url TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_filings_cik ON filings(cik)",
    r#"
    CREATE TABLE IF NOT EXISTS visited_links (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        url TEXT NOT NULL UNIQUE,
        status TEXT NOT NULL,
        error TEXT,
        filing_id INTEGER REFERENCES filings(id),
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_visited_links_status ON visited_links(status, id)",
    r#"
    CREATE TABLE IF NOT EXISTS company_tickers (
        cik INTEGER NOT NULL,
        ticker TEXT NOT NULL,
        title TEXT NOT NULL,
        PRIMARY KEY (cik, ticker)
    )
    "#,
];

/// SQLite-backed [`FilingStore`].
#[derive(Debug)]
pub struct SqliteStore {
    session: StoreSession,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `database_path`.
    pub async fn open(database_path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self::offline().await?;
        store.session.connect(pool).await?;
        info!("Opened filing store at {}", database_path.display());
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub async fn new_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self::offline().await?;
        store.session.connect(pool).await?;
        Ok(store)
    }

    /// A store with schema creation buffered, waiting for a pool.
    async fn offline() -> Result<Self, StoreError> {
        let session = StoreSession::offline();
        session
            .submit(|pool| async move {
                for statement in SCHEMA {
                    sqlx::query(statement).execute(&pool).await?;
                }
                Ok(())
            })
            .await?;
        Ok(Self { session })
    }

    pub fn session(&self) -> &StoreSession {
        &self.session
    }

    async fn visited_links_page(
        &self,
        status: VisitStatus,
        after_id: i64,
    ) -> Result<Vec<VisitedLink>, StoreError> {
        let pool = self.session.pool().await?;
        let rows = sqlx::query(
            "SELECT id, url, status, error, filing_id, updated_at FROM visited_links \
             WHERE status = ? AND id > ? ORDER BY id LIMIT ?",
        )
        .bind(status.as_str())
        .bind(after_id)
        .bind(LEDGER_PAGE_SIZE)
        .fetch_all(&pool)
        .await?;

        rows.iter().map(visited_link_from_row).collect()
    }
}

fn visited_link_from_row(row: &SqliteRow) -> Result<VisitedLink, StoreError> {
    let status: String = row.try_get("status")?;
    let status = VisitStatus::parse(&status).ok_or_else(|| StoreError::Corrupt {
        table: "visited_links",
        reason: format!("unknown status '{}'", status),
    })?;

    Ok(VisitedLink {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        status,
        error: row.try_get("error")?,
        filing_id: row.try_get("filing_id")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

#[async_trait]
impl FilingStore for SqliteStore {
    async fn insert_filing(&self, record: &FinancialRecord) -> Result<i64, StoreError> {
        let pool = self.session.pool().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO filings
            (cik, company_name, form_type, date_filed, period_end, fiscal_year, fiscal_period,
             trading_symbol, assets, liabilities, equity, revenues, net_income,
             return_on_assets, return_on_equity, return_on_sales, source_url)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.cik.map(|cik| cik as i64))
        .bind(&record.company_name)
        .bind(record.form_type.map(|f| f.as_str()))
        .bind(record.date_filed.map(|d| d.format("%Y-%m-%d").to_string()))
        .bind(record.period_end.map(|d| d.format("%Y-%m-%d").to_string()))
        .bind(record.fiscal_year)
        .bind(&record.fiscal_period)
        .bind(&record.trading_symbol)
        .bind(finite(record.assets))
        .bind(finite(record.liabilities))
        .bind(finite(record.equity))
        .bind(finite(record.revenues))
        .bind(finite(record.net_income))
        .bind(finite(record.return_on_assets))
        .bind(finite(record.return_on_equity))
        .bind(finite(record.return_on_sales))
        .bind(&record.source_url)
        .execute(&pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn find_visited_link(&self, url: &str) -> Result<Option<VisitedLink>, StoreError> {
        let pool = self.session.pool().await?;
        let row = sqlx::query(
            "SELECT id, url, status, error, filing_id, updated_at FROM visited_links WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&pool)
        .await?;

        row.as_ref().map(visited_link_from_row).transpose()
    }

    async fn insert_visited_link(
        &self,
        url: &str,
        status: VisitStatus,
        error: Option<&str>,
        filing_id: Option<i64>,
    ) -> Result<i64, StoreError> {
        let pool = self.session.pool().await?;
        let result = sqlx::query(
            "INSERT INTO visited_links (url, status, error, filing_id) VALUES (?, ?, ?, ?)",
        )
        .bind(url)
        .bind(status.as_str())
        .bind(error)
        .bind(filing_id)
        .execute(&pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    fn stream_visited_links(
        &self,
        status: VisitStatus,
    ) -> BoxStream<'_, Result<VisitedLink, StoreError>> {
        stream::try_unfold(0i64, move |after_id| async move {
            let page = self.visited_links_page(status, after_id).await?;
            let next_id = match page.last() {
                Some(last) => last.id,
                None => return Ok(None),
            };
            let links = stream::iter(page.into_iter().map(Ok::<_, StoreError>));
            Ok::<_, StoreError>(Some((links, next_id)))
        })
        .try_flatten()
        .boxed()
    }

    async fn update_visited_link(
        &self,
        id: i64,
        status: VisitStatus,
        error: Option<&str>,
        filing_id: Option<i64>,
    ) -> Result<(), StoreError> {
        let error = error.map(str::to_string);
        self.session
            .submit(move |pool| async move {
                sqlx::query(
                    "UPDATE visited_links \
                     SET status = ?, error = ?, filing_id = ?, updated_at = datetime('now') \
                     WHERE id = ?",
                )
                .bind(status.as_str())
                .bind(error)
                .bind(filing_id)
                .bind(id)
                .execute(&pool)
                .await?;
                Ok(())
            })
            .await
    }

    async fn find_trading_symbol(&self, cik: u64) -> Result<Option<String>, StoreError> {
        let pool = self.session.pool().await?;
        let tickers: Vec<String> =
            sqlx::query_scalar("SELECT ticker FROM company_tickers WHERE cik = ? ORDER BY ticker")
                .bind(cik as i64)
                .fetch_all(&pool)
                .await?;

        Ok((!tickers.is_empty()).then(|| tickers.join(";")))
    }

    async fn count_visited_links(&self, status: VisitStatus) -> Result<i64, StoreError> {
        let pool = self.session.pool().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM visited_links WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&pool)
            .await?;
        Ok(count)
    }

    async fn upsert_company_ticker(
        &self,
        cik: u64,
        ticker: &str,
        title: &str,
    ) -> Result<(), StoreError> {
        let ticker = ticker.to_string();
        let title = title.to_string();
        self.session
            .submit(move |pool| async move {
                sqlx::query(
                    "INSERT INTO company_tickers (cik, ticker, title) VALUES (?, ?, ?) \
                     ON CONFLICT(cik, ticker) DO UPDATE SET title = excluded.title",
                )
                .bind(cik as i64)
                .bind(ticker)
                .bind(title)
                .execute(&pool)
                .await?;
                Ok(())
            })
            .await
    }
}
