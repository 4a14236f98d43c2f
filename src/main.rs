use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use edgar_harvest::config::Config;
use edgar_harvest::downloader::DownloadClient;
use edgar_harvest::extractor::EmbeddedDocuments;
use edgar_harvest::index::{parse_index, read_index_file};
use edgar_harvest::models::{FormType, VisitStatus};
use edgar_harvest::{FilingStore, Harvester, SqliteStore, XbrlParser};

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Set default log level to INFO if not specified
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "edgar_harvest=info");
    }

    // Initialize logging to both console and file
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let file_appender = tracing_appender::rolling::never(".", "edgar-harvest.log");

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(EnvFilter::from_default_env()),
        )
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_filter(EnvFilter::from_default_env()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env().context("Invalid configuration")?;
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }

    match &cli.command {
        Commands::Harvest { from, to, forms } => {
            if let Some(forms) = Commands::parse_form_types(forms)? {
                config.form_types = forms;
            }
            info!("Starting harvest for {}-{}", from, to);

            let mut harvester = build_harvester(config).await?;
            install_stop_handler(harvester.stop_handle());

            match harvester.add_new_filings(*from, *to).await {
                Ok(summary) => info!(
                    "Harvested {} filings ({} failed, {} already visited)",
                    summary.succeeded, summary.failed, summary.skipped
                ),
                Err(e) => {
                    error!("Harvest failed: {}", e);
                    return Err(e.into());
                }
            }
        }

        Commands::RetryErrors => {
            info!("Retrying failed filings");

            let mut harvester = build_harvester(config).await?;
            install_stop_handler(harvester.stop_handle());

            match harvester.retry_problematic_filings().await {
                Ok(summary) => info!(
                    "Recovered {}/{} failed filings",
                    summary.succeeded, summary.attempted
                ),
                Err(e) => {
                    error!("Retry failed: {}", e);
                    return Err(e.into());
                }
            }
        }

        Commands::SyncTickers => {
            let mut harvester = build_harvester(config).await?;
            match harvester.sync_company_tickers().await {
                Ok(count) => info!("Synced {} tickers", count),
                Err(e) => {
                    error!("Ticker sync failed: {}", e);
                    return Err(e.into());
                }
            }
        }

        Commands::Status => {
            let store = SqliteStore::open(&config.database_path).await?;
            let ok = store.count_visited_links(VisitStatus::Ok).await?;
            let failed = store.count_visited_links(VisitStatus::Error).await?;

            println!("Visited links in {}:", config.database_path.display());
            println!("  {:<6} {}", VisitStatus::Ok, ok);
            println!("  {:<6} {}", VisitStatus::Error, failed);
        }

        Commands::ParseIndex { file, forms } => {
            let wanted: HashSet<FormType> = Commands::parse_form_types(forms)?
                .unwrap_or_else(|| config.form_types.clone())
                .into_iter()
                .collect();
            let contents = read_index_file(file)
                .await
                .with_context(|| format!("Cannot read index file {}", file.display()))?;

            let descriptors = parse_index(&contents, &config.archive.filing_root, &wanted);
            println!("Found {} filings:", descriptors.len());
            for d in &descriptors {
                println!(
                    "{} - {} ({}) - {} - {}",
                    d.cik,
                    d.company_name,
                    d.form_type,
                    d.date_filed,
                    d.url()
                );
            }
        }

        Commands::Extract { file } => {
            let mut count = 0;
            for (position, section) in EmbeddedDocuments::open(file).enumerate() {
                let section = section?;
                println!(
                    "Section {}: {} lines, {} bytes",
                    position + 1,
                    section.lines().count(),
                    section.len()
                );
                count += 1;
            }
            println!("{} embedded sections in {}", count, file.display());
        }
    }

    Ok(())
}

async fn build_harvester(config: Config) -> Result<Harvester<SqliteStore, XbrlParser>> {
    config.validate()?;
    let client = DownloadClient::from_config(&config).context("Cannot build HTTP client")?;
    let store = SqliteStore::open(&config.database_path)
        .await
        .with_context(|| format!("Cannot open database {}", config.database_path.display()))?;
    Ok(Harvester::new(config, client, Arc::new(store), XbrlParser))
}

/// Ctrl-C lets the current filing finish, then ends the batch.
fn install_stop_handler(stop: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current filing");
            stop.store(true, Ordering::SeqCst);
        }
    });
}
