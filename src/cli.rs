use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use edgar_harvest::config::parse_form_types;
use edgar_harvest::models::FormType;

#[derive(Parser)]
#[command(name = "edgar-harvest")]
#[command(about = "Harvest XBRL financial disclosures from the SEC EDGAR archive")]
#[command(version)]
pub struct Cli {
    /// Database file path (overrides EDGAR_HARVEST_DB_PATH)
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest every new filing listed in the quarterly indices of a year range
    Harvest {
        /// First year to harvest
        #[arg(long)]
        from: i32,

        /// Last year to harvest (inclusive)
        #[arg(long)]
        to: i32,

        /// Form types to keep, e.g. --form 10-K --form 10-Q (defaults to EDGAR_HARVEST_FORM_TYPES)
        #[arg(short, long = "form")]
        forms: Vec<String>,
    },

    /// Re-drive every filing recorded as failed
    RetryErrors,

    /// Refresh the CIK to ticker table from the SEC listing
    SyncTickers,

    /// Show visited-link counts by status
    Status,

    /// Parse a local master.idx file and print the wanted filings
    ParseIndex {
        /// Index file to parse
        file: PathBuf,

        /// Form types to keep (defaults to EDGAR_HARVEST_FORM_TYPES)
        #[arg(short, long = "form")]
        forms: Vec<String>,
    },

    /// List the embedded XBRL sections of a local filing container
    Extract {
        /// Full-text submission file
        file: PathBuf,
    },
}

impl Commands {
    /// `None` when no `--form` was given.
    pub fn parse_form_types(forms: &[String]) -> Result<Option<Vec<FormType>>> {
        if forms.is_empty() {
            return Ok(None);
        }
        let parsed = parse_form_types(&forms.join(",")).map_err(|e| anyhow::anyhow!(e))?;
        Ok(Some(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_harvest_accepts_repeated_forms() {
        let cli = Cli::parse_from([
            "edgar-harvest", "harvest", "--from", "2018", "--to", "2019", "--form", "10-K", "-f", "10-Q/A",
        ]);
        match cli.command {
            Commands::Harvest { from, to, forms } => {
                assert_eq!((from, to), (2018, 2019));
                assert_eq!(
                    Commands::parse_form_types(&forms).unwrap(),
                    Some(vec![FormType::TenK, FormType::TenQA])
                );
            }
            _ => panic!("expected harvest"),
        }
    }

    #[test]
    fn test_unknown_form_is_rejected() {
        assert!(Commands::parse_form_types(&["SC 13G".to_string()]).is_err());
        assert_eq!(Commands::parse_form_types(&[]).unwrap(), None);
    }
}
