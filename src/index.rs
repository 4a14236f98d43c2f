//! EDGAR full-index parsing
//!
//! A quarterly `master.idx` lists every filing of the quarter, one per line:
//!
//! ```text
//! CIK|Company Name|Form Type|Date Filed|Filename
//! --------------------------------------------------------------------------------
//! 96699|TECHNICAL COMMUNICATIONS CORP|10-K|2019-12-13|edgar/data/96699/0001171843-19-008104.txt
//! ```
//!
//! Lines are parsed independently; a line either yields a whole
//! [`FilingDescriptor`] or is skipped.

use chrono::NaiveDate;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, trace};

use crate::models::{EmptyArchivePath, FilingDescriptor, FormType, UnknownFormType};

const FIELD_COUNT: usize = 5;

/// Quarters of the year, each with its own index file.
pub const QUARTERS: [u8; 4] = [1, 2, 3, 4];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexLineError {
    #[error("expected 5 fields, found {0}")]
    FieldCount(usize),

    #[error(transparent)]
    UnknownFormType(#[from] UnknownFormType),

    #[error("invalid CIK '{0}'")]
    InvalidCik(String),

    #[error("invalid submission date '{0}'")]
    InvalidDate(String),

    #[error(transparent)]
    EmptyPath(#[from] EmptyArchivePath),
}

/// URL of one quarter's `master.idx` under `index_root`.
pub fn index_url(index_root: &str, year: i32, quarter: u8) -> String {
    format!(
        "{}/{}/QTR{}/master.idx",
        index_root.trim_end_matches('/'),
        year,
        quarter
    )
}

/// Local file name for one quarter's index, unique across a harvest.
pub fn index_file_name(year: i32, quarter: u8) -> String {
    format!("{}-QTR{}-master.idx", year, quarter)
}

/// Parse one pipe-delimited index line.
pub fn parse_index_line(line: &str, filing_root: &str) -> Result<FilingDescriptor, IndexLineError> {
    let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('|').collect();
    if fields.len() != FIELD_COUNT {
        return Err(IndexLineError::FieldCount(fields.len()));
    }

    let form_type: FormType = fields[2].parse()?;

    let cik_token = fields[0].trim();
    let cik = cik_token
        .parse::<u64>()
        .map_err(|_| IndexLineError::InvalidCik(cik_token.to_string()))?;

    let date_token = fields[3].trim();
    let date_filed = parse_date(date_token)
        .ok_or_else(|| IndexLineError::InvalidDate(date_token.to_string()))?;

    let descriptor = FilingDescriptor::new(
        cik,
        fields[1].trim(),
        form_type,
        date_filed,
        fields[4],
        filing_root,
    )?;
    Ok(descriptor)
}

fn parse_date(token: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(token, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(token, "%Y%m%d"))
        .ok()
}

/// Turn an index file's contents into descriptors of the wanted form types.
///
/// Unknown form types are expected (the index mixes every form the archive
/// accepts) and are dropped silently; other malformed lines are logged.
pub fn parse_index(
    contents: &str,
    filing_root: &str,
    wanted: &HashSet<FormType>,
) -> Vec<FilingDescriptor> {
    let mut descriptors = Vec::new();
    let mut malformed = 0usize;

    for (number, line) in contents.lines().enumerate() {
        if is_filler(line) {
            continue;
        }

        match parse_index_line(line, filing_root) {
            Ok(descriptor) => {
                if wanted.contains(&descriptor.form_type) {
                    descriptors.push(descriptor);
                }
            }
            Err(IndexLineError::UnknownFormType(e)) => {
                trace!("Line {}: {}", number + 1, e);
            }
            Err(e) => {
                malformed += 1;
                debug!("Discarding index line {} ({}): {}", number + 1, e, line);
            }
        }
    }

    if malformed > 0 {
        debug!("Discarded {} malformed index lines", malformed);
    }
    descriptors
}

/// Preamble and separator lines carry no record.
fn is_filler(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.chars().all(|c| c == '-')
}

/// Read an index file; the archive occasionally serves non-UTF-8 company names.
pub async fn read_index_file(path: &Path) -> std::io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
