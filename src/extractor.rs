//! Embedded document extraction from full-text submission containers
//!
//! A full-text submission is an SGML-like container that can carry several
//! payloads, each wrapped in marker lines:
//!
//! ```text
//! <DOCUMENT>
//! <TYPE>EX-101.INS
//! <TEXT>
//! <XBRL>
//! <?xml version="1.0"?> ...
//! </XBRL>
//! </TEXT>
//! </DOCUMENT>
//! ```
//!
//! [`EmbeddedDocuments`] walks a container once, yielding the text between
//! each opening and closing marker without interpreting it.

use std::path::{Path, PathBuf};
use thiserror::Error;

pub const XBRL_OPEN: &str = "<XBRL>";
pub const XBRL_CLOSE: &str = "</XBRL>";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("No more embedded sections")]
    NoMoreSections,

    #[error("No embedded document found in {0}")]
    NoEmbeddedDocument(String),

    #[error("Failed to read container {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug)]
enum ScanState {
    /// Nothing read yet; the file is loaded on the first query.
    Unread(PathBuf),
    Scanning {
        lines: Vec<String>,
        cursor: usize,
        /// Bounds `(open, close)` of the next section, once located.
        pending: Option<(usize, usize)>,
    },
    Exhausted,
}

/// Lazy, finite, non-restartable sequence of section bodies from one container.
#[derive(Debug)]
pub struct EmbeddedDocuments {
    state: ScanState,
    open_marker: String,
    close_marker: String,
}

impl EmbeddedDocuments {
    /// Scan the container at `path` for `<XBRL>` sections.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::with_markers(ScanState::Unread(path.into()), XBRL_OPEN, XBRL_CLOSE)
    }

    /// Scan in-memory container text for `<XBRL>` sections.
    pub fn from_text(text: &str) -> Self {
        Self::from_text_with_markers(text, XBRL_OPEN, XBRL_CLOSE)
    }

    pub fn from_text_with_markers(text: &str, open: &str, close: &str) -> Self {
        Self::with_markers(scanning(text), open, close)
    }

    fn with_markers(state: ScanState, open: &str, close: &str) -> Self {
        Self {
            state,
            open_marker: open.to_string(),
            close_marker: close.to_string(),
        }
    }

    /// Whether another complete section lies ahead of the cursor.
    ///
    /// The first call reads the whole container into memory.
    pub fn has_next(&mut self) -> Result<bool, ExtractError> {
        if let ScanState::Unread(path) = &self.state {
            self.state = scanning(&read_container(path)?);
        }

        let ScanState::Scanning {
            lines,
            cursor,
            pending,
        } = &mut self.state
        else {
            return Ok(false);
        };

        if pending.is_some() {
            return Ok(true);
        }

        match locate_section(lines, *cursor, &self.open_marker, &self.close_marker) {
            Some(bounds) => {
                *pending = Some(bounds);
                Ok(true)
            }
            None => {
                self.state = ScanState::Exhausted;
                Ok(false)
            }
        }
    }

    /// Return the next section body and move past its closing marker.
    pub fn next_section(&mut self) -> Result<String, ExtractError> {
        if !self.has_next()? {
            return Err(ExtractError::NoMoreSections);
        }

        let ScanState::Scanning {
            lines,
            cursor,
            pending,
        } = &mut self.state
        else {
            return Err(ExtractError::NoMoreSections);
        };
        let (open, close) = pending.take().ok_or(ExtractError::NoMoreSections)?;

        *cursor = close + 1;
        Ok(lines[open + 1..close].join("\n"))
    }
}

impl Iterator for EmbeddedDocuments {
    type Item = Result<String, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => Some(self.next_section()),
            Ok(false) => None,
            Err(e) => {
                self.state = ScanState::Exhausted;
                Some(Err(e))
            }
        }
    }
}

fn scanning(text: &str) -> ScanState {
    ScanState::Scanning {
        lines: text.lines().map(str::to_string).collect(),
        cursor: 0,
        pending: None,
    }
}

fn read_container(path: &Path) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Next opening marker at or after `from`, then the first closing marker after it.
fn locate_section(lines: &[String], from: usize, open: &str, close: &str) -> Option<(usize, usize)> {
    let open_at = from + lines.get(from..)?.iter().position(|l| l.trim() == open)?;
    let close_at = open_at + 1 + lines[open_at + 1..].iter().position(|l| l.trim() == close)?;
    Some((open_at, close_at))
}
