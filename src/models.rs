use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Form types listed in the EDGAR full-index that the harvester understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormType {
    TenK,
    TenKA,
    TenKT,
    TenQ,
    TenQA,
    TenQT,
    EightK,
    EightKA,
    TwentyF,
    FortyF,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown form type: '{0}'")]
pub struct UnknownFormType(pub String);

impl FormType {
    pub const ALL: [FormType; 10] = [
        FormType::TenK,
        FormType::TenKA,
        FormType::TenKT,
        FormType::TenQ,
        FormType::TenQA,
        FormType::TenQT,
        FormType::EightK,
        FormType::EightKA,
        FormType::TwentyF,
        FormType::FortyF,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FormType::TenK => "10-K",
            FormType::TenKA => "10-K/A",
            FormType::TenKT => "10-KT",
            FormType::TenQ => "10-Q",
            FormType::TenQA => "10-Q/A",
            FormType::TenQT => "10-QT",
            FormType::EightK => "8-K",
            FormType::EightKA => "8-K/A",
            FormType::TwentyF => "20-F",
            FormType::FortyF => "40-F",
        }
    }
}

impl FromStr for FormType {
    type Err = UnknownFormType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "10-K" => Ok(FormType::TenK),
            "10-K/A" => Ok(FormType::TenKA),
            "10-KT" => Ok(FormType::TenKT),
            "10-Q" => Ok(FormType::TenQ),
            "10-Q/A" => Ok(FormType::TenQA),
            "10-QT" => Ok(FormType::TenQT),
            "8-K" => Ok(FormType::EightK),
            "8-K/A" => Ok(FormType::EightKA),
            "20-F" => Ok(FormType::TwentyF),
            "40-F" => Ok(FormType::FortyF),
            other => Err(UnknownFormType(other.to_string())),
        }
    }
}

impl fmt::Display for FormType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One disclosure to acquire, built from a single index line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilingDescriptor {
    pub cik: u64,
    pub company_name: String,
    pub form_type: FormType,
    pub date_filed: NaiveDate,
    partial_path: String,
    url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("partial archive path '{0}' does not name a file")]
pub struct EmptyArchivePath(pub String);

impl FilingDescriptor {
    pub fn new(
        cik: u64,
        company_name: impl Into<String>,
        form_type: FormType,
        date_filed: NaiveDate,
        partial_path: impl Into<String>,
        filing_root: &str,
    ) -> Result<Self, EmptyArchivePath> {
        let partial_path = partial_path.into().trim().to_string();
        if file_name_of(&partial_path).is_empty() {
            return Err(EmptyArchivePath(partial_path));
        }
        let url = format!("{}{}", filing_root, partial_path);

        Ok(Self {
            cik,
            company_name: company_name.into(),
            form_type,
            date_filed,
            partial_path,
            url,
        })
    }

    pub fn partial_path(&self) -> &str {
        &self.partial_path
    }

    /// Absolute download URL: filing root followed by the partial path.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn file_name(&self) -> &str {
        file_name_of(&self.partial_path)
    }

    pub fn download_request(&self) -> DownloadRequest {
        DownloadRequest::new(self.url(), self.file_name())
    }
}

fn file_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub file_name: String,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            file_name: file_name.into(),
        }
    }

    /// Derive the destination file name from the last URL path segment.
    pub fn for_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let file_name = url
            .split(['?', '#'])
            .next()
            .map(file_name_of)
            .unwrap_or_default()
            .to_string();
        Self { url, file_name }
    }
}

/// A fetched resource on local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VisitStatus {
    Ok,
    Error,
}

impl VisitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisitStatus::Ok => "OK",
            VisitStatus::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OK" => Some(VisitStatus::Ok),
            "ERROR" => Some(VisitStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for VisitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Ledger entry for one URL ever attempted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitedLink {
    pub id: i64,
    pub url: String,
    pub status: VisitStatus,
    pub error: Option<String>,
    pub filing_id: Option<i64>,
    pub updated_at: String,
}

/// Structured financial data extracted from one embedded XBRL document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialRecord {
    pub cik: Option<u64>,
    pub company_name: Option<String>,
    pub form_type: Option<FormType>,
    pub date_filed: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub fiscal_year: Option<i32>,
    pub fiscal_period: Option<String>,
    pub trading_symbol: Option<String>,
    pub assets: Option<f64>,
    pub liabilities: Option<f64>,
    pub equity: Option<f64>,
    pub revenues: Option<f64>,
    pub net_income: Option<f64>,
    pub return_on_assets: Option<f64>,
    pub return_on_equity: Option<f64>,
    pub return_on_sales: Option<f64>,
    pub source_url: Option<String>,
}

impl FinancialRecord {
    /// Recompute the three profitability ratios from the stored operands.
    ///
    /// A missing operand counts as NaN. Any result that is not a finite number
    /// (NaN from a missing operand or 0/0, infinity from x/0) is stored as `None`.
    pub fn compute_ratios(&mut self) {
        let income = self.net_income.unwrap_or(f64::NAN);
        self.return_on_assets = ratio(income, self.assets);
        self.return_on_equity = ratio(income, self.equity);
        self.return_on_sales = ratio(income, self.revenues);
    }

    /// Fill in the fields known from the index line that led to this record.
    pub fn attach_descriptor(&mut self, descriptor: &FilingDescriptor) {
        self.cik = Some(descriptor.cik);
        self.company_name = Some(descriptor.company_name.clone());
        self.form_type = Some(descriptor.form_type);
        self.date_filed = Some(descriptor.date_filed);
        self.source_url = Some(descriptor.url().to_string());
    }
}

fn ratio(numerator: f64, denominator: Option<f64>) -> Option<f64> {
    let value = numerator / denominator.unwrap_or(f64::NAN);
    value.is_finite().then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "https://www.sec.gov/Archives/";

    #[test]
    fn test_form_type_round_trips_canonical_strings() {
        for form in FormType::ALL {
            assert_eq!(form.as_str().parse::<FormType>().unwrap(), form);
        }
    }

    #[test]
    fn test_unknown_form_type_carries_input() {
        let err = "SC 13G".parse::<FormType>().unwrap_err();
        assert_eq!(err, UnknownFormType("SC 13G".to_string()));
        assert!(err.to_string().contains("SC 13G"));
    }

    #[test]
    fn test_descriptor_derives_url_and_file_name() {
        let date = NaiveDate::from_ymd_opt(2019, 12, 13).unwrap();
        let descriptor = FilingDescriptor::new(
            96699,
            "TECHNICAL COMMUNICATIONS CORP",
            FormType::TenK,
            date,
            "edgar/data/96699/0001171843-19-008104.txt",
            ROOT,
        )
        .unwrap();

        assert_eq!(
            descriptor.url(),
            "https://www.sec.gov/Archives/edgar/data/96699/0001171843-19-008104.txt"
        );
        assert_eq!(descriptor.file_name(), "0001171843-19-008104.txt");
        assert_eq!(descriptor.download_request().file_name, "0001171843-19-008104.txt");
    }

    #[test]
    fn test_descriptor_rejects_path_without_file_name() {
        let date = NaiveDate::from_ymd_opt(2019, 1, 2).unwrap();
        assert!(FilingDescriptor::new(1, "X", FormType::TenQ, date, "", ROOT).is_err());
        assert!(FilingDescriptor::new(1, "X", FormType::TenQ, date, "edgar/data/", ROOT).is_err());
    }

    #[test]
    fn test_download_request_for_url_uses_last_segment() {
        let request = DownloadRequest::for_url("https://example.com/a/b/master.idx?x=1");
        assert_eq!(request.file_name, "master.idx");
    }

    #[test]
    fn test_ratios_are_none_when_not_finite() {
        let mut record = FinancialRecord {
            net_income: Some(10.0),
            assets: Some(100.0),
            equity: Some(0.0),
            revenues: None,
            ..Default::default()
        };
        record.compute_ratios();

        assert_eq!(record.return_on_assets, Some(0.1));
        assert_eq!(record.return_on_equity, None);
        assert_eq!(record.return_on_sales, None);

        let mut empty = FinancialRecord::default();
        empty.compute_ratios();
        assert_eq!(empty.return_on_assets, None);
    }

    #[test]
    fn test_zero_over_zero_is_none() {
        let mut record = FinancialRecord {
            net_income: Some(0.0),
            assets: Some(0.0),
            ..Default::default()
        };
        record.compute_ratios();
        assert_eq!(record.return_on_assets, None);
    }
}
