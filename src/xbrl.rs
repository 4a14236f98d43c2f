//! XBRL instance parsing into a [`FinancialRecord`]
//!
//! Only a handful of facts are read: the `dei` cover-page facts that identify
//! the reporting period, and the `us-gaap` totals needed for the
//! profitability ratios. For each concept the first dimensionless fact whose
//! context ends on the document period end date wins.

use chrono::NaiveDate;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use thiserror::Error;

use crate::models::FinancialRecord;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XbrlError {
    #[error("Malformed XBRL at byte {position}: {message}")]
    Xml { position: usize, message: String },

    #[error("Unsupported XBRL document: {0}")]
    Unsupported(String),
}

/// Turns one raw embedded document into a structured record.
pub trait StructuredParser: Send + Sync {
    fn parse(&self, raw: &str) -> Result<FinancialRecord, XbrlError>;
}

impl<F> StructuredParser for F
where
    F: Fn(&str) -> Result<FinancialRecord, XbrlError> + Send + Sync,
{
    fn parse(&self, raw: &str) -> Result<FinancialRecord, XbrlError> {
        self(raw)
    }
}

const ASSETS: &[&str] = &["us-gaap:Assets"];
const LIABILITIES: &[&str] = &["us-gaap:Liabilities"];
const EQUITY: &[&str] = &[
    "us-gaap:StockholdersEquity",
    "us-gaap:StockholdersEquityIncludingPortionAttributableToNoncontrollingInterest",
];
const REVENUES: &[&str] = &[
    "us-gaap:Revenues",
    "us-gaap:RevenueFromContractWithCustomerExcludingAssessedTax",
    "us-gaap:SalesRevenueNet",
];
const NET_INCOME: &[&str] = &["us-gaap:NetIncomeLoss", "us-gaap:ProfitLoss"];

/// Default [`StructuredParser`] built on quick-xml.
#[derive(Debug, Clone, Copy, Default)]
pub struct XbrlParser;

impl StructuredParser for XbrlParser {
    fn parse(&self, raw: &str) -> Result<FinancialRecord, XbrlError> {
        let instance = Instance::read(raw)?;

        let period_end_text = instance
            .cover_fact("dei:DocumentPeriodEndDate")
            .ok_or_else(|| XbrlError::Unsupported("missing dei:DocumentPeriodEndDate".to_string()))?;
        let period_end = NaiveDate::parse_from_str(period_end_text, "%Y-%m-%d").map_err(|_| {
            XbrlError::Unsupported(format!("unreadable period end date '{}'", period_end_text))
        })?;

        let mut record = FinancialRecord {
            cik: instance
                .cover_fact("dei:EntityCentralIndexKey")
                .and_then(|v| v.parse().ok()),
            company_name: instance
                .cover_fact("dei:EntityRegistrantName")
                .map(str::to_string),
            period_end: Some(period_end),
            fiscal_year: instance
                .cover_fact("dei:DocumentFiscalYearFocus")
                .and_then(|v| v.parse().ok()),
            fiscal_period: instance
                .cover_fact("dei:DocumentFiscalPeriodFocus")
                .map(str::to_string),
            trading_symbol: instance
                .cover_fact("dei:TradingSymbol")
                .map(str::to_uppercase),
            assets: instance.amount(ASSETS, period_end),
            liabilities: instance.amount(LIABILITIES, period_end),
            equity: instance.amount(EQUITY, period_end),
            revenues: instance.amount(REVENUES, period_end),
            net_income: instance.amount(NET_INCOME, period_end),
            ..Default::default()
        };
        record.compute_ratios();

        Ok(record)
    }
}

#[derive(Debug, Default)]
struct Context {
    end: Option<NaiveDate>,
    dimensional: bool,
}

#[derive(Debug)]
struct Fact {
    concept: String,
    context_ref: String,
    value: String,
}

#[derive(Debug, Default)]
struct Instance {
    contexts: HashMap<String, Context>,
    facts: Vec<Fact>,
}

/// Element currently collecting text.
enum Capture {
    None,
    Fact { concept: String, context_ref: String, value: String },
    PeriodDate(String),
}

impl Instance {
    fn read(raw: &str) -> Result<Self, XbrlError> {
        let mut reader = Reader::from_str(raw);
        reader.trim_text(true);

        let mut instance = Instance::default();
        let mut open_context: Option<(String, Context)> = None;
        let mut capture = Capture::None;

        loop {
            let event = reader.read_event().map_err(|e| XbrlError::Xml {
                position: reader.buffer_position(),
                message: e.to_string(),
            })?;

            match event {
                Event::Start(e) => {
                    let local = local_name(&e);
                    if local == "context" {
                        open_context = attribute(&e, "id").map(|id| (id, Context::default()));
                    } else if let Some((_, context)) = open_context.as_mut() {
                        match local.as_str() {
                            "endDate" | "instant" => capture = Capture::PeriodDate(String::new()),
                            "segment" | "scenario" | "explicitMember" | "typedMember" => {
                                context.dimensional = true
                            }
                            _ => {}
                        }
                    } else if let Some(context_ref) = attribute(&e, "contextRef") {
                        capture = Capture::Fact {
                            concept: qualified_name(&e),
                            context_ref,
                            value: String::new(),
                        };
                    }
                }
                Event::Empty(e) => {
                    if let Some((_, context)) = open_context.as_mut() {
                        if matches!(local_name(&e).as_str(), "explicitMember" | "typedMember") {
                            context.dimensional = true;
                        }
                    }
                }
                Event::Text(t) => {
                    let text = t.unescape().map_err(|e| XbrlError::Xml {
                        position: reader.buffer_position(),
                        message: e.to_string(),
                    })?;
                    match &mut capture {
                        Capture::Fact { value, .. } | Capture::PeriodDate(value) => {
                            value.push_str(&text)
                        }
                        Capture::None => {}
                    }
                }
                Event::End(e) => {
                    let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    match std::mem::replace(&mut capture, Capture::None) {
                        Capture::PeriodDate(text) => {
                            if let Some((_, context)) = open_context.as_mut() {
                                context.end = NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok();
                            }
                        }
                        Capture::Fact {
                            concept,
                            context_ref,
                            value,
                        } => instance.facts.push(Fact {
                            concept,
                            context_ref,
                            value: value.trim().to_string(),
                        }),
                        Capture::None => {}
                    }
                    if local == "context" {
                        if let Some((id, context)) = open_context.take() {
                            instance.contexts.insert(id, context);
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if instance.facts.is_empty() {
            return Err(XbrlError::Unsupported("no facts found".to_string()));
        }
        Ok(instance)
    }

    /// First non-empty value reported for a cover-page concept.
    fn cover_fact(&self, concept: &str) -> Option<&str> {
        self.facts
            .iter()
            .find(|f| f.concept == concept && !f.value.is_empty())
            .map(|f| f.value.as_str())
    }

    /// First usable numeric fact among `concepts`, in preference order.
    fn amount(&self, concepts: &[&str], period_end: NaiveDate) -> Option<f64> {
        concepts.iter().find_map(|concept| {
            self.facts
                .iter()
                .filter(|f| f.concept == *concept)
                .filter(|f| {
                    self.contexts
                        .get(&f.context_ref)
                        .is_some_and(|c| !c.dimensional && c.end == Some(period_end))
                })
                .find_map(|f| f.value.parse::<f64>().ok())
        })
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn qualified_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name.as_bytes())
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}
