use crate::model::common::deserialize_flexible_cik;
use crate::model::FilingRef;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;

const EDGAR_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Deserialize, Debug, Clone)]
pub struct TickerRecord {
    #[serde(deserialize_with = "deserialize_flexible_cik")]
    pub cik_str: u64,
    pub ticker: String,
    #[serde(default)]
    pub title: String,
}

/// `company_tickers.json` is an object keyed by row number.
pub type TickerTable = HashMap<String, TickerRecord>;

#[derive(Deserialize, Debug, Clone)]
pub struct SubmissionsResponse {
    #[serde(deserialize_with = "deserialize_flexible_cik")]
    pub cik: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub filings: SubmissionFilings,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SubmissionFilings {
    #[serde(default)]
    pub recent: FilingColumns,
    #[serde(default)]
    pub files: Vec<SubmissionFile>,
}

/// Column-oriented filing table used by both the `recent` block and history pages.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct FilingColumns {
    #[serde(default)]
    pub accession_number: Vec<String>,
    #[serde(default)]
    pub filing_date: Vec<String>,
    #[serde(default)]
    pub form: Vec<String>,
    #[serde(default)]
    pub primary_document: Vec<String>,
}

impl FilingColumns {
    /// Rows with a parseable filing date; ragged columns are truncated.
    pub fn to_refs(&self) -> Vec<FilingRef> {
        self.accession_number
            .iter()
            .zip(&self.filing_date)
            .zip(&self.form)
            .enumerate()
            .filter_map(|(idx, ((accession, date), form))| {
                let filing_date = NaiveDate::parse_from_str(date, EDGAR_DATE_FORMAT).ok()?;
                Some(FilingRef {
                    filing_date,
                    form: form.clone(),
                    accession_id: accession.clone(),
                    primary_document: self
                        .primary_document
                        .get(idx)
                        .cloned()
                        .unwrap_or_default(),
                })
            })
            .collect()
    }
}

/// Pointer to an older page of an entity's filing history.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionFile {
    pub name: String,
    #[serde(default)]
    pub filing_count: u64,
    #[serde(default)]
    pub filing_from: String,
    #[serde(default)]
    pub filing_to: String,
}

impl SubmissionFile {
    /// Whether the page's date span touches `year`. Unknown spans always match.
    pub fn covers_year(&self, year: i32) -> bool {
        let parse_year = |s: &str| s.get(..4).and_then(|y| y.parse::<i32>().ok());
        match (parse_year(&self.filing_from), parse_year(&self.filing_to)) {
            (Some(from), Some(to)) => from.min(to) <= year && year <= from.max(to),
            _ => true,
        }
    }
}
