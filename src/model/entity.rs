use crate::model::common::{deserialize_optional_string, EntityId};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::RangeInclusive;

/// A named subject whose filings are downloaded. Immutable for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entity {
    pub identifier: EntityId,
    pub display_name: String,
}

impl Entity {
    pub fn new<I: Into<String>, N: Into<String>>(identifier: I, display_name: N) -> Self {
        Entity {
            identifier: identifier.into(),
            display_name: display_name.into(),
        }
    }
}

/// One row of a company list file (`[{"Ticker": .., "Company Name": ..}]`).
#[derive(Debug, Clone, Deserialize)]
pub struct CompanyRecord {
    #[serde(
        rename = "Ticker",
        default,
        deserialize_with = "deserialize_optional_string"
    )]
    pub ticker: Option<String>,
    #[serde(
        rename = "Company Name",
        default,
        deserialize_with = "deserialize_optional_string"
    )]
    pub company_name: Option<String>,
}

impl CompanyRecord {
    pub fn into_entity(self) -> Option<Entity> {
        let ticker = self.ticker?;
        Some(Entity::new(
            ticker,
            self.company_name.unwrap_or_else(|| "Unknown".to_string()),
        ))
    }
}

/// What to download for every entity. Shared read-only by all workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilingWindow {
    pub form_types: BTreeSet<String>,
    pub years_back: u32,
}

impl FilingWindow {
    pub fn new<I, S>(form_types: I, years_back: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FilingWindow {
            form_types: form_types
                .into_iter()
                .map(Into::into)
                .map(|f: String| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect(),
            years_back,
        }
    }

    /// Calendar years covered, oldest first, ending at `current_year`.
    pub fn years(&self, current_year: i32) -> RangeInclusive<i32> {
        let span = self.years_back.max(1) as i32;
        (current_year - span + 1)..=current_year
    }

    pub fn accepts_form(&self, form: &str) -> bool {
        self.form_types.contains(form)
    }
}

/// Backend-neutral reference to one filing document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilingRef {
    pub filing_date: NaiveDate,
    pub form: String,
    pub accession_id: String,
    pub primary_document: String,
}

impl FilingRef {
    pub fn filing_year(&self) -> i32 {
        self.filing_date.year()
    }
}

/// Result of one entity task, produced exactly once per dispatched entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub entity_id: EntityId,
    pub succeeded: bool,
    pub filings_written: usize,
    pub filings_skipped: usize,
    pub worker_id: usize,
    pub unit_errors: Vec<String>,
    pub detail: String,
}

impl DownloadOutcome {
    pub fn failed<S: Into<String>>(entity_id: &str, worker_id: usize, detail: S) -> Self {
        DownloadOutcome {
            entity_id: entity_id.to_string(),
            succeeded: false,
            filings_written: 0,
            filings_skipped: 0,
            worker_id,
            unit_errors: Vec::new(),
            detail: detail.into(),
        }
    }

    pub fn completed(
        entity_id: &str,
        worker_id: usize,
        filings_written: usize,
        filings_skipped: usize,
        unit_errors: Vec<String>,
    ) -> Self {
        let mut detail = format!("Downloaded {} filings", filings_written);
        if filings_skipped > 0 {
            detail.push_str(&format!(", {} already present", filings_skipped));
        }
        if !unit_errors.is_empty() {
            detail.push_str(&format!(
                " ({} partial errors: {})",
                unit_errors.len(),
                unit_errors.join("; ")
            ));
        }
        DownloadOutcome {
            entity_id: entity_id.to_string(),
            succeeded: true,
            filings_written,
            filings_skipped,
            worker_id,
            unit_errors,
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn years_cover_window_ending_now() {
        let window = FilingWindow::new(["10-K"], 3);
        let years: Vec<i32> = window.years(2025).collect();
        assert_eq!(years, vec![2023, 2024, 2025]);
    }

    #[test]
    fn window_drops_blank_form_types() {
        let window = FilingWindow::new(["10-K", " ", "10-Q "], 1);
        assert_eq!(window.form_types.len(), 2);
        assert!(window.accepts_form("10-Q"));
    }

    #[test]
    fn company_record_without_ticker_is_not_an_entity() {
        let rows: Vec<CompanyRecord> = serde_json::from_str(
            r#"[{"Ticker": "MSFT", "Company Name": "Microsoft"}, {"Company Name": "Ghost"}]"#,
        )
        .unwrap();
        let entities: Vec<Entity> = rows.into_iter().filter_map(|r| r.into_entity()).collect();
        assert_eq!(entities, vec![Entity::new("MSFT", "Microsoft")]);
    }

    #[test]
    fn completed_detail_mentions_partial_errors() {
        let outcome =
            DownloadOutcome::completed("AAPL", 1, 4, 2, vec!["year 2021: timeout".to_string()]);
        assert!(outcome.succeeded);
        assert_eq!(
            outcome.detail,
            "Downloaded 4 filings, 2 already present (1 partial errors: year 2021: timeout)"
        );
    }
}
