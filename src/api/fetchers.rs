use super::client::EdgarClient;
use super::model::{FilingColumns, SubmissionFile, SubmissionsResponse, TickerTable};
use super::FilingBackend;
use crate::config;
use crate::error::{AppError, AppResult};
use crate::model::{Entity, FilingRef};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::OnceCell;

/// Resolved EDGAR company: CIK plus the filing index from its submissions file.
#[derive(Debug, Clone)]
pub struct EdgarHandle {
    pub ticker: String,
    pub cik: u64,
    pub name: String,
    pub recent: Vec<FilingRef>,
    pub history: Vec<SubmissionFile>,
}

/// Filing backend over the public EDGAR JSON endpoints.
pub struct EdgarBackend {
    client: EdgarClient,
    tickers: OnceCell<HashMap<String, (u64, String)>>,
}

impl EdgarBackend {
    pub fn new(identity: &str) -> AppResult<Self> {
        Ok(EdgarBackend {
            client: EdgarClient::new(identity)?,
            tickers: OnceCell::new(),
        })
    }

    /// EDGAR writes share classes with a dash (`BRK-B`), index lists often use a dot.
    pub fn normalize_ticker(ticker: &str) -> String {
        ticker.trim().to_uppercase().replace('.', "-")
    }

    fn endpoint(key: &str) -> AppResult<&'static str> {
        config::EDGAR_ENDPOINTS
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| AppError::ConfigError(format!("Invalid endpoint key: {}", key)))
    }

    async fn ticker_index(&self) -> AppResult<&HashMap<String, (u64, String)>> {
        self.tickers
            .get_or_try_init(|| async {
                let table: TickerTable = self.client.get_json(Self::endpoint("tickers")?).await?;
                Ok::<_, AppError>(
                    table
                        .into_values()
                        .map(|r| (Self::normalize_ticker(&r.ticker), (r.cik_str, r.title)))
                        .collect(),
                )
            })
            .await
    }

    async fn fetch_history_page(&self, page: &SubmissionFile) -> AppResult<FilingColumns> {
        let url = format!("{}/{}", Self::endpoint("submissions")?, page.name);
        self.client.get_json(&url).await
    }

    fn archive_url(cik: u64, filing: &FilingRef) -> AppResult<String> {
        if filing.primary_document.is_empty() {
            return Err(AppError::NotFound {
                url: format!("primary document of {}", filing.accession_id),
            });
        }
        Ok(format!(
            "{}/{}/{}/{}",
            Self::endpoint("archives")?,
            cik,
            filing.accession_id.replace('-', ""),
            filing.primary_document
        ))
    }
}

fn select(filings: Vec<FilingRef>, form_types: &BTreeSet<String>, year: i32) -> Vec<FilingRef> {
    filings
        .into_iter()
        .filter(|f| form_types.contains(&f.form) && f.filing_year() == year)
        .collect()
}

#[async_trait]
impl FilingBackend for EdgarBackend {
    type Handle = EdgarHandle;

    fn name(&self) -> &str {
        "edgar"
    }

    async fn resolve(&self, entity: &Entity) -> AppResult<EdgarHandle> {
        let ticker = Self::normalize_ticker(&entity.identifier);
        let index = self
            .ticker_index()
            .await
            .map_err(|e| AppError::entity_init(&entity.identifier, e.to_string()))?;
        let (cik, title) = index.get(&ticker).cloned().ok_or_else(|| {
            AppError::entity_init(&entity.identifier, "ticker not found in EDGAR index")
        })?;

        let url = format!("{}/CIK{:010}.json", Self::endpoint("submissions")?, cik);
        let submissions: SubmissionsResponse = self
            .client
            .get_json(&url)
            .await
            .map_err(|e| AppError::entity_init(&entity.identifier, e.to_string()))?;

        Ok(EdgarHandle {
            ticker,
            cik,
            name: if submissions.name.is_empty() {
                title
            } else {
                submissions.name
            },
            recent: submissions.filings.recent.to_refs(),
            history: submissions.filings.files,
        })
    }

    async fn list_filings(
        &self,
        handle: &EdgarHandle,
        form_types: &BTreeSet<String>,
        year: i32,
    ) -> AppResult<Vec<FilingRef>> {
        let mut by_accession: BTreeMap<String, FilingRef> = select(handle.recent.clone(), form_types, year)
            .into_iter()
            .map(|f| (f.accession_id.clone(), f))
            .collect();

        for page in handle.history.iter().filter(|p| p.covers_year(year)) {
            let columns = self.fetch_history_page(page).await?;
            for filing in select(columns.to_refs(), form_types, year) {
                by_accession.entry(filing.accession_id.clone()).or_insert(filing);
            }
        }

        let mut filings: Vec<FilingRef> = by_accession.into_values().collect();
        filings.sort_by(|a, b| a.filing_date.cmp(&b.filing_date));
        Ok(filings)
    }

    async fn fetch_body(&self, handle: &EdgarHandle, filing: &FilingRef) -> AppResult<Bytes> {
        let url = Self::archive_url(handle.cik, filing)?;
        self.client.get_bytes(&url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn filing(date: &str, form: &str, accession: &str) -> FilingRef {
        FilingRef {
            filing_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            form: form.to_string(),
            accession_id: accession.to_string(),
            primary_document: "doc.htm".to_string(),
        }
    }

    #[test]
    fn normalizes_share_class_tickers() {
        assert_eq!(EdgarBackend::normalize_ticker(" brk.b "), "BRK-B");
        assert_eq!(EdgarBackend::normalize_ticker("MSFT"), "MSFT");
    }

    #[test]
    fn archive_url_strips_accession_dashes() {
        let f = filing("2024-07-30", "10-K", "0000950170-24-087843");
        assert_eq!(
            EdgarBackend::archive_url(789019, &f).unwrap(),
            "https://www.sec.gov/Archives/edgar/data/789019/000095017024087843/doc.htm"
        );
    }

    #[test]
    fn archive_url_requires_primary_document() {
        let mut f = filing("2024-07-30", "10-K", "0000950170-24-087843");
        f.primary_document.clear();
        assert!(EdgarBackend::archive_url(1, &f).unwrap_err().is_not_found());
    }

    #[test]
    fn select_filters_form_and_year() {
        let forms: BTreeSet<String> = ["10-K".to_string()].into_iter().collect();
        let picked = select(
            vec![
                filing("2024-02-01", "10-K", "a"),
                filing("2024-05-01", "10-Q", "b"),
                filing("2023-12-30", "10-K", "c"),
            ],
            &forms,
            2024,
        );
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].accession_id, "a");
    }

    #[test]
    fn backend_rejects_blank_identity() {
        assert!(matches!(
            EdgarBackend::new("  "),
            Err(AppError::ConfigError(_))
        ));
    }
}
