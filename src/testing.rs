//! In-memory collaborators for exercising the download pipeline without the network.

use crate::api::FilingBackend;
use crate::core::archiver::BatchArchiver;
use crate::error::{AppError, AppResult};
use crate::model::common::{BatchNumber, EntityId};
use crate::model::{Batch, Entity, FilingRef};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scriptable filing backend.
///
/// Entities without configured filings resolve fine and have nothing to download.
#[derive(Debug, Default)]
pub struct MockBackend {
    filings: HashMap<String, Vec<FilingRef>>,
    failing_resolve: HashSet<String>,
    panicking: HashSet<String>,
    failing_years: HashSet<(String, i32)>,
    failing_bodies: HashSet<String>,
    delays: HashMap<String, Duration>,
    year_bleed: bool,
    list_calls: AtomicUsize,
    body_fetches: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filing dated `date` (`YYYY-MM-DD`).
    pub fn with_filing(mut self, entity: &str, date: &str, form: &str, accession: &str) -> Self {
        let filing_date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .unwrap_or_else(|_| panic!("bad mock filing date {}", date));
        self.filings
            .entry(entity.to_string())
            .or_default()
            .push(FilingRef {
                filing_date,
                form: form.to_string(),
                accession_id: accession.to_string(),
                primary_document: format!("{}.htm", accession),
            });
        self
    }

    pub fn failing_resolve(mut self, entity: &str) -> Self {
        self.failing_resolve.insert(entity.to_string());
        self
    }

    /// Makes the entity's task panic during initialization.
    pub fn panicking(mut self, entity: &str) -> Self {
        self.panicking.insert(entity.to_string());
        self
    }

    pub fn failing_year(mut self, entity: &str, year: i32) -> Self {
        self.failing_years.insert((entity.to_string(), year));
        self
    }

    pub fn failing_body(mut self, accession: &str) -> Self {
        self.failing_bodies.insert(accession.to_string());
        self
    }

    /// Delays the entity's initialization, to shape completion order.
    pub fn with_delay(mut self, entity: &str, delay: Duration) -> Self {
        self.delays.insert(entity.to_string(), delay);
        self
    }

    /// Listing a year also returns filings from the neighbouring years.
    pub fn with_year_bleed(mut self) -> Self {
        self.year_bleed = true;
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn body_fetches(&self) -> usize {
        self.body_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FilingBackend for MockBackend {
    type Handle = String;

    fn name(&self) -> &str {
        "mock"
    }

    async fn resolve(&self, entity: &Entity) -> AppResult<String> {
        if let Some(delay) = self.delays.get(&entity.identifier) {
            tokio::time::sleep(*delay).await;
        }
        if self.panicking.contains(&entity.identifier) {
            panic!("simulated crash for {}", entity.identifier);
        }
        if self.failing_resolve.contains(&entity.identifier) {
            return Err(AppError::entity_init(
                &entity.identifier,
                "simulated lookup failure",
            ));
        }
        Ok(entity.identifier.clone())
    }

    async fn list_filings(
        &self,
        handle: &String,
        form_types: &BTreeSet<String>,
        year: i32,
    ) -> AppResult<Vec<FilingRef>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_years.contains(&(handle.clone(), year)) {
            return Err(AppError::Http {
                status: 503,
                url: format!("mock://{}/{}", handle, year),
                message: "simulated outage".into(),
            });
        }
        let span = if self.year_bleed { 1 } else { 0 };
        Ok(self
            .filings
            .get(handle)
            .map(|all| {
                all.iter()
                    .filter(|f| form_types.contains(&f.form))
                    .filter(|f| (f.filing_year() - year).abs() <= span)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_body(&self, handle: &String, filing: &FilingRef) -> AppResult<Bytes> {
        self.body_fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing_bodies.contains(&filing.accession_id) {
            return Err(AppError::NotFound {
                url: format!("mock://{}/{}", handle, filing.accession_id),
            });
        }
        Ok(Bytes::from(format!(
            "<html><body>{} {} {}</body></html>",
            handle, filing.form, filing.accession_id
        )))
    }
}

/// One call observed by [`RecordingArchiver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiverCall {
    Archive {
        entity_ids: Vec<EntityId>,
        result: Result<BatchNumber, String>,
    },
    Cleanup {
        entity_ids: Vec<EntityId>,
    },
}

/// Shared view of the calls made through a [`RecordingArchiver`].
#[derive(Debug, Clone, Default)]
pub struct ArchiverJournal {
    calls: Arc<Mutex<Vec<ArchiverCall>>>,
}

impl ArchiverJournal {
    pub fn calls(&self) -> Vec<ArchiverCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn archived(&self) -> Vec<(BatchNumber, Vec<EntityId>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ArchiverCall::Archive {
                    entity_ids,
                    result: Ok(n),
                } => Some((n, entity_ids)),
                _ => None,
            })
            .collect()
    }

    pub fn cleanups(&self) -> Vec<Vec<EntityId>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ArchiverCall::Cleanup { entity_ids } => Some(entity_ids),
                _ => None,
            })
            .collect()
    }

    /// Every cleanup was preceded by a successful archive covering its ids.
    pub fn cleanups_follow_successful_archives(&self) -> bool {
        let mut archived: Vec<HashSet<EntityId>> = Vec::new();
        for call in self.calls() {
            match call {
                ArchiverCall::Archive {
                    entity_ids,
                    result: Ok(_),
                } => archived.push(entity_ids.into_iter().collect()),
                ArchiverCall::Archive { .. } => {}
                ArchiverCall::Cleanup { entity_ids } => {
                    let covered = archived
                        .iter()
                        .any(|set| entity_ids.iter().all(|id| set.contains(id)));
                    if !covered {
                        return false;
                    }
                }
            }
        }
        true
    }

    fn record(&self, call: ArchiverCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

/// Wraps an archiver, journals every call and can fail chosen archive attempts.
pub struct RecordingArchiver<A> {
    inner: A,
    journal: ArchiverJournal,
    fail_attempts: HashSet<usize>,
    attempts: usize,
}

impl<A: BatchArchiver> RecordingArchiver<A> {
    pub fn new(inner: A) -> Self {
        RecordingArchiver {
            inner,
            journal: ArchiverJournal::default(),
            fail_attempts: HashSet::new(),
            attempts: 0,
        }
    }

    /// Fails the n-th (1-based) `archive_batch` call as if the disk were full.
    pub fn failing_attempt(mut self, attempt: usize) -> Self {
        self.fail_attempts.insert(attempt);
        self
    }

    pub fn journal(&self) -> ArchiverJournal {
        self.journal.clone()
    }
}

#[async_trait]
impl<A: BatchArchiver> BatchArchiver for RecordingArchiver<A> {
    async fn archive_batch(&mut self, entity_ids: &[EntityId]) -> AppResult<Batch> {
        self.attempts += 1;
        let result = if self.fail_attempts.contains(&self.attempts) {
            Err(AppError::Archive("No space left on device".into()))
        } else {
            self.inner.archive_batch(entity_ids).await
        };
        self.journal.record(ArchiverCall::Archive {
            entity_ids: entity_ids.to_vec(),
            result: result
                .as_ref()
                .map(|b| b.batch_number)
                .map_err(|e| e.to_string()),
        });
        result
    }

    async fn cleanup(&mut self, entity_ids: &[EntityId]) -> AppResult<usize> {
        self.journal.record(ArchiverCall::Cleanup {
            entity_ids: entity_ids.to_vec(),
        });
        self.inner.cleanup(entity_ids).await
    }

    fn batch_counter(&self) -> BatchNumber {
        self.inner.batch_counter()
    }

    fn run_dir(&self) -> &Path {
        self.inner.run_dir()
    }
}
