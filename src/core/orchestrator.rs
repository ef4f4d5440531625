use crate::api::{EdgarBackend, FilingBackend};
use crate::config::{self, RunConfig};
use crate::core::archiver::{BatchArchiver, TarArchiver};
use crate::core::progress::ProgressTracker;
use crate::core::run_log::{now_stamp, RunLog};
use crate::core::stats::RunSummary;
use crate::core::storage::FilingStore;
use crate::core::task::{download_entity, TaskContext};
use crate::error::{AppError, AppResult};
use crate::io;
use crate::logging::{log, LogLevel};
use crate::model::common::EntityId;
use crate::model::{Batch, DownloadOutcome, Entity, FilingWindow};
use crate::utils;
use chrono::{Datelike, Local};
use futures::FutureExt;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Initializing,
    Dispatching,
    Draining,
    Flushing,
    Finalizing,
    Done,
}

/// Successful, not yet archived entity ids in completion order.
#[derive(Debug, Default)]
pub struct CompletedAccumulator {
    ids: Vec<EntityId>,
    members: HashSet<EntityId>,
}

impl CompletedAccumulator {
    /// Appends `id` unless it is already pending.
    pub fn push(&mut self, id: EntityId) -> bool {
        if !self.members.insert(id.clone()) {
            return false;
        }
        self.ids.push(id);
        true
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[EntityId] {
        &self.ids
    }

    /// Copy of the oldest `n` ids.
    pub fn front(&self, n: usize) -> Vec<EntityId> {
        self.ids.iter().take(n).cloned().collect()
    }

    /// Drops the oldest `n` ids, keeping anything that arrived after them.
    pub fn remove_front(&mut self, n: usize) {
        let n = n.min(self.ids.len());
        for id in self.ids.drain(..n) {
            self.members.remove(&id);
        }
    }
}

/// Per-run state: identifier, clock and run log.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: String,
    pub run_log: Arc<RunLog>,
    started: Instant,
}

pub fn new_run_id() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

type TaskResult = (EntityId, usize, Result<DownloadOutcome, String>);

/// Drives one batch download: dispatch, drain, rollover, remainder flush, summary.
///
/// An orchestrator runs exactly once; [`RunOrchestrator::run`] consumes it.
pub struct RunOrchestrator<B: FilingBackend, A: BatchArchiver> {
    config: RunConfig,
    backend: Arc<B>,
    store: Arc<FilingStore>,
    archiver: A,
    context: RunContext,
    current_year: i32,
    accumulator: CompletedAccumulator,
    failed: Vec<EntityId>,
    succeeded: usize,
    filings_written: usize,
    batches: Vec<Batch>,
    archive_failures: usize,
    cleanup_failures: usize,
    phase: RunPhase,
}

impl<B: FilingBackend, A: BatchArchiver> RunOrchestrator<B, A> {
    pub async fn initialize(
        config: RunConfig,
        backend: Arc<B>,
        archiver: A,
        run_id: String,
    ) -> AppResult<Self> {
        config.validate()?;

        let available = num_cpus::get();
        if config.workers > available {
            log(
                LogLevel::Warning,
                &format!(
                    "Requested {} workers, but only {} CPUs available",
                    config.workers, available
                ),
            );
        }

        io::ensure_dir(&config.data_dir).await?;
        let run_log = Arc::new(RunLog::open(&config.log_dir, &run_id).await?);
        let store = Arc::new(FilingStore::new(config.data_dir.clone()));

        Ok(RunOrchestrator {
            config,
            backend,
            store,
            archiver,
            context: RunContext {
                run_id,
                started_at: now_stamp(),
                run_log,
                started: Instant::now(),
            },
            current_year: Local::now().year(),
            accumulator: CompletedAccumulator::default(),
            failed: Vec::new(),
            succeeded: 0,
            filings_written: 0,
            batches: Vec::new(),
            archive_failures: 0,
            cleanup_failures: 0,
            phase: RunPhase::Initializing,
        })
    }

    /// Pins the last year of the filing window.
    pub fn with_current_year(mut self, year: i32) -> Self {
        self.current_year = year;
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    fn enter(&mut self, phase: RunPhase) {
        log(
            LogLevel::Debug,
            &format!("Run {}: {:?} -> {:?}", self.context.run_id, self.phase, phase),
        );
        self.phase = phase;
    }

    pub async fn run(mut self, entities: Vec<Entity>) -> AppResult<RunSummary> {
        if entities.is_empty() {
            return Err(AppError::Argument("No companies to process".into()));
        }
        io::check_entity_ids(&entities)?;
        let total = entities.len();
        let progress = Arc::new(if self.config.show_progress {
            ProgressTracker::new(total, config::PROGRESS_BAR_WIDTH)
        } else {
            ProgressTracker::hidden(total)
        });

        self.write_header(total).await;
        log(
            LogLevel::Step,
            &format!(
                "Processing {} companies with {} workers (batch size {})",
                total, self.config.workers, self.config.batch_size
            ),
        );
        log(
            LogLevel::Info,
            &format!(
                "Archives will be saved to: {}",
                self.archiver.run_dir().display()
            ),
        );
        log(
            LogLevel::Info,
            &format!(
                "Progress details logged to: {}",
                self.context.run_log.path().display()
            ),
        );

        self.enter(RunPhase::Dispatching);
        progress.update(Some(0), "Initializing workers...");
        let dispatched: Vec<EntityId> = entities.iter().map(|e| e.identifier.clone()).collect();
        let mut tasks = self.dispatch(entities);
        self.context
            .run_log
            .entry(&format!(
                "Dispatched {} companies to {} workers",
                total, self.config.workers
            ))
            .await;

        self.enter(RunPhase::Draining);
        let mut pending: HashSet<EntityId> = dispatched.iter().cloned().collect();
        let mut completed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            let (outcome, raised) = match joined {
                Ok((_, _, Ok(outcome))) => (outcome, false),
                Ok((entity_id, worker_id, Err(panic_msg))) => (
                    DownloadOutcome::failed(
                        &entity_id,
                        worker_id,
                        format!("Task panicked: {}", panic_msg),
                    ),
                    true,
                ),
                Err(e) => {
                    log(LogLevel::Error, &format!("Download task lost: {}", e));
                    continue;
                }
            };
            if !pending.remove(&outcome.entity_id) {
                continue;
            }
            completed += 1;
            self.collect(outcome, raised, completed, total, &progress)
                .await;
        }
        for entity_id in dispatched.iter().filter(|id| pending.contains(*id)) {
            completed += 1;
            let outcome = DownloadOutcome::failed(entity_id, 0, "Task ended without an outcome");
            self.collect(outcome, true, completed, total, &progress)
                .await;
        }

        self.enter(RunPhase::Flushing);
        self.flush_remainder().await;

        self.enter(RunPhase::Finalizing);
        let summary = self.finalize(total).await;
        progress.finish("Parallel processing completed");
        self.enter(RunPhase::Done);
        Ok(summary)
    }

    async fn write_header(&self, total: usize) {
        let header = format!(
            "Download Progress Log - {}\nRun: {}\nTotal companies: {}\nWorkers: {}\nBatch size: {}\nForms: {}\nYears: {}\n{}\n\n",
            self.context.started_at,
            self.context.run_id,
            total,
            self.config.workers,
            self.config.batch_size,
            self.config
                .window
                .form_types
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", "),
            self.config.window.years_back,
            "=".repeat(80)
        );
        self.context.run_log.raw(&header).await;
    }

    /// Spawns one task per entity in list order; at most `workers` run at once.
    fn dispatch(&self, entities: Vec<Entity>) -> JoinSet<TaskResult> {
        let workers = self.config.workers;
        let permits = Arc::new(Semaphore::new(workers));
        let window: Arc<FilingWindow> = Arc::new(self.config.window.clone());
        let mut tasks = JoinSet::new();

        for (idx, entity) in entities.into_iter().enumerate() {
            let worker_id = idx % workers + 1;
            let permits = Arc::clone(&permits);
            let backend = Arc::clone(&self.backend);
            let store = Arc::clone(&self.store);
            let window = Arc::clone(&window);
            let run_log = Arc::clone(&self.context.run_log);
            let current_year = self.current_year;

            tasks.spawn(async move {
                let entity_id = entity.identifier.clone();
                let permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return (entity_id, worker_id, Err(e.to_string())),
                };
                let ctx = TaskContext {
                    backend: backend.as_ref(),
                    store: store.as_ref(),
                    window: window.as_ref(),
                    current_year,
                    worker_id,
                    run_log: Some(run_log.as_ref()),
                };
                let result = AssertUnwindSafe(download_entity(&ctx, &entity))
                    .catch_unwind()
                    .await
                    .map_err(|payload| utils::panic_message(payload.as_ref()));
                drop(permit);
                (entity_id, worker_id, result)
            });
        }
        tasks
    }

    async fn collect(
        &mut self,
        outcome: DownloadOutcome,
        raised: bool,
        completed: usize,
        total: usize,
        progress: &ProgressTracker,
    ) {
        let entity_id = outcome.entity_id.clone();
        let status_msg = if outcome.succeeded {
            self.succeeded += 1;
            self.filings_written += outcome.filings_written;
            self.accumulator.push(entity_id.clone());
            format!("✓ {}", entity_id)
        } else {
            self.failed.push(entity_id.clone());
            if raised {
                format!("✗ {} (Exception)", entity_id)
            } else {
                format!("✗ {}", entity_id)
            }
        };
        progress.update(Some(completed), &status_msg);

        let kind = if raised { "Exception" } else { "Completed" };
        self.context
            .run_log
            .entry(&format!(
                "{} {}/{}: {} - {}",
                kind, completed, total, status_msg, outcome.detail
            ))
            .await;

        while self.accumulator.len() >= self.config.batch_size {
            if !self.roll_over(completed, progress).await {
                break;
            }
        }
    }

    /// Archives the oldest `batch_size` pending ids; cleans up only if that worked.
    async fn roll_over(&mut self, completed: usize, progress: &ProgressTracker) -> bool {
        let batch_ids = self.accumulator.front(self.config.batch_size);
        match self.archiver.archive_batch(&batch_ids).await {
            Ok(batch) => {
                progress.update(
                    Some(completed),
                    &format!(
                        "📦 Archived batch {} ({:.1}MB)",
                        batch.batch_number,
                        batch.size_mb()
                    ),
                );
                self.log_batch("ARCHIVED", &batch, None).await;
                self.accumulator.remove_front(batch_ids.len());
                self.cleanup(&batch).await;
                self.batches.push(batch);
                true
            }
            Err(e) => {
                self.archive_failures += 1;
                log(LogLevel::Error, &format!("Archiving batch failed: {}", e));
                self.context
                    .run_log
                    .entry(&format!("ARCHIVE ERROR: {}", e))
                    .await;
                false
            }
        }
    }

    /// One final archive of everything still pending.
    async fn flush_remainder(&mut self) {
        if self.accumulator.is_empty() {
            return;
        }
        let remainder = self.accumulator.front(self.accumulator.len());
        match self.archiver.archive_batch(&remainder).await {
            Ok(batch) => {
                let note = format!(
                    "  Note: This is the remainder batch ({} % {} = {} companies)\n",
                    self.succeeded,
                    self.config.batch_size,
                    self.succeeded % self.config.batch_size
                );
                self.log_batch("FINAL BATCH (REMAINDER)", &batch, Some(&note))
                    .await;
                self.accumulator.remove_front(remainder.len());
                self.cleanup(&batch).await;
                log(
                    LogLevel::Debug,
                    &format!(
                        "Final remainder batch {} archived: {} companies ({:.1}MB)",
                        batch.batch_number,
                        batch.entity_ids.len(),
                        batch.size_mb()
                    ),
                );
                self.batches.push(batch);
            }
            Err(e) => {
                self.archive_failures += 1;
                log(
                    LogLevel::Error,
                    &format!("Archiving final batch failed: {}", e),
                );
                self.context
                    .run_log
                    .entry(&format!("FINAL BATCH ERROR: {}", e))
                    .await;
            }
        }
    }

    async fn cleanup(&mut self, batch: &Batch) {
        if let Err(e) = self.archiver.cleanup(&batch.entity_ids).await {
            self.cleanup_failures += 1;
            self.context
                .run_log
                .entry(&format!(
                    "CLEANUP ERROR: Batch {} stays archived, live data kept: {}",
                    batch.batch_number, e
                ))
                .await;
        }
    }

    async fn log_batch(&self, label: &str, batch: &Batch, note: Option<&str>) {
        let run_log = &self.context.run_log;
        run_log
            .entry(&format!(
                "{}: Batch {} with {} companies ({:.1}MB)",
                label,
                batch.batch_number,
                batch.entity_ids.len(),
                batch.size_mb()
            ))
            .await;
        let mut details = format!(
            "  Archive: {}\n  Companies: {}\n",
            batch.archive_path.display(),
            batch.entity_ids.join(", ")
        );
        if let Some(note) = note {
            details.push_str(note);
        }
        run_log.raw(&details).await;
    }

    async fn finalize(&self, total: usize) -> RunSummary {
        let summary = RunSummary {
            run_id: self.context.run_id.clone(),
            total_entities: total,
            succeeded: self.succeeded,
            failed_ids: self.failed.clone(),
            filings_written: self.filings_written,
            duration: self.context.started.elapsed(),
            workers: self.config.workers,
            batch_size: self.config.batch_size,
            batches: self.batches.clone(),
            archive_failures: self.archive_failures,
            cleanup_failures: self.cleanup_failures,
            pending_ids: self.accumulator.ids().to_vec(),
            run_dir: self.archiver.run_dir().to_path_buf(),
            log_path: self.context.run_log.path().to_path_buf(),
        };
        let run_log = &self.context.run_log;
        run_log.raw(&summary.log_block()).await;
        if let Err(e) = run_log.close().await {
            log(
                LogLevel::Warning,
                &format!("Closing run log failed: {}", e),
            );
        }
        summary
    }
}

/// Production entry point: EDGAR backend plus tar archiver.
pub async fn run_download(config: RunConfig, entities: Vec<Entity>) -> AppResult<RunSummary> {
    config.validate()?;
    if entities.is_empty() {
        return Err(AppError::Argument("No companies to process".into()));
    }

    let run_id = new_run_id();
    let backend = Arc::new(EdgarBackend::new(&config.identity)?);
    let archiver = TarArchiver::create(
        &config.data_dir,
        &config.runs_dir,
        &config.archive_prefix(),
        &run_id,
    )
    .await?;

    RunOrchestrator::initialize(config, backend, archiver, run_id)
        .await?
        .run(entities)
        .await
}
