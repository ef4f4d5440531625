use crate::api::FilingBackend;
use crate::core::run_log::RunLog;
use crate::core::storage::FilingStore;
use crate::model::{DownloadOutcome, Entity, FilingWindow};

/// Everything a worker needs besides the entity itself.
pub struct TaskContext<'a, B: FilingBackend> {
    pub backend: &'a B,
    pub store: &'a FilingStore,
    pub window: &'a FilingWindow,
    pub current_year: i32,
    pub worker_id: usize,
    pub run_log: Option<&'a RunLog>,
}

impl<B: FilingBackend> TaskContext<'_, B> {
    async fn log(&self, message: &str) {
        if let Some(run_log) = self.run_log {
            run_log
                .entry(&format!("[Worker {}] {}", self.worker_id, message))
                .await;
        }
    }
}

/// Downloads every missing filing of `entity` inside the window.
///
/// Never fails: entity initialization errors produce a failed outcome, while a
/// failing year or document is recorded in the outcome and skipped.
pub async fn download_entity<B: FilingBackend>(
    ctx: &TaskContext<'_, B>,
    entity: &Entity,
) -> DownloadOutcome {
    let ticker = entity.identifier.as_str();
    ctx.log(&format!(
        "Starting download for {} - {}",
        ticker, entity.display_name
    ))
    .await;

    let handle = match ctx.backend.resolve(entity).await {
        Ok(handle) => handle,
        Err(e) => {
            let error_msg = e.to_string();
            ctx.log(&error_msg).await;
            return DownloadOutcome::failed(ticker, ctx.worker_id, error_msg);
        }
    };

    let mut written = 0usize;
    let mut skipped = 0usize;
    let mut unit_errors = Vec::new();

    for year in ctx.window.years(ctx.current_year) {
        let filings = match ctx
            .backend
            .list_filings(&handle, &ctx.window.form_types, year)
            .await
        {
            Ok(filings) => filings,
            Err(e) => {
                unit_errors.push(format!("year {}: {}", year, e));
                continue;
            }
        };

        for filing in filings.iter().filter(|f| f.filing_year() == year) {
            let path = ctx.store.filing_path(ticker, year, filing);
            if ctx.store.contains(&path).await {
                skipped += 1;
                continue;
            }

            let body = match ctx.backend.fetch_body(&handle, filing).await {
                Ok(body) => body,
                Err(e) => {
                    unit_errors.push(format!("{} {}: {}", filing.form, filing.accession_id, e));
                    continue;
                }
            };
            match ctx.store.write(&path, &body).await {
                Ok(()) => written += 1,
                Err(e) => {
                    unit_errors.push(format!("{} {}: {}", filing.form, filing.accession_id, e))
                }
            }
        }
    }

    let outcome = DownloadOutcome::completed(ticker, ctx.worker_id, written, skipped, unit_errors);
    ctx.log(&format!("Completed {}: {}", ticker, outcome.detail))
        .await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;
    use tempfile::TempDir;

    const YEAR: i32 = 2025;

    fn window(years: u32) -> FilingWindow {
        FilingWindow::new(["10-K", "10-Q"], years)
    }

    async fn run(backend: &MockBackend, store: &FilingStore, entity: &Entity) -> DownloadOutcome {
        let window = window(3);
        let ctx = TaskContext {
            backend,
            store,
            window: &window,
            current_year: YEAR,
            worker_id: 1,
            run_log: None,
        };
        download_entity(&ctx, entity).await
    }

    #[tokio::test]
    async fn writes_filings_under_entity_year_form() {
        let dir = TempDir::new().unwrap();
        let store = FilingStore::new(dir.path());
        let backend = MockBackend::new()
            .with_filing("MSFT", "2024-07-30", "10-K", "acc-1")
            .with_filing("MSFT", "2025-04-25", "10-Q", "acc-2")
            .with_filing("MSFT", "2025-05-01", "8-K", "acc-3");

        let outcome = run(&backend, &store, &Entity::new("MSFT", "Microsoft")).await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.filings_written, 2);
        assert!(dir.path().join("MSFT/2024/10-K/acc-1.html").exists());
        assert!(dir.path().join("MSFT/2025/10-Q/acc-2.html").exists());
        assert!(!dir.path().join("MSFT/2025/8-K").exists());
    }

    #[tokio::test]
    async fn drops_adjacent_year_bleed() {
        let dir = TempDir::new().unwrap();
        let store = FilingStore::new(dir.path());
        let backend = MockBackend::new()
            .with_filing("AAPL", "2024-11-01", "10-K", "acc-1")
            .with_year_bleed();

        let outcome = run(&backend, &store, &Entity::new("AAPL", "Apple")).await;

        assert_eq!(outcome.filings_written, 1);
        assert_eq!(backend.body_fetches(), 1);
    }

    #[tokio::test]
    async fn init_failure_attempts_nothing() {
        let dir = TempDir::new().unwrap();
        let store = FilingStore::new(dir.path());
        let backend = MockBackend::new()
            .with_filing("BAD", "2024-07-30", "10-K", "acc-1")
            .failing_resolve("BAD");

        let outcome = run(&backend, &store, &Entity::new("BAD", "Broken")).await;

        assert!(!outcome.succeeded);
        assert!(outcome.detail.contains("Error initializing entity BAD"));
        assert_eq!(backend.list_calls(), 0);
        assert!(!dir.path().join("BAD").exists());
    }

    #[tokio::test]
    async fn failing_year_and_document_do_not_stop_the_rest() {
        let dir = TempDir::new().unwrap();
        let store = FilingStore::new(dir.path());
        let backend = MockBackend::new()
            .with_filing("IBM", "2023-02-01", "10-K", "acc-23")
            .with_filing("IBM", "2024-02-01", "10-K", "acc-24")
            .with_filing("IBM", "2025-02-01", "10-K", "acc-25a")
            .with_filing("IBM", "2025-05-01", "10-Q", "acc-25b")
            .failing_year("IBM", 2024)
            .failing_body("acc-25a");

        let outcome = run(&backend, &store, &Entity::new("IBM", "IBM")).await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.filings_written, 2);
        assert_eq!(outcome.unit_errors.len(), 2);
        assert!(outcome.unit_errors[0].starts_with("year 2024"));
        assert!(outcome.unit_errors[1].contains("acc-25a"));
        assert!(outcome.detail.contains("2 partial errors"));
    }

    #[tokio::test]
    async fn zero_filings_is_success() {
        let dir = TempDir::new().unwrap();
        let store = FilingStore::new(dir.path());
        let backend = MockBackend::new();

        let outcome = run(&backend, &store, &Entity::new("NEW", "Newco")).await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.filings_written, 0);
        assert_eq!(outcome.detail, "Downloaded 0 filings");
    }

    #[tokio::test]
    async fn resume_writes_only_missing_files() {
        let dir = TempDir::new().unwrap();
        let store = FilingStore::new(dir.path());
        let backend = MockBackend::new()
            .with_filing("MSFT", "2024-07-30", "10-K", "acc-1")
            .with_filing("MSFT", "2025-01-30", "10-Q", "acc-2")
            .with_filing("MSFT", "2025-04-25", "10-Q", "acc-3");

        let existing = dir.path().join("MSFT/2024/10-K/acc-1.html");
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, b"kept").unwrap();

        let outcome = run(&backend, &store, &Entity::new("MSFT", "Microsoft")).await;

        assert_eq!(outcome.filings_written, 2);
        assert_eq!(outcome.filings_skipped, 1);
        assert_eq!(backend.body_fetches(), 2);
        assert_eq!(std::fs::read(&existing).unwrap(), b"kept");

        let again = run(&backend, &store, &Entity::new("MSFT", "Microsoft")).await;
        assert_eq!(again.filings_written, 0);
        assert_eq!(again.filings_skipped, 3);
        assert_eq!(backend.body_fetches(), 2);
    }

    #[tokio::test]
    async fn resume_rewrites_filing_left_half_written() {
        let dir = TempDir::new().unwrap();
        let store = FilingStore::new(dir.path());
        let backend = MockBackend::new().with_filing("MSFT", "2024-07-30", "10-K", "acc-1");

        let target = dir.path().join("MSFT/2024/10-K/acc-1.html");
        let leftover = crate::io::partial_path(&target);
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&leftover, b"<html><bo").unwrap();

        let outcome = run(&backend, &store, &Entity::new("MSFT", "Microsoft")).await;

        assert_eq!(outcome.filings_written, 1);
        assert_eq!(outcome.filings_skipped, 0);
        let body = std::fs::read_to_string(&target).unwrap();
        assert!(body.ends_with("</html>"));
        assert!(!leftover.exists());
    }
}
