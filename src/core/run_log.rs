use crate::error::{AppError, AppResult};
use crate::io;
use crate::logging::{log, LogLevel};
use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn now_stamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Append-only, human-readable log of one run. Writers are serialized so lines
/// never interleave.
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl RunLog {
    pub async fn open(log_dir: &Path, run_id: &str) -> AppResult<Self> {
        io::ensure_dir(log_dir).await?;
        let path = log_dir.join(format!("download_progress_{}.log", run_id));
        let file = File::create(&path)
            .await
            .map_err(|e| io::map_io_error(e, &path))?;
        Ok(RunLog {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// One timestamped line.
    pub async fn entry(&self, message: &str) {
        self.raw(&format!("[{}] {}\n", now_stamp(), message)).await;
    }

    /// Writes `text` verbatim. Log write failures are reported but never fail the run.
    pub async fn raw(&self, text: &str) {
        let mut guard = self.file.lock().await;
        let Some(file) = guard.as_mut() else {
            return;
        };
        let result = async {
            file.write_all(text.as_bytes()).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = result {
            log(
                LogLevel::Warning,
                &format!("Run log write failed ({}): {}", self.path.display(), e),
            );
        }
    }

    /// Flushes and closes the file; later writes are dropped.
    pub async fn close(&self) -> AppResult<()> {
        let mut guard = self.file.lock().await;
        if let Some(mut file) = guard.take() {
            file.flush().await.map_err(AppError::from)?;
            file.sync_all().await.map_err(AppError::from)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_entries_stay_on_their_own_lines() {
        let dir = TempDir::new().unwrap();
        let run_log = Arc::new(RunLog::open(dir.path(), "20250101_000000").await.unwrap());

        let mut tasks = Vec::new();
        for worker in 0..8 {
            let l = Arc::clone(&run_log);
            tasks.push(tokio::spawn(async move {
                for i in 0..25 {
                    l.entry(&format!("[Worker {}] line {}", worker, i)).await;
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        run_log.close().await.unwrap();
        run_log.entry("dropped after close").await;

        let text = std::fs::read_to_string(run_log.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 200);
        assert!(lines
            .iter()
            .all(|l| l.starts_with('[') && l.contains("] [Worker ")));
        assert!(run_log
            .path()
            .ends_with("download_progress_20250101_000000.log"));
    }
}
