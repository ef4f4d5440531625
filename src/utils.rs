use crate::error::{AppError, AppResult};
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::task;

pub async fn run_blocking<F, T>(func: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    match task::spawn_blocking(func).await {
        Ok(Ok(res)) => Ok(res),
        Ok(Err(e)) => Err(e),
        Err(e) => Err(AppError::from(e)),
    }
}

pub async fn acquire_semaphore<'a>(
    semaphore: &'a Semaphore,
    context: &str,
) -> AppResult<SemaphorePermit<'a>> {
    semaphore
        .acquire()
        .await
        .map_err(|e| AppError::SemaphoreAcquire(format!("Failed for '{}': {}", context, e)))
}

pub fn format_elapsed(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0) as u64;
        let secs = (seconds % 60.0) as u64;
        format!("{}m {}s", minutes, secs)
    } else {
        let hours = (seconds / 3600.0) as u64;
        let minutes = ((seconds % 3600.0) / 60.0) as u64;
        format!("{}h {}m", hours, minutes)
    }
}

pub fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
