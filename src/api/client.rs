use crate::config;
use crate::error::{AppError, AppResult};
use crate::logging::{log, LogLevel};
use crate::utils;
use bytes::Bytes;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{sleep, sleep_until, Instant};

/// HTTP access to EDGAR: identity header, bounded concurrency, request spacing
/// and retries.
pub struct EdgarClient {
    client: Client,
    request_sem: Semaphore,
    next_slot: Mutex<Instant>,
    spacing: Duration,
}

impl EdgarClient {
    pub fn new(identity: &str) -> AppResult<Self> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(AppError::ConfigError("EDGAR identity is empty".into()));
        }
        let client = Client::builder()
            .user_agent(identity)
            .timeout(Duration::from_secs(config::HTTP_TIMEOUT_SECONDS))
            .connect_timeout(Duration::from_secs(config::HTTP_CONNECT_TIMEOUT))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Cannot build HTTP client: {}", e)))?;
        Ok(EdgarClient {
            client,
            request_sem: Semaphore::new(config::MAX_HTTP_CONCUR),
            next_slot: Mutex::new(Instant::now()),
            spacing: Duration::from_millis(config::MIN_REQUEST_SPACING_MS),
        })
    }

    pub async fn get_json<T>(&self, url: &str) -> AppResult<T>
    where
        T: DeserializeOwned,
    {
        let bytes = self.get_bytes(url).await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            let snippet_len = bytes.len().min(200);
            let snippet = String::from_utf8_lossy(&bytes[..snippet_len]);
            log(
                LogLevel::Debug,
                &format!(
                    "Failed to parse {} as {}: {}. Snippet: '{}'",
                    url,
                    std::any::type_name::<T>(),
                    e,
                    snippet
                ),
            );
            AppError::from(e)
        })
    }

    pub async fn get_bytes(&self, url: &str) -> AppResult<Bytes> {
        let _permit = utils::acquire_semaphore(&self.request_sem, url).await?;
        self.fetch_internal(url).await
    }

    /// Waits for the next free request slot so starts are at least `spacing` apart.
    async fn pace(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = (*next).max(now);
            *next = slot + self.spacing;
            slot
        };
        sleep_until(slot).await;
    }

    async fn fetch_internal(&self, url: &str) -> AppResult<Bytes> {
        let mut last_error: Option<AppError> = None;

        for attempt in 0..=config::MAX_RETRIES {
            self.pace().await;
            let log_prefix = format!("EDGAR GET {} (Try {})", url, attempt + 1);

            let error = match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        match resp.bytes().await {
                            Ok(bytes) => return Ok(bytes),
                            Err(e) => AppError::from(e),
                        }
                    } else {
                        self.handle_http_error(resp, status, url).await
                    }
                }
                Err(e) if e.is_timeout() => AppError::Timeout(format!("{}: {}", log_prefix, e)),
                Err(e) => AppError::from(e),
            };

            if !error.is_retryable() {
                return Err(error);
            }
            log(LogLevel::Debug, &format!("{} failed: {}", log_prefix, error));
            last_error = Some(error);

            if attempt < config::MAX_RETRIES {
                let delay_secs = config::RETRY_DELAY_BASE_SECS * (2.0_f32.powi(attempt as i32));
                sleep(Duration::from_secs_f32(delay_secs)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AppError::Unexpected(format!(
                "Request failed after {} attempts for {}",
                config::MAX_RETRIES + 1,
                url
            ))
        }))
    }

    async fn handle_http_error(&self, resp: Response, status: StatusCode, url: &str) -> AppError {
        if status == StatusCode::NOT_FOUND {
            return AppError::NotFound {
                url: url.to_string(),
            };
        }

        let resp_text = resp
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error body".to_string());
        AppError::Http {
            status: status.as_u16(),
            url: url.to_string(),
            message: format!(
                "{}. Body: {}...",
                status.canonical_reason().unwrap_or("Unknown Status"),
                resp_text.chars().take(150).collect::<String>()
            ),
        }
    }
}
