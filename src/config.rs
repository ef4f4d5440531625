use crate::error::{AppError, AppResult};
use crate::model::entity::FilingWindow;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;

pub const DEFAULT_DATA_DIR: &str = "sp500_filings_data";
pub const DEFAULT_RUNS_DIR: &str = "runs";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_COMPANY_FILE: &str = "sp500.json";
pub const DEFAULT_BATCH_SIZE: usize = 12;
pub const DEFAULT_YEARS_BACK: u32 = 10;
pub const DEFAULT_FORMS: &[&str] = &["10-K", "10-Q"];
pub const DEFAULT_IDENTITY: &str = "Finapp User finapp@example.com";
pub const TEST_MODE_LIMIT: usize = 10;

pub const HTTP_TIMEOUT_SECONDS: u64 = 60;
pub const HTTP_CONNECT_TIMEOUT: u64 = 20;
pub const MAX_RETRIES: u32 = 3;
pub const RETRY_DELAY_BASE_SECS: f32 = 1.5;

// SEC fair-access policy allows 10 requests per second per client.
pub const MAX_HTTP_CONCUR: usize = 8;
pub const MIN_REQUEST_SPACING_MS: u64 = 110;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL_FAILURE: i32 = 1;
pub const EXIT_INVALID_INPUT: i32 = 2;
pub const EXIT_FATAL: i32 = 3;

pub const PROGRESS_BAR_WIDTH: usize = 50;
pub const ARCHIVE_EXTENSION: &str = "tar";
pub const PARTIAL_SUFFIX: &str = "partial";
pub const FILING_EXTENSION: &str = "html";

const SEC_WWW_URL: &str = "https://www.sec.gov";
const SEC_DATA_URL: &str = "https://data.sec.gov";

pub static EDGAR_ENDPOINTS: Lazy<HashMap<&'static str, String>> = Lazy::new(|| {
    HashMap::from([
        ("tickers", format!("{}/files/company_tickers.json", SEC_WWW_URL)),
        ("submissions", format!("{}/submissions", SEC_DATA_URL)),
        ("archives", format!("{}/Archives/edgar/data", SEC_WWW_URL)),
    ])
});

/// Matches `<prefix>_<batch>.tar`.
pub static BATCH_ARCHIVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<prefix>.+)_(?P<batch>\d+)\.tar$").unwrap());

pub static PATH_SEPARATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[/\\\x00-\x1f]").unwrap());

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub workers: usize,
    pub batch_size: usize,
    pub window: FilingWindow,
    pub identity: String,
    pub data_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub log_dir: PathBuf,
    pub show_progress: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            workers: num_cpus::get(),
            batch_size: DEFAULT_BATCH_SIZE,
            window: FilingWindow::new(DEFAULT_FORMS.iter().copied(), DEFAULT_YEARS_BACK),
            identity: DEFAULT_IDENTITY.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            runs_dir: PathBuf::from(DEFAULT_RUNS_DIR),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            show_progress: true,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> AppResult<()> {
        if self.workers == 0 {
            return Err(AppError::ConfigError(
                "Number of workers must be positive".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(AppError::ConfigError("Batch size must be positive".into()));
        }
        if self.window.years_back == 0 {
            return Err(AppError::ConfigError(
                "Years to fetch must be positive".into(),
            ));
        }
        if self.window.form_types.is_empty() {
            return Err(AppError::ConfigError(
                "At least one form type is required".into(),
            ));
        }
        if self.identity.trim().is_empty() {
            return Err(AppError::ConfigError(
                "An EDGAR identity (\"Name email\") is required".into(),
            ));
        }
        Ok(())
    }

    /// Name used for archive files and the top-level directory inside them.
    pub fn archive_prefix(&self) -> String {
        self.data_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())
    }
}
