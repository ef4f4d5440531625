use crate::config::{self, RunConfig};
use crate::core::unpack::{UnpackOptions, UnpackSelection};
use crate::error::{AppError, AppResult};
use crate::io;
use crate::logging::{log, LogLevel};
use crate::model::{Entity, FilingWindow};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Downloads SEC EDGAR filings in parallel and rolls them up into batch archives.",
    long_about = None,
    arg_required_else_help = true
)]
pub struct CliArgs {
    #[arg(short, long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download filings for a company list and archive them in batches.
    Download(DownloadArgs),
    /// Inspect or extract the batch archives of a previous run.
    Unpack(UnpackArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadMode {
    /// First companies of the list only.
    Test,
    /// Every company in the default S&P 500 list.
    Sp500,
    /// Every company in the file given with --companies.
    Custom,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    #[arg(value_enum)]
    pub mode: DownloadMode,

    #[arg(
        long,
        value_name = "FILE_PATH",
        help = "Company list JSON ([{\"Ticker\": ..., \"Company Name\": ...}])"
    )]
    pub companies: Option<PathBuf>,

    #[arg(short, long, value_name = "N", help = "Concurrent download workers [default: CPU count]")]
    pub workers: Option<usize>,

    #[arg(long, default_value_t = config::DEFAULT_BATCH_SIZE, value_name = "N")]
    pub batch_size: usize,

    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = config::DEFAULT_FORMS.iter().map(|f| f.to_string()),
        value_name = "FORMS"
    )]
    pub forms: Vec<String>,

    #[arg(long, default_value_t = config::DEFAULT_YEARS_BACK, value_name = "N")]
    pub years: u32,

    #[arg(
        long,
        env = "EDGAR_IDENTITY",
        default_value = config::DEFAULT_IDENTITY,
        help = "\"Name email\" sent to SEC as User-Agent"
    )]
    pub identity: String,

    #[arg(long, default_value = config::DEFAULT_DATA_DIR, value_name = "DIR_PATH")]
    pub data_dir: PathBuf,

    #[arg(long, default_value = config::DEFAULT_RUNS_DIR, value_name = "DIR_PATH")]
    pub runs_dir: PathBuf,

    #[arg(long, default_value = config::DEFAULT_LOG_DIR, value_name = "DIR_PATH")]
    pub log_dir: PathBuf,

    #[arg(long, help = "Disable the live progress line")]
    pub no_progress: bool,
}

#[derive(Args, Debug)]
#[command(group(
    clap::ArgGroup::new("selection")
        .required(true)
        .args(["batch", "all", "inspect"])
))]
pub struct UnpackArgs {
    #[arg(long, value_name = "DIR_PATH", help = "Run directory holding the batch archives")]
    pub run_dir: PathBuf,

    #[arg(long, value_name = "N", help = "Extract a single batch")]
    pub batch: Option<u32>,

    #[arg(long, help = "Extract every batch")]
    pub all: bool,

    #[arg(long, help = "Show archive contents without extracting")]
    pub inspect: bool,

    #[arg(short, long, value_name = "DIR_PATH", help = "Extraction target directory")]
    pub output: Option<PathBuf>,
}

impl DownloadArgs {
    pub fn run_config(&self) -> RunConfig {
        let forms = self
            .forms
            .iter()
            .map(|f| f.trim().to_uppercase())
            .filter(|f| !f.is_empty());
        RunConfig {
            workers: self.workers.unwrap_or_else(num_cpus::get),
            batch_size: self.batch_size,
            window: FilingWindow::new(forms, self.years),
            identity: self.identity.clone(),
            data_dir: self.data_dir.clone(),
            runs_dir: self.runs_dir.clone(),
            log_dir: self.log_dir.clone(),
            show_progress: !self.no_progress,
        }
    }

    fn company_file(&self) -> AppResult<PathBuf> {
        match (self.mode, &self.companies) {
            (_, Some(path)) => Ok(path.clone()),
            (DownloadMode::Custom, None) => Err(AppError::Argument(
                "Custom mode requires --companies <FILE_PATH>.".into(),
            )),
            _ => Ok(PathBuf::from(config::DEFAULT_COMPANY_FILE)),
        }
    }

    pub async fn load_entities(&self) -> AppResult<Vec<Entity>> {
        let path = self.company_file()?;
        let mut entities = io::load_entities(&path).await?;
        if self.mode == DownloadMode::Test && entities.len() > config::TEST_MODE_LIMIT {
            entities.truncate(config::TEST_MODE_LIMIT);
        }
        log(
            LogLevel::Info,
            &format!(
                "Loaded {} companies from {} ({:?} mode)",
                entities.len(),
                path.display(),
                self.mode
            ),
        );
        Ok(entities)
    }
}

impl UnpackArgs {
    pub fn options(&self) -> UnpackOptions {
        let selection = match (self.batch, self.inspect) {
            (_, true) => UnpackSelection::Inspect,
            (Some(n), false) => UnpackSelection::Batch(n),
            (None, false) => UnpackSelection::All,
        };
        UnpackOptions {
            run_dir: self.run_dir.clone(),
            selection,
            output: self.output.clone(),
        }
    }
}
