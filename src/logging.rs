use colored::*;
use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Step,
    Info,
    Success,
    Warning,
    Error,
    Debug,
}

impl LogLevel {
    const ALL: [LogLevel; 6] = [
        LogLevel::Step,
        LogLevel::Info,
        LogLevel::Success,
        LogLevel::Warning,
        LogLevel::Error,
        LogLevel::Debug,
    ];

    fn label(self) -> &'static str {
        match self {
            LogLevel::Step => "STEP",
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
        }
    }

    fn color(self) -> Color {
        match self {
            LogLevel::Step => Color::Magenta,
            LogLevel::Info => Color::Cyan,
            LogLevel::Success => Color::Green,
            LogLevel::Warning => Color::Yellow,
            LogLevel::Error => Color::Red,
            LogLevel::Debug => Color::White,
        }
    }
}

// Widest label plus brackets, inner spaces and one trailing pad.
static PREFIX_WIDTH: Lazy<usize> = Lazy::new(|| {
    LogLevel::ALL
        .iter()
        .map(|l| l.label().len())
        .max()
        .unwrap_or(7)
        + 5
});

static LOG_PREFIXES: Lazy<HashMap<LogLevel, String>> = Lazy::new(|| {
    LogLevel::ALL
        .iter()
        .map(|level| {
            let label = level.label();
            let padding = PREFIX_WIDTH.saturating_sub(label.len() + 4);
            let colored_label = format!(" {} ", label).color(level.color()).bold();
            (*level, format!("[{}]{}", colored_label, " ".repeat(padding)))
        })
        .collect()
});

/// Installs the global subscriber. `RUST_LOG` wins over `verbose`.
pub fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let format = tracing_subscriber::fmt::format()
        .without_time()
        .with_level(false)
        .with_target(false)
        .compact();

    let _ = tracing_subscriber::fmt()
        .event_format(format)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}

pub fn log(level: LogLevel, message: &str) {
    let prefix = LOG_PREFIXES
        .get(&level)
        .cloned()
        .unwrap_or_else(|| format!("[{:<7}] ", level.label()));
    let line = format!("{}{}", prefix, message);

    match level {
        LogLevel::Step => tracing::info!(target: "step", "{}", line),
        LogLevel::Info | LogLevel::Success => tracing::info!("{}", line),
        LogLevel::Warning => tracing::warn!("{}", line),
        LogLevel::Error => tracing::error!("{}", line),
        LogLevel::Debug => tracing::debug!("{}", line),
    }
}
