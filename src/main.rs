use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use edgar_batch::cli::{CliArgs, Command};
use edgar_batch::config;
use edgar_batch::core::{orchestrator, unpack};
use edgar_batch::error::AppResult;
use edgar_batch::logging::{log, setup_logging, LogLevel};
use std::process::ExitCode;
use tokio::runtime::Builder;

fn main() -> ExitCode {
    let cli_args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            setup_logging(false);
            log(LogLevel::Error, &format!("CLI Argument Error: {}", e));
            let _ = CliArgs::command().print_help();
            return ExitCode::from(config::EXIT_INVALID_INPUT as u8);
        }
    };
    setup_logging(cli_args.verbose);

    let runtime = match Builder::new_multi_thread()
        .enable_all()
        .thread_name("edgar-worker")
        .worker_threads(num_cpus::get())
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            log(
                LogLevel::Error,
                &format!("FATAL: Failed to build Tokio runtime: {}", e),
            );
            return ExitCode::from(config::EXIT_FATAL as u8);
        }
    };

    let main_result: AppResult<i32> = runtime.block_on(async {
        match cli_args.command {
            Command::Download(args) => {
                let run_config = args.run_config();
                let entities = args.load_entities().await?;
                let summary = orchestrator::run_download(run_config, entities).await?;
                summary.print_summary();
                Ok(summary.exit_code())
            }
            Command::Unpack(args) => unpack::run_unpack(args.options()).await,
        }
    });

    match main_result {
        Ok(exit_code) => ExitCode::from(exit_code as u8),
        Err(e) if e.is_infrastructure() => {
            log(LogLevel::Error, &e.to_string());
            ExitCode::from(config::EXIT_INVALID_INPUT as u8)
        }
        Err(e) => {
            log(LogLevel::Error, &format!("FATAL UNEXPECTED ERROR: {:?}", e));
            ExitCode::from(config::EXIT_FATAL as u8)
        }
    }
}
