use crate::config;
use crate::core::run_log::now_stamp;
use crate::logging::{log, LogLevel};
use crate::model::common::EntityId;
use crate::model::Batch;
use crate::utils;
use std::path::PathBuf;
use std::time::Duration;

/// End-of-run aggregate. Pure reporting: nothing here feeds archiving decisions.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub total_entities: usize,
    pub succeeded: usize,
    pub failed_ids: Vec<EntityId>,
    pub filings_written: usize,
    pub duration: Duration,
    pub workers: usize,
    pub batch_size: usize,
    pub batches: Vec<Batch>,
    pub archive_failures: usize,
    pub cleanup_failures: usize,
    /// Successful entities still unarchived at run end (only after an archive failure).
    pub pending_ids: Vec<EntityId>,
    pub run_dir: PathBuf,
    pub log_path: PathBuf,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.failed_ids.len()
    }

    pub fn mean_per_entity(&self) -> Duration {
        if self.total_entities == 0 {
            return Duration::ZERO;
        }
        self.duration / self.total_entities as u32
    }

    pub fn full_batches(&self) -> usize {
        self.succeeded / self.batch_size.max(1)
    }

    pub fn remainder(&self) -> usize {
        self.succeeded % self.batch_size.max(1)
    }

    pub fn total_archive_bytes(&self) -> u64 {
        self.batches.iter().map(|b| b.size_bytes).sum()
    }

    pub fn exit_code(&self) -> i32 {
        if self.failed_ids.is_empty() {
            config::EXIT_SUCCESS
        } else {
            config::EXIT_PARTIAL_FAILURE
        }
    }

    /// Closing block of the run log.
    pub fn log_block(&self) -> String {
        let mut out = format!("\n{}\n", "=".repeat(80));
        out.push_str(&format!("Download Summary - {}\n", now_stamp()));
        out.push_str(&format!("Total companies: {}\n", self.total_entities));
        out.push_str(&format!("Successful: {}\n", self.succeeded));
        out.push_str(&format!("Failed: {}\n", self.failed()));
        out.push_str(&format!("Batches created: {}\n", self.batches.len()));
        out.push_str(&format!("Archive directory: {}\n", self.run_dir.display()));
        if self.archive_failures > 0 {
            out.push_str(&format!("Archive failures: {}\n", self.archive_failures));
        }
        if !self.pending_ids.is_empty() {
            out.push_str(&format!(
                "Not archived (data kept in place): {}\n",
                self.pending_ids.join(", ")
            ));
        }
        if !self.failed_ids.is_empty() {
            out.push_str(&format!(
                "Failed companies: {}\n",
                self.failed_ids.join(", ")
            ));
        }
        out
    }

    pub fn print_summary(&self) {
        let sep = "=".repeat(60);
        println!("\n{}\n{:^60}\n{}", sep, "PARALLEL DOWNLOAD SUMMARY", sep);
        println!("Total companies processed: {}", self.total_entities);
        println!("Successful downloads:      {}", self.succeeded);
        println!("Failed downloads:          {}", self.failed());
        println!("Filings written:           {}", self.filings_written);
        println!("Workers used:              {}", self.workers);
        println!("Batch size:                {}", self.batch_size);
        println!(
            "Total duration:            {:.2} seconds",
            self.duration.as_secs_f64()
        );
        println!(
            "Average time per company:  {:.2} seconds",
            self.mean_per_entity().as_secs_f64()
        );

        println!("\n{}", "-".repeat(60));
        println!("ARCHIVE SUMMARY");
        println!("{}", "-".repeat(60));
        println!("Run directory:    {}", self.run_dir.display());
        println!("Archives created: {}", self.batches.len());
        let full = self.full_batches();
        if full > 0 {
            println!(
                "Full batches:     {} (x{} companies each)",
                full, self.batch_size
            );
        } else {
            println!("Full batches:     none");
        }
        match self.remainder() {
            0 => println!("Remainder batch:  none (perfect fit)"),
            n => println!("Remainder batch:  1 ({} companies)", n),
        }
        let last = self.batches.len();
        for (idx, batch) in self.batches.iter().enumerate() {
            let note = if idx + 1 == last && batch.entity_ids.len() < self.batch_size {
                format!(" (remainder batch - {} companies)", batch.entity_ids.len())
            } else {
                String::new()
            };
            println!("  {}: {:.1}MB{}", batch.file_name(), batch.size_mb(), note);
        }
        println!(
            "Total archive size: {:.1}MB",
            utils::megabytes(self.total_archive_bytes())
        );
        println!("Run log:          {}", self.log_path.display());
        println!("{}", sep);

        if !self.failed_ids.is_empty() {
            println!("\nFailed companies: {}", self.failed_ids.join(", "));
        }
        self.log_overall_status();
    }

    fn log_overall_status(&self) {
        if self.archive_failures > 0 {
            log(
                LogLevel::Warning,
                &format!(
                    "{} archive attempt(s) failed; unarchived data was left in place.",
                    self.archive_failures
                ),
            );
        }
        if self.failed_ids.is_empty() {
            log(
                LogLevel::Success,
                "All SEC filings download and archiving completed successfully.",
            );
        } else {
            log(
                LogLevel::Error,
                &format!(
                    "Run completed with {} failed compan{}. Check the run log.",
                    self.failed(),
                    if self.failed() == 1 { "y" } else { "ies" }
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(succeeded: usize, failed: &[&str], batch_size: usize) -> RunSummary {
        RunSummary {
            run_id: "20250101_000000".into(),
            total_entities: succeeded + failed.len(),
            succeeded,
            failed_ids: failed.iter().map(|s| s.to_string()).collect(),
            filings_written: 0,
            duration: Duration::from_secs(50),
            workers: 4,
            batch_size,
            batches: vec![
                Batch {
                    batch_number: 1,
                    entity_ids: vec!["A".into()],
                    archive_path: PathBuf::from("runs/run_x/data_1.tar"),
                    size_bytes: 1024,
                },
                Batch {
                    batch_number: 2,
                    entity_ids: vec!["B".into()],
                    archive_path: PathBuf::from("runs/run_x/data_2.tar"),
                    size_bytes: 2048,
                },
            ],
            archive_failures: 0,
            cleanup_failures: 0,
            pending_ids: vec![],
            run_dir: PathBuf::from("runs/run_x"),
            log_path: PathBuf::from("logs/x.log"),
        }
    }

    #[test]
    fn derives_full_and_remainder_batches() {
        let s = summary(25, &[], 12);
        assert_eq!(s.full_batches(), 2);
        assert_eq!(s.remainder(), 1);
        assert_eq!(s.mean_per_entity(), Duration::from_secs(2));
        assert_eq!(s.total_archive_bytes(), 3072);
    }

    #[test]
    fn exit_code_distinguishes_partial_failure() {
        assert_eq!(summary(3, &[], 12).exit_code(), config::EXIT_SUCCESS);
        assert_eq!(
            summary(3, &["BAD"], 12).exit_code(),
            config::EXIT_PARTIAL_FAILURE
        );
    }

    #[test]
    fn log_block_lists_failures() {
        let block = summary(8, &["X", "Y"], 12).log_block();
        assert!(block.contains("Successful: 8"));
        assert!(block.contains("Failed: 2"));
        assert!(block.contains("Failed companies: X, Y"));
        assert!(block.contains("Batches created: 2"));
    }
}
