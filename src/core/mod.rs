pub mod archiver;
pub mod orchestrator;
pub mod progress;
pub mod run_log;
pub mod stats;
pub mod storage;
pub mod task;
pub mod unpack;
