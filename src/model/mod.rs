pub mod batch;
pub mod common;
pub mod entity;

pub use batch::Batch;
pub use entity::{DownloadOutcome, Entity, FilingRef, FilingWindow};
