use crate::model::common::{BatchNumber, EntityId};
use crate::utils;
use std::path::PathBuf;

/// One archive produced during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub batch_number: BatchNumber,
    pub entity_ids: Vec<EntityId>,
    pub archive_path: PathBuf,
    pub size_bytes: u64,
}

impl Batch {
    pub fn size_mb(&self) -> f64 {
        utils::megabytes(self.size_bytes)
    }

    pub fn file_name(&self) -> String {
        self.archive_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
