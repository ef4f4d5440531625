use crate::config;
use crate::error::AppResult;
use crate::io;
use crate::model::FilingRef;
use std::path::{Path, PathBuf};

/// Content-addressed filing tree: `root/entity/year/form/accession.html`.
#[derive(Debug, Clone)]
pub struct FilingStore {
    root: PathBuf,
}

impl FilingStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        FilingStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entity_dir(&self, entity_id: &str) -> PathBuf {
        self.root.join(io::clean_path_component(entity_id))
    }

    pub fn filing_path(&self, entity_id: &str, year: i32, filing: &FilingRef) -> PathBuf {
        self.entity_dir(entity_id)
            .join(year.to_string())
            .join(io::clean_path_component(&filing.form))
            .join(format!(
                "{}.{}",
                io::clean_path_component(&filing.accession_id),
                config::FILING_EXTENSION
            ))
    }

    pub async fn contains(&self, path: &Path) -> bool {
        io::path_exists(path).await
    }

    /// Persists a filing body, creating parent directories on demand.
    pub async fn write(&self, path: &Path, body: &[u8]) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            io::ensure_dir(parent).await?;
        }
        io::write_file_async(path, body).await
    }
}
