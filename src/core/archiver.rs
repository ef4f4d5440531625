use crate::config;
use crate::error::{AppError, AppResult};
use crate::io;
use crate::model::common::{BatchNumber, EntityId};
use crate::model::Batch;
use crate::utils;
use async_trait::async_trait;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Rolls completed entity subtrees into numbered archives.
///
/// `archive_batch` and `cleanup` are separate steps: callers must only clean up ids
/// whose archive call returned `Ok`.
#[async_trait]
pub trait BatchArchiver: Send {
    /// Bundles the subtrees of `entity_ids` (missing ones are skipped) into the
    /// next numbered archive.
    async fn archive_batch(&mut self, entity_ids: &[EntityId]) -> AppResult<Batch>;

    /// Deletes the live subtrees of `entity_ids`. Returns how many existed.
    async fn cleanup(&mut self, entity_ids: &[EntityId]) -> AppResult<usize>;

    /// Number of archives produced so far.
    fn batch_counter(&self) -> BatchNumber;

    fn run_dir(&self) -> &Path;
}

/// Writes plain tar archives into `runs/run_<id>/<prefix>_<n>.tar`.
#[derive(Debug)]
pub struct TarArchiver {
    data_dir: PathBuf,
    prefix: String,
    run_dir: PathBuf,
    batch_counter: BatchNumber,
}

impl TarArchiver {
    pub async fn create(
        data_dir: &Path,
        runs_dir: &Path,
        prefix: &str,
        run_id: &str,
    ) -> AppResult<Self> {
        let run_dir = runs_dir.join(format!("run_{}", run_id));
        io::ensure_dir(&run_dir).await?;
        Ok(TarArchiver {
            data_dir: data_dir.to_path_buf(),
            prefix: prefix.to_string(),
            run_dir,
            batch_counter: 0,
        })
    }

    pub fn archive_path(&self, batch_number: BatchNumber) -> PathBuf {
        self.run_dir.join(format!(
            "{}_{}.{}",
            self.prefix,
            batch_number,
            config::ARCHIVE_EXTENSION
        ))
    }

    fn entity_dir(&self, entity_id: &str) -> PathBuf {
        self.data_dir.join(io::clean_path_component(entity_id))
    }
}

fn write_tar(
    target: &Path,
    prefix: &str,
    sources: &[(EntityId, PathBuf)],
) -> AppResult<()> {
    let archive_err =
        |e: std::io::Error| AppError::Archive(format!("writing '{}': {}", target.display(), e));

    let file = File::create(target).map_err(archive_err)?;
    let mut builder = tar::Builder::new(BufWriter::new(file));
    for (entity_id, source) in sources {
        if source.is_dir() {
            builder
                .append_dir_all(format!("{}/{}", prefix, entity_id), source)
                .map_err(archive_err)?;
        }
    }
    let mut writer = builder.into_inner().map_err(archive_err)?;
    writer.flush().map_err(archive_err)?;
    let file = writer
        .into_inner()
        .map_err(|e| archive_err(e.into_error()))?;
    file.sync_all().map_err(archive_err)
}

#[async_trait]
impl BatchArchiver for TarArchiver {
    async fn archive_batch(&mut self, entity_ids: &[EntityId]) -> AppResult<Batch> {
        let batch_number = self.batch_counter + 1;
        let final_path = self.archive_path(batch_number);
        let partial_path = final_path.with_extension(format!(
            "{}.{}",
            config::ARCHIVE_EXTENSION,
            config::PARTIAL_SUFFIX
        ));

        let sources: Vec<(EntityId, PathBuf)> = entity_ids
            .iter()
            .map(|id| (io::clean_path_component(id), self.entity_dir(id)))
            .collect();
        let prefix = self.prefix.clone();
        let target = partial_path.clone();
        let written = utils::run_blocking(move || write_tar(&target, &prefix, &sources)).await;

        let finalized = match written {
            Ok(()) => fs::rename(&partial_path, &final_path)
                .await
                .map_err(|e| io::map_io_error(e, &final_path)),
            Err(e) => Err(e),
        };
        if let Err(e) = finalized {
            let _ = fs::remove_file(&partial_path).await;
            return Err(e);
        }

        let size_bytes = fs::metadata(&final_path)
            .await
            .map_err(|e| io::map_io_error(e, &final_path))?
            .len();
        self.batch_counter = batch_number;

        Ok(Batch {
            batch_number,
            entity_ids: entity_ids.to_vec(),
            archive_path: final_path,
            size_bytes,
        })
    }

    async fn cleanup(&mut self, entity_ids: &[EntityId]) -> AppResult<usize> {
        let mut removed = 0usize;
        let mut errors = Vec::new();
        for id in entity_ids {
            match io::remove_tree(&self.entity_dir(id)).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => errors.push(format!("{}: {}", id, e)),
            }
        }
        if errors.is_empty() {
            Ok(removed)
        } else {
            Err(AppError::Archive(format!(
                "cleanup failed for {}",
                errors.join("; ")
            )))
        }
    }

    fn batch_counter(&self) -> BatchNumber {
        self.batch_counter
    }

    fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}
