use crate::config;
use crate::error::{AppError, AppResult};
use crate::io;
use crate::logging::{log, LogLevel};
use crate::model::common::BatchNumber;
use crate::utils;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackSelection {
    Batch(BatchNumber),
    All,
    Inspect,
}

#[derive(Debug, Clone)]
pub struct UnpackOptions {
    pub run_dir: PathBuf,
    pub selection: UnpackSelection,
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct ArchiveInventory {
    pub size_bytes: u64,
    pub members: usize,
    pub files: usize,
    pub dirs: usize,
    pub entities: BTreeSet<String>,
}

/// Batch archives in `run_dir`, ordered by batch number.
pub async fn find_batch_archives(
    run_dir: &Path,
    batch: Option<BatchNumber>,
) -> AppResult<Vec<(BatchNumber, PathBuf)>> {
    let mut entries = fs::read_dir(run_dir)
        .await
        .map_err(|e| io::map_io_error(e, run_dir))?;

    let mut archives = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io::map_io_error(e, run_dir))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(caps) = config::BATCH_ARCHIVE_RE.captures(&name) else {
            continue;
        };
        match caps["batch"].parse::<BatchNumber>() {
            Ok(number) if batch.map_or(true, |b| b == number) => {
                archives.push((number, entry.path()))
            }
            Ok(_) => {}
            Err(_) => log(
                LogLevel::Warning,
                &format!("Could not parse batch number from filename: {}", name),
            ),
        }
    }
    archives.sort_by_key(|(number, _)| *number);
    Ok(archives)
}

pub fn inspect_archive(path: &Path) -> AppResult<ArchiveInventory> {
    let archive_err = |e: std::io::Error| AppError::Archive(format!("{}: {}", path.display(), e));
    let size_bytes = std::fs::metadata(path).map_err(archive_err)?.len();
    let mut inventory = ArchiveInventory {
        size_bytes,
        ..Default::default()
    };
    if size_bytes == 0 {
        return Ok(inventory);
    }

    let mut archive = tar::Archive::new(File::open(path).map_err(archive_err)?);
    for entry in archive.entries().map_err(archive_err)? {
        let entry = entry.map_err(archive_err)?;
        inventory.members += 1;
        let kind = entry.header().entry_type();
        if kind.is_dir() {
            inventory.dirs += 1;
        } else if kind.is_file() {
            inventory.files += 1;
        }
        let member_path = entry.path().map_err(archive_err)?;
        let parts: Vec<&std::ffi::OsStr> = member_path
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect();
        if parts.len() >= 2 {
            inventory
                .entities
                .insert(parts[1].to_string_lossy().into_owned());
        }
    }
    Ok(inventory)
}

/// Unpacks into `output`; member paths escaping `output` are refused by `tar`.
pub fn extract_archive(path: &Path, output: &Path) -> AppResult<()> {
    let archive_err = |e: std::io::Error| AppError::Archive(format!("{}: {}", path.display(), e));
    std::fs::create_dir_all(output).map_err(archive_err)?;
    let mut archive = tar::Archive::new(File::open(path).map_err(archive_err)?);
    archive.unpack(output).map_err(archive_err)
}

fn describe(path: &Path, inventory: &ArchiveInventory) {
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    log(LogLevel::Info, &format!("Inspecting {}...", name));
    log(
        LogLevel::Info,
        &format!(
            "  File size: {} bytes ({:.1} MB)",
            inventory.size_bytes,
            utils::megabytes(inventory.size_bytes)
        ),
    );
    if inventory.size_bytes == 0 {
        log(LogLevel::Warning, "  Tar file is empty (0 bytes)");
        return;
    }
    log(
        LogLevel::Info,
        &format!(
            "  Contents: {} total members ({} files, {} directories)",
            inventory.members, inventory.files, inventory.dirs
        ),
    );
    if !inventory.entities.is_empty() {
        let shown: Vec<&str> = inventory.entities.iter().take(5).map(String::as_str).collect();
        let more = if inventory.entities.len() > 5 { "..." } else { "" };
        log(
            LogLevel::Info,
            &format!(
                "  Companies: {} ({}{})",
                inventory.entities.len(),
                shown.join(", "),
                more
            ),
        );
    }
}

/// `unpack` subcommand. Returns the process exit code.
pub async fn run_unpack(options: UnpackOptions) -> AppResult<i32> {
    let output = match (&options.selection, &options.output) {
        (UnpackSelection::Inspect, _) => None,
        (_, Some(out)) => Some(out.clone()),
        (_, None) => {
            return Err(AppError::Argument(
                "--output is required unless using --inspect".into(),
            ))
        }
    };
    if !io::path_exists(&options.run_dir).await {
        log(
            LogLevel::Error,
            &format!("Run directory does not exist: {}", options.run_dir.display()),
        );
        return Err(AppError::Argument(format!(
            "Run directory does not exist: {}",
            options.run_dir.display()
        )));
    }

    let batch = match options.selection {
        UnpackSelection::Batch(n) => Some(n),
        _ => None,
    };
    let archives = find_batch_archives(&options.run_dir, batch).await?;
    if archives.is_empty() {
        log(
            LogLevel::Warning,
            &format!(
                "No batch archive files found in {}",
                options.run_dir.display()
            ),
        );
        return Ok(config::EXIT_SUCCESS);
    }
    log(
        LogLevel::Info,
        &format!("Found {} archive file(s)", archives.len()),
    );

    let mut failed = 0usize;
    match output {
        None => {
            for (_, path) in archives {
                let probe = path.clone();
                match utils::run_blocking(move || inspect_archive(&probe)).await {
                    Ok(inventory) => describe(&path, &inventory),
                    Err(e) => {
                        failed += 1;
                        log(LogLevel::Error, &format!("Failed to inspect: {}", e));
                    }
                }
            }
        }
        Some(out) => {
            let mut extracted = 0usize;
            for (number, path) in archives {
                log(LogLevel::Info, &format!("Extracting batch {}...", number));
                let target = out.clone();
                match utils::run_blocking(move || extract_archive(&path, &target)).await {
                    Ok(()) => extracted += 1,
                    Err(e) => {
                        failed += 1;
                        log(LogLevel::Error, &format!("Failed to extract: {}", e));
                    }
                }
            }
            log(
                LogLevel::Step,
                &format!(
                    "Extraction Summary: {} extracted, {} failed, output {}",
                    extracted,
                    failed,
                    out.display()
                ),
            );
        }
    }

    Ok(if failed == 0 {
        config::EXIT_SUCCESS
    } else {
        config::EXIT_PARTIAL_FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::archiver::{BatchArchiver, TarArchiver};
    use tempfile::TempDir;

    async fn two_batches(tmp: &TempDir) -> PathBuf {
        let data = tmp.path().join("data");
        for entity in ["MSFT", "AAPL", "IBM"] {
            let dir = data.join(entity).join("2024").join("10-K");
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("acc.html"), entity).unwrap();
        }
        let mut archiver = TarArchiver::create(&data, &tmp.path().join("runs"), "data", "r1")
            .await
            .unwrap();
        archiver
            .archive_batch(&["MSFT".to_string(), "AAPL".to_string()])
            .await
            .unwrap();
        archiver.archive_batch(&["IBM".to_string()]).await.unwrap();
        archiver.run_dir().to_path_buf()
    }

    #[tokio::test]
    async fn finds_archives_in_batch_order() {
        let tmp = TempDir::new().unwrap();
        let run_dir = two_batches(&tmp).await;
        std::fs::write(run_dir.join("notes.txt"), "x").unwrap();

        let all = find_batch_archives(&run_dir, None).await.unwrap();
        assert_eq!(
            all.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            vec![1, 2]
        );
        let second = find_batch_archives(&run_dir, Some(2)).await.unwrap();
        assert_eq!(second.len(), 1);
        assert!(second[0].1.ends_with("data_2.tar"));
    }

    #[tokio::test]
    async fn inspects_members_and_entities() {
        let tmp = TempDir::new().unwrap();
        let run_dir = two_batches(&tmp).await;

        let inventory = inspect_archive(&run_dir.join("data_1.tar")).unwrap();
        assert_eq!(inventory.files, 2);
        assert!(inventory.dirs >= 2);
        assert_eq!(
            inventory.entities.iter().cloned().collect::<Vec<_>>(),
            vec!["AAPL".to_string(), "MSFT".to_string()]
        );
    }

    #[tokio::test]
    async fn extracts_all_batches_into_output() {
        let tmp = TempDir::new().unwrap();
        let run_dir = two_batches(&tmp).await;
        let out = tmp.path().join("restored");

        let code = run_unpack(UnpackOptions {
            run_dir,
            selection: UnpackSelection::All,
            output: Some(out.clone()),
        })
        .await
        .unwrap();

        assert_eq!(code, config::EXIT_SUCCESS);
        for entity in ["MSFT", "AAPL", "IBM"] {
            let restored = out.join("data").join(entity).join("2024/10-K/acc.html");
            assert_eq!(std::fs::read_to_string(restored).unwrap(), entity);
        }
    }

    #[tokio::test]
    async fn extraction_requires_output() {
        let tmp = TempDir::new().unwrap();
        let res = run_unpack(UnpackOptions {
            run_dir: tmp.path().to_path_buf(),
            selection: UnpackSelection::Batch(1),
            output: None,
        })
        .await;
        assert!(matches!(res, Err(AppError::Argument(_))));
    }
}
