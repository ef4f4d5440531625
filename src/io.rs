use crate::config;
use crate::error::{AppError, AppResult};
use crate::logging::{log, LogLevel};
use crate::model::entity::{CompanyRecord, Entity};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

/// Keeps a storage path component on one directory level.
pub fn clean_path_component<S: AsRef<str>>(name: S) -> String {
    let name_ref = name.as_ref().trim();
    if name_ref.is_empty() {
        return "invalid_empty_name".to_string();
    }
    match name_ref {
        "." | ".." => name_ref.replace('.', "_"),
        _ => config::PATH_SEPARATOR_RE
            .replace_all(name_ref, "_")
            .into_owned(),
    }
}

/// Rejects identifiers that cannot name their own directory under the data root.
pub fn check_entity_id(id: &str) -> AppResult<()> {
    match id.trim() {
        "" => Err(AppError::Argument("Empty company identifier".into())),
        "." | ".." => Err(AppError::Argument(format!(
            "Company identifier '{}' is not a valid directory name",
            id
        ))),
        _ => Ok(()),
    }
}

/// Every identifier is valid and maps to a distinct storage directory.
pub fn check_entity_ids(entities: &[Entity]) -> AppResult<()> {
    let mut dirs = HashSet::with_capacity(entities.len());
    for entity in entities {
        check_entity_id(&entity.identifier)?;
        if !dirs.insert(clean_path_component(&entity.identifier)) {
            return Err(AppError::Argument(format!(
                "Company identifier '{}' appears more than once",
                entity.identifier
            )));
        }
    }
    Ok(())
}

pub fn map_io_error(error: std::io::Error, path: &Path) -> AppError {
    AppError::Io(format!("I/O error at path '{}': {}", path.display(), error))
}

pub async fn ensure_dir(dir: &Path) -> AppResult<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| map_io_error(e, dir))
}

pub async fn path_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// Sibling of `fpath` that receives data before it is renamed into place.
pub fn partial_path(fpath: &Path) -> PathBuf {
    let mut name = fpath.as_os_str().to_os_string();
    name.push(".");
    name.push(config::PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Writes `data` to `<fpath>.partial` and renames it to `fpath`, so `fpath` only
/// ever holds a complete body. A stale partial file is overwritten.
pub async fn write_file_async(fpath: &Path, data: &[u8]) -> AppResult<()> {
    let staging = partial_path(fpath);
    let result = async {
        let mut file = File::create(&staging)
            .await
            .map_err(|e| map_io_error(e, &staging))?;
        file.write_all(data)
            .await
            .map_err(|e| map_io_error(e, &staging))?;
        file.sync_all()
            .await
            .map_err(|e| map_io_error(e, &staging))?;
        drop(file);
        fs::rename(&staging, fpath)
            .await
            .map_err(|e| map_io_error(e, fpath))
    }
    .await;

    if result.is_err() && path_exists(&staging).await {
        let _ = fs::remove_file(&staging).await;
    }
    result
}

/// Removes a directory tree; a missing tree is not an error.
pub async fn remove_tree(dir: &Path) -> AppResult<bool> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(map_io_error(e, dir)),
    }
}

/// Loads a company list, dropping rows without a ticker and repeated tickers.
pub async fn load_entities(path: &Path) -> AppResult<Vec<Entity>> {
    let bytes = fs::read(path).await.map_err(|e| {
        AppError::Argument(format!("Cannot read company list '{}': {}", path.display(), e))
    })?;
    let records: Vec<CompanyRecord> = serde_json::from_slice(&bytes).map_err(|e| {
        AppError::Argument(format!("Invalid JSON in '{}': {}", path.display(), e))
    })?;

    let mut seen = HashSet::new();
    let mut missing_ticker = 0usize;
    let mut entities = Vec::with_capacity(records.len());
    for record in records {
        match record.into_entity() {
            Some(entity) => {
                check_entity_id(&entity.identifier)?;
                if seen.insert(entity.identifier.clone()) {
                    entities.push(entity);
                } else {
                    log(
                        LogLevel::Warning,
                        &format!("Duplicate ticker '{}' ignored.", entity.identifier),
                    );
                }
            }
            None => missing_ticker += 1,
        }
    }
    if missing_ticker > 0 {
        log(
            LogLevel::Warning,
            &format!(
                "Skipped {} company entries with missing ticker information.",
                missing_ticker
            ),
        );
    }
    Ok(entities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn path_component_never_contains_separators() {
        assert_eq!(clean_path_component("10-K"), "10-K");
        assert_eq!(clean_path_component("10-K/A"), "10-K_A");
        assert_eq!(clean_path_component("  "), "invalid_empty_name");
    }

    #[tokio::test]
    async fn load_entities_dedups_and_skips_missing_tickers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("companies.json");
        std::fs::write(
            &path,
            r#"[
                {"Ticker": "MSFT", "Company Name": "Microsoft"},
                {"Ticker": "", "Company Name": "Blank"},
                {"Ticker": "MSFT", "Company Name": "Microsoft again"},
                {"Ticker": "AAPL"}
            ]"#,
        )
        .unwrap();

        let entities = load_entities(&path).await.unwrap();
        assert_eq!(
            entities,
            vec![Entity::new("MSFT", "Microsoft"), Entity::new("AAPL", "Unknown")]
        );
    }

    #[tokio::test]
    async fn load_entities_reports_bad_json_as_argument_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            load_entities(&path).await,
            Err(AppError::Argument(_))
        ));
        assert!(matches!(
            load_entities(&dir.path().join("missing.json")).await,
            Err(AppError::Argument(_))
        ));
    }

    #[test]
    fn dot_components_stay_below_the_parent() {
        assert_eq!(clean_path_component("."), "_");
        assert_eq!(clean_path_component(".."), "__");
        assert_eq!(clean_path_component("BRK.B"), "BRK.B");
        assert!(check_entity_id("..").is_err());
        assert!(check_entity_id(" . ").is_err());
        assert!(check_entity_id("BRK.B").is_ok());
    }

    #[test]
    fn entity_ids_must_map_to_distinct_directories() {
        let ok = vec![Entity::new("MSFT", "Microsoft"), Entity::new("AAPL", "Apple")];
        assert!(check_entity_ids(&ok).is_ok());

        let repeated = vec![Entity::new("MSFT", "Microsoft"), Entity::new("MSFT", "Again")];
        assert!(matches!(check_entity_ids(&repeated), Err(AppError::Argument(_))));

        let clashing = vec![Entity::new("A/B", "Slash"), Entity::new("A_B", "Underscore")];
        assert!(check_entity_ids(&clashing).is_err());

        let parent = vec![Entity::new("..", "Parent")];
        assert!(matches!(check_entity_ids(&parent), Err(AppError::Argument(_))));
    }

    #[tokio::test]
    async fn load_entities_rejects_dot_tickers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("companies.json");
        std::fs::write(&path, r#"[{"Ticker": "MSFT"}, {"Ticker": ".."}]"#).unwrap();
        assert!(matches!(
            load_entities(&path).await,
            Err(AppError::Argument(_))
        ));
    }

    #[tokio::test]
    async fn write_replaces_stale_partial_and_leaves_no_staging_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("acc-1.html");
        std::fs::write(partial_path(&target), b"<html><bo").unwrap();

        write_file_async(&target, b"<html><body>full</body></html>")
            .await
            .unwrap();

        assert_eq!(
            std::fs::read(&target).unwrap(),
            b"<html><body>full</body></html>"
        );
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn failed_write_leaves_neither_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("missing_dir").join("acc-1.html");
        assert!(write_file_async(&target, b"x").await.is_err());
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn remove_tree_tolerates_missing_dir() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("AAPL");
        assert!(!remove_tree(&target).await.unwrap());
        std::fs::create_dir_all(target.join("2024")).unwrap();
        assert!(remove_tree(&target).await.unwrap());
        assert!(!target.exists());
    }
}
