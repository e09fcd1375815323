use crate::config::ConfigError;
use anyhow::Result;
use glob::glob;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Configuration for shard discovery behavior
#[derive(Debug, Clone, Default)]
pub struct DiscoveryConfig {
    /// Whether to fail on the first unusable path or skip it with a warning
    pub fail_fast: bool,
}

/// Result of shard path validation
#[derive(Debug, Clone)]
pub struct FileValidation {
    pub path: PathBuf,
    pub error: Option<String>,
}

fn is_pattern(arg: &str) -> bool {
    arg.contains(['*', '?', '['])
}

/// Expand one CLI argument: glob patterns to their sorted matches, plain paths as-is
pub fn expand_pattern(arg: &str) -> Result<Vec<PathBuf>, ConfigError> {
    if !is_pattern(arg) {
        return Ok(vec![PathBuf::from(arg)]);
    }
    let paths = glob(arg).map_err(|e| ConfigError::InvalidPattern {
        pattern: arg.to_string(),
        reason: e.to_string(),
    })?;
    let mut matched = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) => matched.push(path),
            // WHY: an unreadable directory under the pattern shouldn't hide the rest
            Err(e) => warn!("Skipping unreadable match for {}: {}", arg, e),
        }
    }
    matched.sort();
    debug!("Pattern {} matched {} paths", arg, matched.len());
    Ok(matched)
}

async fn validate_file(path: PathBuf) -> FileValidation {
    let error = match fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => None,
        Ok(_) => Some(format!("Path is not a file: {}", path.display())),
        Err(e) => Some(format!("Cannot access file {}: {}", path.display(), e)),
    };
    FileValidation { path, error }
}

/// Expand and validate shard arguments, keeping their order and dropping repeats.
///
/// With `fail_fast` the first unusable path is an error; otherwise it is skipped with a
/// warning. Ending up with no shards is always an error.
pub async fn collect_shards<S: AsRef<str>>(args: &[S], config: DiscoveryConfig) -> Result<Vec<PathBuf>> {
    let mut shards: Vec<PathBuf> = Vec::new();
    for arg in args {
        for path in expand_pattern(arg.as_ref())? {
            if shards.contains(&path) {
                continue;
            }
            let validation = validate_file(path).await;
            match validation.error {
                None => shards.push(validation.path),
                Some(error) if config.fail_fast => return Err(anyhow::anyhow!(error)),
                Some(error) => warn!("{}", error),
            }
        }
    }
    if shards.is_empty() {
        return Err(ConfigError::NoShards.into());
    }
    info!("Found {} shards", shards.len());
    Ok(shards)
}

/// Convenience for callers that only care about one directory of shards
pub async fn shards_in_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/*.tsv*", dir.display());
    collect_shards(&[pattern], DiscoveryConfig::default()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_file(dir: &Path, name: &str) -> PathBuf {
        let file_path = dir.join(name);
        if let Some(parent) = file_path.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(&file_path, "language\n").await.unwrap();
        file_path
    }

    #[tokio::test]
    async fn test_glob_matches_are_sorted() {
        let temp_dir = TempDir::new().unwrap();
        let b = create_test_file(temp_dir.path(), "wit-00001.tsv").await;
        let a = create_test_file(temp_dir.path(), "wit-00000.tsv.gz").await;
        create_test_file(temp_dir.path(), "notes.txt").await;

        let pattern = format!("{}/wit-*", temp_dir.path().display());
        let shards = collect_shards(&[pattern], DiscoveryConfig::default()).await.unwrap();
        assert_eq!(shards, vec![a, b]);
    }

    #[tokio::test]
    async fn test_plain_paths_keep_argument_order() {
        let temp_dir = TempDir::new().unwrap();
        let a = create_test_file(temp_dir.path(), "a.tsv").await;
        let b = create_test_file(temp_dir.path(), "b.tsv").await;

        let args = [b.display().to_string(), a.display().to_string(), b.display().to_string()];
        let shards = collect_shards(&args, DiscoveryConfig::default()).await.unwrap();
        assert_eq!(shards, vec![b, a]);
    }

    #[tokio::test]
    async fn test_missing_path_fail_fast() {
        let temp_dir = TempDir::new().unwrap();
        let good = create_test_file(temp_dir.path(), "a.tsv").await;
        let missing = temp_dir.path().join("missing.tsv");
        let args = [good.display().to_string(), missing.display().to_string()];

        let config = DiscoveryConfig { fail_fast: true };
        assert!(collect_shards(&args, config).await.is_err());

        let shards = collect_shards(&args, DiscoveryConfig::default()).await.unwrap();
        assert_eq!(shards, vec![good]);
    }

    #[tokio::test]
    async fn test_no_shards_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = shards_in_dir(temp_dir.path()).await.unwrap_err();
        assert_eq!(err.downcast_ref::<ConfigError>(), Some(&ConfigError::NoShards));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            expand_pattern("[unclosed*"),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }
}
