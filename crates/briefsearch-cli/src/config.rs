//! Configuration and path resolution for the CLI.
//!
//! Handles finding the index data directory and loading engine settings:
//! - Custom: `--data-dir` flag or `$BRIEFSEARCH_DATA_DIR`
//! - Default: platform standard data location
//! - Settings: optional JSON file deserialized into [`SearchConfig`]

use anyhow::{anyhow, Context, Result};
use briefsearch_core::config::SearchConfig;
use briefsearch_core::storage::{LEXICAL_DB_FILENAME, SEMANTIC_DB_FILENAME};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Environment variable for a custom data directory
const DATA_DIR_ENV: &str = "BRIEFSEARCH_DATA_DIR";

/// Returns the data directory holding both index databases.
///
/// Search order:
/// 1. `--data-dir` flag
/// 2. `$BRIEFSEARCH_DATA_DIR` environment variable
/// 3. Platform standard location:
///    - macOS: `~/Library/Application Support/org.briefsearch.Briefsearch/`
///    - Linux: `~/.local/share/briefsearch/`
///    - Windows: `%APPDATA%\briefsearch\Briefsearch\data\`
pub fn get_data_dir(custom_dir: Option<&PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = custom_dir {
        return Ok(dir.clone());
    }

    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }

    ProjectDirs::from("org", "briefsearch", "Briefsearch")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| anyhow!("Could not determine data directory"))
}

/// Whether `data_dir` holds both index databases.
pub fn index_exists(data_dir: &Path) -> bool {
    data_dir.join(LEXICAL_DB_FILENAME).exists() && data_dir.join(SEMANTIC_DB_FILENAME).exists()
}

/// Loads engine settings from a JSON file, or the defaults when none is given.
///
/// Missing fields keep their default values.
pub fn load_search_config(path: Option<&PathBuf>) -> Result<SearchConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str::<SearchConfig>(&text)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        }
        None => SearchConfig::default(),
    };

    config
        .validate()
        .map_err(|e| anyhow!("{}", e))
        .context("Rejected search configuration")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_custom_data_dir() {
        let custom = PathBuf::from("/tmp/custom-data");
        let dir = get_data_dir(Some(&custom)).unwrap();
        assert_eq!(dir, custom);
    }

    #[test]
    fn test_index_exists() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!index_exists(dir.path()));

        std::fs::write(dir.path().join(LEXICAL_DB_FILENAME), b"").unwrap();
        assert!(!index_exists(dir.path()));

        std::fs::write(dir.path().join(SEMANTIC_DB_FILENAME), b"").unwrap();
        assert!(index_exists(dir.path()));
    }

    #[test]
    fn test_default_config() {
        let config = load_search_config(None).unwrap();
        assert_eq!(config, SearchConfig::default());
    }

    #[test]
    fn test_partial_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "rrf_k": 30, "channel_timeout_ms": 500 }}"#).unwrap();

        let config = load_search_config(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.rrf_k, 30);
        assert_eq!(config.channel_timeout_ms, 500);
        assert_eq!(config.default_top_k, SearchConfig::default().default_top_k);
    }

    #[test]
    fn test_invalid_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "candidate_multiplier": 0 }}"#).unwrap();

        let err = load_search_config(Some(&file.path().to_path_buf())).unwrap_err();
        assert!(format!("{:#}", err).contains("candidate_multiplier"));
    }
}
