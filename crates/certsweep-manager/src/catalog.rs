//! CT log catalog loading.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::store::CtLogRow;

/// One catalog file entry.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    /// Stable unique name.
    pub log_name: String,
    /// Base HTTPS URL.
    pub log_url: String,
    /// Operator category used to cluster worker threads.
    pub category: String,
    /// Known tree size at catalog authoring time; grown later via the
    /// admin endpoint.
    #[serde(default)]
    pub tree_size: i64,
    /// Whether workers should be assigned to this log.
    #[serde(default = "default_active")]
    pub active: bool,
}

const fn default_active() -> bool {
    true
}

/// Errors loading the catalog file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    /// The file could not be read.
    #[error("failed to read catalog {path}: {source}")]
    Io {
        /// Offending path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid JSON catalog.
    #[error("failed to parse catalog {path}: {source}")]
    Parse {
        /// Offending path.
        path: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// Reads a JSON array of [`CatalogEntry`] from `path`.
///
/// # Errors
///
/// Returns [`CatalogError`] when the file is unreadable or malformed.
pub fn load_catalog(path: &Path) -> Result<Vec<CatalogEntry>, CatalogError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| CatalogError::Parse {
        path: path.display().to_string(),
        source,
    })
}

impl From<CatalogEntry> for CtLogRow {
    fn from(entry: CatalogEntry) -> Self {
        Self {
            log_name: entry.log_name,
            log_url: entry.log_url,
            category: entry.category,
            tree_size: entry.tree_size,
            active: entry.active,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_catalog_parses_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"log_name": "argon2026", "log_url": "https://ct.example.com/argon2026/",
                  "category": "google", "tree_size": 123456}},
                {{"log_name": "nimbus2026", "log_url": "https://ct.example.org/nimbus2026/",
                  "category": "cloudflare"}}
            ]"#
        )
        .unwrap();

        let entries = load_catalog(file.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].tree_size, 123_456);
        assert!(entries[0].active);
        assert_eq!(entries[1].tree_size, 0);
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let err = load_catalog(Path::new("/nonexistent/catalog.json")).unwrap_err();
        assert!(matches!(err, CatalogError::Io { .. }));
    }

    #[test]
    fn test_malformed_json_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = load_catalog(file.path()).unwrap_err();
        assert!(matches!(err, CatalogError::Parse { .. }));
    }
}
