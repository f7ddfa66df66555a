//! Backend configuration.
//!
//! Only the shape lives here; loading from a file or environment is up to
//! the embedding application.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for a [`MemoryBackend`](crate::backends::MemoryBackend).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Instance id (default: a fresh UUID v4).
    pub id: Option<String>,
    /// Registry prefix (default: `mem://<id>`).
    pub prefix: Option<String>,
    /// Path separator.
    pub separator: char,
    pub read_only: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            id: None,
            prefix: None,
            separator: '/',
            read_only: false,
        }
    }
}

/// Configuration for a [`LocalBackend`](crate::backends::LocalBackend).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Jail every path below this directory.
    pub root: Option<PathBuf>,
    pub read_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_config_defaults() {
        let config: MemoryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, MemoryConfig::default());
        assert_eq!(config.separator, '/');
    }

    #[test]
    fn test_memory_config_from_json() {
        let config: MemoryConfig =
            serde_json::from_str(r#"{"id": "cache", "separator": "\\", "read_only": true}"#)
                .unwrap();
        assert_eq!(config.id.as_deref(), Some("cache"));
        assert_eq!(config.prefix, None);
        assert_eq!(config.separator, '\\');
        assert!(config.read_only);
    }

    #[test]
    fn test_local_config_from_json() {
        let config: LocalConfig = serde_json::from_str(r#"{"root": "/srv/files"}"#).unwrap();
        assert_eq!(config.root, Some(PathBuf::from("/srv/files")));
        assert!(!config.read_only);
    }
}
