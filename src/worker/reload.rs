//! File-path resolution for announcements.
//!
//! Static paths come from the worker config and are expanded once. When
//! reloading is enabled, a separate YAML file holding a `file_paths` list
//! of glob patterns is re-read before every announcement.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{ProxyError, Result};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReloadFile {
    #[serde(default)]
    file_paths: Vec<String>,
}

/// Expand one glob pattern, failing on an invalid pattern or unreadable entry.
pub fn expand_pattern(pattern: &str) -> Result<Vec<String>> {
    let entries = glob::glob(pattern)
        .map_err(|e| ProxyError::config(format!("invalid pattern {:?}: {}", pattern, e)))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| ProxyError::config(format!("error retrieving files for {}: {}", pattern, e)))?;
        paths.push(path.to_string_lossy().into_owned());
    }
    Ok(paths)
}

/// Expand every pattern, skipping the ones that fail.
pub fn expand_patterns(patterns: &[String]) -> Vec<String> {
    let mut paths = Vec::new();
    for pattern in patterns {
        match expand_pattern(pattern) {
            Ok(found) => paths.extend(found),
            Err(e) => warn!("Skipping file pattern {}: {}", pattern, e),
        }
    }
    paths
}

/// Static paths first, then reloaded ones, keeping the first occurrence.
pub fn merge_file_paths(static_paths: &[String], reloaded: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    static_paths
        .iter()
        .chain(reloaded.iter())
        .filter(|p| seen.insert(p.as_str()))
        .cloned()
        .collect()
}

#[derive(Debug, Clone)]
pub struct ReloadSource {
    path: PathBuf,
}

impl ReloadSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the reload file and merge its expansion with `static_paths`.
    pub async fn resolve(&self, static_paths: &[String]) -> Result<Vec<String>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ProxyError::config(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        let reload: ReloadFile = if content.trim().is_empty() {
            ReloadFile::default()
        } else {
            serde_yaml::from_str(&content).map_err(|e| {
                ProxyError::config(format!("failed to parse {}: {}", self.path.display(), e))
            })?
        };

        let patterns = reload.file_paths;
        let expanded = tokio::task::spawn_blocking(move || expand_patterns(&patterns))
            .await
            .map_err(|e| ProxyError::config(format!("file expansion task failed: {}", e)))?;

        let merged = merge_file_paths(static_paths, &expanded);
        debug!("Resolved file paths: {}", merged.join(" | "));
        Ok(merged)
    }
}
