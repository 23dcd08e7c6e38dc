// src/config.rs

//! Runtime configuration: store path, clone directory, repository list.
//!
//! Configuration file loading is handled by the consumer CLI; this module
//! only carries the values the index core needs, with defaults under
//! `/var/lib/lure` and an environment override for the repository list.

use crate::repos::Repo;
use std::path::PathBuf;

/// Environment variable holding the repository list as `name=url` pairs,
/// comma separated
pub const REPO_ENV: &str = "LURE_API_REPO";

#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the SQLite index store
    pub db_path: PathBuf,
    /// Directory holding one clone per configured repository
    pub repo_dir: PathBuf,
    /// Upstream repositories to index
    pub repos: Vec<Repo>,
}

impl Config {
    pub fn new(db_path: impl Into<PathBuf>, repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            repo_dir: repo_dir.into(),
            repos: repos_from_env(),
        }
    }

    /// Directory of the clone for a named repository
    pub fn clone_dir(&self, repo_name: &str) -> PathBuf {
        self.repo_dir.join(repo_name)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("/var/lib/lure/db", "/var/lib/lure/repo")
    }
}

/// Parse the repository list from [`REPO_ENV`]
///
/// Malformed entries (no `=`) are skipped.
pub fn repos_from_env() -> Vec<Repo> {
    let raw = match std::env::var(REPO_ENV) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    raw.split(',')
        .filter_map(|entry| {
            let (name, url) = entry.split_once('=')?;
            let (name, url) = (name.trim(), url.trim());
            if name.is_empty() || url.is_empty() {
                return None;
            }
            Some(Repo {
                name: name.to_string(),
                url: url.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_dir() {
        let config = Config::new("/tmp/db", "/tmp/repo");
        assert_eq!(config.clone_dir("default"), PathBuf::from("/tmp/repo/default"));
    }
}
