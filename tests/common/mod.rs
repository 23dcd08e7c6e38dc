// tests/common/mod.rs

//! Shared test utilities: temp stores and git-authored upstream fixtures.

#![allow(dead_code)]

use git2::{Repository, Signature};
use lure_index::{Config, Repo};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A scratch upstream repository that tests commit recipes into.
///
/// Keep the struct alive for the duration of the test; the temp
/// directory is removed on drop.
pub struct Upstream {
    pub dir: TempDir,
    pub repo: Repository,
}

impl Upstream {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        Self { dir, repo }
    }

    pub fn url(&self) -> String {
        format!("file://{}", self.dir.path().display())
    }

    /// Write (or remove, for `None`) files in the working tree and
    /// commit the result
    pub fn commit(&self, files: &[(&str, Option<&str>)], message: &str) {
        let workdir = self.repo.workdir().unwrap();
        let mut index = self.repo.index().unwrap();

        for (path, content) in files {
            let full = workdir.join(path);
            match content {
                Some(content) => {
                    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
                    std::fs::write(&full, content).unwrap();
                    index.add_path(Path::new(path)).unwrap();
                }
                None => {
                    std::fs::remove_file(&full).unwrap();
                    index.remove_path(Path::new(path)).unwrap();
                }
            }
        }

        index.write().unwrap();
        let tree_oid = index.write_tree().unwrap();
        let tree = self.repo.find_tree(tree_oid).unwrap();
        let signature = Signature::now("test", "test@example.com").unwrap();

        let parent = self
            .repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok());
        let parents: Vec<_> = parent.iter().collect();

        self.repo
            .commit(
                Some("HEAD"),
                &signature,
                &signature,
                message,
                &tree,
                &parents,
            )
            .unwrap();
    }
}

/// Workspace for sync tests: one upstream, a clone dir, and a store path
pub struct SyncFixture {
    pub upstream: Upstream,
    pub local: TempDir,
}

impl SyncFixture {
    pub fn new() -> Self {
        Self {
            upstream: Upstream::new(),
            local: tempfile::tempdir().unwrap(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.local.path().join("index.db")
    }

    pub fn config(&self) -> Config {
        let mut config = Config::new(self.db_path(), self.local.path().join("repo"));
        config.repos = vec![Repo {
            name: "default".to_string(),
            url: self.upstream.url(),
        }];
        config
    }
}

/// A recipe body with the usual required fields
pub fn recipe(name: &str, version: &str, extra: &str) -> String {
    format!("name={name}\nversion={version}\nrelease=1\n{extra}")
}
