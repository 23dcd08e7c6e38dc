// src/repos/mod.rs

//! Repository synchronization.
//!
//! Brings the local clone of each upstream repository up to date and
//! reconciles the index with the upstream state. Existing clones are
//! diffed commit-to-commit and only the changed recipes are re-evaluated;
//! fresh clones and rebuilt stores get a full scan.

pub mod changes;
pub mod fetch;

use crate::config::Config;
use crate::db::models::Package;
use crate::db::Database;
use crate::decoder::{decode, resolve_overrides};
use crate::error::{Error, Result};
use crate::sandbox::{Parser, Sandbox};
use crate::version;
use changes::ActionKind;
use git2::{Commit, Repository as GitRepository};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// An upstream repository to index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    pub name: String,
    pub url: String,
}

/// `lure-repo.toml` at the root of an upstream repository
#[derive(Debug, Clone, Deserialize)]
pub struct RepoConfig {
    pub repo: RepoInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoInfo {
    /// Minimum system version required to process this repository
    #[serde(default)]
    pub min_version: Option<String>,
}

/// Failure containment for a sync cycle.
///
/// The historical behavior aborts the whole cycle when one repository
/// fails; keeping the remaining repositories going is opt-in.
#[derive(Debug, Clone, Copy)]
pub struct SyncPolicy {
    pub abort_cycle_on_repo_failure: bool,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            abort_cycle_on_repo_failure: true,
        }
    }
}

/// Pull every configured repository and reconcile the index.
///
/// A repository without a valid clone is cloned fresh and fully ingested.
/// An existing clone is fetched and fast-forwarded; if the index store
/// was present at startup only the changed recipes are processed,
/// otherwise the repository is fully re-ingested.
pub fn pull(ctx: &CancellationToken, db: &Database, config: &Config, policy: &SyncPolicy) -> Result<()> {
    let mut first_err = None;

    for repo in &config.repos {
        info!(name = %repo.name, "pulling repository");
        match pull_repo(ctx, db, config, repo) {
            Ok(()) => {}
            Err(e) if policy.abort_cycle_on_repo_failure => return Err(e),
            Err(e) => {
                warn!(name = %repo.name, error = %e, "repository sync failed; continuing");
                first_err.get_or_insert(e);
            }
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn pull_repo(ctx: &CancellationToken, db: &Database, config: &Config, repo: &Repo) -> Result<()> {
    let repo_dir = config.clone_dir(&repo.name);

    if repo_dir.join(".git").is_dir() {
        let git_repo = GitRepository::open(&repo_dir)?;
        let outcome = fetch::fast_forward(&git_repo).map_err(|e| fetch_error(repo, e))?;

        if outcome.up_to_date {
            info!(name = %repo.name, "repository up to date");
        }

        // An up-to-date clone still needs ingesting when the store did
        // not survive startup
        if !outcome.up_to_date || !db.was_present() {
            if db.was_present() {
                process_changes(ctx, db, repo, &git_repo, outcome.old, outcome.new)?;
            } else {
                process_full(ctx, db, repo, &repo_dir)?;
            }
        }
    } else {
        if repo_dir.exists() {
            fs::remove_dir_all(&repo_dir)?;
        }
        create_dir_0755(&repo_dir)?;

        let url = fetch::ensure_git_scheme(&repo.url)?;
        fetch::get(&url, &repo_dir).map_err(|e| fetch_error(repo, e))?;

        process_full(ctx, db, repo, &repo_dir)?;
    }

    check_repo_config(repo, &repo_dir)
}

fn fetch_error(repo: &Repo, err: Error) -> Error {
    match err {
        Error::Git(e) => Error::Fetch {
            name: repo.name.clone(),
            reason: e.message().to_string(),
        },
        other => other,
    }
}

fn create_dir_0755(path: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o755).create(path)?;
    Ok(())
}

/// Apply the minimal mutation set for the changes between two commits
fn process_changes(
    ctx: &CancellationToken,
    db: &Database,
    repo: &Repo,
    git_repo: &GitRepository,
    old: git2::Oid,
    new: git2::Oid,
) -> Result<()> {
    let actions = changes::compute(git_repo, old, new)?;
    let root = git_repo
        .workdir()
        .ok_or_else(|| Error::Fetch {
            name: repo.name.clone(),
            reason: "clone has no working tree".to_string(),
        })?
        .to_path_buf();

    let parser = Parser::new();
    let old_commit = git_repo.find_commit(old)?;
    let new_commit = git_repo.find_commit(new)?;

    for action in actions {
        let mut sandbox = Sandbox::new(&root)?;

        match action.kind {
            ActionKind::Delete => {
                // Reading from the old commit can fail for exotic
                // history; skip the action rather than abort the repo
                let Some(source) = read_blob(git_repo, &old_commit, &action.path)? else {
                    continue;
                };

                let bindings = sandbox.evaluate(ctx, &parser, &action.path, &source)?;
                let mut pkg = Package::default();
                decode(&bindings, &mut pkg)?;

                Package::delete(
                    db,
                    "name = ?1 AND repository = ?2",
                    &[&pkg.name, &repo.name],
                )?;
            }
            ActionKind::Update => {
                let Some(source) = read_blob(git_repo, &new_commit, &action.path)? else {
                    continue;
                };

                let bindings = sandbox.evaluate(ctx, &parser, &action.path, &source)?;
                let mut pkg = Package {
                    repository: repo.name.clone(),
                    ..Default::default()
                };
                decode(&bindings, &mut pkg)?;
                resolve_overrides(&bindings, &mut pkg);
                pkg.insert(db)?;
            }
        }
    }

    Ok(())
}

/// Read a file's content at a specific commit
fn read_blob(
    git_repo: &GitRepository,
    commit: &Commit,
    path: &Path,
) -> Result<Option<String>> {
    let entry = match commit.tree()?.get_path(path) {
        Ok(entry) => entry,
        Err(_) => return Ok(None),
    };

    let object = entry.to_object(git_repo)?;
    match object.peel_to_blob() {
        Ok(blob) => Ok(Some(String::from_utf8_lossy(blob.content()).into_owned())),
        Err(_) => Ok(None),
    }
}

/// Scan every recipe at one level of nesting and upsert it
fn process_full(
    ctx: &CancellationToken,
    db: &Database,
    repo: &Repo,
    repo_dir: &Path,
) -> Result<()> {
    let pattern = repo_dir.join("*").join(changes::RECIPE_NAME);
    let parser = Parser::new();

    for entry in glob::glob(&pattern.to_string_lossy())? {
        let path = entry.map_err(|e| Error::Io(e.into_error()))?;
        let source = fs::read_to_string(&path)?;

        let mut sandbox = Sandbox::new(repo_dir)?;
        let bindings = sandbox.evaluate(ctx, &parser, &path, &source)?;

        let mut pkg = Package {
            repository: repo.name.clone(),
            ..Default::default()
        };
        decode(&bindings, &mut pkg)?;
        resolve_overrides(&bindings, &mut pkg);
        pkg.insert(db)?;
    }

    Ok(())
}

/// Validate the repository manifest and warn on version skew.
///
/// A missing manifest is a warning, not an error; other repositories
/// must keep syncing.
fn check_repo_config(repo: &Repo, repo_dir: &Path) -> Result<()> {
    let manifest = repo_dir.join("lure-repo.toml");
    let content = match fs::read_to_string(&manifest) {
        Ok(content) => content,
        Err(_) => {
            warn!(
                repo = %repo.name,
                "repository does not appear to be a valid LURE repo"
            );
            return Ok(());
        }
    };

    let repo_config: RepoConfig = toml::from_str(&content)?;

    if let Some(min_version) = &repo_config.repo.min_version {
        if version::compare(version::current(), min_version) == Ordering::Less {
            warn!(
                repo = %repo.name,
                min_version = %min_version,
                "repository requires a newer version; update if something doesn't work"
            );
        }
    }

    Ok(())
}
