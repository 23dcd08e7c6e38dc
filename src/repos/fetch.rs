// src/repos/fetch.rs

//! Scheme-keyed fetching of upstream repositories.
//!
//! Repository URLs are promoted to a `git+` scheme before fetching; the
//! fetcher strips the prefix and hands the rest to libgit2. Existing
//! clones are updated by fetch + fast-forward only; a rewritten upstream
//! is an error rather than a silent reset.

use crate::error::{Error, Result};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{FetchOptions, Oid, Repository};
use std::path::Path;
use tracing::debug;

/// Result of updating an existing clone
pub struct FetchOutcome {
    pub old: Oid,
    pub new: Oid,
    pub up_to_date: bool,
}

/// Promote a URL to a `git+` scheme if it does not carry one already
pub fn ensure_git_scheme(url: &str) -> Result<String> {
    let (scheme, _) = url
        .split_once("://")
        .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;

    if scheme.starts_with("git+") {
        Ok(url.to_string())
    } else {
        Ok(format!("git+{url}"))
    }
}

/// Clone the repository behind a promoted URL into `dest`
pub fn get(url: &str, dest: &Path) -> Result<Repository> {
    let (scheme, _) = url
        .split_once("://")
        .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;

    match scheme.strip_prefix("git+") {
        Some(inner_scheme) => {
            let inner_url = url.replacen("git+", "", 1);
            debug!(url = %inner_url, scheme = inner_scheme, "cloning repository");
            let repo = RepoBuilder::new()
                .fetch_options(FetchOptions::new())
                .clone(&inner_url, dest)?;
            Ok(repo)
        }
        None => Err(Error::InvalidUrl(url.to_string())),
    }
}

/// Fetch `origin` and fast-forward the working tree.
///
/// Returns the old and new `HEAD` commits. A non-fast-forward upstream is
/// reported through `Err`; history rewrites need manual intervention.
pub fn fast_forward(repo: &Repository) -> Result<FetchOutcome> {
    let old = repo.head()?.peel_to_commit()?.id();

    let mut remote = repo.find_remote("origin")?;
    remote.fetch(&[] as &[&str], Some(&mut FetchOptions::new()), None)?;

    let fetch_head = repo.find_reference("FETCH_HEAD")?;
    let fetch_commit = repo.reference_to_annotated_commit(&fetch_head)?;
    let new = fetch_commit.id();

    if new == old {
        return Ok(FetchOutcome {
            old,
            new,
            up_to_date: true,
        });
    }

    let (analysis, _) = repo.merge_analysis(&[&fetch_commit])?;
    if analysis.is_up_to_date() {
        return Ok(FetchOutcome {
            old,
            new: old,
            up_to_date: true,
        });
    }

    if !analysis.is_fast_forward() {
        return Err(Error::Fetch {
            name: repo
                .workdir()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            reason: "upstream history is not a fast-forward".to_string(),
        });
    }

    let refname = repo
        .head()?
        .name()
        .map(str::to_string)
        .ok_or_else(|| Error::Fetch {
            name: String::new(),
            reason: "HEAD is not a named reference".to_string(),
        })?;

    let mut reference = repo.find_reference(&refname)?;
    reference.set_target(new, "fast-forward")?;
    repo.set_head(&refname)?;
    repo.checkout_head(Some(CheckoutBuilder::default().force()))?;

    Ok(FetchOutcome {
        old,
        new,
        up_to_date: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_git_scheme_promotes() {
        assert_eq!(
            ensure_git_scheme("https://example.com/repo").unwrap(),
            "git+https://example.com/repo"
        );
    }

    #[test]
    fn test_ensure_git_scheme_keeps_existing() {
        assert_eq!(
            ensure_git_scheme("git+https://example.com/repo").unwrap(),
            "git+https://example.com/repo"
        );
    }

    #[test]
    fn test_ensure_git_scheme_rejects_schemeless() {
        assert!(ensure_git_scheme("example.com/repo").is_err());
    }
}
