// src/repos/changes.rs

//! Translation of a commit-pair diff into index mutations.
//!
//! Filtering happens in two stages. The first admits any `*/*.sh` at one
//! level of nesting, because an edit to a sibling script must re-ingest
//! the recipe next to it. The second stage drops deletes of non-recipe
//! files and rewrites updates of non-recipe files to the `lure.sh` in the
//! same directory.

use crate::error::Result;
use git2::{Delta, DiffFindOptions, Oid, Repository};
use glob::{MatchOptions, Pattern};
use std::path::{Path, PathBuf};

pub const RECIPE_NAME: &str = "lure.sh";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Delete,
    Update,
}

/// One index mutation derived from the diff, in patch order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub kind: ActionKind,
    pub path: PathBuf,
}

impl Action {
    fn delete(path: &Path) -> Self {
        Self {
            kind: ActionKind::Delete,
            path: path.to_path_buf(),
        }
    }

    fn update(path: &Path) -> Self {
        Self {
            kind: ActionKind::Update,
            path: path.to_path_buf(),
        }
    }
}

/// Compute the ordered action list for the changes between two commits
pub fn compute(repo: &Repository, old: Oid, new: Oid) -> Result<Vec<Action>> {
    let old_tree = repo.find_commit(old)?.tree()?;
    let new_tree = repo.find_commit(new)?.tree()?;

    let mut diff = repo.diff_tree_to_tree(Some(&old_tree), Some(&new_tree), None)?;
    diff.find_similar(Some(DiffFindOptions::new().renames(true)))?;

    let mut actions = Vec::new();
    for delta in diff.deltas() {
        let from = delta.old_file().path();
        let to = delta.new_file().path();

        if !is_candidate(from, to) {
            continue;
        }

        match delta.status() {
            Delta::Deleted => {
                if let Some(from) = from {
                    actions.push(Action::delete(from));
                }
            }
            Delta::Added | Delta::Copied => {
                if let Some(to) = to {
                    actions.push(Action::update(to));
                }
            }
            Delta::Renamed => {
                if let (Some(from), Some(to)) = (from, to) {
                    actions.push(Action::delete(from));
                    actions.push(Action::update(to));
                }
            }
            Delta::Modified | Delta::Typechange => {
                if let (Some(from), Some(to)) = (from, to) {
                    if from != to {
                        actions.push(Action::delete(from));
                        actions.push(Action::update(to));
                    } else {
                        actions.push(Action::update(to));
                    }
                }
            }
            _ => {}
        }
    }

    Ok(refine(actions))
}

/// First-stage filter: one directory of nesting, `.sh` extension
fn is_candidate(from: Option<&Path>, to: Option<&Path>) -> bool {
    let path = match to.or(from) {
        Some(path) => path,
        None => return false,
    };

    let options = MatchOptions {
        require_literal_separator: true,
        ..MatchOptions::new()
    };

    // The pattern is fixed and valid
    Pattern::new("*/*.sh")
        .map(|pattern| pattern.matches_path_with(path, options))
        .unwrap_or(false)
}

/// Second-stage filter: only `lure.sh` is a recipe. Sibling-script edits
/// become updates of the adjacent recipe; sibling-script deletes are
/// dropped.
fn refine(actions: Vec<Action>) -> Vec<Action> {
    actions
        .into_iter()
        .filter_map(|action| {
            let is_recipe = action
                .path
                .file_name()
                .is_some_and(|name| name == RECIPE_NAME);

            match action.kind {
                ActionKind::Delete if is_recipe => Some(action),
                ActionKind::Delete => None,
                ActionKind::Update if is_recipe => Some(action),
                ActionKind::Update => {
                    let dir = action.path.parent()?;
                    Some(Action::update(&dir.join(RECIPE_NAME)))
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_filter_one_level_only() {
        assert!(is_candidate(None, Some(Path::new("foo/lure.sh"))));
        assert!(is_candidate(None, Some(Path::new("foo/other.sh"))));
        assert!(!is_candidate(None, Some(Path::new("lure.sh"))));
        assert!(!is_candidate(None, Some(Path::new("a/b/lure.sh"))));
        assert!(!is_candidate(None, Some(Path::new("foo/readme.md"))));
    }

    #[test]
    fn test_candidate_prefers_new_path() {
        // A rename out of a matching path still qualifies through `to`
        assert!(is_candidate(
            Some(Path::new("foo/lure.sh")),
            Some(Path::new("bar/lure.sh"))
        ));
    }

    #[test]
    fn test_refine_drops_non_recipe_deletes() {
        let refined = refine(vec![Action::delete(Path::new("foo/helper.sh"))]);
        assert!(refined.is_empty());
    }

    #[test]
    fn test_refine_rewrites_non_recipe_updates() {
        let refined = refine(vec![Action::update(Path::new("foo/helper.sh"))]);
        assert_eq!(refined, vec![Action::update(Path::new("foo/lure.sh"))]);
    }

    #[test]
    fn test_refine_keeps_recipe_actions() {
        let actions = vec![
            Action::delete(Path::new("foo/lure.sh")),
            Action::update(Path::new("bar/lure.sh")),
        ];
        assert_eq!(refine(actions.clone()), actions);
    }
}
