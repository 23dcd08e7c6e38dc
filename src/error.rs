// src/error.rs

//! Crate-wide error type and result alias.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Repository URL could not be parsed or has no scheme
    #[error("invalid repository URL: {0}")]
    InvalidUrl(String),

    /// Cloning or fetching an upstream repository failed
    #[error("fetch failed for repository {name}: {reason}")]
    Fetch { name: String, reason: String },

    /// A recipe script could not be parsed
    #[error("parse error in {file} at line {line}: {reason}")]
    RecipeParse {
        file: String,
        line: usize,
        reason: String,
    },

    /// A recipe script failed at runtime
    #[error("execution error in {file}: {reason}")]
    RecipeExec { file: String, reason: String },

    /// A path escaped the sandbox root
    #[error("permission denied: {path:?} is outside the sandbox root")]
    SandboxEscape { path: PathBuf },

    /// Recipe bindings could not be projected into a package record
    #[error("decode error: {0}")]
    Decode(String),

    /// Repository manifest could not be decoded
    #[error("invalid repository manifest: {0}")]
    RepoConfig(#[from] toml::de::Error),

    #[error(transparent)]
    Store(#[from] rusqlite::Error),

    #[error(transparent)]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Glob(#[from] glob::PatternError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Execution error helper used by the sandbox
    pub fn exec(file: &str, reason: impl Into<String>) -> Self {
        Error::RecipeExec {
            file: file.to_string(),
            reason: reason.into(),
        }
    }
}
