// src/lib.rs

//! LURE repository index
//!
//! Keeps a searchable package index synchronized with a set of upstream
//! git repositories of build recipes.
//!
//! # Architecture
//!
//! - Sandbox: recipes are shell scripts, executed under restricted
//!   capabilities to extract their variable bindings
//! - Decoder: bindings are projected into [`db::models::Package`] records
//! - Store: records live in a single SQLite file with JSON columns for
//!   structured fields
//! - Sync: upstream changes are diffed commit-to-commit and applied as a
//!   minimal set of index mutations; a webhook endpoint debounces
//!   push events into sync cycles

pub mod config;
pub mod db;
pub mod decoder;
mod error;
pub mod repos;
pub mod sandbox;
pub mod server;
pub mod version;

pub use config::Config;
pub use db::models::Package;
pub use db::Database;
pub use decoder::{decode, resolve_overrides};
pub use error::{Error, Result};
pub use repos::{pull, Repo, SyncPolicy};
pub use sandbox::{Bindings, Parser, Sandbox, Value};
