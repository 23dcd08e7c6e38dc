// src/db/mod.rs

//! SQLite index store.
//!
//! One file, one `pkgs` table with JSON columns for structured fields, and
//! a `db_version` table carrying the schema version. A version
//! mismatch destroys and re-creates the store; the sync engine notices the
//! store was rebuilt and runs a full reingest.

pub mod models;

use crate::error::Result;
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Current schema version
pub const CURRENT_VERSION: i32 = 1;

/// Handle to the index store.
///
/// The handle has two lifecycle states, open and closed. Operations on a
/// closed handle transparently re-open the underlying connection, so a
/// handle can be shared for the lifetime of the process.
pub struct Database {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
    was_present: bool,
}

impl Database {
    /// Open or create the store at `path`.
    ///
    /// Creates the schema if absent. If the stored schema version does not
    /// match [`CURRENT_VERSION`], the file is deleted and re-created empty;
    /// callers are expected to re-ingest afterwards.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut was_present = path.exists();

        let mut conn = open_connection(&path)?;
        create_schema(&conn)?;

        match stored_version(&conn) {
            None => {
                debug!("recording schema version {}", CURRENT_VERSION);
                set_version(&conn, CURRENT_VERSION)?;
            }
            Some(ver) if ver != CURRENT_VERSION => {
                warn!(
                    stored = ver,
                    expected = CURRENT_VERSION,
                    "schema version mismatch; rebuilding store"
                );
                drop(conn);
                std::fs::remove_file(&path)?;
                conn = open_connection(&path)?;
                create_schema(&conn)?;
                set_version(&conn, CURRENT_VERSION)?;
                // A rebuilt store is empty regardless of what was on disk
                was_present = false;
            }
            Some(_) => {}
        }

        Ok(Self {
            path,
            conn: Mutex::new(Some(conn)),
            was_present,
        })
    }

    /// Whether a usable store existed on disk when this handle was opened.
    ///
    /// False for fresh stores and for stores destroyed by a schema rebuild.
    pub fn was_present(&self) -> bool {
        self.was_present
    }

    /// True if the `pkgs` table has no rows or cannot be read
    pub fn is_empty(&self) -> bool {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT count(1) FROM pkgs", [], |row| row.get(0))?;
            Ok(count)
        })
        .map(|count| count == 0)
        .unwrap_or(true)
    }

    /// Release the underlying connection; idempotent
    pub fn close(&self) {
        let mut guard = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        *guard = None;
    }

    /// Run `f` with the store connection, re-opening it if closed
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        if guard.is_none() {
            debug!(path = ?self.path, "re-opening store");
            let conn = open_connection(&self.path)?;
            create_schema(&conn)?;
            if stored_version(&conn).is_none() {
                set_version(&conn, CURRENT_VERSION)?;
            }
            *guard = Some(conn);
        }

        // Guard holds Some by construction
        f(guard.as_ref().unwrap())
    }

    /// Stored schema version, if any
    pub fn version(&self) -> Option<i32> {
        self.with_conn(|conn| Ok(stored_version(conn))).ok().flatten()
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    register_functions(&conn)?;
    Ok(conn)
}

fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pkgs (
            name          TEXT NOT NULL,
            repository    TEXT NOT NULL,
            version       TEXT NOT NULL,
            release       INT  NOT NULL,
            epoch         INT,
            description   TEXT CHECK(description = 'null' OR (JSON_VALID(description) AND JSON_TYPE(description) = 'object')),
            homepage      TEXT CHECK(homepage = 'null' OR (JSON_VALID(homepage) AND JSON_TYPE(homepage) = 'object')),
            maintainer    TEXT CHECK(maintainer = 'null' OR (JSON_VALID(maintainer) AND JSON_TYPE(maintainer) = 'object')),
            architectures TEXT CHECK(architectures = 'null' OR (JSON_VALID(architectures) AND JSON_TYPE(architectures) = 'array')),
            licenses      TEXT CHECK(licenses = 'null' OR (JSON_VALID(licenses) AND JSON_TYPE(licenses) = 'array')),
            provides      TEXT CHECK(provides = 'null' OR (JSON_VALID(provides) AND JSON_TYPE(provides) = 'array')),
            conflicts     TEXT CHECK(conflicts = 'null' OR (JSON_VALID(conflicts) AND JSON_TYPE(conflicts) = 'array')),
            replaces      TEXT CHECK(replaces = 'null' OR (JSON_VALID(replaces) AND JSON_TYPE(replaces) = 'array')),
            depends       TEXT CHECK(depends = 'null' OR (JSON_VALID(depends) AND JSON_TYPE(depends) = 'object')),
            builddepends  TEXT CHECK(builddepends = 'null' OR (JSON_VALID(builddepends) AND JSON_TYPE(builddepends) = 'object')),
            UNIQUE(name, repository)
        );

        CREATE TABLE IF NOT EXISTS db_version (
            version INT NOT NULL
        );
        ",
    )?;
    Ok(())
}

fn stored_version(conn: &Connection) -> Option<i32> {
    conn.query_row("SELECT version FROM db_version LIMIT 1", [], |row| {
        row.get(0)
    })
    .ok()
}

fn set_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO db_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Register the `contains_array(doc, item)` scalar function.
///
/// `doc` must be the JSON serialization of an array of strings and `item`
/// a string; the function returns whether the array contains the item.
/// Non-string arguments are a type error.
fn register_functions(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "contains_array",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let doc = ctx.get_raw(0).as_str().map_err(|_| type_error())?;
            let item = ctx.get_raw(1).as_str().map_err(|_| type_error())?;

            let array: Vec<String> = serde_json::from_str(doc)
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;

            Ok(array.iter().any(|entry| entry == item))
        },
    )?;
    Ok(())
}

fn type_error() -> rusqlite::Error {
    rusqlite::Error::UserFunctionError(
        "both arguments to contains_array must be strings".into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("index.db")).unwrap();
        assert!(!db.was_present());
        assert!(db.is_empty());
        assert_eq!(db.version(), Some(CURRENT_VERSION));
    }

    #[test]
    fn test_reopen_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("index.db")).unwrap();
        db.close();
        // Operations on a closed handle re-open transparently
        assert!(db.is_empty());
    }

    #[test]
    fn test_version_mismatch_rebuilds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");

        {
            let conn = Connection::open(&path).unwrap();
            create_schema(&conn).unwrap();
            set_version(&conn, 0).unwrap();
            conn.execute(
                "INSERT INTO pkgs (name, repository, version, release) VALUES ('a', 'b', '1', 1)",
                [],
            )
            .unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(db.version(), Some(CURRENT_VERSION));
        assert!(db.is_empty());
        assert!(!db.was_present());
    }

    #[test]
    fn test_contains_array_function() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("index.db")).unwrap();

        let found: bool = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT contains_array(?1, ?2)",
                    ["[\"a\",\"b\"]", "b"],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert!(found);

        let missing: bool = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT contains_array(?1, ?2)",
                    ["[\"a\",\"b\"]", "c"],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert!(!missing);

        // Non-string arguments are a type error
        let err = db.with_conn(|conn| {
            Ok(conn.query_row("SELECT contains_array(1, 'a')", [], |row| {
                row.get::<_, bool>(0)
            })?)
        });
        assert!(err.is_err());
    }
}
