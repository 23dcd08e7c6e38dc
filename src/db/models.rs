// src/db/models.rs

//! Package model and its structured-column wrapper.

use crate::db::Database;
use crate::error::Result;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, OptionalExtension, Row, ToSql};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Structured column wrapper.
///
/// Stored as a JSON document in a TEXT column; an absent value is stored as
/// the literal string `null` so the schema CHECK constraints can tell the
/// two cases apart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Json<T>(pub T);

impl<T: Serialize> ToSql for Json<T> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let doc = serde_json::to_string(&self.0)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        Ok(ToSqlOutput::from(doc))
    }
}

impl<T: DeserializeOwned + Default> FromSql for Json<T> {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(Json(T::default())),
            ValueRef::Text(text) => {
                let doc = std::str::from_utf8(text).map_err(|e| FromSqlError::Other(Box::new(e)))?;
                serde_json::from_str(doc)
                    .map(Json)
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// A package's index record.
///
/// `(name, repository)` is unique; inserts replace on conflict.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Package {
    pub name: String,
    pub repository: String,
    pub version: String,
    pub release: i64,
    pub epoch: u64,
    pub description: Json<Option<HashMap<String, String>>>,
    pub homepage: Json<Option<HashMap<String, String>>>,
    pub maintainer: Json<Option<HashMap<String, String>>>,
    pub architectures: Json<Option<Vec<String>>>,
    pub licenses: Json<Option<Vec<String>>>,
    pub provides: Json<Option<Vec<String>>>,
    pub conflicts: Json<Option<Vec<String>>>,
    pub replaces: Json<Option<Vec<String>>>,
    pub depends: Json<HashMap<String, Vec<String>>>,
    pub build_depends: Json<HashMap<String, Vec<String>>>,
}

const COLUMNS: &str = "name, repository, version, release, epoch, description, homepage, \
                       maintainer, architectures, licenses, provides, conflicts, replaces, \
                       depends, builddepends";

impl Package {
    /// Upsert this record, keyed by `(name, repository)`
    pub fn insert(&self, db: &Database) -> Result<()> {
        db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO pkgs ({COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
                ),
                params![
                    &self.name,
                    &self.repository,
                    &self.version,
                    self.release,
                    self.epoch as i64,
                    &self.description,
                    &self.homepage,
                    &self.maintainer,
                    &self.architectures,
                    &self.licenses,
                    &self.provides,
                    &self.conflicts,
                    &self.replaces,
                    &self.depends,
                    &self.build_depends,
                ],
            )?;
            Ok(())
        })
    }

    /// All records matching a where-clause fragment
    pub fn query(db: &Database, where_clause: &str, args: &[&dyn ToSql]) -> Result<Vec<Self>> {
        db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {COLUMNS} FROM pkgs WHERE {where_clause}"))?;
            let pkgs = stmt
                .query_map(args, Self::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(pkgs)
        })
    }

    /// Stream records matching a where-clause fragment without
    /// materializing the full result set
    pub fn query_for_each(
        db: &Database,
        where_clause: &str,
        args: &[&dyn ToSql],
        mut f: impl FnMut(Self),
    ) -> Result<()> {
        db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {COLUMNS} FROM pkgs WHERE {where_clause}"))?;
            let rows = stmt.query_map(args, Self::from_row)?;
            for row in rows {
                f(row?);
            }
            Ok(())
        })
    }

    /// First record matching a where-clause fragment, if any
    pub fn query_one(
        db: &Database,
        where_clause: &str,
        args: &[&dyn ToSql],
    ) -> Result<Option<Self>> {
        db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM pkgs WHERE {where_clause} LIMIT 1"
            ))?;
            let pkg = stmt.query_row(args, Self::from_row).optional()?;
            Ok(pkg)
        })
    }

    /// Delete all records matching a where-clause fragment
    pub fn delete(db: &Database, where_clause: &str, args: &[&dyn ToSql]) -> Result<()> {
        db.with_conn(|conn| {
            conn.execute(&format!("DELETE FROM pkgs WHERE {where_clause}"), args)?;
            Ok(())
        })
    }

    /// Number of stored records
    pub fn count(db: &Database) -> Result<i64> {
        db.with_conn(|conn| Ok(conn.query_row("SELECT count(1) FROM pkgs", [], |row| row.get(0))?))
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            repository: row.get(1)?,
            version: row.get(2)?,
            release: row.get(3)?,
            epoch: row.get::<_, Option<i64>>(4)?.unwrap_or(0) as u64,
            description: row.get(5)?,
            homepage: row.get(6)?,
            maintainer: row.get(7)?,
            architectures: row.get(8)?,
            licenses: row.get(9)?,
            provides: row.get(10)?,
            conflicts: row.get(11)?,
            replaces: row.get(12)?,
            depends: row.get(13)?,
            build_depends: row.get(14)?,
        })
    }
}
