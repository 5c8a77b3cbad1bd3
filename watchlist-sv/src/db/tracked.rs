//! Raw SQL for the `is_*` tracked list columns, which diesel's static schema
//! cannot describe. Column names are validated before they reach a query.

use std::collections::{BTreeMap, HashMap};

use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{Array, Bool, Text, Uuid as SqlUuid};
use log::{debug, info};
use uuid::Uuid;

use crate::core::error::Error;
use crate::ingest::normalize::is_valid_column_name;

#[derive(QueryableByName)]
struct FlagsRow {
    #[sql_type = "SqlUuid"]
    id: Uuid,
    #[sql_type = "Array<Bool>"]
    flags: Vec<bool>,
}

#[derive(QueryableByName)]
struct ColumnRow {
    #[sql_type = "Text"]
    column_name: String,
}

fn checked(column: &str) -> Result<&str, Error> {
    if is_valid_column_name(column) {
        Ok(column)
    } else {
        Err(Error::InvalidColumn(column.to_string()))
    }
}

/// Tracked columns that currently exist on `movies`.
pub fn existing_columns(conn: &PgConnection) -> Result<Vec<String>, Error> {
    let rows: Vec<ColumnRow> = sql_query(
        "SELECT column_name::text AS column_name FROM information_schema.columns \
         WHERE table_schema = current_schema() AND table_name = 'movies' AND column_name LIKE 'is\\_%' \
         ORDER BY column_name")
        .load(conn)?;

    Ok(rows.into_iter()
        .map(|r| r.column_name)
        .filter(|c| c != "is_favorite" && is_valid_column_name(c))
        .collect())
}

pub fn ensure_columns(conn: &PgConnection, columns: &[String]) -> Result<(), Error> {
    for column in columns {
        let query = format!(
            "ALTER TABLE movies ADD COLUMN IF NOT EXISTS {} BOOLEAN NOT NULL DEFAULT FALSE",
            checked(column)?,
        );
        debug!("{}", query);
        sql_query(query).execute(conn)?;
    }
    Ok(())
}

pub fn reset_column(conn: &PgConnection, column: &str) -> Result<usize, Error> {
    let query = format!("UPDATE movies SET {} = FALSE WHERE {}", checked(column)?, column);
    Ok(sql_query(query).execute(conn)?)
}

pub fn mark(conn: &PgConnection, column: &str, ids: &[Uuid]) -> Result<usize, Error> {
    if ids.is_empty() {
        return Ok(0);
    }

    let query = format!("UPDATE movies SET {} = TRUE WHERE id = ANY($1)", checked(column)?);
    let updated = sql_query(query)
        .bind::<Array<SqlUuid>, _>(ids.to_vec())
        .execute(conn)?;

    info!("flagged {} movies in {}", updated, column);
    Ok(updated)
}

/// Tracked list flags for each of `ids`, keyed by movie then column.
pub fn memberships(conn: &PgConnection, columns: &[String], ids: &[Uuid]) -> Result<HashMap<Uuid, BTreeMap<String, bool>>, Error> {
    if columns.is_empty() || ids.is_empty() {
        return Ok(HashMap::new());
    }

    let cols = columns.iter()
        .map(|c| checked(c))
        .collect::<Result<Vec<&str>, Error>>()?
        .join(", ");

    let rows: Vec<FlagsRow> = sql_query(format!("SELECT id, ARRAY[{}] AS flags FROM movies WHERE id = ANY($1)", cols))
        .bind::<Array<SqlUuid>, _>(ids.to_vec())
        .load(conn)?;

    Ok(rows.into_iter()
        .map(|row| {
            let flags = columns.iter().cloned().zip(row.flags.into_iter()).collect();
            (row.id, flags)
        })
        .collect())
}

/// Flags for one movie; columns the row lacks read as `false`.
pub fn memberships_of(conn: &PgConnection, columns: &[String], id: Uuid) -> Result<BTreeMap<String, bool>, Error> {
    let mut found = memberships(conn, columns, &[id])?;
    Ok(found.remove(&id)
        .unwrap_or_else(|| columns.iter().map(|c| (c.clone(), false)).collect()))
}
