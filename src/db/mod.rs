pub mod legacy;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, Params, Row, Transaction, TransactionBehavior};
use std::path::Path;

use crate::error::ModelResult;
use crate::state::DbPool;

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_initial",
        include_str!("../../migrations/001_initial.sql"),
    ),
    (
        "002_legacy_and_blinding",
        include_str!("../../migrations/002_legacy_and_blinding.sql"),
    ),
];

/// Number of ids bound per statement when a caller hands us an unbounded id list.
pub const ID_BATCH_SIZE: usize = 50;

fn configure_connection(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        PRAGMA synchronous = NORMAL;
        ",
    )
}

pub fn create_pool(db_path: &Path) -> anyhow::Result<DbPool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(db_path).with_init(configure_connection);
    let pool = Pool::builder().max_size(8).build(manager)?;

    // journal_mode is persistent, so setting it once is enough
    let conn = pool.get()?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;

    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    let conn = pool.get()?;

    // Create migrations tracking table
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM schema_version WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;

        if !already_applied {
            tracing::info!("Applying migration: {}", name);
            conn.execute_batch(sql)?;
            conn.execute(
                "INSERT INTO schema_version (name) VALUES (?1)",
                params![name],
            )?;
        }
    }

    tracing::info!("Database migrations complete");
    Ok(())
}

/// Runs a read query on a pooled connection and maps every row with `f`.
pub fn query<T, P, F>(pool: &DbPool, sql: &str, params: P, f: F) -> ModelResult<Vec<T>>
where
    P: Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let conn = pool.get()?;
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, f)?.collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Runs `f` inside an IMMEDIATE transaction on a pooled connection.
///
/// The transaction commits only when `f` returns `Ok`; any error (or a panic unwinding
/// through here) drops the transaction, which rolls it back.
pub fn transaction<T, E, F>(pool: &DbPool, f: F) -> Result<T, E>
where
    F: FnOnce(&Transaction<'_>) -> Result<T, E>,
    E: From<rusqlite::Error> + From<r2d2::Error>,
{
    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

/// Executes an INSERT and returns the value of its primary key column.
///
/// `pk` is always a column name chosen by the caller's code, never user input.
pub fn insert_and_get_pk<P: Params>(
    conn: &Connection,
    sql: &str,
    pk: &str,
    params: P,
) -> Result<i64, rusqlite::Error> {
    let sql = format!("{} RETURNING {}", sql.trim_end(), pk);
    conn.query_row(&sql, params, |row| row.get(0))
}

/// Builds `?N, ?N+1, ...` for `count` positional parameters starting at `first`.
pub fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// True if the error is a UNIQUE/PRIMARY KEY constraint violation.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}
