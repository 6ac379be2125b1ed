use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::db::{self, ID_BATCH_SIZE};
use crate::error::{ModelError, ModelResult};
use crate::model::room::Room;
use crate::state::AppState;

pub(crate) const FILE_COLUMNS: &str =
    "id, room, uploader, size, uploaded, expiry, filename, path, message";

/// Metadata of an uploaded file. The content lives on disk at `path`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct File {
    pub id: i64,
    pub room_id: i64,
    pub uploader: Option<i64>,
    pub size: i64,
    pub uploaded: f64,
    /// `None` for files that never expire
    pub expiry: Option<f64>,
    /// Filename suggested by the uploader
    pub filename: Option<String>,
    pub path: String,
    /// Post this file is attached to
    pub message: Option<i64>,
}

/// New expiry for a file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expiry {
    Never,
    /// The configured post attachment lifetime, counted from now
    Default,
    At(f64),
}

impl File {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            room_id: row.get(1)?,
            uploader: row.get(2)?,
            size: row.get(3)?,
            uploaded: row.get(4)?,
            expiry: row.get(5)?,
            filename: row.get(6)?,
            path: row.get(7)?,
            message: row.get(8)?,
        })
    }

    pub(crate) fn find(conn: &Connection, id: i64) -> rusqlite::Result<Option<Self>> {
        conn.query_row(
            &format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1"),
            params![id],
            Self::from_row,
        )
        .optional()
    }

    pub(crate) fn load(conn: &Connection, id: i64) -> ModelResult<Self> {
        Self::find(conn, id)?.ok_or(ModelError::NoSuchFile(id))
    }

    pub fn by_id(state: &AppState, id: i64) -> ModelResult<Self> {
        let conn = state.db.get()?;
        Self::load(&conn, id)
    }

    /// Fetches the room this file was uploaded to.
    pub fn room(&self, state: &AppState) -> ModelResult<Room> {
        Room::by_id(state, self.room_id)
    }

    /// Reads the file content from disk.
    pub fn read(&self) -> ModelResult<Vec<u8>> {
        Ok(std::fs::read(&self.path)?)
    }

    pub fn is_expired(&self, now: f64) -> bool {
        self.expiry.is_some_and(|e| e <= now)
    }

    pub fn set_expiry(&mut self, state: &AppState, expiry: Expiry) -> ModelResult<()> {
        let conn = state.db.get()?;
        self.set_expiry_on(&conn, state, expiry)
    }

    pub(crate) fn set_expiry_on(
        &mut self,
        conn: &Connection,
        state: &AppState,
        expiry: Expiry,
    ) -> ModelResult<()> {
        let at = match expiry {
            Expiry::Never => None,
            Expiry::Default => state.config.files.claimed_expiry(state.now()),
            Expiry::At(at) => Some(at),
        };
        conn.execute(
            "UPDATE files SET expiry = ?1 WHERE id = ?2",
            params![at, self.id],
        )?;
        self.expiry = at;
        Ok(())
    }

    /// Gives every listed file the default attachment lifetime, counted from now.
    pub fn reset_expiries(state: &AppState, file_ids: &[i64]) -> ModelResult<usize> {
        let conn = state.db.get()?;
        Self::reset_expiries_on(&conn, state, file_ids)
    }

    pub(crate) fn reset_expiries_on(
        conn: &Connection,
        state: &AppState,
        file_ids: &[i64],
    ) -> ModelResult<usize> {
        let expiry = state.config.files.claimed_expiry(state.now());
        let mut updated = 0;
        for chunk in file_ids.chunks(ID_BATCH_SIZE) {
            let sql = format!(
                "UPDATE files SET expiry = ?1 WHERE id IN ({})",
                db::placeholders(2, chunk.len())
            );
            let mut values = vec![expiry.map_or(Value::Null, Value::Real)];
            values.extend(chunk.iter().map(|id| Value::Integer(*id)));
            updated += conn.execute(&sql, params_from_iter(values))?;
        }
        Ok(updated)
    }
}

/// Removes an upload from disk, returning whether a file was actually unlinked.
///
/// A file that is already gone is not an error; anything else is logged and skipped.
pub(crate) fn unlink_upload(path: &str) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::error!("Unable to remove upload '{}' from disk: {}", path, e);
            false
        }
    }
}

/// Turns a user-supplied filename into something safe to put on disk.
///
/// Anything outside `[A-Za-z0-9._ -]` becomes `_`, and names longer than `max` characters keep
/// `keep_prefix` leading and `keep_suffix` trailing characters around `...`.
pub(crate) fn disk_filename(
    filename: Option<&str>,
    max: usize,
    keep_prefix: usize,
    keep_suffix: usize,
) -> String {
    let Some(name) = filename else {
        return "(unnamed)".to_string();
    };
    let clean: Vec<char> = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ' ' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if clean.len() <= max {
        return clean.into_iter().collect();
    }
    let prefix: String = clean[..keep_prefix.min(clean.len())].iter().collect();
    let suffix: String = clean[clean.len() - keep_suffix.min(clean.len())..]
        .iter()
        .collect();
    format!("{prefix}...{suffix}")
}

/// Replaces characters no filesystem accepts in the user-visible filename.
pub(crate) fn display_filename(filename: &str) -> String {
    filename.replace(|c: char| c == '\0' || c == '/', "\u{FFFD}")
}
