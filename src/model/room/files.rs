//! Uploads attached to a room, and pinned messages.

use std::path::PathBuf;

use rusqlite::params;
use serde::Serialize;

use super::{bump_info_updates, Room};
use crate::db;
use crate::error::{ModelError, ModelResult};
use crate::model::file::{self, File};
use crate::model::user::User;

/// How long a fresh upload lives before it expires.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileLifetime {
    /// The short lifetime of an upload no post has claimed yet
    Unclaimed,
    Never,
    Seconds(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PinnedMessage {
    pub id: i64,
    pub pinned_at: f64,
    /// Session id of the admin who pinned it
    pub pinned_by: String,
}

impl Room {
    /// An unexpired file of this room. Ids from before a database import are translated.
    pub fn get_file(&self, file_id: i64) -> ModelResult<Option<File>> {
        let conn = self.state.db.get()?;
        let mut file = File::find(&conn, file_id)?.filter(|f| f.room_id == self.id);
        if file.is_none() {
            if let Some(mapped) = self.state.legacy.map_file_id(&conn, self.id, file_id)? {
                file = File::find(&conn, mapped)?;
            }
        }
        let now = self.state.now();
        Ok(file.filter(|f| !f.is_expired(now)))
    }

    /// Stores an upload and returns its file id. The uploader needs upload and write access.
    ///
    /// The file is written to `<uploads>/<token>/<id>_<name>` while the row is being inserted;
    /// if anything fails the partial file is removed again.
    pub fn upload_file(
        &mut self,
        content: &[u8],
        uploader: &User,
        filename: Option<&str>,
        lifetime: FileLifetime,
    ) -> ModelResult<i64> {
        if !self.check_upload(Some(uploader))? {
            return Err(ModelError::BadPermission);
        }

        let state = &self.state;
        let files_config = &state.config.files;
        let dir = state.config.uploads_path().join(&self.token);
        std::fs::create_dir_all(&dir)?;

        let filename = filename.map(file::display_filename);
        let disk_name = file::disk_filename(
            filename.as_deref(),
            files_config.filename_max,
            files_config.filename_keep_prefix,
            files_config.filename_keep_suffix,
        );

        let now = state.now();
        let expiry = match lifetime {
            FileLifetime::Unclaimed => Some(now + files_config.unclaimed_expiry),
            FileLifetime::Never => None,
            FileLifetime::Seconds(secs) => Some(now + secs),
        };

        let room_id = self.id;
        let mut written: Option<PathBuf> = None;
        let result = db::transaction(&state.db, |tx| -> ModelResult<i64> {
            let id = db::insert_and_get_pk(
                tx,
                "INSERT INTO files (room, uploader, size, uploaded, expiry, filename, path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'tmp')",
                "id",
                params![
                    room_id,
                    uploader.id,
                    content.len() as i64,
                    now,
                    expiry,
                    filename
                ],
            )?;

            let path = dir.join(format!("{id}_{disk_name}"));
            written = Some(path.clone());
            std::fs::write(&path, content)?;

            tx.execute(
                "UPDATE files SET path = ?1 WHERE id = ?2",
                params![path.to_string_lossy().into_owned(), id],
            )?;
            Ok(id)
        });

        match result {
            Ok(id) => {
                tracing::debug!("{} uploaded file {} ({} bytes) to {}", uploader, id, content.len(), self);
                Ok(id)
            }
            Err(e) => {
                tracing::warn!("Failed to write/update upload {:?}: {}", written, e);
                if let Some(path) = &written {
                    let _ = std::fs::remove_file(path);
                }
                Err(e)
            }
        }
    }

    // Pins

    /// Pins a visible post of this room (admin only). Re-pinning moves the pin to the end.
    ///
    /// Attachments of a pinned post stop expiring.
    pub fn pin(&mut self, msg_id: i64, admin: &User) -> ModelResult<()> {
        if !self.check_admin(Some(admin))? {
            tracing::warn!("Unable to pin message to {}: {} is not an admin", self, admin);
            return Err(ModelError::BadPermission);
        }

        let (state, room_id) = (&self.state, self.id);
        let info_updates = db::transaction(&state.db, |tx| -> ModelResult<i64> {
            let pinnable: bool = tx.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM messages
                    WHERE room = ?1 AND id = ?2 AND data IS NOT NULL
                        AND NOT filtered AND whisper IS NULL AND NOT whisper_mods)",
                params![room_id, msg_id],
                |row| row.get(0),
            )?;
            if !pinnable {
                return Err(ModelError::NoSuchPost(msg_id));
            }

            tx.execute(
                "INSERT INTO pinned_messages (room, message, pinned_by, pinned_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (room, message) DO UPDATE
                 SET pinned_by = excluded.pinned_by, pinned_at = excluded.pinned_at",
                params![room_id, msg_id, admin.id, state.now()],
            )?;
            tx.execute(
                "UPDATE files SET expiry = NULL WHERE room = ?1 AND message = ?2",
                params![room_id, msg_id],
            )?;
            Ok(bump_info_updates(tx, room_id)?)
        })?;

        self.info_updates = info_updates;
        self.pinned = None;
        tracing::debug!("{} pinned message {} in {}", admin, msg_id, self);
        Ok(())
    }

    /// Removes pins (one message, or all of them) and returns how many were removed.
    fn remove_pins(&mut self, msg_id: Option<i64>, admin: &User) -> ModelResult<usize> {
        if !self.check_admin(Some(admin))? {
            tracing::warn!("Unable to unpin messages from {}: {} is not an admin", self, admin);
            return Err(ModelError::BadPermission);
        }

        let (state, room_id) = (&self.state, self.id);
        let (count, info_updates) = db::transaction(&state.db, |tx| -> ModelResult<_> {
            let mut stmt = tx.prepare(
                "SELECT id FROM files
                 WHERE room = ?1
                    AND message IN (SELECT message FROM pinned_messages
                                    WHERE room = ?1 AND (?2 IS NULL OR message = ?2))
                    AND id IS NOT (SELECT image FROM rooms WHERE id = ?1)",
            )?;
            let files = stmt
                .query_map(params![room_id, msg_id], |row| row.get(0))?
                .collect::<Result<Vec<i64>, _>>()?;
            drop(stmt);

            let count = tx.execute(
                "DELETE FROM pinned_messages WHERE room = ?1 AND (?2 IS NULL OR message = ?2)",
                params![room_id, msg_id],
            )?;
            if count == 0 {
                return Ok((0, None));
            }
            File::reset_expiries_on(tx, state, &files)?;
            Ok((count, Some(bump_info_updates(tx, room_id)?)))
        })?;

        if let Some(info_updates) = info_updates {
            self.info_updates = info_updates;
            self.pinned = None;
        }
        Ok(count)
    }

    /// Unpins one message; returns 1 if it was pinned, 0 otherwise.
    pub fn unpin(&mut self, msg_id: i64, admin: &User) -> ModelResult<usize> {
        let count = self.remove_pins(Some(msg_id), admin)?;
        tracing::debug!("{} unpinned message {} from {}", admin, msg_id, self);
        Ok(count)
    }

    pub fn unpin_all(&mut self, admin: &User) -> ModelResult<usize> {
        let count = self.remove_pins(None, admin)?;
        tracing::debug!("{} unpinned {} message(s) from {}", admin, count, self);
        Ok(count)
    }

    /// Pinned posts, oldest pin first. Fetched on first use.
    pub fn pinned_messages(&mut self) -> ModelResult<Vec<PinnedMessage>> {
        if let Some(pinned) = &self.pinned {
            return Ok(pinned.clone());
        }
        let pinned = {
            let conn = self.state.db.get()?;
            let mut stmt = conn.prepare(
                "SELECT message, pinned_at, users.session_id
                 FROM pinned_messages JOIN users ON pinned_by = users.id
                 WHERE room = ?1
                 ORDER BY pinned_at, message",
            )?;
            let pinned = stmt
                .query_map(params![self.id], |row| {
                    Ok(PinnedMessage {
                        id: row.get(0)?,
                        pinned_at: row.get(1)?,
                        pinned_by: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            pinned
        };
        self.pinned = Some(pinned.clone());
        Ok(pinned)
    }
}
