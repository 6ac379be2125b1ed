//! Rooms: metadata, the permission engine, and everything that happens to messages and files
//! inside a room.
//!
//! A [`Room`] value is meant to live for one request. It caches resolved permissions per user
//! and a few lazily fetched relations (the image, the pin list); none of that is shared with
//! other `Room` values, so another request's changes become visible after [`Room::refresh`] or
//! on the next load.

mod files;
mod messages;
mod moderation;

use std::collections::HashMap;
use std::fmt;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::db;
use crate::error::{ModelError, ModelResult};
use crate::model::file::{self, Expiry, File};
use crate::model::permissions::{
    Permission, PermissionFilter, Requirements, ResolvedPermissions,
};
use crate::model::user::User;
use crate::state::AppState;

pub use files::{FileLifetime, PinnedMessage};
pub use messages::SIGNATURE_SIZE;
pub use moderation::FuturePermission;

const ROOM_COLUMNS: [&str; 12] = [
    "id",
    "token",
    "name",
    "description",
    "image",
    "created",
    "message_sequence",
    "info_updates",
    "read",
    "accessible",
    "write",
    "upload",
];

/// Room tokens are 1-64 characters of `[A-Za-z0-9_-]`.
pub fn valid_token(token: &str) -> bool {
    (1..=64).contains(&token.len())
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn room_columns(table: Option<&str>) -> String {
    ROOM_COLUMNS
        .iter()
        .map(|c| match table {
            Some(t) => format!("{t}.{c}"),
            None => c.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

struct RoomRow {
    id: i64,
    token: String,
    name: String,
    description: Option<String>,
    image: Option<i64>,
    created: f64,
    message_sequence: i64,
    info_updates: i64,
    read: bool,
    accessible: bool,
    write: bool,
    upload: bool,
}

impl RoomRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            token: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            image: row.get(4)?,
            created: row.get(5)?,
            message_sequence: row.get(6)?,
            info_updates: row.get(7)?,
            read: row.get(8)?,
            accessible: row.get(9)?,
            write: row.get(10)?,
            upload: row.get(11)?,
        })
    }
}

enum RoomKey<'a> {
    Id(i64),
    Token(&'a str),
}

fn fetch_row(conn: &Connection, key: RoomKey<'_>) -> ModelResult<RoomRow> {
    let (column, value, missing) = match key {
        RoomKey::Id(id) => ("id", Value::Integer(id), id.to_string()),
        RoomKey::Token(token) => ("token", Value::Text(token.to_string()), token.to_string()),
    };
    conn.query_row(
        &format!(
            "SELECT {} FROM rooms WHERE {column} = ?1",
            room_columns(None)
        ),
        params![value],
        RoomRow::from_row,
    )
    .optional()?
    .ok_or(ModelError::NoSuchRoom(missing))
}

fn bump_info_updates(conn: &Connection, room_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "UPDATE rooms SET info_updates = info_updates + 1 WHERE id = ?1
         RETURNING info_updates",
        params![room_id],
        |row| row.get(0),
    )
}

fn id_values(ids: &[i64]) -> impl Iterator<Item = Value> + '_ {
    ids.iter().map(|id| Value::Integer(*id))
}

/// Appends a parameter and returns its placeholder.
fn bind(values: &mut Vec<Value>, value: Value) -> String {
    values.push(value);
    format!("?{}", values.len())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomInfo {
    pub id: i64,
    pub token: String,
    pub name: String,
    pub description: Option<String>,
    pub created: f64,
    pub message_sequence: i64,
    pub info_updates: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<i64>,
}

pub struct Room {
    state: AppState,
    pub id: i64,
    token: String,
    name: String,
    description: Option<String>,
    image_id: Option<i64>,
    pub created: f64,
    /// Bumped by every post, edit and deletion
    pub message_sequence: i64,
    /// Bumped by metadata changes only
    pub info_updates: i64,
    default_read: bool,
    default_accessible: bool,
    default_write: bool,
    default_upload: bool,
    /// `None` until fetched
    image: Option<Option<File>>,
    pinned: Option<Vec<PinnedMessage>>,
    perm_cache: HashMap<i64, ResolvedPermissions>,
}

impl fmt::Debug for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("token", &self.token)
            .field("name", &self.name)
            .field("message_sequence", &self.message_sequence)
            .field("info_updates", &self.info_updates)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Room[{}]", self.token)
    }
}

impl Room {
    fn from_row(state: AppState, row: RoomRow) -> Self {
        Self {
            state,
            id: row.id,
            token: row.token,
            name: row.name,
            description: row.description,
            image_id: row.image,
            created: row.created,
            message_sequence: row.message_sequence,
            info_updates: row.info_updates,
            default_read: row.read,
            default_accessible: row.accessible,
            default_write: row.write,
            default_upload: row.upload,
            image: None,
            pinned: None,
            perm_cache: HashMap::new(),
        }
    }

    pub fn by_token(state: &AppState, token: &str) -> ModelResult<Self> {
        let conn = state.db.get()?;
        let row = fetch_row(&conn, RoomKey::Token(token))?;
        Ok(Self::from_row(state.clone(), row))
    }

    pub fn by_id(state: &AppState, id: i64) -> ModelResult<Self> {
        let conn = state.db.get()?;
        let row = fetch_row(&conn, RoomKey::Id(id))?;
        Ok(Self::from_row(state.clone(), row))
    }

    /// Creates a room. Does not check any permissions.
    pub fn create(
        state: &AppState,
        token: &str,
        name: &str,
        description: Option<&str>,
    ) -> ModelResult<Self> {
        if !valid_token(token) {
            return Err(ModelError::InvalidData(format!("invalid room token '{token}'")));
        }

        let conn = state.db.get()?;
        let id = db::insert_and_get_pk(
            &conn,
            "INSERT INTO rooms (token, name, description, created) VALUES (?1, ?2, ?3, ?4)",
            "id",
            params![token, name, description, state.now()],
        )
        .map_err(|e| {
            if db::is_unique_violation(&e) {
                ModelError::AlreadyExists(format!("Room with token '{token}' already exists"))
            } else {
                e.into()
            }
        })?;

        let row = fetch_row(&conn, RoomKey::Id(id))?;
        tracing::info!("Created room {} ({})", token, name);
        Ok(Self::from_row(state.clone(), row))
    }

    /// Permanently deletes the room with all of its messages, files and permission rows, then
    /// removes its uploads from disk. Does not check any permissions.
    pub fn delete(self) -> ModelResult<()> {
        let room_id = self.id;
        let paths = db::transaction(&self.state.db, |tx| -> ModelResult<Vec<String>> {
            let mut stmt = tx.prepare("SELECT path FROM files WHERE room = ?1")?;
            let paths = stmt
                .query_map(params![room_id], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            drop(stmt);

            if tx.execute("DELETE FROM rooms WHERE id = ?1", params![room_id])? != 1 {
                return Err(ModelError::NoSuchRoom(self.token.clone()));
            }
            Ok(paths)
        })?;

        let unlinked = paths.iter().filter(|p| file::unlink_upload(p)).count();
        let _ = std::fs::remove_dir(self.state.config.uploads_path().join(&self.token));
        tracing::info!(
            "Deleted {} ({} files, {} removed from disk)",
            self,
            paths.len(),
            unlinked
        );
        Ok(())
    }

    /// Re-reads the room row. The permission cache is kept; the pin list is re-fetched on
    /// demand, and so is the image unless it is unchanged.
    pub fn refresh(&mut self) -> ModelResult<()> {
        self.reload(false)
    }

    fn reload(&mut self, clear_perms: bool) -> ModelResult<()> {
        let row = {
            let conn = self.state.db.get()?;
            fetch_row(&conn, RoomKey::Id(self.id))?
        };
        if row.image != self.image_id {
            self.image = None;
        }
        self.token = row.token;
        self.name = row.name;
        self.description = row.description;
        self.image_id = row.image;
        self.created = row.created;
        self.message_sequence = row.message_sequence;
        self.info_updates = row.info_updates;
        self.default_read = row.read;
        self.default_accessible = row.accessible;
        self.default_write = row.write;
        self.default_upload = row.upload;
        self.pinned = None;
        if clear_perms {
            self.perm_cache.clear();
        }
        Ok(())
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Id of the room image, without fetching the file row.
    pub fn image_id(&self) -> Option<i64> {
        self.image_id
    }

    pub fn default_read(&self) -> bool {
        self.default_read
    }

    /// Note that read access implies accessibility even when this is false.
    pub fn default_accessible(&self) -> bool {
        self.default_accessible
    }

    pub fn default_write(&self) -> bool {
        self.default_write
    }

    pub fn default_upload(&self) -> bool {
        self.default_upload
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id,
            token: self.token.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            created: self.created,
            message_sequence: self.message_sequence,
            info_updates: self.info_updates,
            image_id: self.image_id,
        }
    }

    /// Link to this room, as shared with clients.
    pub fn url(&self) -> String {
        format!(
            "{}/{}?public_key={}",
            self.state.config.server.url_base.trim_end_matches('/'),
            self.token,
            self.state.keys.server_pubkey_hex()
        )
    }

    pub fn set_token(&mut self, token: &str) -> ModelResult<()> {
        if !valid_token(token) {
            return Err(ModelError::InvalidData(format!("invalid room token '{token}'")));
        }
        {
            let conn = self.state.db.get()?;
            conn.execute(
                "UPDATE rooms SET token = ?1 WHERE id = ?2",
                params![token, self.id],
            )
            .map_err(|e| {
                if db::is_unique_violation(&e) {
                    ModelError::AlreadyExists(format!("Room with token '{token}' already exists"))
                } else {
                    e.into()
                }
            })?;
        }
        self.reload(false)
    }

    pub fn set_name(&mut self, name: &str) -> ModelResult<()> {
        if name == self.name {
            return Ok(());
        }
        {
            let conn = self.state.db.get()?;
            conn.execute(
                "UPDATE rooms SET name = ?1, info_updates = info_updates + 1 WHERE id = ?2",
                params![name, self.id],
            )?;
        }
        self.reload(false)
    }

    pub fn set_description(&mut self, description: Option<&str>) -> ModelResult<()> {
        if description == self.description.as_deref() {
            return Ok(());
        }
        {
            let conn = self.state.db.get()?;
            conn.execute(
                "UPDATE rooms SET description = ?1, info_updates = info_updates + 1 WHERE id = ?2",
                params![description, self.id],
            )?;
        }
        self.reload(false)
    }

    /// The room image, fetched on first use.
    pub fn image(&mut self) -> ModelResult<Option<File>> {
        if self.image.is_none() {
            let loaded = match self.image_id {
                Some(id) => {
                    let conn = self.state.db.get()?;
                    File::find(&conn, id)?
                }
                None => None,
            };
            self.image = Some(loaded);
        }
        Ok(self.image.clone().flatten())
    }

    /// Makes an upload of this room the room image.
    ///
    /// The file stops expiring. A previous image is not deleted (it may be attached to a post)
    /// but gets the default attachment lifetime.
    pub fn set_image(&mut self, file_id: i64) -> ModelResult<()> {
        let (state, room_id, old_image) = (&self.state, self.id, self.image_id);
        let file = db::transaction(&state.db, |tx| -> ModelResult<File> {
            let mut file = File::load(tx, file_id)?;
            if file.room_id != room_id {
                return Err(ModelError::NoSuchFile(file_id));
            }
            file.set_expiry_on(tx, state, Expiry::Never)?;

            if let Some(old) = old_image.filter(|old| *old != file_id) {
                if let Some(mut old_file) = File::find(tx, old)? {
                    old_file.set_expiry_on(tx, state, Expiry::Default)?;
                }
            }

            tx.execute(
                "UPDATE rooms SET image = ?1, info_updates = info_updates + 1 WHERE id = ?2",
                params![file_id, room_id],
            )?;
            Ok(file)
        })?;

        self.image_id = Some(file.id);
        self.image = Some(Some(file));
        self.reload(false)
    }

    pub fn clear_image(&mut self) -> ModelResult<()> {
        let Some(old) = self.image_id else {
            return Ok(());
        };
        let (state, room_id) = (&self.state, self.id);
        db::transaction(&state.db, |tx| -> ModelResult<()> {
            if let Some(mut old_file) = File::find(tx, old)? {
                old_file.set_expiry_on(tx, state, Expiry::Default)?;
            }
            tx.execute(
                "UPDATE rooms SET image = NULL, info_updates = info_updates + 1 WHERE id = ?1",
                params![room_id],
            )?;
            Ok(())
        })?;
        self.reload(false)
    }

    pub fn default_permission(&self, perm: Permission) -> bool {
        match perm {
            Permission::Read => self.default_read,
            Permission::Accessible => self.default_accessible,
            Permission::Write => self.default_write,
            Permission::Upload => self.default_upload,
        }
    }

    /// Changes one of the permissions users without an override get.
    pub fn set_default(&mut self, perm: Permission, value: bool) -> ModelResult<()> {
        if self.default_permission(perm) == value {
            return Ok(());
        }
        {
            let conn = self.state.db.get()?;
            conn.execute(
                &format!(
                    "UPDATE rooms SET {} = ?1, info_updates = info_updates + 1 WHERE id = ?2",
                    perm.as_str()
                ),
                params![value, self.id],
            )?;
        }
        self.reload(true)
    }

    pub fn set_default_read(&mut self, read: bool) -> ModelResult<()> {
        self.set_default(Permission::Read, read)
    }

    pub fn set_default_accessible(&mut self, accessible: bool) -> ModelResult<()> {
        self.set_default(Permission::Accessible, accessible)
    }

    pub fn set_default_write(&mut self, write: bool) -> ModelResult<()> {
        self.set_default(Permission::Write, write)
    }

    pub fn set_default_upload(&mut self, upload: bool) -> ModelResult<()> {
        self.set_default(Permission::Upload, upload)
    }

    /// Number of users seen in the room within `cutoff` seconds (default: the configured
    /// active threshold).
    pub fn active_users(&self, cutoff: Option<f64>) -> ModelResult<i64> {
        let cutoff = cutoff.unwrap_or(self.state.config.rooms.active_threshold);
        let conn = self.state.db.get()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM room_users WHERE room = ?1 AND last_active >= ?2",
            params![self.id, self.state.now() - cutoff],
            |row| row.get(0),
        )?)
    }

    /// Count and total body size of the visible, undeleted messages.
    pub fn messages_size(&self) -> ModelResult<(i64, i64)> {
        let conn = self.state.db.get()?;
        Ok(conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(data_size), 0) FROM messages
             WHERE room = ?1 AND data IS NOT NULL AND NOT filtered",
            params![self.id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?)
    }

    /// Count and total size of the files stored for this room.
    pub fn attachments_size(&self) -> ModelResult<(i64, i64)> {
        let conn = self.state.db.get()?;
        Ok(conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM files WHERE room = ?1",
            params![self.id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?)
    }

    // Permission engine

    fn resolve_permissions(&mut self, user: Option<&User>) -> ModelResult<ResolvedPermissions> {
        let Some(user) = user else {
            return Ok(ResolvedPermissions::room_defaults(
                self.default_read,
                self.default_accessible,
                self.default_write,
                self.default_upload,
            ));
        };
        if let Some(perms) = self.perm_cache.get(&user.id) {
            return Ok(*perms);
        }

        let perms = {
            let conn = self.state.db.get()?;
            conn.query_row(
                "SELECT banned, read, accessible, write, upload, moderator, admin
                 FROM user_permissions WHERE room = ?1 AND \"user\" = ?2",
                params![self.id, user.id],
                ResolvedPermissions::from_row,
            )
            .optional()?
            .ok_or_else(|| ModelError::NoSuchUser(user.session_id.clone()))?
        };
        self.perm_cache.insert(user.id, perms);
        Ok(perms)
    }

    fn forget_permissions(&mut self, user_ids: &[i64]) {
        for id in user_ids {
            self.perm_cache.remove(id);
        }
    }

    /// True if `user` holds everything in `req` and, unless a moderator, is not banned.
    ///
    /// With no user the room defaults are checked; anonymous callers are never banned.
    pub fn check_permission(&mut self, user: Option<&User>, req: Requirements) -> ModelResult<bool> {
        Ok(self.resolve_permissions(user)?.allows(req))
    }

    pub fn check_unbanned(&mut self, user: Option<&User>) -> ModelResult<bool> {
        self.check_permission(user, Requirements::NONE)
    }

    pub fn check_read(&mut self, user: Option<&User>) -> ModelResult<bool> {
        self.check_permission(user, Requirements::READ)
    }

    pub fn check_accessible(&mut self, user: Option<&User>) -> ModelResult<bool> {
        self.check_permission(user, Requirements::ACCESSIBLE)
    }

    pub fn check_write(&mut self, user: Option<&User>) -> ModelResult<bool> {
        self.check_permission(user, Requirements::WRITE)
    }

    /// Uploading needs write access as well.
    pub fn check_upload(&mut self, user: Option<&User>) -> ModelResult<bool> {
        self.check_permission(user, Requirements::WRITE | Requirements::UPLOAD)
    }

    pub fn check_moderator(&mut self, user: Option<&User>) -> ModelResult<bool> {
        self.check_permission(user, Requirements::MODERATOR)
    }

    pub fn check_admin(&mut self, user: Option<&User>) -> ModelResult<bool> {
        self.check_permission(user, Requirements::ADMIN)
    }

    /// The user that moderation records for `user` should be keyed to, and whether that user
    /// still needs a blinded id.
    fn moderation_target(&self, user: &User) -> ModelResult<(User, bool)> {
        if !self.state.config.rooms.require_blind_keys {
            return Ok((user.clone(), false));
        }
        let conn = self.state.db.get()?;
        match self.state.keys.find_blinded(&conn, user)? {
            Some(blinded) => Ok((blinded, false)),
            None => Ok((user.clone(), true)),
        }
    }
}

fn rooms_from_query(
    state: &AppState,
    sql: &str,
    values: Vec<Value>,
) -> ModelResult<Vec<Room>> {
    let rows = db::query(&state.db, sql, params_from_iter(values), RoomRow::from_row)?;
    Ok(rows
        .into_iter()
        .map(|row| Room::from_row(state.clone(), row))
        .collect())
}

/// All rooms, ordered by token. Does not check permissions.
pub fn get_rooms(state: &AppState) -> ModelResult<Vec<Room>> {
    rooms_from_query(
        state,
        &format!("SELECT {} FROM rooms ORDER BY token", room_columns(None)),
        Vec::new(),
    )
}

/// Rooms where `user`'s effective permissions match every constraint in `filter`, ordered by
/// token, optionally limited to the given tokens (unknown tokens are ignored).
pub fn get_rooms_with_permission(
    state: &AppState,
    user: &User,
    tokens: Option<&[&str]>,
    filter: PermissionFilter,
) -> ModelResult<Vec<Room>> {
    if filter.is_empty() {
        return Err(ModelError::InvalidData(
            "at least one permission constraint is required".to_string(),
        ));
    }

    let mut values = vec![Value::Integer(user.id)];
    let mut conditions = vec!["perm.\"user\" = ?1".to_string()];
    if let Some(tokens) = tokens.filter(|t| !t.is_empty()) {
        conditions.push(format!(
            "rooms.token IN ({})",
            db::placeholders(2, tokens.len())
        ));
        values.extend(tokens.iter().map(|t| Value::Text(t.to_string())));
    }
    conditions.extend(filter.conditions());

    rooms_from_query(
        state,
        &format!(
            "SELECT {} FROM user_permissions perm JOIN rooms ON rooms.id = perm.room
             WHERE {}
             ORDER BY rooms.token",
            room_columns(Some("rooms")),
            conditions.join(" AND ")
        ),
        values,
    )
}

/// Rooms `user` can see; with no user, the publicly accessible rooms.
pub fn get_accessible_rooms(state: &AppState, user: Option<&User>) -> ModelResult<Vec<Room>> {
    match user {
        Some(user) => get_rooms_with_permission(
            state,
            user,
            None,
            PermissionFilter {
                accessible: Some(true),
                banned: Some(false),
                ..Default::default()
            },
        ),
        None => rooms_from_query(
            state,
            &format!(
                "SELECT {} FROM rooms WHERE read OR accessible ORDER BY token",
                room_columns(None)
            ),
            Vec::new(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_rules() {
        assert!(valid_token("lokinet"));
        assert!(valid_token("a-b_C9"));
        assert!(!valid_token(""));
        assert!(!valid_token("has space"));
        assert!(!valid_token("slash/y"));
        assert!(!valid_token(&"x".repeat(65)));
        assert!(valid_token(&"x".repeat(64)));
    }

    #[test]
    fn qualified_room_columns() {
        let cols = room_columns(Some("rooms"));
        assert!(cols.starts_with("rooms.id, rooms.token"));
        assert!(cols.ends_with("rooms.upload"));
        assert_eq!(room_columns(None).split(", ").count(), ROOM_COLUMNS.len());
    }

    #[test]
    fn bind_numbers_parameters_in_order() {
        let mut values = vec![Value::Integer(1)];
        assert_eq!(bind(&mut values, Value::Integer(5)), "?2");
        assert_eq!(bind(&mut values, Value::Null), "?3");
        assert_eq!(values.len(), 3);
    }
}
