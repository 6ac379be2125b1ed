use std::fmt;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::error::{ModelError, ModelResult};
use crate::model::room::Room;
use crate::state::AppState;

const USER_COLUMNS: &str =
    "id, session_id, created, last_active, banned, moderator, admin, visible_mod";

/// A user row, identified publicly by its session id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: i64,
    pub session_id: String,
    pub created: f64,
    pub last_active: f64,
    /// Globally banned
    pub banned: bool,
    pub global_moderator: bool,
    pub global_admin: bool,
    /// Whether global moderator status is shown publicly
    pub visible_mod: bool,
    #[serde(skip)]
    touched: bool,
}

/// Moderators split by rank and visibility.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeratorLists<T> {
    pub moderators: Vec<T>,
    pub admins: Vec<T>,
    pub hidden_moderators: Vec<T>,
    pub hidden_admins: Vec<T>,
}

impl<T> Default for ModeratorLists<T> {
    fn default() -> Self {
        Self {
            moderators: Vec::new(),
            admins: Vec::new(),
            hidden_moderators: Vec::new(),
            hidden_admins: Vec::new(),
        }
    }
}

impl<T> ModeratorLists<T> {
    pub(crate) fn push(&mut self, item: T, admin: bool, visible: bool) {
        match (admin, visible) {
            (false, true) => self.moderators.push(item),
            (true, true) => self.admins.push(item),
            (false, false) => self.hidden_moderators.push(item),
            (true, false) => self.hidden_admins.push(item),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.moderators.is_empty()
            && self.admins.is_empty()
            && self.hidden_moderators.is_empty()
            && self.hidden_admins.is_empty()
    }
}

impl User {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            created: row.get(2)?,
            last_active: row.get(3)?,
            banned: row.get(4)?,
            global_moderator: row.get(5)?,
            global_admin: row.get(6)?,
            visible_mod: row.get(7)?,
            touched: false,
        })
    }

    pub(crate) fn load(conn: &Connection, id: i64) -> ModelResult<Self> {
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            Self::from_row,
        )
        .optional()?
        .ok_or_else(|| ModelError::NoSuchUser(id.to_string()))
    }

    pub(crate) fn find_by_session_id(
        conn: &Connection,
        session_id: &str,
    ) -> rusqlite::Result<Option<Self>> {
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE session_id = ?1"),
            params![session_id],
            Self::from_row,
        )
        .optional()
    }

    /// Looks up a user by session id, creating the row first if `autovivify` is set.
    pub fn by_session_id(state: &AppState, session_id: &str, autovivify: bool) -> ModelResult<Self> {
        let conn = state.db.get()?;
        if let Some(user) = Self::find_by_session_id(&conn, session_id)? {
            return Ok(user);
        }
        if !autovivify {
            return Err(ModelError::NoSuchUser(session_id.to_string()));
        }

        let now = state.now();
        conn.execute(
            "INSERT INTO users (session_id, created, last_active) VALUES (?1, ?2, ?2)
             ON CONFLICT (session_id) DO NOTHING",
            params![session_id, now],
        )?;
        let mut user = Self::find_by_session_id(&conn, session_id)?
            .ok_or_else(|| ModelError::NoSuchUser(session_id.to_string()))?;
        // A freshly created row already has the current activity time
        user.touched = true;
        Ok(user)
    }

    pub fn by_id(state: &AppState, id: i64) -> ModelResult<Self> {
        let conn = state.db.get()?;
        Self::load(&conn, id)
    }

    /// The internal user that performs local (command line) operations.
    ///
    /// Its session id is `ff` followed by the server pubkey; it is a hidden global admin.
    pub fn system(state: &AppState) -> ModelResult<Self> {
        let session_id = format!("ff{}", state.keys.server_pubkey_hex());
        let conn = state.db.get()?;
        conn.execute(
            "INSERT INTO users (session_id, created, last_active, moderator, admin, visible_mod)
             VALUES (?1, ?2, ?2, TRUE, TRUE, FALSE)
             ON CONFLICT (session_id) DO UPDATE
             SET moderator = TRUE, admin = TRUE, visible_mod = FALSE",
            params![session_id, state.now()],
        )?;
        Self::find_by_session_id(&conn, &session_id)?
            .ok_or(ModelError::NoSuchUser(session_id))
    }

    pub fn is_system_user(&self, state: &AppState) -> bool {
        self.session_id
            .strip_prefix("ff")
            .is_some_and(|rest| rest == state.keys.server_pubkey_hex())
    }

    /// Updates the last activity time. Only the first call does anything unless `force` is set.
    pub fn touch(&mut self, state: &AppState, force: bool) -> ModelResult<()> {
        if self.touched && !force {
            return Ok(());
        }
        let now = state.now();
        let conn = state.db.get()?;
        conn.execute(
            "UPDATE users SET last_active = ?1 WHERE id = ?2",
            params![now, self.id],
        )?;
        self.last_active = now;
        self.touched = true;
        Ok(())
    }

    /// Records activity of this user in `room`.
    pub fn update_room_activity(&mut self, state: &AppState, room: &Room) -> ModelResult<()> {
        self.touch(state, false)?;
        let conn = state.db.get()?;
        conn.execute(
            "INSERT INTO room_users (room, \"user\", last_active) VALUES (?1, ?2, ?3)
             ON CONFLICT (room, \"user\") DO UPDATE SET last_active = excluded.last_active",
            params![room.id, self.id, state.now()],
        )?;
        Ok(())
    }

    /// Makes this user a global moderator or admin, or changes the rank/visibility of one.
    pub fn set_moderator(
        &mut self,
        state: &AppState,
        added_by: &User,
        admin: bool,
        visible: bool,
    ) -> ModelResult<()> {
        if !added_by.global_admin {
            tracing::warn!(
                "Cannot set {} as global {}: {} is not a global admin",
                self,
                if admin { "admin" } else { "moderator" },
                added_by
            );
            return Err(ModelError::BadPermission);
        }

        let conn = state.db.get()?;
        conn.execute(
            "UPDATE users SET moderator = TRUE, admin = ?1, visible_mod = ?2 WHERE id = ?3",
            params![admin, visible, self.id],
        )?;
        self.global_moderator = true;
        self.global_admin = admin;
        self.visible_mod = visible;
        tracing::info!(
            "{} set {} as global {}",
            added_by,
            self,
            if admin { "admin" } else { "moderator" }
        );
        Ok(())
    }

    pub fn remove_moderator(&mut self, state: &AppState, removed_by: &User) -> ModelResult<()> {
        if !removed_by.global_admin {
            tracing::warn!(
                "Cannot remove {} as global mod/admin: {} is not an admin",
                self,
                removed_by
            );
            return Err(ModelError::BadPermission);
        }

        let conn = state.db.get()?;
        conn.execute(
            "UPDATE users SET moderator = FALSE, admin = FALSE WHERE id = ?1",
            params![self.id],
        )?;
        self.global_moderator = false;
        self.global_admin = false;
        tracing::info!("{} removed {} as global mod/admin", removed_by, self);
        Ok(())
    }

    /// Bans this user from every room. Global moderators must be demoted before they can be banned.
    pub fn ban(&mut self, state: &AppState, banned_by: &User) -> ModelResult<()> {
        if !banned_by.global_moderator {
            tracing::warn!("Cannot ban {}: {} is not a global mod/admin", self, banned_by);
            return Err(ModelError::BadPermission);
        }
        if self.global_moderator {
            tracing::warn!("Cannot ban {}: user is a global moderator/admin", self);
            return Err(ModelError::BadPermission);
        }

        let conn = state.db.get()?;
        conn.execute(
            "UPDATE users SET banned = TRUE WHERE id = ?1",
            params![self.id],
        )?;
        self.banned = true;
        tracing::debug!("{} globally banned {}", banned_by, self);
        Ok(())
    }

    pub fn unban(&mut self, state: &AppState, unbanned_by: &User) -> ModelResult<()> {
        if !unbanned_by.global_moderator {
            tracing::warn!(
                "Cannot unban {}: {} is not a global mod/admin",
                self,
                unbanned_by
            );
            return Err(ModelError::BadPermission);
        }

        let conn = state.db.get()?;
        conn.execute(
            "UPDATE users SET banned = FALSE WHERE id = ?1",
            params![self.id],
        )?;
        self.banned = false;
        tracing::debug!("{} removed global ban on {}", unbanned_by, self);
        Ok(())
    }
}

impl fmt::Display for User {
    /// `U[@050123…cdef]`: abbreviated session id, prefixed `@` for global admins and `%` for
    /// global moderators. Ids of unexpected length are printed whole.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sid = &self.session_id;
        if sid.len() != 66 || !sid.is_ascii() {
            return write!(f, "U[{}]", sid);
        }
        let rank = if self.global_admin {
            "@"
        } else if self.global_moderator {
            "%"
        } else {
            ""
        };
        write!(f, "U[{}{}…{}]", rank, &sid[..6], &sid[sid.len() - 4..])
    }
}

/// All global moderators and admins, including hidden ones; the system user is left out.
pub fn get_all_global_moderators(state: &AppState) -> ModelResult<ModeratorLists<User>> {
    let conn = state.db.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE moderator ORDER BY session_id"
    ))?;
    let users = stmt
        .query_map([], User::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut lists = ModeratorLists::default();
    for user in users {
        if user.is_system_user(state) {
            continue;
        }
        let (admin, visible) = (user.global_admin, user.visible_mod);
        lists.push(user, admin, visible);
    }
    Ok(lists)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(session_id: &str, moderator: bool, admin: bool) -> User {
        User {
            id: 1,
            session_id: session_id.to_string(),
            created: 0.0,
            last_active: 0.0,
            banned: false,
            global_moderator: moderator,
            global_admin: admin,
            visible_mod: false,
            touched: false,
        }
    }

    #[test]
    fn display_abbreviates_session_ids() {
        let sid = format!("05{}cdef", "0123".repeat(15));
        assert_eq!(user(&sid, false, false).to_string(), "U[050123…cdef]");
        assert_eq!(user(&sid, true, false).to_string(), "U[%050123…cdef]");
        assert_eq!(user(&sid, true, true).to_string(), "U[@050123…cdef]");
    }

    #[test]
    fn display_prints_odd_ids_whole() {
        assert_eq!(user("deleted", false, false).to_string(), "U[deleted]");
    }

    #[test]
    fn moderator_lists_sort_by_rank_and_visibility() {
        let mut lists = ModeratorLists::default();
        lists.push("a", false, true);
        lists.push("b", true, true);
        lists.push("c", false, false);
        lists.push("d", true, false);
        assert_eq!(lists.moderators, vec!["a"]);
        assert_eq!(lists.admins, vec!["b"]);
        assert_eq!(lists.hidden_moderators, vec!["c"]);
        assert_eq!(lists.hidden_admins, vec!["d"]);
        assert!(!lists.is_empty());
    }
}
