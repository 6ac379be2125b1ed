//! Moderators, bans and per-user permission overrides.

use std::collections::BTreeMap;

use rusqlite::params;
use serde::Serialize;

use super::{bump_info_updates, Room};
use crate::db;
use crate::error::{ModelError, ModelResult};
use crate::model::permissions::{upsert_override, OverrideColumn, Permission, PermissionUpdate};
use crate::model::user::{ModeratorLists, User};

/// A scheduled permission or ban change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuturePermission {
    pub session_id: String,
    pub at: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessible: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banned: Option<bool>,
}

impl Room {
    /// Moderators `user` may know about, as session ids.
    ///
    /// Hidden moderators and admins are only included when `user` is one of the listed
    /// moderators. The system user is never listed.
    pub fn get_mods(&self, user: Option<&User>) -> ModelResult<ModeratorLists<String>> {
        let conn = self.state.db.get()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, visible_mod, admin FROM user_permissions
             WHERE room = ?1 AND moderator
             ORDER BY session_id",
        )?;
        let rows = stmt
            .query_map(params![self.id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, bool>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let system = format!("ff{}", self.state.keys.server_pubkey_hex());
        let mut lists = ModeratorLists::default();
        for (session_id, visible, admin) in rows {
            if session_id == system {
                continue;
            }
            lists.push(session_id, admin, visible);
        }

        let listed = user.is_some_and(|u| {
            [
                &lists.moderators,
                &lists.admins,
                &lists.hidden_moderators,
                &lists.hidden_admins,
            ]
            .iter()
            .any(|list| list.contains(&u.session_id))
        });
        if !listed {
            lists.hidden_moderators.clear();
            lists.hidden_admins.clear();
        }
        Ok(lists)
    }

    /// Moderators and admins of this room itself (not global ones), hidden or not.
    pub fn get_all_moderators(&self) -> ModelResult<ModeratorLists<String>> {
        let conn = self.state.db.get()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, o.visible_mod, o.admin
             FROM user_permission_overrides o JOIN users ON o.\"user\" = users.id
             WHERE o.room = ?1 AND (o.moderator OR o.admin)
             ORDER BY session_id",
        )?;
        let mut lists = ModeratorLists::default();
        let rows = stmt.query_map(params![self.id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, bool>(1)?,
                row.get::<_, bool>(2)?,
            ))
        })?;
        for row in rows {
            let (session_id, visible, admin) = row?;
            lists.push(session_id, admin, visible);
        }
        Ok(lists)
    }

    /// Makes `user` a moderator (or admin) of this room; `added_by` must be an admin.
    ///
    /// `admin: None` keeps the current admin flag. Any pending scheduled ban or unban of the
    /// user is cancelled.
    pub fn set_moderator(
        &mut self,
        user: &User,
        added_by: &User,
        admin: Option<bool>,
        visible: bool,
    ) -> ModelResult<()> {
        let rank = if admin == Some(true) { "admin" } else { "moderator" };
        if !self.check_admin(Some(added_by))? {
            tracing::warn!(
                "Unable to set {} as {} of {}: {} is not an admin",
                user,
                rank,
                self,
                added_by
            );
            return Err(ModelError::BadPermission);
        }
        let (target, needs_blinding) = self.moderation_target(user)?;

        let mut fields = vec![(OverrideColumn::Moderator, Some(true))];
        if let Some(admin) = admin {
            fields.push((OverrideColumn::Admin, Some(admin)));
        }
        fields.push((OverrideColumn::VisibleMod, Some(visible)));

        let (state, room_id) = (&self.state, self.id);
        let info_updates = db::transaction(&state.db, |tx| -> ModelResult<i64> {
            upsert_override(tx, room_id, target.id, &fields)?;
            tx.execute(
                "DELETE FROM user_ban_futures WHERE room = ?1 AND \"user\" = ?2",
                params![room_id, target.id],
            )?;
            if needs_blinding {
                state.keys.record_needs_blinding(tx, &target, state.now())?;
            }
            Ok(bump_info_updates(tx, room_id)?)
        })?;

        self.info_updates = info_updates;
        self.forget_permissions(&[user.id, target.id]);
        tracing::info!("{} set {} as {} of {}", added_by, target, rank, self);
        Ok(())
    }

    /// Removes `user`'s room moderator status, or only the admin part of it.
    pub fn remove_moderator(
        &mut self,
        user: &User,
        removed_by: &User,
        admin_only: bool,
    ) -> ModelResult<()> {
        if !self.check_admin(Some(removed_by))? {
            tracing::warn!(
                "Unable to remove {} as mod/admin of {}: {} is not an admin",
                user,
                self,
                removed_by
            );
            return Err(ModelError::BadPermission);
        }

        let (state, room_id) = (&self.state, self.id);
        let info_updates = db::transaction(&state.db, |tx| -> ModelResult<Option<i64>> {
            let sql = if admin_only {
                "UPDATE user_permission_overrides SET admin = FALSE
                 WHERE room = ?1 AND \"user\" = ?2"
            } else {
                "UPDATE user_permission_overrides
                 SET admin = FALSE, moderator = FALSE, visible_mod = TRUE
                 WHERE room = ?1 AND \"user\" = ?2"
            };
            if tx.execute(sql, params![room_id, user.id])? == 0 {
                return Ok(None);
            }
            Ok(Some(bump_info_updates(tx, room_id)?))
        })?;

        if let Some(info_updates) = info_updates {
            self.info_updates = info_updates;
        }
        self.forget_permissions(&[user.id]);
        tracing::info!(
            "{} removed {} as {} of {}",
            removed_by,
            user,
            if admin_only { "admin" } else { "mod/admin" },
            self
        );
        Ok(())
    }

    /// Bans `to_ban` from this room, for `timeout` seconds or until unbanned.
    ///
    /// Any timeout schedules an unban, including zero or negative ones: those ban right away
    /// and are lifted by the next sweep. Self-bans and bans of global moderators are refused,
    /// and only admins may ban room moderators.
    pub fn ban_user(&mut self, to_ban: &User, by: &User, timeout: Option<f64>) -> ModelResult<()> {
        let (target, needs_blinding) = self.moderation_target(to_ban)?;

        let target_is_mod = self.check_moderator(Some(&target))?;
        let fail = if !self.check_moderator(Some(by))? {
            Some("user is not a moderator")
        } else if target.id == by.id || to_ban.id == by.id {
            Some("self-ban not permitted")
        } else if target.global_moderator {
            Some("global mods/admins cannot be banned")
        } else if target_is_mod && !self.check_admin(Some(by))? {
            Some("only admins can ban room mods/admins")
        } else {
            None
        };
        if let Some(reason) = fail {
            tracing::warn!("Error banning {} from {} by {}: {}", target, self, by, reason);
            return Err(ModelError::BadPermission);
        }

        let (state, room_id) = (&self.state, self.id);
        let info_updates = db::transaction(&state.db, |tx| -> ModelResult<Option<i64>> {
            upsert_override(
                tx,
                room_id,
                target.id,
                &[
                    (OverrideColumn::Banned, Some(true)),
                    (OverrideColumn::Moderator, Some(false)),
                    (OverrideColumn::Admin, Some(false)),
                ],
            )?;

            // Replace (or drop) any scheduled unban
            tx.execute(
                "DELETE FROM user_ban_futures WHERE room = ?1 AND \"user\" = ?2 AND NOT banned",
                params![room_id, target.id],
            )?;
            if let Some(timeout) = timeout {
                tx.execute(
                    "INSERT INTO user_ban_futures (room, \"user\", at, banned)
                     VALUES (?1, ?2, ?3, FALSE)",
                    params![room_id, target.id, state.now() + timeout],
                )?;
            }

            if needs_blinding {
                state.keys.record_needs_blinding(tx, &target, state.now())?;
            }
            Ok(if target_is_mod {
                Some(bump_info_updates(tx, room_id)?)
            } else {
                None
            })
        })?;

        if let Some(info_updates) = info_updates {
            self.info_updates = info_updates;
        }
        self.forget_permissions(&[to_ban.id, target.id]);
        match timeout {
            Some(t) => tracing::debug!("Banned {} from {} for {}s (banned by {})", target, self, t, by),
            None => tracing::debug!("Banned {} from {} (banned by {})", target, self, by),
        }
        Ok(())
    }

    /// Lifts a room ban. Returns false if the user was not banned here.
    pub fn unban_user(&mut self, to_unban: &User, by: &User) -> ModelResult<bool> {
        if !self.check_moderator(Some(by))? {
            tracing::warn!(
                "Error unbanning {} from {} by {}: not a moderator",
                to_unban,
                self,
                by
            );
            return Err(ModelError::BadPermission);
        }

        let room_id = self.id;
        let unbanned = db::transaction(&self.state.db, |tx| -> ModelResult<usize> {
            let n = tx.execute(
                "UPDATE user_permission_overrides SET banned = FALSE
                 WHERE room = ?1 AND \"user\" = ?2 AND banned",
                params![room_id, to_unban.id],
            )?;
            tx.execute(
                "DELETE FROM user_ban_futures WHERE room = ?1 AND \"user\" = ?2 AND NOT banned",
                params![room_id, to_unban.id],
            )?;
            Ok(n)
        })?;

        if unbanned > 0 {
            self.forget_permissions(&[to_unban.id]);
            tracing::debug!("{} unbanned {} from {}", by, to_unban, self);
            Ok(true)
        } else {
            tracing::debug!("{} unbanned {} from {} (but user was not banned)", by, to_unban, self);
            Ok(false)
        }
    }

    /// Session ids banned here, including global bans. Does not check permissions.
    pub fn get_bans(&self) -> ModelResult<Vec<String>> {
        db::query(
            &self.state.db,
            "SELECT session_id FROM user_permissions WHERE room = ?1 AND banned
             ORDER BY session_id",
            params![self.id],
            |row| row.get(0),
        )
    }

    /// Grants, revokes or resets access permissions of `user`; `by` must be a moderator.
    ///
    /// Scheduled changes to the same permissions are dropped, since this decision replaces them.
    pub fn set_permissions(
        &mut self,
        user: &User,
        by: &User,
        update: &PermissionUpdate,
    ) -> ModelResult<()> {
        if update.is_empty() {
            return Err(ModelError::InvalidData(
                "at least one permission must be given".to_string(),
            ));
        }
        if !self.check_moderator(Some(by))? {
            tracing::warn!("Error setting permissions {} on {} by {}: not a moderator", update, user, by);
            return Err(ModelError::BadPermission);
        }
        let (target, needs_blinding) = self.moderation_target(user)?;

        let (state, room_id) = (&self.state, self.id);
        db::transaction(&state.db, |tx| -> ModelResult<()> {
            upsert_override(tx, room_id, target.id, &update.columns())?;

            for (perm, _) in update.iter() {
                tx.execute(
                    &format!(
                        "UPDATE user_permission_futures SET {} = NULL
                         WHERE room = ?1 AND \"user\" = ?2",
                        perm.as_str()
                    ),
                    params![room_id, target.id],
                )?;
            }
            tx.execute(
                "DELETE FROM user_permission_futures
                 WHERE room = ?1 AND \"user\" = ?2 AND read IS NULL AND accessible IS NULL
                    AND write IS NULL AND upload IS NULL",
                params![room_id, target.id],
            )?;

            if needs_blinding {
                state.keys.record_needs_blinding(tx, &target, state.now())?;
            }
            Ok(())
        })?;

        self.forget_permissions(&[user.id, target.id]);
        tracing::debug!("{} applied {} permission(s) {} to {}", by, self, update, target);
        Ok(())
    }

    /// Schedules permission changes for `user`, applied by the sweeper after `delay` seconds.
    ///
    /// Only grants and revocations can be scheduled, not resets to the room default.
    pub fn schedule_permissions(
        &mut self,
        user: &User,
        by: &User,
        update: &PermissionUpdate,
        delay: f64,
    ) -> ModelResult<()> {
        if update.is_empty() {
            return Err(ModelError::InvalidData(
                "at least one permission must be given".to_string(),
            ));
        }
        if update.iter().any(|(_, value)| value.is_none()) {
            return Err(ModelError::InvalidData(
                "scheduled permission changes cannot reset to the room default".to_string(),
            ));
        }
        if !self.check_moderator(Some(by))? {
            tracing::warn!(
                "Error scheduling permissions {} on {} by {}: not a moderator",
                update,
                user,
                by
            );
            return Err(ModelError::BadPermission);
        }
        let (target, _) = self.moderation_target(user)?;

        let at = self.state.now() + delay;
        let value = |perm: Permission| update.get(perm).flatten();
        {
            let conn = self.state.db.get()?;
            conn.execute(
                "INSERT INTO user_permission_futures
                    (room, \"user\", at, read, accessible, write, upload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    self.id,
                    target.id,
                    at,
                    value(Permission::Read),
                    value(Permission::Accessible),
                    value(Permission::Write),
                    value(Permission::Upload),
                ],
            )?;
        }
        tracing::debug!(
            "{} scheduled {} permission(s) {} for {} in {}s",
            by,
            self,
            update,
            target,
            delay
        );
        Ok(())
    }

    /// Every override row in the room, by session id.
    ///
    /// Access permissions appear when explicitly set; the banned/moderator/admin/visible_mod
    /// flags only when true.
    pub fn permissions(&self) -> ModelResult<BTreeMap<String, BTreeMap<&'static str, bool>>> {
        let conn = self.state.db.get()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, o.banned, o.read, o.accessible, o.write, o.upload,
                    o.moderator, o.admin, o.visible_mod
             FROM user_permission_overrides o JOIN users ON o.\"user\" = users.id
             WHERE o.room = ?1",
        )?;
        let mut rows = stmt.query(params![self.id])?;

        let mut all = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let session_id: String = row.get(0)?;
            let mut perms = BTreeMap::new();
            for (i, name) in [(1usize, "banned"), (6, "moderator"), (7, "admin"), (8, "visible_mod")] {
                if row.get::<_, bool>(i)? {
                    perms.insert(name, true);
                }
            }
            for (i, name) in [(2usize, "read"), (3, "accessible"), (4, "write"), (5, "upload")] {
                if let Some(value) = row.get::<_, Option<bool>>(i)? {
                    perms.insert(name, value);
                }
            }
            all.insert(session_id, perms);
        }
        Ok(all)
    }

    /// Pending permission and ban changes, soonest first.
    pub fn future_permissions(&self) -> ModelResult<Vec<FuturePermission>> {
        db::query(
            &self.state.db,
            "SELECT users.session_id, f.at, f.read, f.accessible, f.write, f.upload, f.banned
             FROM (
                SELECT \"user\", at, read, accessible, write, upload, NULL AS banned
                FROM user_permission_futures WHERE room = ?1
                UNION ALL
                SELECT \"user\", at, NULL, NULL, NULL, NULL, banned
                FROM user_ban_futures WHERE room = ?1
             ) f JOIN users ON f.\"user\" = users.id
             ORDER BY f.at",
            params![self.id],
            |row| {
                Ok(FuturePermission {
                    session_id: row.get(0)?,
                    at: row.get(1)?,
                    read: row.get(2)?,
                    accessible: row.get(3)?,
                    write: row.get(4)?,
                    upload: row.get(5)?,
                    banned: row.get(6)?,
                })
            },
        )
    }
}
