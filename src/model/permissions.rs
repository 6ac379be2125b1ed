//! The permission cascade and the typed builders used to change permission rows.

use std::collections::BTreeMap;
use std::ops::BitOr;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};

/// What a caller must hold in a room. Combine with `|`.
///
/// No requirements at all means "is not banned".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requirements {
    pub admin: bool,
    pub moderator: bool,
    pub read: bool,
    pub accessible: bool,
    pub write: bool,
    pub upload: bool,
}

impl Requirements {
    pub const NONE: Self = Self {
        admin: false,
        moderator: false,
        read: false,
        accessible: false,
        write: false,
        upload: false,
    };
    pub const ADMIN: Self = Self {
        admin: true,
        ..Self::NONE
    };
    pub const MODERATOR: Self = Self {
        moderator: true,
        ..Self::NONE
    };
    pub const READ: Self = Self {
        read: true,
        ..Self::NONE
    };
    pub const ACCESSIBLE: Self = Self {
        accessible: true,
        ..Self::NONE
    };
    pub const WRITE: Self = Self {
        write: true,
        ..Self::NONE
    };
    pub const UPLOAD: Self = Self {
        upload: true,
        ..Self::NONE
    };
}

impl BitOr for Requirements {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            admin: self.admin || rhs.admin,
            moderator: self.moderator || rhs.moderator,
            read: self.read || rhs.read,
            accessible: self.accessible || rhs.accessible,
            write: self.write || rhs.write,
            upload: self.upload || rhs.upload,
        }
    }
}

/// A user's effective permissions in one room, after overrides and globals are applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolvedPermissions {
    pub banned: bool,
    pub read: bool,
    pub accessible: bool,
    pub write: bool,
    pub upload: bool,
    pub moderator: bool,
    pub admin: bool,
}

impl ResolvedPermissions {
    /// Permissions of someone with no override: the room defaults, never banned or a mod.
    pub fn room_defaults(read: bool, accessible: bool, write: bool, upload: bool) -> Self {
        Self {
            banned: false,
            read,
            accessible,
            write,
            upload,
            moderator: false,
            admin: false,
        }
    }

    /// Reads `banned, read, accessible, write, upload, moderator, admin` in that order.
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            banned: row.get(0)?,
            read: row.get(1)?,
            accessible: row.get(2)?,
            write: row.get(3)?,
            upload: row.get(4)?,
            moderator: row.get(5)?,
            admin: row.get(6)?,
        })
    }

    /// Evaluates the cascade: admin, then moderator, then ban and capabilities.
    pub fn allows(&self, req: Requirements) -> bool {
        if self.admin {
            return true;
        }
        if req.admin {
            return false;
        }
        if self.moderator {
            return true;
        }
        if req.moderator {
            return false;
        }
        !self.banned
            && (!req.read || self.read)
            && (!req.accessible || self.accessible || self.read)
            && (!req.write || self.write)
            && (!req.upload || self.upload)
    }
}

/// Columns of `user_permission_overrides` the model is allowed to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OverrideColumn {
    Banned,
    Read,
    Accessible,
    Write,
    Upload,
    Moderator,
    Admin,
    VisibleMod,
}

impl OverrideColumn {
    pub fn as_str(self) -> &'static str {
        match self {
            OverrideColumn::Banned => "banned",
            OverrideColumn::Read => "read",
            OverrideColumn::Accessible => "accessible",
            OverrideColumn::Write => "write",
            OverrideColumn::Upload => "upload",
            OverrideColumn::Moderator => "moderator",
            OverrideColumn::Admin => "admin",
            OverrideColumn::VisibleMod => "visible_mod",
        }
    }
}

/// Access permissions a moderator can grant, revoke or reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    Read,
    Accessible,
    Write,
    Upload,
}

impl Permission {
    pub const ALL: [Permission; 4] = [
        Permission::Read,
        Permission::Accessible,
        Permission::Write,
        Permission::Upload,
    ];

    pub fn column(self) -> OverrideColumn {
        match self {
            Permission::Read => OverrideColumn::Read,
            Permission::Accessible => OverrideColumn::Accessible,
            Permission::Write => OverrideColumn::Write,
            Permission::Upload => OverrideColumn::Upload,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.column().as_str()
    }
}

/// A set of permission changes.
///
/// A permission that is never mentioned is left untouched. `set(p, true/false)` stores an
/// explicit grant or revocation; `reset(p)` clears the override so the room default applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionUpdate {
    changes: BTreeMap<Permission, Option<bool>>,
}

impl PermissionUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, perm: Permission, value: bool) -> Self {
        self.changes.insert(perm, Some(value));
        self
    }

    pub fn reset(mut self, perm: Permission) -> Self {
        self.changes.insert(perm, None);
        self
    }

    pub fn read(self, value: bool) -> Self {
        self.set(Permission::Read, value)
    }

    pub fn accessible(self, value: bool) -> Self {
        self.set(Permission::Accessible, value)
    }

    pub fn write(self, value: bool) -> Self {
        self.set(Permission::Write, value)
    }

    pub fn upload(self, value: bool) -> Self {
        self.set(Permission::Upload, value)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn get(&self, perm: Permission) -> Option<Option<bool>> {
        self.changes.get(&perm).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Permission, Option<bool>)> + '_ {
        self.changes.iter().map(|(p, v)| (*p, *v))
    }

    pub(crate) fn columns(&self) -> Vec<(OverrideColumn, Option<bool>)> {
        self.iter().map(|(p, v)| (p.column(), v)).collect()
    }
}

impl std::fmt::Display for PermissionUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .iter()
            .map(|(p, v)| match v {
                Some(true) => format!("+{}", p.as_str()),
                Some(false) => format!("-{}", p.as_str()),
                None => format!("~{}", p.as_str()),
            })
            .collect();
        write!(f, "[{}]", parts.join(" "))
    }
}

/// Inserts or updates the override row for (room, user), touching only `fields`.
///
/// Columns not listed keep their current value, or their column default on a fresh row.
pub(crate) fn upsert_override(
    conn: &Connection,
    room: i64,
    user: i64,
    fields: &[(OverrideColumn, Option<bool>)],
) -> rusqlite::Result<usize> {
    if fields.is_empty() {
        conn.execute(
            "INSERT INTO user_permission_overrides (room, \"user\") VALUES (?1, ?2)
             ON CONFLICT (room, \"user\") DO NOTHING",
            rusqlite::params![room, user],
        )?;
        return Ok(0);
    }

    let names: Vec<&str> = fields.iter().map(|(c, _)| c.as_str()).collect();
    let sql = format!(
        "INSERT INTO user_permission_overrides (room, \"user\", {cols}) VALUES (?1, ?2, {vals})
         ON CONFLICT (room, \"user\") DO UPDATE SET {sets}",
        cols = names.join(", "),
        vals = crate::db::placeholders(3, fields.len()),
        sets = names
            .iter()
            .map(|n| format!("{n} = excluded.{n}"))
            .collect::<Vec<_>>()
            .join(", "),
    );

    let mut values: Vec<Value> = vec![Value::Integer(room), Value::Integer(user)];
    values.extend(fields.iter().map(|(_, v)| match v {
        Some(b) => Value::Integer(i64::from(*b)),
        None => Value::Null,
    }));

    conn.execute(&sql, params_from_iter(values))
}

/// Constraints for [`get_rooms_with_permission`](crate::model::room::get_rooms_with_permission).
///
/// Each `Some(x)` requires the user's effective permission to equal `x`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermissionFilter {
    pub read: Option<bool>,
    pub accessible: Option<bool>,
    pub write: Option<bool>,
    pub upload: Option<bool>,
    pub banned: Option<bool>,
    pub moderator: Option<bool>,
    pub admin: Option<bool>,
}

impl PermissionFilter {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// SQL conditions over the `user_permissions` view aliased as `perm`.
    pub(crate) fn conditions(&self) -> Vec<String> {
        [
            (self.banned, "perm.banned"),
            (self.read, "perm.read"),
            (self.accessible, "(perm.read OR perm.accessible)"),
            (self.write, "perm.write"),
            (self.upload, "perm.upload"),
            (self.moderator, "perm.moderator"),
            (self.admin, "perm.admin"),
        ]
        .into_iter()
        .filter_map(|(want, expr)| {
            want.map(|w| if w { expr.to_string() } else { format!("NOT {}", expr) })
        })
        .collect()
    }
}
