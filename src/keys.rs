//! Seam to the session-key subsystem.
//!
//! Key derivation and blinding live outside this crate. The model only needs the server's
//! public key (to recognise the system user) and, when blinded ids are required, a way to
//! find a user's blinded identity or queue the user for later re-keying.

use rusqlite::{params, Connection};

use crate::error::ModelResult;
use crate::model::user::User;

pub trait SessionKeys: Send + Sync {
    /// Hex-encoded server public key.
    fn server_pubkey_hex(&self) -> &str;

    /// Returns the blinded user record corresponding to `user`, if one is known.
    fn find_blinded(&self, conn: &Connection, user: &User) -> ModelResult<Option<User>>;

    /// Notes that `user` has moderation records keyed to an unblinded id.
    fn record_needs_blinding(&self, conn: &Connection, user: &User, now: f64) -> ModelResult<()>;
}

/// Key collaborator for servers that do not derive blinded ids themselves.
#[derive(Debug, Clone)]
pub struct StaticKeys {
    pubkey_hex: String,
}

impl StaticKeys {
    pub fn new(pubkey_hex: impl Into<String>) -> Self {
        Self {
            pubkey_hex: pubkey_hex.into().to_lowercase(),
        }
    }
}

impl SessionKeys for StaticKeys {
    fn server_pubkey_hex(&self) -> &str {
        &self.pubkey_hex
    }

    fn find_blinded(&self, _conn: &Connection, _user: &User) -> ModelResult<Option<User>> {
        Ok(None)
    }

    fn record_needs_blinding(&self, conn: &Connection, user: &User, now: f64) -> ModelResult<()> {
        conn.execute(
            "INSERT INTO needs_blinding (\"user\", recorded) VALUES (?1, ?2)
             ON CONFLICT(\"user\") DO NOTHING",
            params![user.id, now],
        )?;
        Ok(())
    }
}
