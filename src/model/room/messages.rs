//! Posting, editing, deleting and reading messages.

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use super::{bind, bump_info_updates, id_values, Room};
use crate::db::{self, ID_BATCH_SIZE};
use crate::error::{ModelError, ModelResult};
use crate::model::message::{Message, MessageQuery, PostOptions, DETAIL_COLUMNS};
use crate::model::user::User;
use crate::padding::remove_session_message_padding;
use crate::state::AppState;

pub const SIGNATURE_SIZE: usize = 64;

/// Uploads older than this can no longer be claimed by a post.
const ATTACH_WINDOW: f64 = 3600.0;

/// Bumps the room's message counter and returns the new value, for stamping onto a message.
fn next_seqno(conn: &Connection, room_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "UPDATE rooms SET message_sequence = message_sequence + 1 WHERE id = ?1
         RETURNING message_sequence",
        params![room_id],
        |row| row.get(0),
    )
}

/// Keeps the current body of a message before it is replaced or deleted.
fn record_history(conn: &Connection, msg_id: i64, now: f64) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO message_history (message, replaced, data, signature)
         SELECT id, ?2, data, signature FROM messages WHERE id = ?1",
        params![msg_id, now],
    )
}

#[derive(Debug, Default)]
struct DeleteOutcome {
    last_seqno: Option<i64>,
    info_updates: Option<i64>,
}

/// Soft-deletes live messages: the body goes to history, the row is cleared and re-stamped,
/// its attachments expire and any pin on it is dropped.
fn soft_delete(
    conn: &Connection,
    room_id: i64,
    ids: &[i64],
    now: f64,
) -> ModelResult<DeleteOutcome> {
    let mut outcome = DeleteOutcome::default();
    let mut unpinned = 0;
    for &id in ids {
        record_history(conn, id, now)?;
        let seqno = next_seqno(conn, room_id)?;
        conn.execute(
            "UPDATE messages SET data = NULL, data_size = NULL, signature = NULL, seqno = ?1
             WHERE id = ?2",
            params![seqno, id],
        )?;
        conn.execute(
            "UPDATE files SET expiry = 0.0
             WHERE message = ?1 AND id IS NOT (SELECT image FROM rooms WHERE id = ?2)",
            params![id, room_id],
        )?;
        unpinned += conn.execute(
            "DELETE FROM pinned_messages WHERE room = ?1 AND message = ?2",
            params![room_id, id],
        )?;
        outcome.last_seqno = Some(seqno);
    }
    if unpinned > 0 {
        outcome.info_updates = Some(bump_info_updates(conn, room_id)?);
    }
    Ok(outcome)
}

/// Attaches the given uploads to `msg_id`.
///
/// Only files that belong to this room, were uploaded by `user_id` within the last hour, are
/// not attached to anything yet and have not expired are claimed; they get the default
/// attachment lifetime. Anything else in `files` is ignored.
fn own_files(
    conn: &Connection,
    state: &AppState,
    room_id: i64,
    msg_id: i64,
    files: &[i64],
    user_id: i64,
) -> ModelResult<usize> {
    let now = state.now();
    let expiry = state.config.files.claimed_expiry(now);
    let mut owned = 0;
    for chunk in files.chunks(ID_BATCH_SIZE) {
        let sql = format!(
            "UPDATE files SET message = ?1, expiry = ?2
             WHERE room = ?3 AND uploader = ?4 AND message IS NULL
                AND uploaded >= ?5 AND expiry IS NOT NULL AND expiry > ?6
                AND id IN ({})",
            db::placeholders(7, chunk.len())
        );
        let mut values = vec![
            Value::Integer(msg_id),
            expiry.map_or(Value::Null, Value::Real),
            Value::Integer(room_id),
            Value::Integer(user_id),
            Value::Real(now - ATTACH_WINDOW),
            Value::Real(now),
        ];
        values.extend(id_values(chunk));
        owned += conn.execute(&sql, params_from_iter(values))?;
    }
    Ok(owned)
}

impl Room {
    /// Messages `user` may see, chosen by `query`, at most `limit` of them.
    ///
    /// Filtered messages are never returned. Whispers are included for their recipient, and
    /// for moderators when addressed to moderators or sent by them.
    pub fn get_messages_for(
        &mut self,
        user: Option<&User>,
        query: MessageQuery,
        limit: usize,
    ) -> ModelResult<Vec<Message>> {
        let moderator = self.check_moderator(user)?;

        let mut values = vec![Value::Integer(self.id)];
        let mut conditions = vec!["room = ?1".to_string(), "NOT filtered".to_string()];
        if !matches!(query, MessageQuery::Since(_)) {
            conditions.push("data IS NOT NULL".to_string());
        }

        let order = match query {
            MessageQuery::Since(seqno) => {
                let p = bind(&mut values, Value::Integer(seqno));
                conditions.push(format!("seqno > {p}"));
                Some("seqno ASC")
            }
            MessageQuery::After(id) => {
                let id = self.state.legacy.map_message_id(self.id, id);
                let p = bind(&mut values, Value::Integer(id));
                conditions.push(format!("id > {p}"));
                Some("id ASC")
            }
            MessageQuery::Before(id) => {
                let p = bind(&mut values, Value::Integer(id));
                conditions.push(format!("id < {p}"));
                Some("id DESC")
            }
            MessageQuery::Recent => Some("id DESC"),
            MessageQuery::Single(id) => {
                let p = bind(&mut values, Value::Integer(id));
                conditions.push(format!("id = {p}"));
                None
            }
        };

        match user {
            Some(user) if moderator => {
                let p = bind(&mut values, Value::Integer(user.id));
                conditions.push(format!(
                    "(whisper_mods OR whisper = {p} OR \"user\" = {p} OR whisper IS NULL)"
                ));
            }
            Some(user) => {
                let p = bind(&mut values, Value::Integer(user.id));
                conditions.push(format!(
                    "(whisper = {p} OR (whisper IS NULL AND NOT whisper_mods))"
                ));
            }
            None => conditions.push("(whisper IS NULL AND NOT whisper_mods)".to_string()),
        }

        let mut sql = format!(
            "SELECT {DETAIL_COLUMNS} FROM message_details WHERE {}",
            conditions.join(" AND ")
        );
        if let Some(order) = order {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let p = bind(&mut values, Value::Integer(limit));
            sql.push_str(&format!(" ORDER BY {order} LIMIT {p}"));
        }

        let conn = self.state.db.get()?;
        let mut stmt = conn.prepare(&sql)?;
        let messages = stmt
            .query_map(params_from_iter(values), Message::from_details_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Runs the content filter over a post body.
    ///
    /// `Ok(false)`: the post passes (or the filter is off, or the poster is an admin).
    /// `Ok(true)`: accept the post but hide it. `Err(PostRejected)`: refuse it.
    pub fn should_filter(&mut self, user: &User, data: &[u8]) -> ModelResult<bool> {
        if !self.state.config.filter.enabled || self.check_admin(Some(user))? {
            return Ok(false);
        }
        let body = String::from_utf8_lossy(remove_session_message_padding(data));
        if !self.state.filter.contains_profanity(&body) {
            return Ok(false);
        }
        if self.state.config.filter.silent {
            tracing::debug!("Silently filtering post by {} in {}", user, self);
            Ok(true)
        } else {
            tracing::debug!("Rejecting filtered post by {} in {}", user, self);
            Err(ModelError::PostRejected("filtration rejected message".to_string()))
        }
    }

    /// Posts a message. `data` is the padded body as sent by the client.
    pub fn add_post(
        &mut self,
        user: &User,
        data: &[u8],
        signature: &[u8],
        opts: PostOptions,
    ) -> ModelResult<Message> {
        if !self.check_write(Some(user))? {
            return Err(ModelError::BadPermission);
        }
        if signature.len() != SIGNATURE_SIZE {
            return Err(ModelError::InvalidData(format!(
                "signature must be {SIGNATURE_SIZE} bytes"
            )));
        }
        if opts.is_whisper() && !self.check_moderator(Some(user))? {
            tracing::warn!("Cannot post a whisper to {}: {} is not a moderator", self, user);
            return Err(ModelError::BadPermission);
        }

        let whisper_to = match &opts.whisper_to {
            Some(session_id) => Some(User::by_session_id(&self.state, session_id, true)?),
            None => None,
        };
        let filtered = self.should_filter(user, data)?;
        let rate_limited =
            self.state.config.rooms.rate_limit_size > 0 && !self.check_admin(Some(user))?;

        let (state, room_id) = (&self.state, self.id);
        let message = db::transaction(&state.db, |tx| -> ModelResult<Message> {
            let now = state.now();
            if rate_limited {
                let recent: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM messages
                     WHERE room = ?1 AND \"user\" = ?2 AND posted >= ?3",
                    params![room_id, user.id, now - state.config.rooms.rate_limit_interval],
                    |row| row.get(0),
                )?;
                if recent >= i64::from(state.config.rooms.rate_limit_size) {
                    return Err(ModelError::PostRateLimited);
                }
            }

            let seqno = next_seqno(tx, room_id)?;
            let id = db::insert_and_get_pk(
                tx,
                "INSERT INTO messages
                    (room, \"user\", posted, seqno, data, data_size, signature, filtered,
                     whisper, whisper_mods)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                "id",
                params![
                    room_id,
                    user.id,
                    now,
                    seqno,
                    remove_session_message_padding(data),
                    data.len() as i64,
                    signature,
                    filtered,
                    whisper_to.as_ref().map(|u| u.id),
                    opts.whisper_mods,
                ],
            )?;

            if !opts.files.is_empty() {
                own_files(tx, state, room_id, id, &opts.files, user.id)?;
            }

            Ok(Message {
                id,
                session_id: user.session_id.clone(),
                posted: now,
                seqno,
                data: Some(data.to_vec()),
                signature: Some(signature.to_vec()),
                edited: None,
                whisper: opts.is_whisper(),
                whisper_mods: opts.whisper_mods,
                whisper_to: whisper_to.as_ref().map(|u| u.session_id.clone()),
            })
        })?;

        self.message_sequence = message.seqno;
        Ok(message)
    }

    /// Replaces the body of one of `user`'s own posts.
    ///
    /// The user must still have write access now. If the new body is silently filtered the
    /// call succeeds but the post is left as it was.
    pub fn edit_post(
        &mut self,
        user: &User,
        msg_id: i64,
        data: &[u8],
        signature: &[u8],
        files: &[i64],
    ) -> ModelResult<()> {
        if !self.check_write(Some(user))? {
            return Err(ModelError::BadPermission);
        }
        if signature.len() != SIGNATURE_SIZE {
            return Err(ModelError::InvalidData(format!(
                "signature must be {SIGNATURE_SIZE} bytes"
            )));
        }
        let filtered = self.should_filter(user, data)?;

        let (state, room_id) = (&self.state, self.id);
        let seqno = db::transaction(&state.db, |tx| -> ModelResult<Option<i64>> {
            let author: i64 = tx
                .query_row(
                    "SELECT \"user\" FROM messages
                     WHERE id = ?1 AND room = ?2 AND data IS NOT NULL",
                    params![msg_id, room_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(ModelError::NoSuchPost(msg_id))?;
            if author != user.id {
                tracing::warn!("{} cannot edit message {}: not the author", user, msg_id);
                return Err(ModelError::BadPermission);
            }
            if filtered {
                return Ok(None);
            }

            let now = state.now();
            record_history(tx, msg_id, now)?;
            let seqno = next_seqno(tx, room_id)?;
            tx.execute(
                "UPDATE messages
                 SET data = ?1, data_size = ?2, signature = ?3, edited = ?4, seqno = ?5
                 WHERE id = ?6",
                params![
                    remove_session_message_padding(data),
                    data.len() as i64,
                    signature,
                    now,
                    seqno,
                    msg_id
                ],
            )?;

            if !files.is_empty() {
                own_files(tx, state, room_id, msg_id, files, user.id)?;
            }
            Ok(Some(seqno))
        })?;

        match seqno {
            Some(seqno) => self.message_sequence = seqno,
            None => tracing::debug!("Dropped filtered edit of message {} in {}", msg_id, self),
        }
        Ok(())
    }

    fn apply_delete_outcome(&mut self, outcome: DeleteOutcome) {
        if let Some(seqno) = outcome.last_seqno {
            self.message_sequence = seqno;
        }
        if let Some(info_updates) = outcome.info_updates {
            self.info_updates = info_updates;
            self.pinned = None;
        }
    }

    /// Deletes messages by id and returns the ids that were actually deleted.
    ///
    /// Moderators may delete anything; anyone else only their own posts, and a batch that
    /// includes someone else's post is refused as a whole. Ids that do not exist here or are
    /// already deleted are skipped.
    pub fn delete_posts(&mut self, message_ids: &[i64], deleter: &User) -> ModelResult<Vec<i64>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let moderator = self.check_moderator(Some(deleter))?;

        let (state, room_id) = (&self.state, self.id);
        let (deleted, outcome) = db::transaction(&state.db, |tx| -> ModelResult<_> {
            let now = state.now();
            let mut deleted = Vec::new();
            let mut outcome = DeleteOutcome::default();

            for chunk in message_ids.chunks(ID_BATCH_SIZE) {
                let mut stmt = tx.prepare(&format!(
                    "SELECT id FROM messages
                     WHERE room = ?1 AND data IS NOT NULL AND id IN ({})
                     ORDER BY id",
                    db::placeholders(2, chunk.len())
                ))?;
                let ids = stmt
                    .query_map(
                        params_from_iter(
                            std::iter::once(Value::Integer(room_id)).chain(id_values(chunk)),
                        ),
                        |row| row.get(0),
                    )?
                    .collect::<Result<Vec<i64>, _>>()?;
                drop(stmt);
                if ids.is_empty() {
                    continue;
                }

                if !moderator {
                    let foreign: bool = tx.query_row(
                        &format!(
                            "SELECT EXISTS(SELECT 1 FROM messages WHERE \"user\" != ?1 AND id IN ({}))",
                            db::placeholders(2, ids.len())
                        ),
                        params_from_iter(
                            std::iter::once(Value::Integer(deleter.id)).chain(id_values(&ids)),
                        ),
                        |row| row.get(0),
                    )?;
                    if foreign {
                        tracing::warn!(
                            "{} cannot delete messages of other users in {}: not a moderator",
                            deleter,
                            self
                        );
                        return Err(ModelError::BadPermission);
                    }
                }

                let batch = soft_delete(tx, room_id, &ids, now)?;
                outcome.last_seqno = batch.last_seqno.or(outcome.last_seqno);
                outcome.info_updates = batch.info_updates.or(outcome.info_updates);
                deleted.extend(ids);
            }
            Ok((deleted, outcome))
        })?;

        self.apply_delete_outcome(outcome);
        if !deleted.is_empty() {
            tracing::debug!("{} deleted {} message(s) from {}", deleter, deleted.len(), self);
        }
        Ok(deleted)
    }

    /// Deletes every post of `poster` in this room and expires their uploads here, except the
    /// room image. Returns the number of posts and files affected.
    ///
    /// `deleter` must be the poster or a moderator, and an admin to clear out another admin.
    pub fn delete_all_posts(&mut self, poster: &User, deleter: &User) -> ModelResult<(usize, usize)> {
        let fail = if poster.id != deleter.id && !self.check_moderator(Some(deleter))? {
            Some("user is not a moderator")
        } else if self.check_admin(Some(poster))? && !self.check_admin(Some(deleter))? {
            Some("only admins can delete all posts of another admin")
        } else {
            None
        };
        if let Some(reason) = fail {
            tracing::warn!(
                "Error deleting all posts by {} from {} by {}: {}",
                poster,
                self,
                deleter,
                reason
            );
            return Err(ModelError::BadPermission);
        }

        let (state, room_id) = (&self.state, self.id);
        let (posts, files, outcome) = db::transaction(&state.db, |tx| -> ModelResult<_> {
            let mut stmt = tx.prepare(
                "SELECT id FROM messages WHERE room = ?1 AND \"user\" = ?2 AND data IS NOT NULL
                 ORDER BY id",
            )?;
            let ids = stmt
                .query_map(params![room_id, poster.id], |row| row.get(0))?
                .collect::<Result<Vec<i64>, _>>()?;
            drop(stmt);

            let outcome = soft_delete(tx, room_id, &ids, state.now())?;
            let files = tx.execute(
                "UPDATE files SET expiry = 0.0
                 WHERE room = ?1 AND uploader = ?2
                    AND id IS NOT (SELECT image FROM rooms WHERE id = ?1)",
                params![room_id, poster.id],
            )?;
            Ok((ids.len(), files, outcome))
        })?;

        self.apply_delete_outcome(outcome);
        tracing::debug!(
            "Delete all posts by {} from {}: {} posts, {} files",
            poster,
            self,
            posts,
            files
        );
        Ok((posts, files))
    }
}
