use rusqlite::Row;
use serde::Serialize;

use crate::padding::add_session_message_padding;

/// Columns selected from `message_details`, in the order [`Message::from_details_row`] reads.
pub(crate) const DETAIL_COLUMNS: &str =
    "id, session_id, posted, edited, seqno, data, data_size, signature, whisper_mods, whisper_to";

/// A message as a reader sees it.
///
/// `data` carries the client padding again (it is stored without it); `None` means the message
/// was deleted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: i64,
    pub session_id: String,
    pub posted: f64,
    pub seqno: i64,
    pub data: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited: Option<f64>,
    pub whisper: bool,
    pub whisper_mods: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whisper_to: Option<String>,
}

impl Message {
    pub(crate) fn from_details_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let data: Option<Vec<u8>> = row.get(5)?;
        let data_size: Option<i64> = row.get(6)?;
        let whisper_mods: bool = row.get(8)?;
        let whisper_to: Option<String> = row.get(9)?;

        let (data, signature) = match data {
            Some(data) => {
                let size = data_size.map_or(data.len(), |s| s.max(0) as usize);
                (
                    Some(add_session_message_padding(&data, size)),
                    row.get(7)?,
                )
            }
            None => (None, None),
        };

        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            posted: row.get(2)?,
            edited: row.get(3)?,
            seqno: row.get(4)?,
            data,
            signature,
            whisper: whisper_to.is_some() || whisper_mods,
            whisper_mods,
            whisper_to,
        })
    }
}

/// Which messages [`Room::get_messages_for`](crate::model::room::Room::get_messages_for) returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageQuery {
    /// Everything posted, edited or deleted after the given seqno, oldest change first.
    /// Deleted messages are included (with no data).
    Since(i64),
    /// Messages with a larger id, ascending. Misses edits and deletions.
    After(i64),
    /// Messages with a smaller id, newest first.
    Before(i64),
    /// The newest messages, newest first.
    Recent,
    /// Just this message, if it exists and the reader may see it.
    Single(i64),
}

/// Optional parts of a new post.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostOptions {
    /// Session id of the only non-moderator who may see the post
    pub whisper_to: Option<String>,
    /// Show the post to the room's moderators only
    pub whisper_mods: bool,
    /// Ids of the poster's recent uploads to attach
    pub files: Vec<i64>,
}

impl PostOptions {
    pub fn is_whisper(&self) -> bool {
        self.whisper_to.is_some() || self.whisper_mods
    }
}
