//! Id translation for rooms imported from an older server database.
//!
//! Imported rooms had their message ids shifted by a fixed offset and their files re-numbered.
//! Clients that still remember the old ids are translated here, at the boundary, so nothing
//! else in the model needs to know the offsets exist.

use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MessageOffset {
    old_max: i64,
    offset: i64,
}

#[derive(Debug, Clone, Default)]
pub struct LegacyIds {
    messages: HashMap<i64, MessageOffset>,
    has_file_map: bool,
}

impl LegacyIds {
    pub fn load(conn: &Connection) -> Result<Self, rusqlite::Error> {
        let mut stmt = conn
            .prepare("SELECT room, old_message_id_max, message_id_offset FROM room_import_hacks")?;
        let messages = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    MessageOffset {
                        old_max: row.get(1)?,
                        offset: row.get(2)?,
                    },
                ))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;

        let has_file_map: bool =
            conn.query_row("SELECT EXISTS(SELECT 1 FROM file_id_hacks)", [], |row| {
                row.get(0)
            })?;

        if !messages.is_empty() || has_file_map {
            tracing::info!(
                "Loaded legacy id maps: {} imported rooms, file map: {}",
                messages.len(),
                has_file_map
            );
        }

        Ok(Self {
            messages,
            has_file_map,
        })
    }

    /// Translates a client-supplied "messages after id" value for `room_id`.
    pub fn map_message_id(&self, room_id: i64, id: i64) -> i64 {
        match self.messages.get(&room_id) {
            Some(m) if id <= m.old_max => id + m.offset,
            _ => id,
        }
    }

    /// Looks up the current id of a file referenced by its pre-import id.
    pub fn map_file_id(
        &self,
        conn: &Connection,
        room_id: i64,
        old_file_id: i64,
    ) -> Result<Option<i64>, rusqlite::Error> {
        if !self.has_file_map {
            return Ok(None);
        }
        conn.query_row(
            "SELECT file FROM file_id_hacks WHERE room = ?1 AND old_file_id = ?2",
            params![room_id, old_file_id],
            |row| row.get(0),
        )
        .optional()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmapped_rooms_pass_ids_through() {
        let ids = LegacyIds::default();
        assert_eq!(ids.map_message_id(1, 42), 42);
    }

    #[test]
    fn old_ids_are_shifted_by_offset() {
        let mut ids = LegacyIds::default();
        ids.messages.insert(
            3,
            MessageOffset {
                old_max: 100,
                offset: 5000,
            },
        );
        assert_eq!(ids.map_message_id(3, 100), 5100);
        assert_eq!(ids.map_message_id(3, 101), 101);
        assert_eq!(ids.map_message_id(4, 50), 50);
    }
}
