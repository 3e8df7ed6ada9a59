use rusqlite::params;

use chatpsi_shared::{ClientRef, Message, MessageBody, MessageId, MessageKind, Sender, ThreadId, UserId};

use crate::database::{conversion_error, format_ts, parse_ts, parse_uuid, Database};
use crate::error::{Result, StoreError};

const MESSAGE_COLUMNS: &str =
    "id, thread_id, user_id, sender, type, content, media_url, client_ref, created_at, is_deleted";

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages
                (id, thread_id, user_id, sender, type, content, media_url, client_ref, created_at, is_deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                message.id.to_string(),
                message.thread_id.to_string(),
                message.user_id.to_string(),
                message.sender.as_str(),
                message.kind().as_str(),
                message.content(),
                message.body.media_url(),
                message.client_ref.map(|r| r.0.to_string()),
                format_ts(&message.created_at),
                message.is_deleted,
            ],
        )?;
        Ok(())
    }

    /// Non-deleted messages of a thread, oldest first.  Rows sharing a
    /// timestamp keep insertion order.
    pub fn messages_for_thread(&self, thread_id: ThreadId) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE thread_id = ?1 AND is_deleted = 0
             ORDER BY created_at ASC, seq ASC"
        );
        let mut stmt = self.conn().prepare(&sql)?;

        let rows = stmt.query_map(params![thread_id.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
        self.conn()
            .query_row(&sql, params![id.to_string()], row_to_message)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Hide a message from history.  Returns `false` if no such row exists.
    pub fn soft_delete_message(&self, id: MessageId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET is_deleted = 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let thread_str: String = row.get(1)?;
    let user_str: String = row.get(2)?;
    let sender_str: String = row.get(3)?;
    let kind_str: String = row.get(4)?;
    let content: String = row.get(5)?;
    let media_url: Option<String> = row.get(6)?;
    let client_ref_str: Option<String> = row.get(7)?;
    let ts_str: String = row.get(8)?;
    let is_deleted: bool = row.get(9)?;

    let sender: Sender = sender_str
        .parse()
        .map_err(|e: String| conversion_error(3, corrupt(e)))?;
    let kind: MessageKind = kind_str
        .parse()
        .map_err(|e: String| conversion_error(4, corrupt(e)))?;
    let body = MessageBody::from_parts(kind, content, media_url)
        .map_err(|e| conversion_error(6, corrupt(e)))?;
    let client_ref = client_ref_str
        .map(|s| parse_uuid(7, &s).map(ClientRef))
        .transpose()?;

    Ok(Message {
        id: MessageId(parse_uuid(0, &id_str)?),
        thread_id: ThreadId(parse_uuid(1, &thread_str)?),
        user_id: UserId(parse_uuid(2, &user_str)?),
        sender,
        body,
        created_at: parse_ts(8, &ts_str)?,
        is_deleted,
        client_ref,
    })
}

fn corrupt(msg: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}
