use rusqlite::params;

use chatpsi_shared::UserId;

use crate::database::{conversion_error, format_ts, parse_ts, parse_uuid, Database};
use crate::error::Result;
use crate::models::{NewWebhookEvent, WebhookDirection, WebhookEvent};

impl Database {
    pub fn record_webhook_event(&self, event: &NewWebhookEvent) -> Result<i64> {
        let payload = serde_json::to_string(&event.payload)?;
        let now = chatpsi_shared::message::now_micros();

        self.conn().execute(
            "INSERT INTO webhook_events (direction, user_id, payload, status_code, error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.direction.as_str(),
                event.user_id.map(|u| u.to_string()),
                payload,
                event.status_code,
                event.error,
                format_ts(&now),
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Most recent audit rows first.
    pub fn recent_webhook_events(&self, limit: u32) -> Result<Vec<WebhookEvent>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, direction, user_id, payload, status_code, error, created_at
             FROM webhook_events
             ORDER BY id DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit], row_to_event)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<WebhookEvent> {
    let direction_str: String = row.get(1)?;
    let user_str: Option<String> = row.get(2)?;
    let payload_str: String = row.get(3)?;
    let created_str: String = row.get(6)?;

    let direction: WebhookDirection = direction_str.parse().map_err(|e: String| {
        conversion_error(1, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;
    let payload = serde_json::from_str(&payload_str).map_err(|e| conversion_error(3, e))?;

    Ok(WebhookEvent {
        id: row.get(0)?,
        direction,
        user_id: user_str
            .map(|s| parse_uuid(2, &s).map(UserId))
            .transpose()?,
        payload,
        status_code: row.get(4)?,
        error: row.get(5)?,
        created_at: parse_ts(6, &created_str)?,
    })
}
