use rusqlite::{params, OptionalExtension};

use chatpsi_shared::UserId;

use crate::database::{format_ts, parse_ts, parse_uuid, Database};
use crate::error::{Result, StoreError};
use crate::models::Profile;

impl Database {
    /// Insert a profile, or update nickname, thread handle and entitlement of
    /// an existing one.  `created_at` of an existing row is preserved.
    pub fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        self.conn().execute(
            "INSERT INTO profiles
                (user_id, nickname, openai_thread_id, subscription_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                nickname            = excluded.nickname,
                openai_thread_id    = excluded.openai_thread_id,
                subscription_active = excluded.subscription_active,
                updated_at          = excluded.updated_at",
            params![
                profile.user_id.to_string(),
                profile.nickname,
                profile.openai_thread_id,
                profile.subscription_active,
                format_ts(&profile.created_at),
                format_ts(&profile.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_profile(&self, user_id: UserId) -> Result<Option<Profile>> {
        let profile = self
            .conn()
            .query_row(
                "SELECT user_id, nickname, openai_thread_id, subscription_active, created_at, updated_at
                 FROM profiles WHERE user_id = ?1",
                params![user_id.to_string()],
                row_to_profile,
            )
            .optional()?;
        Ok(profile)
    }

    /// Flip the entitlement flag.  Fails with [`StoreError::NotFound`] if the
    /// profile does not exist.
    pub fn set_subscription_active(&self, user_id: UserId, active: bool) -> Result<()> {
        let now = chatpsi_shared::message::now_micros();
        let affected = self.conn().execute(
            "UPDATE profiles SET subscription_active = ?1, updated_at = ?2 WHERE user_id = ?3",
            params![active, format_ts(&now), user_id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<Profile> {
    let user_str: String = row.get(0)?;
    let created_str: String = row.get(4)?;
    let updated_str: String = row.get(5)?;

    Ok(Profile {
        user_id: UserId(parse_uuid(0, &user_str)?),
        nickname: row.get(1)?,
        openai_thread_id: row.get(2)?,
        subscription_active: row.get(3)?,
        created_at: parse_ts(4, &created_str)?,
        updated_at: parse_ts(5, &updated_str)?,
    })
}
