//! User rows — settings read every scheduler tick, mutated by settings
//! commands.

use chrono::{DateTime, NaiveTime, Utc};
use rusqlite::Row;

use nudge_core::error::Result;
use nudge_core::types::{User, validate_schedule};

use crate::{NudgeDb, fmt_time, fmt_ts, parse_time, parse_ts, store_err};

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, bool, String, String, i64, Option<String>, String)> {
    Ok((
        row.get(0)?,
        row.get::<_, i64>(1)? != 0,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn build_user(
    raw: (i64, bool, String, String, i64, Option<String>, String),
) -> Result<User> {
    let (tg_id, enabled, ws, we, interval, last, created) = raw;
    Ok(User {
        tg_id,
        enabled,
        window_start: parse_time(&ws)?,
        window_end: parse_time(&we)?,
        interval_minutes: interval,
        last_notification_sent: last.as_deref().map(parse_ts).transpose()?,
        created_at: parse_ts(&created)?,
    })
}

const USER_COLUMNS: &str =
    "tg_id, enabled, window_start, window_end, interval_minutes, last_notification_sent, created_at";

impl NudgeDb {
    /// Insert a user or replace the row for an existing id.
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO users
             (tg_id, enabled, window_start, window_end, interval_minutes, last_notification_sent, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                user.tg_id,
                user.enabled as i64,
                fmt_time(user.window_start),
                fmt_time(user.window_end),
                user.interval_minutes,
                user.last_notification_sent.map(fmt_ts),
                fmt_ts(user.created_at),
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    pub fn get_user(&self, tg_id: i64) -> Result<Option<User>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE tg_id = ?1"),
                [tg_id],
                user_from_row,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(store_err(other)),
            })?;
        raw.map(build_user).transpose()
    }

    /// Enable or disable a user. A disabled user is immediately ineligible;
    /// no queued sends accumulate.
    pub fn set_user_enabled(&self, tg_id: i64, enabled: bool) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE users SET enabled = ?1 WHERE tg_id = ?2",
            rusqlite::params![enabled as i64, tg_id],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Update a user's window and interval. Invalid settings are rejected
    /// here and never persisted.
    pub fn update_user_settings(
        &self,
        tg_id: i64,
        window_start: NaiveTime,
        window_end: NaiveTime,
        interval_minutes: i64,
    ) -> Result<()> {
        validate_schedule(window_start, window_end, interval_minutes)?;
        let conn = self.lock()?;
        conn.execute(
            "UPDATE users SET window_start = ?1, window_end = ?2, interval_minutes = ?3 WHERE tg_id = ?4",
            rusqlite::params![
                fmt_time(window_start),
                fmt_time(window_end),
                interval_minutes,
                tg_id
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    pub fn set_user_last_sent(&self, tg_id: i64, sent_at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE users SET last_notification_sent = ?1 WHERE tg_id = ?2",
            rusqlite::params![fmt_ts(sent_at), tg_id],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Page through enabled users in id order. Used by the scheduler tick and
    /// the broadcast fetch so a large user set never loads at once.
    pub fn list_enabled_users(&self, limit: usize, offset: usize) -> Result<Vec<User>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE enabled = 1 ORDER BY tg_id LIMIT ?1 OFFSET ?2"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map([limit as i64, offset as i64], user_from_row)
            .map_err(store_err)?;
        let mut users = Vec::new();
        for raw in rows {
            users.push(build_user(raw.map_err(store_err)?)?);
        }
        Ok(users)
    }
}
