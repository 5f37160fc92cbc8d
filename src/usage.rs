//! Monthly usage accounting: characters sent to the live provider per user,
//! partitioned by UTC calendar month ("YYYY-MM"). A new month starts a new
//! counter; counters only ever grow.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tracing::debug;

use crate::auth::UserId;
use crate::clock::{month_key, Clock};
use crate::db::{Database, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyUsage {
    pub month: String,
    pub translated_characters: u64,
}

pub struct UsageTracker {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

impl UsageTracker {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Add `characters` to the user's counter for the current month, creating
    /// the counter on first use. Zero or negative counts are ignored.
    pub fn record(&self, user: &UserId, characters: i64) -> Result<(), StoreError> {
        if characters <= 0 {
            return Ok(());
        }
        let month = month_key(self.clock.now());

        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO user_monthly_usage (user_id, month, translated_characters)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (user_id, month)
             DO UPDATE SET translated_characters = translated_characters + excluded.translated_characters",
            params![user.as_str(), month, characters],
        )?;

        debug!(user = %user, month = %month, characters, "usage recorded");
        Ok(())
    }

    /// Current month's total, zero when nothing was recorded yet.
    /// Never creates a row.
    pub fn current(&self, user: &UserId) -> Result<MonthlyUsage, StoreError> {
        let month = month_key(self.clock.now());

        let conn = self.db.conn();
        let total: Option<i64> = conn
            .query_row(
                "SELECT translated_characters FROM user_monthly_usage
                 WHERE user_id = ?1 AND month = ?2",
                params![user.as_str(), month],
                |row| row.get(0),
            )
            .optional()?;

        Ok(MonthlyUsage {
            month,
            translated_characters: total.unwrap_or(0).max(0) as u64,
        })
    }
}
