//! The durable staging table for fetched payloads.
//!
//! A staging row is written and committed before any parsing, so a later
//! ingestion bug can never lose fetched data; the dispatcher replays
//! leftover rows at startup.

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::helpers::row_to_staged;
use super::{Result, TrendsRepository};
use crate::models::StagedPayload;

impl TrendsRepository {
    /// Durably stage a raw payload. Commits before returning.
    pub fn stage_raw(
        &self,
        raw: &str,
        f_id: i64,
        r_id: i64,
        k_id: i64,
        fetched_at: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO raw_fetcher_output (rfo_raw, f_id, r_id, k_id, rfo_ts)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![raw, f_id, r_id, k_id, fetched_at.to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All staged payloads, oldest first.
    pub fn staged_payloads(&self) -> Result<Vec<StagedPayload>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT rfo_id, rfo_raw, f_id, r_id, k_id, rfo_ts
               FROM raw_fetcher_output
           ORDER BY rfo_id",
        )?;
        let staged = stmt
            .query_map([], row_to_staged)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(staged)
    }

    /// Number of staged payloads awaiting ingestion.
    pub fn staging_count(&self) -> Result<i64> {
        let conn = self.connect()?;
        let count = conn.query_row("SELECT COUNT(*) FROM raw_fetcher_output", [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }
}
