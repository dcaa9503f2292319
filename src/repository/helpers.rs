//! Row parsing and interning helpers.
//!
//! Interning runs against a borrowed connection so it can take part in the
//! ingestion transaction.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{parse_datetime, Result};
use crate::models::{FetcherIdentity, StagedPayload};

/// Parse a database row into a StagedPayload.
pub fn row_to_staged(row: &rusqlite::Row) -> rusqlite::Result<StagedPayload> {
    Ok(StagedPayload {
        rfo_id: row.get("rfo_id")?,
        raw: row.get("rfo_raw")?,
        f_id: row.get("f_id")?,
        r_id: row.get("r_id")?,
        k_id: row.get("k_id")?,
        fetched_at: parse_datetime(&row.get::<_, String>("rfo_ts")?),
    })
}

/// Insert-or-ignore a topic by name, returning its id.
pub fn intern_topic(conn: &Connection, name: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO keyword_topics (kt_name) VALUES (?1)
         ON CONFLICT (kt_name) DO NOTHING",
        params![name],
    )?;
    let kt_id = conn.query_row(
        "SELECT kt_id FROM keyword_topics WHERE kt_name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(kt_id)
}

/// Insert-or-ignore a keyword, returning its id.
///
/// `title_topic` is present for topic keywords (display title plus topic
/// name) and absent for plain query keywords.
pub fn intern_keyword(
    conn: &Connection,
    query: &str,
    title_topic: Option<(&str, &str)>,
    now: DateTime<Utc>,
) -> Result<i64> {
    let (title, kt_id) = match title_topic {
        Some((title, topic)) => (Some(title), Some(intern_topic(conn, topic)?)),
        None => (None, None),
    };

    conn.execute(
        "INSERT INTO keywords (k_q, k_title, kt_id, k_added) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (k_q) DO NOTHING",
        params![query, title, kt_id, now.to_rfc3339()],
    )?;
    let k_id = conn.query_row(
        "SELECT k_id FROM keywords WHERE k_q = ?1",
        params![query],
        |row| row.get(0),
    )?;
    Ok(k_id)
}

/// Insert-or-ignore a location by ISO code, returning its id.
pub fn intern_location(conn: &Connection, iso: &str, name: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO locations (l_iso, l_name) VALUES (?1, ?2)
         ON CONFLICT (l_iso) DO NOTHING",
        params![iso, name],
    )?;
    let l_id = conn.query_row(
        "SELECT l_id FROM locations WHERE l_iso = ?1",
        params![iso],
        |row| row.get(0),
    )?;
    Ok(l_id)
}

/// Insert-or-ignore a fetch worker by (name, host), returning its id.
pub fn intern_fetcher(conn: &Connection, fetcher: &FetcherIdentity) -> Result<i64> {
    conn.execute(
        "INSERT INTO fetchers (f_name, f_host, f_api) VALUES (?1, ?2, ?3)
         ON CONFLICT (f_name, f_host) DO NOTHING",
        params![fetcher.name, fetcher.host, fetcher.api],
    )?;
    let f_id = conn.query_row(
        "SELECT f_id FROM fetchers WHERE f_name = ?1 AND f_host = ?2",
        params![fetcher.name, fetcher.host],
        |row| row.get(0),
    )?;
    Ok(f_id)
}

/// Insert-or-ignore a tag by name, returning its id.
pub fn intern_tag(conn: &Connection, name: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO tags (tg_name) VALUES (?1) ON CONFLICT (tg_name) DO NOTHING",
        params![name],
    )?;
    let tg_id = conn.query_row(
        "SELECT tg_id FROM tags WHERE tg_name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(tg_id)
}
