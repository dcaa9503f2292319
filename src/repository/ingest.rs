//! Transactional write of one parsed payload's structured records.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::helpers::{intern_keyword, intern_location, intern_tag};
use super::{RepositoryError, Result, TrendsRepository};
use crate::models::GeoScope;

/// What a recommended keyword points at: a plain query string, or an
/// upstream topic with its display title and topic name.
#[derive(Debug, Clone)]
pub enum RelatedRef {
    Query(String),
    Topic {
        mid: String,
        title: String,
        topic: String,
    },
}

/// One recommended-keyword row to write.
#[derive(Debug, Clone)]
pub struct RelatedRecord {
    pub reference: RelatedRef,
    pub is_top: bool,
    pub value: i64,
}

/// One per-location value to write.
#[derive(Debug, Clone)]
pub struct GeoRecord {
    pub scope: GeoScope,
    pub iso: String,
    pub name: String,
    pub value: i64,
}

/// Everything a validated payload turns into, written as one unit.
#[derive(Debug)]
pub struct StructuredRecords {
    pub rfo_id: i64,
    pub r_id: i64,
    pub k_id: i64,
    pub f_id: i64,
    /// The fetch instant; becomes the request completion time.
    pub fetched_at: DateTime<Utc>,
    /// Sample vector, stored verbatim.
    pub values: Vec<i64>,
    pub geo_rows: Vec<GeoRecord>,
    pub related: Vec<RelatedRecord>,
    /// Reserved resolution tag derived from the label cadence, if any.
    pub resolution_tag: Option<String>,
}

impl TrendsRepository {
    /// Write all structured records of one payload and retire the request
    /// and its staging row, in a single transaction.
    pub fn write_structured(&self, records: &StructuredRecords) -> Result<()> {
        let conn = self.connect()?;

        conn.execute("BEGIN IMMEDIATE", [])?;

        let result = (|| write_all(&conn, records))();

        if result.is_ok() {
            conn.execute("COMMIT", [])?;
        } else {
            let _ = conn.execute("ROLLBACK", []);
        }

        result
    }
}

fn write_all(conn: &Connection, records: &StructuredRecords) -> Result<()> {
    conn.execute(
        "INSERT INTO trends_time (r_id, k_id, t_v) VALUES (?1, ?2, ?3)",
        params![
            records.r_id,
            records.k_id,
            serde_json::to_string(&records.values)?
        ],
    )?;

    for geo in &records.geo_rows {
        let l_id = intern_location(conn, &geo.iso, &geo.name)?;
        conn.execute(
            r#"
            INSERT INTO trends_geo (r_id, l_id, k_id, g_scope, g_v)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                records.r_id,
                l_id,
                records.k_id,
                geo.scope.as_str(),
                geo.value
            ],
        )?;
    }

    for related in &records.related {
        let kr_kw = match &related.reference {
            RelatedRef::Query(q) => intern_keyword(conn, q, None, records.fetched_at)?,
            RelatedRef::Topic { mid, title, topic } => {
                intern_keyword(conn, mid, Some((title.as_str(), topic.as_str())), records.fetched_at)?
            }
        };
        conn.execute(
            r#"
            INSERT INTO keywords_related (r_id, k_id, kr_kw, kr_istop, kr_value)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                records.r_id,
                records.k_id,
                kr_kw,
                related.is_top as i64,
                related.value
            ],
        )?;
    }

    // The request must still be running; anything else means the state
    // machine was violated elsewhere.
    let changed = conn.execute(
        r#"
        UPDATE requests
           SET r_status = (SELECT rs_id FROM request_status WHERE rs_name = 'done'),
               r_ts = ?2,
               r_fetcher = ?3
         WHERE r_id = ?1
           AND r_status = (SELECT rs_id FROM request_status WHERE rs_name = 'running')
        "#,
        params![records.r_id, records.fetched_at.to_rfc3339(), records.f_id],
    )?;
    if changed != 1 {
        return Err(RepositoryError::Logic(format!(
            "request {} was not in state running at completion",
            records.r_id
        )));
    }

    if let Some(tag) = &records.resolution_tag {
        let tg_id = intern_tag(conn, tag)?;
        conn.execute(
            "INSERT OR IGNORE INTO requests_tags (r_id, tg_id) VALUES (?1, ?2)",
            params![records.r_id, tg_id],
        )?;
    }

    conn.execute(
        "DELETE FROM raw_fetcher_output WHERE rfo_id = ?1",
        params![records.rfo_id],
    )?;

    Ok(())
}
