//! Request queue bookkeeping outside the claim/ingest hot paths.

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::helpers::{intern_fetcher, intern_keyword, intern_location};
use super::{parse_datetime, to_option, Result, TrendsRepository};
use crate::models::{FetcherIdentity, Keyword, NewRequest, RequestStatus};

/// Window bounds and location of a request, as ingestion validation
/// needs them.
#[derive(Debug, Clone)]
pub struct RequestWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// ISO code of the request's location, if any.
    pub geo: Option<String>,
}

/// Aggregate store counts for the status command.
#[derive(Debug)]
pub struct StoreSummary {
    /// (status name, request count), in lifecycle order.
    pub statuses: Vec<(String, i64)>,
    pub staged: i64,
    pub timeframes: i64,
    pub geo_rows: i64,
    pub keywords: i64,
}

impl TrendsRepository {
    /// Insert-or-ignore a keyword, returning its id.
    pub fn intern_keyword(
        &self,
        query: &str,
        title_topic: Option<(&str, &str)>,
    ) -> Result<i64> {
        let conn = self.connect()?;
        intern_keyword(&conn, query, title_topic, Utc::now())
    }

    /// Look up a keyword by id.
    pub fn keyword(&self, k_id: i64) -> Result<Option<Keyword>> {
        let conn = self.connect()?;
        to_option(conn.query_row(
            r#"
            SELECT k_id, k_q, k_title, kt_name, k_added
              FROM keywords
         LEFT JOIN keyword_topics USING (kt_id)
             WHERE k_id = ?1
            "#,
            params![k_id],
            |row| {
                Ok(Keyword {
                    k_id: row.get(0)?,
                    query: row.get(1)?,
                    title: row.get(2)?,
                    topic: row.get(3)?,
                    added: parse_datetime(&row.get::<_, String>(4)?),
                })
            },
        ))
    }

    /// Insert-or-ignore a fetch worker identity, returning its id.
    pub fn intern_fetcher(&self, fetcher: &FetcherIdentity) -> Result<i64> {
        let conn = self.connect()?;
        intern_fetcher(&conn, fetcher)
    }

    /// Queue a request for a keyword, as the external queueing tool does.
    pub fn create_request(&self, request: &NewRequest, k_id: i64) -> Result<i64> {
        let conn = self.connect()?;

        let l_id = match &request.geo {
            Some(iso) => Some(intern_location(&conn, iso, iso)?),
            None => None,
        };

        conn.execute(
            r#"
            INSERT INTO requests (
                r_who, r_when, r_api, r_prio, r_geo,
                r_tf_start, r_tf_end, r_status, r_notbefore, r_notafter, r_note
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                (SELECT rs_id FROM request_status WHERE rs_name = 'open'),
                ?8, ?9, ?10
            )
            "#,
            params![
                request.who,
                Utc::now().to_rfc3339(),
                request.api,
                request.priority,
                l_id,
                request.window_start.to_rfc3339(),
                request.window_end.to_rfc3339(),
                request.not_before.to_rfc3339(),
                request.not_after.to_rfc3339(),
                request.note,
            ],
        )?;
        let r_id = conn.last_insert_rowid();

        conn.execute(
            "INSERT INTO keywords_in_request (r_id, k_id) VALUES (?1, ?2)",
            params![r_id, k_id],
        )?;

        Ok(r_id)
    }

    /// Current status of a request.
    pub fn request_status(&self, r_id: i64) -> Result<Option<RequestStatus>> {
        let conn = self.connect()?;
        let name = to_option(conn.query_row(
            r#"
            SELECT rs_name
              FROM requests
              JOIN request_status ON r_status = rs_id
             WHERE r_id = ?1
            "#,
            params![r_id],
            |row| row.get::<_, String>(0),
        ))?;
        Ok(name.and_then(|n| RequestStatus::from_str(&n)))
    }

    /// Window bounds and location of a request.
    pub fn request_window(&self, r_id: i64) -> Result<Option<RequestWindow>> {
        let conn = self.connect()?;
        to_option(conn.query_row(
            r#"
            SELECT r_tf_start, r_tf_end, l_iso
              FROM requests
         LEFT JOIN locations ON r_geo = l_id
             WHERE r_id = ?1
            "#,
            params![r_id],
            |row| {
                Ok(RequestWindow {
                    start: parse_datetime(&row.get::<_, String>(0)?),
                    end: parse_datetime(&row.get::<_, String>(1)?),
                    geo: row.get(2)?,
                })
            },
        ))
    }

    /// Completion time of a request, if it has one.
    pub fn request_completed_at(&self, r_id: i64) -> Result<Option<DateTime<Utc>>> {
        let conn = self.connect()?;
        let ts = to_option(conn.query_row(
            "SELECT r_ts FROM requests WHERE r_id = ?1 AND r_ts IS NOT NULL",
            params![r_id],
            |row| row.get::<_, String>(0),
        ))?;
        Ok(ts.map(|s| parse_datetime(&s)))
    }

    /// Aggregate counts across the store.
    pub fn summary(&self) -> Result<StoreSummary> {
        let conn = self.connect()?;

        let mut statuses = Vec::new();
        {
            let mut stmt = conn.prepare(
                r#"
                SELECT rs_name, COUNT(r_id)
                  FROM request_status
             LEFT JOIN requests ON r_status = rs_id
              GROUP BY rs_id, rs_name
              ORDER BY rs_id
                "#,
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            for row in rows {
                statuses.push(row?);
            }
        }

        let count = |sql: &str| -> Result<i64> {
            Ok(conn.query_row(sql, [], |row| row.get(0))?)
        };

        Ok(StoreSummary {
            statuses,
            staged: count("SELECT COUNT(*) FROM raw_fetcher_output")?,
            timeframes: count("SELECT COUNT(*) FROM trends_time")?,
            geo_rows: count("SELECT COUNT(*) FROM trends_geo")?,
            keywords: count("SELECT COUNT(*) FROM keywords")?,
        })
    }
}
