//! Atomic claiming of queued requests.

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;

use super::{parse_datetime, to_option, Result, TrendsRepository};
use crate::models::ClaimedRequest;

/// The upstream service only materializes completed windows; a request is
/// not claimable until its window has been closed for this many minutes.
const WINDOW_SETTLE_MINUTES: i64 = 10;

/// Outcome of one claim attempt.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// Nothing eligible in the queue.
    Empty,
    /// A candidate was found but another dispatcher claimed it first;
    /// the iteration should restart immediately.
    Raced,
    Claimed(ClaimedRequest),
}

impl TrendsRepository {
    /// Claim the highest-priority eligible request, moving it
    /// `open -> running`.
    ///
    /// The SELECT is advisory; correctness rests on the conditional UPDATE,
    /// which only one concurrent dispatcher can win.
    pub fn claim_next_request(&self, now: DateTime<Utc>) -> Result<ClaimOutcome> {
        let conn = self.connect()?;

        let candidate = to_option(conn.query_row(
            r#"
            SELECT r.r_id, k.k_id, k.k_q, l.l_iso, r.r_tf_start, r.r_tf_end
              FROM requests r
              JOIN request_status rs ON r.r_status = rs.rs_id
              JOIN keywords_in_request kir ON kir.r_id = r.r_id
              JOIN keywords k ON k.k_id = kir.k_id
         LEFT JOIN locations l ON r.r_geo = l.l_id
             WHERE rs.rs_name = 'open'
               AND r.r_notbefore < ?1
               AND r.r_notafter > ?1
               AND r.r_tf_end < ?2
               AND r.r_id NOT IN (SELECT r_id FROM raw_fetcher_output)
          ORDER BY r.r_prio DESC, r.r_notafter ASC
             LIMIT 1
            "#,
            params![
                now.to_rfc3339(),
                (now - Duration::minutes(WINDOW_SETTLE_MINUTES)).to_rfc3339()
            ],
            |row| {
                Ok(ClaimedRequest {
                    r_id: row.get(0)?,
                    k_id: row.get(1)?,
                    keyword: row.get(2)?,
                    geo: row.get(3)?,
                    window_start: parse_datetime(&row.get::<_, String>(4)?),
                    window_end: parse_datetime(&row.get::<_, String>(5)?),
                })
            },
        ))?;

        let Some(claimed) = candidate else {
            return Ok(ClaimOutcome::Empty);
        };

        let won = to_option(conn.query_row(
            r#"
            UPDATE requests
               SET r_status = (SELECT rs_id FROM request_status WHERE rs_name = 'running')
             WHERE r_id = ?1
               AND r_status = (SELECT rs_id FROM request_status WHERE rs_name = 'open')
            RETURNING r_id
            "#,
            params![claimed.r_id],
            |row| row.get::<_, i64>(0),
        ))?;

        match won {
            Some(_) => Ok(ClaimOutcome::Claimed(claimed)),
            None => Ok(ClaimOutcome::Raced),
        }
    }

    /// Release a claimed request back to the queue (`running -> open`).
    ///
    /// Returns whether a row actually transitioned.
    pub fn release_request(&self, r_id: i64) -> Result<bool> {
        let conn = self.connect()?;
        let changed = conn.execute(
            r#"
            UPDATE requests
               SET r_status = (SELECT rs_id FROM request_status WHERE rs_name = 'open')
             WHERE r_id = ?1
               AND r_status = (SELECT rs_id FROM request_status WHERE rs_name = 'running')
            "#,
            params![r_id],
        )?;
        Ok(changed == 1)
    }
}
