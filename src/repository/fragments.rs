//! Enumeration of completed, resolution-tagged fragments for stitching.

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::{parse_datetime, Result, TrendsRepository};

/// One completed request's sample vector with its window bounds.
#[derive(Debug, Clone)]
pub struct FragmentRow {
    pub r_id: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub values: Vec<f64>,
}

impl TrendsRepository {
    /// All done fragments for a keyword at one location carrying the given
    /// resolution tag, ordered by window start.
    ///
    /// `geo = None` selects the location-less (worldwide) fragments.
    pub fn tagged_fragments(
        &self,
        k_id: i64,
        geo: Option<&str>,
        tag: &str,
    ) -> Result<Vec<FragmentRow>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT r.r_id, r.r_tf_start, r.r_tf_end, t.t_v
              FROM requests r
              JOIN request_status rs ON rs.rs_id = r.r_status AND rs.rs_name = 'done'
              JOIN trends_time t ON t.r_id = r.r_id AND t.k_id = ?1
              JOIN requests_tags rt ON rt.r_id = r.r_id
              JOIN tags tg ON tg.tg_id = rt.tg_id AND tg.tg_name = ?2
             WHERE ((?3 IS NULL AND r.r_geo IS NULL)
                    OR r.r_geo = (SELECT l_id FROM locations WHERE l_iso = ?3))
          ORDER BY r.r_tf_start
            "#,
        )?;

        let mapped = stmt.query_map(params![k_id, tag, geo], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut rows = Vec::new();
        for row in mapped {
            let (r_id, start, end, t_v) = row?;
            rows.push(FragmentRow {
                r_id,
                start: parse_datetime(&start),
                end: parse_datetime(&end),
                values: serde_json::from_str(&t_v)?,
            });
        }
        Ok(rows)
    }

    /// Distinct locations (ISO codes, `None` for worldwide) that have done
    /// fragments for a keyword.
    pub fn fragment_geos(&self, k_id: i64) -> Result<Vec<Option<String>>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT DISTINCT l.l_iso
              FROM requests r
              JOIN request_status rs ON rs.rs_id = r.r_status AND rs.rs_name = 'done'
              JOIN trends_time t ON t.r_id = r.r_id AND t.k_id = ?1
         LEFT JOIN locations l ON r.r_geo = l.l_id
          ORDER BY l.l_iso
            "#,
        )?;
        let geos = stmt
            .query_map(params![k_id], |row| row.get::<_, Option<String>>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(geos)
    }
}
