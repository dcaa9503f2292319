//! The standalone analytics database stitched series are written to.

use std::path::Path;

use rusqlite::{params, Connection};

use super::layers::Series;

/// Writer for the `ts` analytics table.
pub struct AnalyticsDb {
    conn: Connection,
}

impl AnalyticsDb {
    /// Open (and create if needed) the analytics database.
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ts (
                k_id INTEGER NOT NULL,
                time INTEGER NOT NULL,
                state TEXT NOT NULL,
                value REAL NOT NULL,
                UNIQUE (k_id, time, state)
            );
        "#,
        )?;
        Ok(Self { conn })
    }

    /// Write one stitched series. Existing rows for the same
    /// (k_id, time, state) are replaced, so re-stitching is idempotent.
    pub fn write_series(
        &mut self,
        k_id: i64,
        state: &str,
        series: &Series,
    ) -> Result<(), rusqlite::Error> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO ts (k_id, time, state, value)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (label, value) in series {
                stmt.execute(params![k_id, label.timestamp(), state, value])?;
            }
        }
        tx.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};

    fn series(start: DateTime<Utc>, values: &[f64]) -> Series {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| (start + Duration::hours(i as i64), v))
            .collect()
    }

    #[test]
    fn rewriting_a_series_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("time_series.db");
        let start = chrono::DateTime::UNIX_EPOCH;

        {
            let mut db = AnalyticsDb::open(&path).unwrap();
            db.write_series(1, "US-CA", &series(start, &[1.0, 2.0, 3.0]))
                .unwrap();
            db.write_series(1, "US-CA", &series(start, &[4.0, 5.0, 6.0]))
                .unwrap();
            db.write_series(1, "world", &series(start, &[7.0])).unwrap();
        }

        let conn = Connection::open(&path).unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM ts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 4);

        let value: f64 = conn
            .query_row(
                "SELECT value FROM ts WHERE k_id = 1 AND state = 'US-CA' AND time = 0",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(value, 4.0);
    }
}
