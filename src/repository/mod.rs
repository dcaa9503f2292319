//! Repository layer for the request queue and trend data store.
//!
//! All request state transitions go through this layer. Datetimes are
//! stored as RFC 3339 TEXT and compared lexicographically in SQL; integer
//! vectors are stored as JSON TEXT.

mod claim;
mod fragments;
mod helpers;
mod ingest;
mod requests;
mod staging;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use thiserror::Error;

pub use claim::ClaimOutcome;
pub use fragments::FragmentRow;
pub use ingest::{GeoRecord, RelatedRecord, RelatedRef, StructuredRecords};
pub use requests::{RequestWindow, StoreSummary};

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Logic(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// SQLite-backed store for requests, keywords, and fetched trend data.
pub struct TrendsRepository {
    db_path: PathBuf,
}

impl TrendsRepository {
    /// Open the store, creating the schema if needed.
    pub fn new(db_path: &Path) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    pub(crate) fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
        "#,
        )?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            -- Request lifecycle lookup
            CREATE TABLE IF NOT EXISTS request_status (
                rs_id INTEGER PRIMARY KEY,
                rs_name TEXT NOT NULL UNIQUE
            );
            INSERT OR IGNORE INTO request_status (rs_id, rs_name) VALUES
                (1, 'open'), (2, 'running'), (3, 'done'), (4, 'error');

            -- Topics are created lazily as recommended topic keywords arrive
            CREATE TABLE IF NOT EXISTS keyword_topics (
                kt_id INTEGER PRIMARY KEY AUTOINCREMENT,
                kt_name TEXT NOT NULL UNIQUE
            );

            -- Query strings and topic ids; topics carry a title and topic,
            -- plain queries carry neither
            CREATE TABLE IF NOT EXISTS keywords (
                k_id INTEGER PRIMARY KEY AUTOINCREMENT,
                k_q TEXT NOT NULL UNIQUE,
                k_title TEXT,
                kt_id INTEGER REFERENCES keyword_topics (kt_id),
                k_added TEXT NOT NULL,
                CHECK ((k_title IS NULL) = (kt_id IS NULL))
            );

            CREATE TABLE IF NOT EXISTS locations (
                l_id INTEGER PRIMARY KEY AUTOINCREMENT,
                l_iso TEXT NOT NULL UNIQUE,
                l_name TEXT NOT NULL
            );

            -- Fetch workers, interned on first use for provenance
            CREATE TABLE IF NOT EXISTS fetchers (
                f_id INTEGER PRIMARY KEY AUTOINCREMENT,
                f_name TEXT NOT NULL,
                f_host TEXT NOT NULL,
                f_api TEXT NOT NULL,
                UNIQUE (f_name, f_host)
            );

            -- The work queue; rows are created by the external queueing tool
            CREATE TABLE IF NOT EXISTS requests (
                r_id INTEGER PRIMARY KEY AUTOINCREMENT,
                r_who TEXT NOT NULL,
                r_when TEXT NOT NULL,
                r_api TEXT NOT NULL,
                r_prio INTEGER NOT NULL DEFAULT 0,
                r_geo INTEGER REFERENCES locations (l_id),
                r_tf_start TEXT NOT NULL,
                r_tf_end TEXT NOT NULL,
                r_status INTEGER NOT NULL DEFAULT 1 REFERENCES request_status (rs_id),
                r_notbefore TEXT NOT NULL,
                r_notafter TEXT NOT NULL,
                r_ts TEXT,
                r_fetcher INTEGER REFERENCES fetchers (f_id),
                r_note TEXT,
                CHECK (r_tf_start < r_tf_end)
            );

            CREATE TABLE IF NOT EXISTS keywords_in_request (
                r_id INTEGER NOT NULL REFERENCES requests (r_id),
                k_id INTEGER NOT NULL REFERENCES keywords (k_id),
                UNIQUE (r_id, k_id)
            );

            -- Sample vectors, one row per (request, keyword)
            CREATE TABLE IF NOT EXISTS trends_time (
                t_id INTEGER PRIMARY KEY AUTOINCREMENT,
                r_id INTEGER NOT NULL REFERENCES requests (r_id),
                k_id INTEGER NOT NULL REFERENCES keywords (k_id),
                t_v TEXT NOT NULL,
                UNIQUE (r_id, k_id)
            );

            -- Per-location values at a given aggregation scope
            CREATE TABLE IF NOT EXISTS trends_geo (
                r_id INTEGER NOT NULL REFERENCES requests (r_id),
                l_id INTEGER NOT NULL REFERENCES locations (l_id),
                k_id INTEGER NOT NULL REFERENCES keywords (k_id),
                g_scope TEXT NOT NULL
                    CHECK (g_scope IN ('country', 'states', 'region', 'dma')),
                g_v INTEGER NOT NULL,
                UNIQUE (r_id, l_id, k_id)
            );

            -- Keywords the service recommends alongside a fetched keyword
            CREATE TABLE IF NOT EXISTS keywords_related (
                r_id INTEGER NOT NULL REFERENCES requests (r_id),
                k_id INTEGER NOT NULL REFERENCES keywords (k_id),
                kr_kw INTEGER NOT NULL REFERENCES keywords (k_id),
                kr_istop INTEGER NOT NULL,
                kr_value INTEGER NOT NULL
            );

            -- Durable staging for fetched payloads awaiting ingestion
            CREATE TABLE IF NOT EXISTS raw_fetcher_output (
                rfo_id INTEGER PRIMARY KEY AUTOINCREMENT,
                rfo_raw TEXT NOT NULL,
                f_id INTEGER NOT NULL REFERENCES fetchers (f_id),
                r_id INTEGER NOT NULL REFERENCES requests (r_id),
                k_id INTEGER NOT NULL REFERENCES keywords (k_id),
                rfo_ts TEXT NOT NULL
            );

            -- Free-form request labels, including the reserved
            -- resolution:hourly / resolution:daily tags
            CREATE TABLE IF NOT EXISTS tags (
                tg_id INTEGER PRIMARY KEY AUTOINCREMENT,
                tg_name TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS requests_tags (
                r_id INTEGER NOT NULL REFERENCES requests (r_id),
                tg_id INTEGER NOT NULL REFERENCES tags (tg_id),
                UNIQUE (r_id, tg_id)
            );

            -- Indexes for the claim query and the stitching reads
            CREATE INDEX IF NOT EXISTS idx_requests_claim
                ON requests (r_status, r_prio, r_notafter);
            CREATE INDEX IF NOT EXISTS idx_trends_time_keyword
                ON trends_time (k_id);
            CREATE INDEX IF NOT EXISTS idx_requests_tags
                ON requests_tags (tg_id);
        "#,
        )?;
        Ok(())
    }
}

/// Parse a datetime string from the database, defaulting to Unix epoch on
/// error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Collapse a no-rows result into `None`.
pub(crate) fn to_option<T>(result: rusqlite::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
