//! Request queue models.
//!
//! Requests are created by an external queueing tool and consumed here.
//! The dispatcher only ever moves them along the
//! `open -> running -> done` lifecycle, with `running -> open` released on
//! failure and `error` reserved for out-of-band repair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Open,
    Running,
    Done,
    Error,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// All statuses, in lifecycle order.
    pub fn all() -> [Self; 4] {
        [Self::Open, Self::Running, Self::Done, Self::Error]
    }
}

/// A request row to be queued, as the external queueing tool would insert it.
#[derive(Debug, Clone)]
pub struct NewRequest {
    /// Who queued the request.
    pub who: String,
    /// Which upstream API flavor to use.
    pub api: String,
    /// Scheduling priority, higher first.
    pub priority: i64,
    /// ISO code of the location to restrict to, if any.
    pub geo: Option<String>,
    /// Start of the sampled window.
    pub window_start: DateTime<Utc>,
    /// End of the sampled window.
    pub window_end: DateTime<Utc>,
    /// Earliest dispatch time.
    pub not_before: DateTime<Utc>,
    /// Latest dispatch time.
    pub not_after: DateTime<Utc>,
    pub note: Option<String>,
}

/// A request the dispatcher has atomically moved `open -> running`,
/// joined with the data a fetch needs.
#[derive(Debug, Clone)]
pub struct ClaimedRequest {
    pub r_id: i64,
    pub k_id: i64,
    /// The query or topic id to ask the upstream service about.
    pub keyword: String,
    /// ISO code of the request's location, if any.
    pub geo: Option<String>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}
