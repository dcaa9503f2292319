//! Models for fetched trend data and its provenance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Geographic aggregation scope of a per-location value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoScope {
    Country,
    States,
    Region,
    Dma,
}

impl GeoScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Country => "country",
            Self::States => "states",
            Self::Region => "region",
            Self::Dma => "dma",
        }
    }

    /// Parse a scope name. The upstream payload uses upper-case scope keys,
    /// the database stores lower-case.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "country" => Some(Self::Country),
            "states" => Some(Self::States),
            "region" => Some(Self::Region),
            "dma" => Some(Self::Dma),
            _ => None,
        }
    }
}

/// Identity of a fetch worker, interned into the store for provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetcherIdentity {
    pub name: String,
    pub host: String,
    pub api: String,
}

/// A raw fetched payload staged durably before ingestion.
///
/// Rows exist only between a successful fetch and the structured write;
/// `fetched_at` is the fetch instant and survives crash recovery so the
/// eventual request completion time is accurate.
#[derive(Debug, Clone)]
pub struct StagedPayload {
    pub rfo_id: i64,
    pub raw: String,
    pub f_id: i64,
    pub r_id: i64,
    pub k_id: i64,
    pub fetched_at: DateTime<Utc>,
}
