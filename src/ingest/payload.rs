//! Wire format of a fetch payload.
//!
//! One JSON blob per fetched window:
//!
//! ```json
//! {
//!   "time":    { "2022-01-01T00:00:00": 42, ... },
//!   "geo":     { "STATES": { "US-CA": ["California", 100], ... }, ... },
//!   "related": {
//!     "query": { "top": [["flu shot", 100]], "rising": [...] },
//!     "topic": { "top": [["/m/0dm32", "Influenza", "Disease", 100]], ... }
//!   }
//! }
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;

/// A parsed fetch payload. All sections are optional in the wire format.
#[derive(Debug, Default, Deserialize)]
pub struct Payload {
    /// Sample values keyed by the service's own time labels. ISO labels
    /// sort lexicographically in chronological order.
    #[serde(default)]
    pub time: BTreeMap<String, i64>,
    /// scope -> location code -> (display name, value).
    #[serde(default)]
    pub geo: BTreeMap<String, BTreeMap<String, (String, i64)>>,
    #[serde(default)]
    pub related: Related,
}

/// Recommended keywords, split by kind and by top/rising grouping.
#[derive(Debug, Default, Deserialize)]
pub struct Related {
    #[serde(default)]
    pub query: RelatedGroup<QueryEntry>,
    #[serde(default)]
    pub topic: RelatedGroup<TopicEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RelatedGroup<T> {
    #[serde(default)]
    pub top: Vec<T>,
    #[serde(default)]
    pub rising: Vec<T>,
}

/// (query string, value)
pub type QueryEntry = (String, i64);

/// (topic mid, display title, topic name, value)
pub type TopicEntry = (String, String, String, i64);
