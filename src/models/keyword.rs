//! Keyword registry models.

use chrono::{DateTime, Utc};

/// A query string or topic id known to the system.
///
/// Topic keywords carry a display title and a topic name; plain query
/// keywords carry neither. The two fields are always present together.
#[derive(Debug, Clone)]
pub struct Keyword {
    pub k_id: i64,
    /// The raw query string, or the upstream topic id (mid).
    pub query: String,
    /// Display title, present for topic keywords only.
    pub title: Option<String>,
    /// Topic name, present for topic keywords only.
    pub topic: Option<String>,
    pub added: DateTime<Utc>,
}

impl Keyword {
    /// Human-readable form: the title with its topic for topics, the raw
    /// query otherwise.
    pub fn pretty(&self) -> String {
        match (&self.title, &self.topic) {
            (Some(title), Some(topic)) => format!("{} ({})", title, topic),
            _ => self.query.clone(),
        }
    }
}
