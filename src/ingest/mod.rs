//! Ingestion pipeline: raw payload -> staged row -> structured records.
//!
//! Staging is committed before any parsing so a parsing bug can never lose
//! fetched data. The structured write and the staging-row deletion share
//! one transaction, so a crash anywhere in between leaves a replayable
//! staging row and nothing else.

pub mod payload;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::warn;

use crate::labels::{self, UnreconstructibleLabels};
use crate::models::{ClaimedRequest, GeoScope, StagedPayload};
use crate::repository::{
    GeoRecord, RelatedRecord, RelatedRef, RepositoryError, StructuredRecords, TrendsRepository,
};
use self::payload::Payload;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("payload is not valid UTF-8: {0}")]
    Decode(#[from] std::string::FromUtf8Error),
    #[error("payload is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Labels(#[from] UnreconstructibleLabels),
    #[error("payload labels disagree with the request window {start} .. {end}")]
    LabelMismatch {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl IngestError {
    /// Validation failures leave the staging row in place for manual
    /// repair and let the dispatcher continue; everything else is fatal.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Parse(_) | Self::Labels(_) | Self::LabelMismatch { .. }
        )
    }
}

/// Decode and durably stage a fetched payload. Commits before returning.
pub fn stage(
    repo: &TrendsRepository,
    claim: &ClaimedRequest,
    f_id: i64,
    raw: Vec<u8>,
    fetched_at: DateTime<Utc>,
) -> Result<StagedPayload, IngestError> {
    let text = String::from_utf8(raw)?;
    let rfo_id = repo.stage_raw(&text, f_id, claim.r_id, claim.k_id, fetched_at)?;
    Ok(StagedPayload {
        rfo_id,
        raw: text,
        f_id,
        r_id: claim.r_id,
        k_id: claim.k_id,
        fetched_at,
    })
}

/// Transform one staged payload into structured records and retire it.
///
/// Used both on the hot path right after staging and by startup recovery;
/// the staged `fetched_at` becomes the request completion time either way.
pub fn process_staged(
    repo: &TrendsRepository,
    staged: &StagedPayload,
) -> Result<(), IngestError> {
    let window = repo.request_window(staged.r_id)?.ok_or_else(|| {
        RepositoryError::Logic(format!("staged payload references unknown request {}", staged.r_id))
    })?;

    let payload: Payload = serde_json::from_str(&staged.raw)?;

    // The payload's own labels must be exactly what reconstruction from the
    // window yields, otherwise later stitching could not line this fragment
    // up again.
    let expected = labels::reconstruct(window.start, window.end, payload.time.len())?;
    let mismatch = || IngestError::LabelMismatch {
        start: window.start,
        end: window.end,
    };
    let mut observed = Vec::with_capacity(payload.time.len());
    for label in payload.time.keys() {
        observed.push(parse_label(label).ok_or_else(mismatch)?);
    }
    if observed != expected {
        return Err(mismatch());
    }

    let step = if expected.len() >= 2 {
        expected[1] - expected[0]
    } else {
        Duration::zero()
    };

    let values: Vec<i64> = payload.time.values().copied().collect();

    let records = StructuredRecords {
        rfo_id: staged.rfo_id,
        r_id: staged.r_id,
        k_id: staged.k_id,
        f_id: staged.f_id,
        fetched_at: staged.fetched_at,
        values,
        geo_rows: geo_records(&payload, window.geo.as_deref()),
        related: related_records(&payload),
        resolution_tag: labels::resolution_tag(step).map(String::from),
    };

    repo.write_structured(&records)?;
    Ok(())
}

/// Parse one of the service's time labels.
fn parse_label(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc());
        }
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Flatten the geo section into rows to write.
///
/// For US requests the service returns identical data under `region` and
/// `states`; `region` is dropped there to keep one row per
/// (request, location, keyword).
fn geo_records(payload: &Payload, request_geo: Option<&str>) -> Vec<GeoRecord> {
    let mut rows = Vec::new();
    for (scope_name, locations) in &payload.geo {
        let Some(scope) = GeoScope::from_str(scope_name) else {
            warn!("skipping unknown geo scope {:?}", scope_name);
            continue;
        };
        if scope == GeoScope::Region && request_geo == Some("US") {
            continue;
        }
        for (iso, (name, value)) in locations {
            rows.push(GeoRecord {
                scope,
                iso: iso.clone(),
                name: name.clone(),
                value: *value,
            });
        }
    }
    rows
}

/// Flatten the related section into rows to write.
fn related_records(payload: &Payload) -> Vec<RelatedRecord> {
    let mut rows = Vec::new();

    let query_groups = [
        (&payload.related.query.top, true),
        (&payload.related.query.rising, false),
    ];
    for (entries, is_top) in query_groups {
        for (query, value) in entries {
            rows.push(RelatedRecord {
                reference: RelatedRef::Query(query.clone()),
                is_top,
                value: *value,
            });
        }
    }

    let topic_groups = [
        (&payload.related.topic.top, true),
        (&payload.related.topic.rising, false),
    ];
    for (entries, is_top) in topic_groups {
        for (mid, title, topic, value) in entries {
            rows.push(RelatedRecord {
                reference: RelatedRef::Topic {
                    mid: mid.clone(),
                    title: title.clone(),
                    topic: topic.clone(),
                },
                is_top,
                value: *value,
            });
        }
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_formats_parse() {
        assert!(parse_label("2022-01-01T06:00:00").is_some());
        assert!(parse_label("2022-01-01 06:00:00").is_some());
        assert!(parse_label("2022-01-01").is_some());
        assert!(parse_label("2022-01-01T06:00:00+00:00").is_some());
        assert!(parse_label("yesterday").is_none());
    }

    #[test]
    fn us_region_rows_are_suppressed() {
        let raw = r#"{
            "geo": {
                "REGION": {"US-CA": ["California", 80]},
                "STATES": {"US-CA": ["California", 80]},
                "COUNTRY": {"US": ["United States", 100]},
                "DMA": {"807": ["San Francisco-Oakland-San Jose CA", 76]}
            }
        }"#;
        let payload: Payload = serde_json::from_str(raw).unwrap();

        let rows = geo_records(&payload, Some("US"));
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.scope != GeoScope::Region));

        // Elsewhere the region scope is kept.
        let rows = geo_records(&payload, Some("DE"));
        assert_eq!(rows.len(), 4);
    }

    #[test]
    fn related_rows_carry_grouping() {
        let raw = r#"{
            "related": {
                "query": {"top": [["flu shot", 100]], "rising": [["flu near me", 250]]},
                "topic": {"top": [["/m/0dm32", "Influenza", "Disease", 100]], "rising": []}
            }
        }"#;
        let payload: Payload = serde_json::from_str(raw).unwrap();
        let rows = related_records(&payload);
        assert_eq!(rows.len(), 3);
        assert!(matches!(
            &rows[0],
            RelatedRecord { reference: RelatedRef::Query(q), is_top: true, value: 100 } if q == "flu shot"
        ));
        assert!(matches!(
            &rows[1],
            RelatedRecord { reference: RelatedRef::Query(q), is_top: false, .. } if q == "flu near me"
        ));
        assert!(matches!(
            &rows[2],
            RelatedRecord { reference: RelatedRef::Topic { topic, .. }, is_top: true, .. } if topic == "Disease"
        ));
    }
}
