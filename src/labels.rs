//! Reconstruction of the time labels the upstream service implicitly
//! attaches to each sample of a fetched window.
//!
//! The service returns bare value vectors; the label of sample `i` is
//! `window_start + i * step` where the step is one of a small set of
//! cadences the service actually emits. Ingestion uses this to validate
//! payloads before writing them, the stitching engine uses it to line
//! fragments up on a common time axis.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// Cadences the upstream service emits, in seconds.
const SUPPORTED_STEPS: [i64; 4] = [
    3_600,       // hourly
    4 * 3_600,   // 4-hourly
    86_400,      // daily
    7 * 86_400,  // weekly
];

/// Accept a snapped cadence only within this fraction of the target step.
/// Anything further off is ambiguous and gets rejected rather than guessed.
const SNAP_TOLERANCE: f64 = 0.10;

/// The observed cadence of a window does not match any supported
/// resolution, or the reconstructed labels disagree with the window end.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot reconstruct time labels: {count} samples over {start} .. {end}")]
pub struct UnreconstructibleLabels {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub count: usize,
}

/// Reconstruct the ordered label sequence for `count` samples spanning
/// `start .. end`.
///
/// Pure and restartable: the result depends only on the arguments.
pub fn reconstruct(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    count: usize,
) -> Result<Vec<DateTime<Utc>>, UnreconstructibleLabels> {
    if count == 0 {
        return Ok(Vec::new());
    }

    let fail = || UnreconstructibleLabels { start, end, count };

    let window = (end - start).num_seconds();
    if window <= 0 {
        return Err(fail());
    }

    let step = snap_step(window as f64 / count as f64).ok_or_else(fail)?;

    let labels: Vec<DateTime<Utc>> = (0..count as i64)
        .map(|i| start + Duration::seconds(i * step))
        .collect();

    // The last label has to land on the window end, give or take one step:
    // the service labels both endpoints inclusively, so an exact window has
    // its final sample exactly at `end`.
    let last = labels[count - 1];
    if (end - last).num_seconds().abs() > step {
        return Err(fail());
    }

    Ok(labels)
}

/// Snap a raw per-sample duration to the nearest supported cadence.
fn snap_step(raw_seconds: f64) -> Option<i64> {
    SUPPORTED_STEPS
        .iter()
        .copied()
        .find(|&step| (raw_seconds - step as f64).abs() <= step as f64 * SNAP_TOLERANCE)
}

/// The resolution tag for a fragment with the given inter-label step, if
/// the cadence is one the stitching engine anchors on.
pub fn resolution_tag(step: Duration) -> Option<&'static str> {
    match step.num_seconds() {
        3_600 => Some("resolution:hourly"),
        86_400 => Some("resolution:daily"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
            .unwrap()
            .and_utc()
    }

    #[test]
    fn empty_vector_yields_no_labels() {
        let start = at("2022-01-01 00:00");
        let end = at("2022-01-08 00:00");
        assert_eq!(reconstruct(start, end, 0).unwrap(), Vec::<DateTime<Utc>>::new());
    }

    #[test]
    fn hourly_week_reconstructs_inclusively() {
        // Seven days at hourly cadence: 169 samples, both endpoints labeled.
        let start = at("2022-01-01 00:00");
        let end = at("2022-01-08 00:00");
        let labels = reconstruct(start, end, 169).unwrap();
        assert_eq!(labels.len(), 169);
        assert_eq!(labels[0], start);
        assert_eq!(labels[1] - labels[0], Duration::hours(1));
        assert_eq!(*labels.last().unwrap(), end);
    }

    #[test]
    fn four_hourly_window() {
        let start = at("2022-03-01 00:00");
        let end = at("2022-03-11 00:00");
        // 10 days / 4h = 60 intervals, 61 inclusive samples.
        let labels = reconstruct(start, end, 61).unwrap();
        assert_eq!(labels[1] - labels[0], Duration::hours(4));
        assert_eq!(*labels.last().unwrap(), end);
    }

    #[test]
    fn daily_long_window() {
        let start = at("2021-01-01 00:00");
        let end = at("2021-12-31 00:00");
        let labels = reconstruct(start, end, 365).unwrap();
        assert_eq!(labels[1] - labels[0], Duration::days(1));
        assert_eq!(*labels.last().unwrap(), end);
    }

    #[test]
    fn labels_are_strictly_increasing() {
        let start = at("2022-01-01 00:00");
        let end = at("2022-01-08 00:00");
        let labels = reconstruct(start, end, 169).unwrap();
        assert!(labels.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn ambiguous_cadence_is_rejected() {
        // 8 hours with 61 samples is a sub-hourly cadence the reconstruction
        // does not support; it must refuse rather than guess.
        let start = at("2022-01-01 00:00");
        let end = at("2022-01-01 08:00");
        assert!(reconstruct(start, end, 61).is_err());
    }

    #[test]
    fn end_mismatch_is_rejected() {
        // 30 samples over 33 hours snap to an hourly step, but the last
        // label then stops four hours short of the window end.
        let start = at("2022-01-01 00:00");
        let end = at("2022-01-02 09:00");
        assert!(reconstruct(start, end, 30).is_err());
    }

    #[test]
    fn inverted_window_is_rejected() {
        let start = at("2022-01-08 00:00");
        let end = at("2022-01-01 00:00");
        assert!(reconstruct(start, end, 24).is_err());
    }

    #[test]
    fn resolution_tags() {
        assert_eq!(resolution_tag(Duration::hours(1)), Some("resolution:hourly"));
        assert_eq!(resolution_tag(Duration::days(1)), Some("resolution:daily"));
        assert_eq!(resolution_tag(Duration::hours(4)), None);
        assert_eq!(resolution_tag(Duration::weeks(1)), None);
    }
}
