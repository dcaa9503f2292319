//! Fragments and duplicate averaging.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::StitchError;
use crate::labels;
use crate::repository::FragmentRow;

/// One labeled sample vector covering a bounded window, after duplicate
/// requests for the same window have been averaged away.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Representative request id, for diagnostics.
    pub r_id: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub labels: Vec<DateTime<Utc>>,
    pub values: Vec<f64>,
}

/// Collapse duplicate requests for the same exact window by element-wise
/// averaging, and attach reconstructed labels. Output is ordered by
/// window start.
pub fn average_duplicates(rows: &[FragmentRow]) -> Result<Vec<Fragment>, StitchError> {
    let mut groups: BTreeMap<(DateTime<Utc>, DateTime<Utc>), Vec<&FragmentRow>> = BTreeMap::new();
    for row in rows {
        groups.entry((row.start, row.end)).or_default().push(row);
    }

    let mut fragments = Vec::with_capacity(groups.len());
    for ((start, end), group) in groups {
        let len = group[0].values.len();
        if group.iter().any(|row| row.values.len() != len) {
            return Err(StitchError::LengthMismatch { start, end });
        }

        let mut values = vec![0.0; len];
        for row in &group {
            for (sum, v) in values.iter_mut().zip(&row.values) {
                *sum += v;
            }
        }
        for sum in &mut values {
            *sum /= group.len() as f64;
        }

        fragments.push(Fragment {
            r_id: group.iter().map(|row| row.r_id).min().unwrap_or(0),
            start,
            end,
            labels: labels::reconstruct(start, end, len)?,
            values,
        });
    }

    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
            .unwrap()
            .and_utc()
    }

    fn row(r_id: i64, start: &str, end: &str, values: Vec<f64>) -> FragmentRow {
        FragmentRow {
            r_id,
            start: at(start),
            end: at(end),
            values,
        }
    }

    #[test]
    fn duplicates_are_averaged_elementwise() {
        // Two requests for the same 12-hour window at hourly cadence.
        let rows = vec![
            row(1, "2022-01-01 00:00", "2022-01-01 12:00", vec![10.0; 13]),
            row(2, "2022-01-01 00:00", "2022-01-01 12:00", vec![30.0; 13]),
        ];
        let fragments = average_duplicates(&rows).unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].r_id, 1);
        assert_eq!(fragments[0].labels.len(), 13);
        assert!(fragments[0].values.iter().all(|&v| v == 20.0));
    }

    #[test]
    fn distinct_windows_stay_separate_and_ordered() {
        let rows = vec![
            row(2, "2022-01-01 06:00", "2022-01-01 18:00", vec![1.0; 13]),
            row(1, "2022-01-01 00:00", "2022-01-01 12:00", vec![2.0; 13]),
        ];
        let fragments = average_duplicates(&rows).unwrap();
        assert_eq!(fragments.len(), 2);
        assert!(fragments[0].start < fragments[1].start);
    }

    #[test]
    fn differing_lengths_in_a_group_are_rejected() {
        let rows = vec![
            row(1, "2022-01-01 00:00", "2022-01-01 12:00", vec![1.0; 13]),
            row(2, "2022-01-01 00:00", "2022-01-01 12:00", vec![1.0; 12]),
        ];
        assert!(matches!(
            average_duplicates(&rows),
            Err(StitchError::LengthMismatch { .. })
        ));
    }
}
