//! Overlap-based layering and in-layer stitching.
//!
//! Consecutive fragments that overlap in time and carry a usable anchoring
//! signal on the overlap are chained into one layer and rescaled onto a
//! common amplitude. The rescaling of two frames follows the overlap-maxima
//! method; a finished layer is normalized to a maximum of 100.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::fragment::Fragment;
use super::StitchError;

/// A stitched time series: label -> value, chronologically ordered.
pub type Series = BTreeMap<DateTime<Utc>, f64>;

/// Split ordered fragments into maximal stitchable chains.
///
/// A new layer starts when a fragment has no labels, shares no labels with
/// the previous fragment, or shares only labels on which one side is
/// entirely zero. With `ignore_no_overlap` only the no-labels rule splits;
/// the stitcher then concatenates at scale 1 where no signal exists.
pub fn build_layers(fragments: Vec<Fragment>, ignore_no_overlap: bool) -> Vec<Vec<Fragment>> {
    let mut layers: Vec<Vec<Fragment>> = Vec::new();
    let mut current: Vec<Fragment> = Vec::new();

    for fragment in fragments {
        let split = match current.last() {
            None => false,
            Some(prev) => should_split(prev, &fragment, ignore_no_overlap),
        };
        if split {
            layers.push(std::mem::take(&mut current));
        }
        current.push(fragment);
    }
    if !current.is_empty() {
        layers.push(current);
    }

    layers
}

fn should_split(prev: &Fragment, next: &Fragment, ignore_no_overlap: bool) -> bool {
    if next.labels.is_empty() {
        return true;
    }
    if ignore_no_overlap {
        return false;
    }

    let overlap_max = |frag: &Fragment, other: &Fragment| {
        frag.labels
            .iter()
            .zip(&frag.values)
            .filter(|(label, _)| other.labels.contains(*label))
            .map(|(_, v)| *v)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| v.max(m))))
    };

    // None means no shared labels at all; zero on either side means there
    // is no signal to anchor the rescaling on.
    match (overlap_max(prev, next), overlap_max(next, prev)) {
        (Some(a), Some(b)) => a == 0.0 || b == 0.0,
        _ => true,
    }
}

/// Stitch one chain of fragments, left to right, into a single series
/// normalized to a maximum of 100.
///
/// Each new fragment is rescaled by the ratio of the overlap maxima
/// (existing over incoming) and contributes only its labels beyond the
/// overlap, so earlier fragments win on shared labels.
pub fn stitch_layer(
    fragments: &[Fragment],
    ignore_no_overlap: bool,
) -> Result<Series, StitchError> {
    let mut series = Series::new();

    for fragment in fragments {
        if series.is_empty() {
            series.extend(fragment.labels.iter().copied().zip(fragment.values.iter().copied()));
            continue;
        }

        let ours_max = fragment
            .labels
            .iter()
            .filter_map(|label| series.get(label).copied())
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| v.max(m))));
        let theirs_max = fragment
            .labels
            .iter()
            .zip(&fragment.values)
            .filter(|(label, _)| series.contains_key(*label))
            .map(|(_, v)| *v)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| v.max(m))));

        let scale = match (ours_max, theirs_max) {
            (Some(ours), Some(theirs)) if ours > 0.0 && theirs > 0.0 => ours / theirs,
            _ if ignore_no_overlap => 1.0,
            _ => return Err(StitchError::NoOverlap { r_id: fragment.r_id }),
        };

        for (label, value) in fragment.labels.iter().zip(&fragment.values) {
            series.entry(*label).or_insert(value * scale);
        }
    }

    normalize(&mut series);
    Ok(series)
}

/// Scale a series so its maximum is 100. A series with no positive values
/// is left untouched.
pub fn normalize(series: &mut Series) {
    let max = series.values().fold(0.0f64, |m, &v| m.max(v));
    if max > 0.0 {
        for value in series.values_mut() {
            *value = 100.0 * *value / max;
        }
    }
}
