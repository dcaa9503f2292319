//! The stitching engine.
//!
//! Takes the many overlapping short-window fragments collected for one
//! (keyword, location), averages duplicates, chains overlapping fragments
//! into layers, and anchors multiple hourly layers onto a daily series to
//! produce one normalized long-range time series.

mod anchor;
mod fragment;
mod layers;
mod writer;

pub use anchor::anchor_layers;
pub use fragment::{average_duplicates, Fragment};
pub use layers::{build_layers, normalize, stitch_layer, Series};
pub use writer::AnalyticsDb;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

use crate::labels::UnreconstructibleLabels;
use crate::repository::{RepositoryError, TrendsRepository};

/// Tag selecting hourly-cadence fragments.
pub const HOURLY_TAG: &str = "resolution:hourly";
/// Tag selecting daily-cadence fragments.
pub const DAILY_TAG: &str = "resolution:daily";

#[derive(Debug, Error)]
pub enum StitchError {
    #[error("duplicate fragments for window {start} .. {end} have differing lengths")]
    LengthMismatch {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error(transparent)]
    Labels(#[from] UnreconstructibleLabels),
    #[error("fragment of request {r_id} does not overlap the layer under construction")]
    NoOverlap { r_id: i64 },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Stitch the hourly fragments of one (keyword, location) into a single
/// normalized series.
///
/// Returns `None` when there is nothing stitchable, or when anchoring
/// fails; anchoring failures log a warning and never yield partial data.
pub fn stitch_keyword_location(
    repo: &TrendsRepository,
    k_id: i64,
    geo: Option<&str>,
) -> Result<Option<Series>, StitchError> {
    let place = geo.unwrap_or("world");

    let rows = repo.tagged_fragments(k_id, geo, HOURLY_TAG)?;
    if rows.is_empty() {
        return Ok(None);
    }
    let fragments = average_duplicates(&rows)?;

    let mut stitched = Vec::new();
    for layer in build_layers(fragments.clone(), false) {
        let series = stitch_layer(&layer, false)?;
        if !series.is_empty() {
            stitched.push(series);
        }
    }

    if stitched.len() <= 1 {
        return Ok(stitched.pop());
    }

    // Several disconnected hourly layers: a daily series spanning them is
    // needed to put them on a common amplitude.
    let daily_rows = repo.tagged_fragments(k_id, geo, DAILY_TAG)?;
    if daily_rows.is_empty() {
        warn!(
            "keyword {} at {}: {} hourly layers but no daily fragments; \
             emitting plain concatenation",
            k_id,
            place,
            stitched.len()
        );
        return Ok(Some(stitch_layer(&fragments, true)?));
    }

    let daily_layers = build_layers(average_duplicates(&daily_rows)?, true);
    if daily_layers.len() != 1 {
        warn!(
            "keyword {} at {}: daily fragments do not form a single anchor \
             layer; skipping",
            k_id, place
        );
        return Ok(None);
    }
    let daily_series = stitch_layer(&daily_layers[0], true)?;

    match anchor_layers(&daily_series, &stitched) {
        Some(series) => Ok(Some(series)),
        None => {
            warn!(
                "keyword {} at {}: daily anchor has no signal over an hourly \
                 layer; skipping",
                k_id, place
            );
            Ok(None)
        }
    }
}
