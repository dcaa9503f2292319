//! Cross-resolution anchoring of hourly layers onto a daily series.
//!
//! Independent hourly layers have independent amplitudes; a single daily
//! series spanning them provides the common scale. Each layer is rescaled
//! so its mean matches the daily mean over the layer's span, then the
//! layers are merged and normalized.

use super::layers::{normalize, Series};

/// Anchor hourly layers onto the daily series.
///
/// Returns `None` when any layer cannot be anchored: the daily series has
/// no data, or only zeros, over the layer's span, or the layer itself is
/// all zero. No partial result is ever produced.
pub fn anchor_layers(daily: &Series, hourly_layers: &[Series]) -> Option<Series> {
    let mut merged = Series::new();

    for layer in hourly_layers {
        let first = *layer.keys().next()?;
        let last = *layer.keys().next_back()?;

        let anchor_values: Vec<f64> = daily.range(first..=last).map(|(_, &v)| v).collect();
        if anchor_values.is_empty() {
            return None;
        }
        let anchor_mean: f64 =
            anchor_values.iter().sum::<f64>() / anchor_values.len() as f64;
        let layer_mean: f64 = layer.values().sum::<f64>() / layer.len() as f64;

        if anchor_mean == 0.0 || layer_mean == 0.0 {
            return None;
        }

        let scale = anchor_mean / layer_mean;
        for (label, value) in layer {
            merged.insert(*label, value * scale);
        }
    }

    normalize(&mut merged);
    Some(merged)
}
