//! Reference lap time interpolation.
//!
//! The live delta compares the running lap against a personal best by
//! warping the PB onto the current lap position. Split fractions describe
//! where the PB driver crossed each split as a fraction of the full lap;
//! between two known boundaries the PB time is interpolated linearly over
//! the segment.

use std::collections::BTreeMap;

/// Hypothetical PB-equivalent time at `current_ms` into the running lap.
///
/// Fraction sets are tried in quality order: fractions captured on the PB
/// lap itself, then the most recent completed lap, then live fractions
/// derived from this lap's splits against the forward estimate. With no
/// usable fractions and no splits the estimate alone scales the PB. The
/// result never exceeds the PB lap time.
pub fn reference_lap_ms(
    current_ms: u32,
    pb_laptime_ms: u32,
    pb_fractions: &[f64],
    last_lap_fractions: &[f64],
    splits: &BTreeMap<u8, u32>,
    latest_estimate_ms: Option<u32>,
) -> Option<u32> {
    if pb_laptime_ms == 0 {
        return None;
    }
    let pb = f64::from(pb_laptime_ms);

    let fractions = choose_fractions(pb_fractions, last_lap_fractions, splits, latest_estimate_ms);

    // Cumulative splits already passed on the running lap.
    let passed: Vec<u32> = splits
        .values()
        .copied()
        .filter(|&split| split <= current_ms)
        .collect();

    if fractions.is_empty() && passed.is_empty() {
        let estimate = latest_estimate_ms.filter(|&est| est > 0)?;
        let progress = (f64::from(current_ms) / f64::from(estimate)).clamp(0.0, 1.0);
        let reference = (pb * progress).round() as u32;
        return Some(reference.min(pb_laptime_ms));
    }

    let mut boundaries = fractions;
    boundaries.push(1.0);

    let segment_index = passed.len().min(boundaries.len() - 1);
    let start_fraction = if segment_index == 0 {
        0.0
    } else {
        boundaries[segment_index - 1]
    };
    let end_fraction = boundaries[segment_index];

    let pb_start = (pb * start_fraction).round();
    let pb_end = (pb * end_fraction).round();
    let pb_segment = (pb_end - pb_start).max(1.0);

    let segment_start_time = passed.iter().copied().max().unwrap_or(0);
    let segment_elapsed = f64::from(current_ms.saturating_sub(segment_start_time));
    let progress = (segment_elapsed / pb_segment).min(1.0);

    let reference = (pb_start + (progress * pb_segment).round()) as u32;
    Some(reference.min(pb_laptime_ms))
}

/// Pick the best available fraction set, normalised to strictly monotone
/// values in the open interval (0, 1).
fn choose_fractions(
    pb_fractions: &[f64],
    last_lap_fractions: &[f64],
    splits: &BTreeMap<u8, u32>,
    latest_estimate_ms: Option<u32>,
) -> Vec<f64> {
    let normalised = normalise(pb_fractions.iter().copied());
    if !normalised.is_empty() {
        return normalised;
    }
    let normalised = normalise(last_lap_fractions.iter().copied());
    if !normalised.is_empty() {
        return normalised;
    }
    match latest_estimate_ms {
        Some(estimate) if estimate > 0 => normalise(
            splits
                .values()
                .filter(|&&split| split < estimate)
                .map(|&split| f64::from(split) / f64::from(estimate)),
        ),
        _ => Vec::new(),
    }
}

fn normalise(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut result = Vec::new();
    let mut last = 0.0;
    for value in values {
        if value > last && value > 0.0 && value < 1.0 {
            result.push(value);
            last = value;
        }
    }
    result
}
