//! Radar contact geometry.
//!
//! Bearings use the screen convention `atan2(Δx, Δy)`: straight ahead along
//! the heading is zero, clockwise positive, normalised to [−π, π].

use std::f64::consts::PI;

/// Contacts beyond this range are not radar targets.
pub const DEFAULT_RADAR_RANGE_M: f64 = 140.0;
/// Contacts this close are the player's own car echo and are dropped.
const MIN_CONTACT_DISTANCE_M: f64 = 0.5;

/// One radar contact relative to the player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadarTarget {
    pub distance: f64,
    /// Relative bearing in [−π, π].
    pub bearing: f64,
    /// Lateral offset in the player frame (positive right).
    pub offset_x: f64,
    /// Longitudinal offset in the player frame (positive ahead).
    pub offset_y: f64,
}

/// Compute radar contacts for every other car, sorted by ascending
/// distance. Contacts closer than half a metre or farther than `max_range`
/// metres are excluded.
pub fn compute_radar_targets(
    player_xy: (f64, f64),
    heading_rad: f64,
    others_xy: &[(f64, f64)],
    max_range: f64,
) -> Vec<RadarTarget> {
    let (px, py) = player_xy;
    let mut targets: Vec<RadarTarget> = others_xy
        .iter()
        .filter_map(|&(ox, oy)| {
            let dx = ox - px;
            let dy = oy - py;
            let distance = dx.hypot(dy);
            // Keep only finite in-range contacts: a NaN coordinate anywhere
            // makes the distance NaN, which must not survive as a target.
            let in_range = distance.is_finite()
                && distance > MIN_CONTACT_DISTANCE_M
                && distance <= max_range;
            if !in_range {
                return None;
            }
            let bearing = normalise_angle(dx.atan2(dy) - heading_rad);
            Some(RadarTarget {
                distance,
                bearing,
                offset_x: distance * bearing.sin(),
                offset_y: distance * bearing.cos(),
            })
        })
        .collect();

    targets.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    targets
}

/// Wrap an angle into [−π, π].
fn normalise_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI);
    wrapped - PI
}
