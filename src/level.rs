// XP level curve: level = floor(sqrt(points / 20)) + 1
//
// The curve is quadratic in points, so early levels come fast and later ones
// slow down. `level` on the player row is a server-maintained cache derived
// from `total_points`; every point-changing reducer recomputes it through
// `calculate_level` so the two can never drift.

/// Points-per-level quadratic coefficient
const POINTS_PER_LEVEL_STEP: u32 = 20;

/// Level for a cumulative point total. Monotonic, `calculate_level(0) == 1`.
pub fn calculate_level(points: u32) -> u32 {
    (f64::from(points) / f64::from(POINTS_PER_LEVEL_STEP)).sqrt().floor() as u32 + 1
}

/// Minimum cumulative points at which `level` is reached.
/// Inverse of `calculate_level` at the boundaries: level 1 starts at 0,
/// level 2 at 20, level 3 at 80, ...
pub fn points_for_level(level: u32) -> u32 {
    let steps = level.saturating_sub(1);
    POINTS_PER_LEVEL_STEP.saturating_mul(steps).saturating_mul(steps)
}

/// Progress through the current level as a percentage in [0, 100].
/// A degenerate zero-width interval reads as complete.
pub fn level_progress(points: u32, level: u32) -> f32 {
    let floor = points_for_level(level);
    let ceil = points_for_level(level + 1);
    if ceil <= floor {
        return 100.0;
    }
    let into = points.saturating_sub(floor) as f32;
    let span = (ceil - floor) as f32;
    (into / span * 100.0).clamp(0.0, 100.0)
}
