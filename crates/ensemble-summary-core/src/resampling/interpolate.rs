//! Pure interpolation kernels over sorted sample positions.
//!
//! Positions are `i64` (epoch milliseconds in practice, but nothing here
//! assumes a time unit) and values are `f64`. Both kernels come in a
//! sequence form and a single-point form; the single-point forms exist so
//! point-sampling a date produces bit-identical results to generating a grid
//! that happens to contain that date.
//!
//! Backfill is right-continuous step interpolation: the value at a query
//! point is the raw value reported *at or after* it. This matches quantities
//! whose raw value represents an already-elapsed interval.

/// Backfill-interpolate a single query position.
///
/// - `x < xp[0]` yields `y_left`.
/// - Otherwise the result is `yp` at the left-biased insertion index of `x`
///   into `xp`, or `y_right` when that index is past the end.
/// - An empty `xp` yields `y_right`.
pub fn backfill_at(x: i64, xp: &[i64], yp: &[f64], y_left: f64, y_right: f64) -> f64 {
    debug_assert_eq!(xp.len(), yp.len());
    match xp.first() {
        None => y_right,
        Some(&first) if x < first => y_left,
        Some(_) => {
            let idx = xp.partition_point(|&v| v < x);
            if idx < yp.len() { yp[idx] } else { y_right }
        }
    }
}

/// Backfill-interpolate every position in `x`.
///
/// Duplicate query positions yield duplicate, non-deduplicated results.
/// `xp` must be sorted ascending; `x` may be in any order.
pub fn interpolate_backfill(
    x: &[i64],
    xp: &[i64],
    yp: &[f64],
    y_left: f64,
    y_right: f64,
) -> Vec<f64> {
    debug_assert!(xp.windows(2).all(|w| w[0] <= w[1]), "xp must be sorted");
    x.iter()
        .map(|&xi| backfill_at(xi, xp, yp, y_left, y_right))
        .collect()
}

/// Linearly interpolate a single query position, clamped to the raw range.
///
/// Query positions before `xp[0]` yield `yp[0]`; positions after the last
/// raw sample yield the last raw value (flat extrapolation on both sides).
/// With a single raw sample the result is constant. `xp` must be non-empty.
pub fn linear_clamped_at(x: i64, xp: &[i64], yp: &[f64]) -> f64 {
    debug_assert_eq!(xp.len(), yp.len());
    debug_assert!(!xp.is_empty(), "linear interpolation needs raw samples");

    if x <= xp[0] {
        return yp[0];
    }
    let last = xp.len() - 1;
    if x >= xp[last] {
        return yp[last];
    }

    // First index with xp[idx] >= x; the guards above ensure 0 < idx <= last.
    let idx = xp.partition_point(|&v| v < x);
    if xp[idx] == x {
        return yp[idx];
    }
    let (x0, x1) = (xp[idx - 1], xp[idx]);
    let (y0, y1) = (yp[idx - 1], yp[idx]);
    let t = (x - x0) as f64 / (x1 - x0) as f64;
    y0 + t * (y1 - y0)
}

/// Linearly interpolate every position in `x`, clamped to the raw range.
///
/// `xp` must be sorted ascending and non-empty.
pub fn interpolate_linear_clamped(x: &[i64], xp: &[i64], yp: &[f64]) -> Vec<f64> {
    debug_assert!(xp.windows(2).all(|w| w[0] <= w[1]), "xp must be sorted");
    x.iter().map(|&xi| linear_clamped_at(xi, xp, yp)).collect()
}
