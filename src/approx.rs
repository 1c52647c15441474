//! Utilities to approximate equality of `f32` volumes.
//!
//! The CPU and device paths evaluate the same sums, but the device is free to
//! contract multiply-adds and uses its own `exp`, so their outputs are
//! compared with a tolerance rather than bit for bit.

/// Tolerance accepted between the CPU and device paths.
pub const DEVICE_TOLERANCE: f32 = 1e-4;

/// The best expected epsilon between two evaluations of the same expression.
pub const F32_MIN_ERROR: f32 = 1e-6;

/// How close two values are.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApproxEquality {
    /// Within [`F32_MIN_ERROR`].
    Precise = 0,
    /// Within [`DEVICE_TOLERANCE`].
    Relative = 1,
    /// No relative equality.
    Scarce = 2,
}

/// Rates the difference between two values.
#[must_use]
pub fn rate(a: f32, b: f32) -> ApproxEquality {
    let dif = (a - b).abs();
    if dif < F32_MIN_ERROR {
        ApproxEquality::Precise
    } else if dif < DEVICE_TOLERANCE {
        ApproxEquality::Relative
    } else {
        ApproxEquality::Scarce
    }
}

/// Rates two slices by their worst element; slices of different length are `Scarce`.
#[must_use]
pub fn rate_slices(a: &[f32], b: &[f32]) -> ApproxEquality {
    if a.len() != b.len() {
        return ApproxEquality::Scarce;
    }
    a.iter()
        .zip(b)
        .map(|(&x, &y)| rate(x, y))
        .max()
        .unwrap_or(ApproxEquality::Precise)
}

/// Largest absolute elementwise difference, or `None` if lengths differ.
#[must_use]
pub fn max_abs_diff(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    Some(
        a.iter()
            .zip(b)
            .map(|(&x, &y)| (x - y).abs())
            .fold(0.0, f32::max),
    )
}

/// `true` if every element pair is within `tol`.
#[must_use]
pub fn approx_eq_tol(a: &[f32], b: &[f32], tol: f32) -> bool {
    max_abs_diff(a, b).is_some_and(|d| d <= tol)
}

/// `true` if every element pair is [`ApproxEquality::Precise`].
#[must_use]
pub fn approx_eq(a: &[f32], b: &[f32]) -> bool {
    rate_slices(a, b) == ApproxEquality::Precise
}
