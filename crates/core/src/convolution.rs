//! Dyadically spaced separable [1, 4, 6, 4, 1] blur.
//!
//! The horizontal pass accumulates the unnormalized row sums into an `f32`
//! scratch plane, the vertical pass sums those and divides by 256. Taps sit
//! `step = 2^(radius - 1)` samples apart and reflect at the plane edges
//! without repeating the edge sample (reflect-101).

use crate::error::ConfigError;
use crate::sample::Sample;
use crate::types::Plane;

pub const KERNEL: [f32; 5] = [1.0, 4.0, 6.0, 4.0, 1.0];

/// Horizontal sum times vertical sum.
pub const KERNEL_NORMALIZATION: f32 = 256.0;

/// Largest radius whose step still fits the tap arithmetic.
pub const MAX_RADIUS: u32 = 32;

/// Tap spacing for `radius` (1 -> 1, 2 -> 2, 3 -> 4, ...).
///
/// `filter` names the caller in the error for a radius outside
/// `[1, MAX_RADIUS]`.
pub fn step_for_radius(filter: &'static str, radius: i64) -> Result<usize, ConfigError> {
    if !(1..=i64::from(MAX_RADIUS)).contains(&radius) {
        return Err(ConfigError::InvalidRadius { filter, radius });
    }
    Ok(1usize << (radius - 1))
}

/// Reflect `pos` into `[0, max_pos)` without duplicating the edge sample.
///
/// One reflection covers every tap whose offset is smaller than the extent.
/// Taps that overshoot further keep folding, which is the periodic extension
/// of the same reflection, so small planes under large steps stay in range.
#[inline]
pub fn mirror_boundary(pos: i64, max_pos: i64) -> i64 {
    debug_assert!(max_pos > 0, "extent must be positive");
    if (0..max_pos).contains(&pos) {
        return pos;
    }
    if max_pos == 1 {
        return 0;
    }

    let period = 2 * (max_pos - 1);
    let folded = pos.rem_euclid(period);
    if folded < max_pos {
        folded
    } else {
        period - folded
    }
}

/// Mirrored source index for each of the five taps around every position.
fn tap_table(extent: usize, step: usize) -> Vec<[usize; 5]> {
    let extent_i = extent as i64;
    let step_i = step as i64;
    (0..extent_i)
        .map(|pos| {
            let mut taps = [0usize; 5];
            for (k, tap) in taps.iter_mut().enumerate() {
                let offset = (k as i64 - 2) * step_i;
                *tap = mirror_boundary(pos + offset, extent_i) as usize;
            }
            taps
        })
        .collect()
}

/// Horizontal pass: unnormalized row sums (kernel total 16).
pub fn convolve_rows<T: Sample>(src: &Plane<T>, step: usize) -> Plane<f32> {
    let width = src.width();
    let height = src.height();
    let taps = tap_table(width, step);
    let mut dst = Plane::<f32>::with_stride(width, height, width);

    for y in 0..height {
        let src_row = src.row(y);
        let dst_row = dst.row_mut(y);
        for (x, tap) in taps.iter().enumerate() {
            let mut sum = 0.0f32;
            for (&weight, &sx) in KERNEL.iter().zip(tap.iter()) {
                sum += src_row[sx].widen() * weight;
            }
            dst_row[x] = sum;
        }
    }
    dst
}

/// Vertical pass over the row sums, completing the 2D normalization.
///
/// `emit(x, y, blurred)` receives every output sample in row-major order so
/// callers can fuse their per-sample arithmetic without a second buffer.
pub fn convolve_cols<F>(intermediate: &Plane<f32>, step: usize, mut emit: F)
where
    F: FnMut(usize, usize, f32),
{
    let width = intermediate.width();
    let height = intermediate.height();
    let taps = tap_table(height, step);

    for (y, tap) in taps.iter().enumerate() {
        let rows = tap.map(|sy| intermediate.row(sy));
        for x in 0..width {
            let mut sum = 0.0f32;
            for (&weight, row) in KERNEL.iter().zip(rows.iter()) {
                sum += row[x] * weight;
            }
            emit(x, y, sum / KERNEL_NORMALIZATION);
        }
    }
}

/// Full blur: horizontal pass then vertical pass.
pub fn blur_plane<T: Sample>(src: &Plane<T>, step: usize) -> Plane<f32> {
    let intermediate = convolve_rows(src, step);
    let mut blurred = Plane::<f32>::with_stride(src.width(), src.height(), src.width());
    convolve_cols(&intermediate, step, |x, y, value| blurred.set(x, y, value));
    blurred
}
