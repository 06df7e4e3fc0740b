//! Low-level elementwise primitives every operation in `ops` is built from.

use rayon::prelude::*;

/// Applies `f` to every voxel in place, in parallel.
pub fn map_in_place<F: Fn(f64) -> f64 + Sync>(data: &mut [f64], f: F) {
    data.par_iter_mut().for_each(|v| *v = f(*v));
}

/// Applies `f` to every voxel, skipping NaNs (left untouched), in parallel.
pub fn map_in_place_skip_nan<F: Fn(f64) -> f64 + Sync>(data: &mut [f64], f: F) {
    data.par_iter_mut().for_each(|v| {
        if !v.is_nan() {
            *v = f(*v);
        }
    });
}

/// `dst[i] = f(dst[i], scalar)` for every voxel, in parallel.
pub fn map_scalar_in_place<F: Fn(f64, f64) -> f64 + Sync>(data: &mut [f64], scalar: f64, f: F) {
    data.par_iter_mut().for_each(|v| *v = f(*v, scalar));
}

/// `dst[i] = f(dst[i], rhs[i])`, broadcasting `rhs` by repeating it if it is
/// shorter than `dst` (used for a 3D operand against a 4D series, applying
/// the same 3D map to every time point).
pub fn map_binary_in_place<F: Fn(f64, f64) -> f64 + Sync>(dst: &mut [f64], rhs: &[f64], f: F) {
    if rhs.len() == dst.len() {
        dst.par_iter_mut().zip(rhs.par_iter()).for_each(|(d, r)| *d = f(*d, *r));
    } else {
        let period = rhs.len();
        dst.par_iter_mut().enumerate().for_each(|(i, d)| *d = f(*d, rhs[i % period]));
    }
}

/// Fused multiply-add over a whole buffer: `dst[i] = dst[i]*mul + add`.
pub fn fma_in_place(data: &mut [f64], mul: f64, add: f64) {
    map_in_place(data, |v| v.mul_add(mul, add));
}

/// Min/max/mean over non-NaN voxels, or `None` if every voxel is NaN.
pub fn non_nan_min_max(data: &[f64]) -> Option<(f64, f64)> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut any = false;
    for &v in data {
        if v.is_nan() {
            continue;
        }
        any = true;
        min = min.min(v);
        max = max.max(v);
    }
    any.then_some((min, max))
}

pub fn non_nan_mean(data: &[f64]) -> f64 {
    let (sum, count) = data
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, c), &v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_in_place_applies_everywhere() {
        let mut data = vec![1.0, 2.0, 3.0];
        map_in_place(&mut data, |v| v * 2.0);
        assert_eq!(data, vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn map_binary_broadcasts_shorter_rhs() {
        let mut dst = vec![1.0, 2.0, 3.0, 4.0];
        let rhs = vec![10.0, 20.0];
        map_binary_in_place(&mut dst, &rhs, |a, b| a + b);
        assert_eq!(dst, vec![11.0, 22.0, 13.0, 24.0]);
    }

    #[test]
    fn non_nan_min_max_ignores_nan() {
        let data = vec![1.0, f64::NAN, -3.0, 5.0];
        assert_eq!(non_nan_min_max(&data), Some((-3.0, 5.0)));
    }
}
