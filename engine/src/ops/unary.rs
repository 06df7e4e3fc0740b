//! The elementwise unary/binary arithmetic family: the long tail of
//! per-voxel operations that don't need their own dedicated module because
//! they're each a handful of lines on top of [`crate::arithmetic`]'s
//! primitives.

use crate::affine::Affine;
use crate::arithmetic::{fma_in_place, map_binary_in_place, map_in_place, map_in_place_skip_nan, map_scalar_in_place, non_nan_mean, non_nan_min_max};
use crate::error::{Error, Result};
use crate::ops::stats::{qg, qginv};
use crate::ops::threshold::robust_range;
use crate::volume::Volume;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// A binary op's rhs is compatible with `dst` either when the shapes match
/// exactly or when `rhs` is a single 3D volume broadcast over a 4D series
/// (`map_binary_in_place` repeats it every `rhs.len()` voxels) — the same
/// `vb = (v % nvolb) * nvox3D` broadcast the reference tool applies. Any
/// other length mismatch can't be repeated evenly and is rejected.
fn require_compatible_shape(op: &'static str, a: &Volume, b: &Volume) -> Result<()> {
    let (dst_len, rhs_len) = (a.data().len(), b.data().len());
    if rhs_len == 0 || dst_len % rhs_len != 0 {
        return Err(Error::shape(
            op,
            format!(
                "operand shapes differ: {}x{}x{}x{} vs {}x{}x{}x{}",
                a.nx(), a.ny(), a.nz(), a.nt(), b.nx(), b.ny(), b.nz(), b.nt()
            ),
        ));
    }
    Ok(())
}

pub fn add_scalar(vol: &mut Volume, s: f64) {
    map_scalar_in_place(vol.data_mut(), s, |v, s| v + s);
}
pub fn sub_scalar(vol: &mut Volume, s: f64) {
    map_scalar_in_place(vol.data_mut(), s, |v, s| v - s);
}
pub fn mul_scalar(vol: &mut Volume, s: f64) {
    map_scalar_in_place(vol.data_mut(), s, |v, s| v * s);
}
pub fn div_scalar(vol: &mut Volume, s: f64) {
    map_scalar_in_place(vol.data_mut(), s, |v, s| v / s);
}
pub fn rem_scalar(vol: &mut Volume, s: f64) {
    map_scalar_in_place(vol.data_mut(), s, |v, s| v % s);
}
pub fn max_scalar(vol: &mut Volume, s: f64) {
    map_scalar_in_place(vol.data_mut(), s, f64::max);
}
pub fn min_scalar(vol: &mut Volume, s: f64) {
    map_scalar_in_place(vol.data_mut(), s, f64::min);
}
pub fn power(vol: &mut Volume, p: f64) {
    map_scalar_in_place(vol.data_mut(), p, f64::powf);
}

pub fn add_vol(vol: &mut Volume, rhs: &Volume) -> Result<()> {
    require_compatible_shape("add", vol, rhs)?;
    map_binary_in_place(vol.data_mut(), rhs.data(), |a, b| a + b);
    Ok(())
}
pub fn sub_vol(vol: &mut Volume, rhs: &Volume) -> Result<()> {
    require_compatible_shape("sub", vol, rhs)?;
    map_binary_in_place(vol.data_mut(), rhs.data(), |a, b| a - b);
    Ok(())
}
pub fn mul_vol(vol: &mut Volume, rhs: &Volume) -> Result<()> {
    require_compatible_shape("mul", vol, rhs)?;
    map_binary_in_place(vol.data_mut(), rhs.data(), |a, b| a * b);
    Ok(())
}
pub fn div_vol(vol: &mut Volume, rhs: &Volume) -> Result<()> {
    require_compatible_shape("div", vol, rhs)?;
    map_binary_in_place(vol.data_mut(), rhs.data(), |a, b| a / b);
    Ok(())
}
pub fn max_vol(vol: &mut Volume, rhs: &Volume) -> Result<()> {
    require_compatible_shape("max", vol, rhs)?;
    map_binary_in_place(vol.data_mut(), rhs.data(), f64::max);
    Ok(())
}
pub fn min_vol(vol: &mut Volume, rhs: &Volume) -> Result<()> {
    require_compatible_shape("min", vol, rhs)?;
    map_binary_in_place(vol.data_mut(), rhs.data(), f64::min);
    Ok(())
}

/// `mas`: zeroes every voxel whose co-located mask value is not strictly
/// positive, leaving the rest unchanged.
pub fn mask_with(vol: &mut Volume, mask: &Volume) -> Result<()> {
    require_compatible_shape("mas", vol, mask)?;
    map_binary_in_place(vol.data_mut(), mask.data(), |v, m| if m > 0.0 { v } else { 0.0 });
    Ok(())
}

pub fn thr(vol: &mut Volume, t: f64) {
    map_in_place(vol.data_mut(), move |v| if v < t { 0.0 } else { v });
}
pub fn uthr(vol: &mut Volume, t: f64) {
    map_in_place(vol.data_mut(), move |v| if v > t { 0.0 } else { v });
}
pub fn clamp_below(vol: &mut Volume, lo: f64) {
    map_in_place(vol.data_mut(), move |v| v.max(lo));
}
pub fn clamp_above(vol: &mut Volume, hi: f64) {
    map_in_place(vol.data_mut(), move |v| v.min(hi));
}

fn percentile_value(vol: &Volume, p: f64) -> f64 {
    let (lo, hi) = robust_range(vol.data(), false);
    lo + (p / 100.0) * (hi - lo)
}
pub fn thr_percentile(vol: &mut Volume, p: f64) {
    thr(vol, percentile_value(vol, p));
}
pub fn uthr_percentile(vol: &mut Volume, p: f64) {
    uthr(vol, percentile_value(vol, p));
}
pub fn clamp_below_percentile(vol: &mut Volume, p: f64) {
    clamp_below(vol, percentile_value(vol, p));
}
pub fn clamp_above_percentile(vol: &mut Volume, p: f64) {
    clamp_above(vol, percentile_value(vol, p));
}

macro_rules! unary_math {
    ($name:ident, $f:expr) => {
        pub fn $name(vol: &mut Volume) {
            map_in_place_skip_nan(vol.data_mut(), $f);
        }
    };
}
unary_math!(exp, f64::exp);
unary_math!(log, f64::ln);
unary_math!(floor, f64::floor);
unary_math!(round, f64::round);
unary_math!(ceil, f64::ceil);
unary_math!(trunc, f64::trunc);
unary_math!(sin, f64::sin);
unary_math!(cos, f64::cos);
unary_math!(tan, f64::tan);
unary_math!(asin, f64::asin);
unary_math!(acos, f64::acos);
unary_math!(atan, f64::atan);
unary_math!(sqr, |v: f64| v * v);
unary_math!(sqrt, f64::sqrt);
unary_math!(recip, f64::recip);
unary_math!(abs, f64::abs);

pub fn bin(vol: &mut Volume) {
    map_in_place(vol.data_mut(), |v| if v.is_nan() || v <= 0.0 { 0.0 } else { 1.0 });
}
pub fn binv(vol: &mut Volume) {
    map_in_place(vol.data_mut(), |v| if !v.is_nan() && v > 0.0 { 0.0 } else { 1.0 });
}

pub fn nan(vol: &mut Volume) {
    map_in_place(vol.data_mut(), |v| if v.is_nan() { 0.0 } else { v });
}
pub fn nanm(vol: &mut Volume) {
    map_in_place(vol.data_mut(), |v| if v.is_nan() { 1.0 } else { 0.0 });
}

fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

/// Fills the buffer with independent `Uniform(0, 1)` draws. Unlike the
/// reference tool's libc-backed generator this is seedable for
/// reproducible runs, which the spec's "numerical proximity, not bit-exact
/// parity" goal explicitly permits.
pub fn rand_uniform(vol: &mut Volume, seed: Option<u64>) {
    let mut rng = rng_from_seed(seed);
    for v in vol.data_mut() {
        *v = rng.gen::<f64>();
    }
}

/// Fills the buffer with independent standard-normal draws via the
/// Box-Muller transform, consuming a fresh pair of uniforms per output
/// sample (no caching the companion draw, so the result is independent of
/// buffer length parity).
pub fn rand_normal(vol: &mut Volume, seed: Option<u64>) {
    let mut rng = rng_from_seed(seed);
    for v in vol.data_mut() {
        let u1: f64 = rng.gen_range(1e-300..1.0);
        let u2: f64 = rng.gen();
        *v = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    }
}

/// Reports the non-NaN min/max without mutating the volume.
pub fn range(vol: &Volume) -> (f64, f64) {
    let mm = non_nan_min_max(vol.data()).unwrap_or((0.0, 0.0));
    tracing::info!(min = mm.0, max = mm.1, "range");
    mm
}

fn for_each_volume_chunk(vol: &mut Volume, f: impl Fn(&mut [f64]) + Sync) {
    vol.volumes3_mut().par_bridge().for_each(|chunk| f(chunk));
}

/// Per-voxel rank among the non-NaN voxels of its own 3D sub-volume, 1 for
/// the smallest value, ties broken by ascending buffer index (a stable
/// sort, chosen over the reference tool's unspecified `qsort` tie order
/// for reproducibility).
pub fn rank(vol: &mut Volume) {
    for_each_volume_chunk(vol, |chunk| rank_one(chunk));
}

fn rank_one(chunk: &mut [f64]) {
    let mut order: Vec<usize> = (0..chunk.len()).filter(|&i| !chunk[i].is_nan()).collect();
    order.sort_by(|&a, &b| chunk[a].partial_cmp(&chunk[b]).unwrap());
    let mut ranks = vec![f64::NAN; chunk.len()];
    for (r, &i) in order.iter().enumerate() {
        ranks[i] = (r + 1) as f64;
    }
    chunk.copy_from_slice(&ranks);
}

/// `rank` followed by mapping each rank to its normalised-quantile z-score
/// via [`qginv`]: rank `r` of `n` non-NaN voxels becomes the z-score whose
/// upper-tail probability is `1 - r/(n+1)`, so the smallest value maps to
/// the most negative z and the largest to the most positive.
pub fn ranknorm(vol: &mut Volume) {
    for_each_volume_chunk(vol, |chunk| {
        let n = chunk.iter().filter(|v| !v.is_nan()).count();
        if n == 0 {
            return;
        }
        let mut order: Vec<usize> = (0..chunk.len()).filter(|&i| !chunk[i].is_nan()).collect();
        order.sort_by(|&a, &b| chunk[a].partial_cmp(&chunk[b]).unwrap());
        let mut out = vec![f64::NAN; chunk.len()];
        for (r, &i) in order.iter().enumerate() {
            let p_upper = 1.0 - (r + 1) as f64 / (n as f64 + 1.0);
            out[i] = qginv(p_upper);
        }
        chunk.copy_from_slice(&out);
    });
}

/// Upper-tail standard-normal p-value for each z-score voxel.
pub fn ztop(vol: &mut Volume) {
    map_in_place_skip_nan(vol.data_mut(), qg);
}
/// Inverse of [`ztop`]: z-score for each upper-tail p-value voxel.
pub fn ptoz(vol: &mut Volume) {
    map_in_place_skip_nan(vol.data_mut(), qginv);
}

/// Permutation-test maxima p-values: `null_max` is the empirical
/// distribution of the permutation max statistic (one value per
/// permutation). Each voxel becomes the fraction of null maxima at least
/// as large as its own (observed) value — the family-wise-error-corrected
/// p-value a max-statistic permutation test reports.
pub fn pval(vol: &mut Volume, null_max: &[f64]) -> Result<()> {
    if null_max.is_empty() {
        return Err(Error::argument("pval", "null distribution must not be empty"));
    }
    let mut sorted = null_max.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len() as f64;
    map_in_place(vol.data_mut(), move |v| {
        let below = sorted.partition_point(|&x| x < v);
        (sorted.len() - below) as f64 / n
    });
    Ok(())
}

/// Like [`pval`] but with a continuity correction (`+1` in numerator and
/// denominator), avoiding a reported p-value of exactly zero when the
/// observed statistic exceeds every permutation's maximum.
pub fn pval0(vol: &mut Volume, null_max: &[f64]) -> Result<()> {
    if null_max.is_empty() {
        return Err(Error::argument("pval0", "null distribution must not be empty"));
    }
    let mut sorted = null_max.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len() as f64;
    map_in_place(vol.data_mut(), move |v| {
        let below = sorted.partition_point(|&x| x < v);
        ((sorted.len() - below) as f64 + 1.0) / (n + 1.0)
    });
    Ok(())
}

/// Step-down corrected p-values: takes the voxelwise `pval` map and
/// enforces monotonicity (a voxel can never be reported as more
/// significant than every voxel with a larger observed statistic).
pub fn cpval(vol: &mut Volume, null_max: &[f64]) -> Result<()> {
    pval(vol, null_max)?;
    let mut order: Vec<usize> = (0..vol.data().len()).collect();
    let data = vol.data().to_vec();
    order.sort_by(|&a, &b| data[b].partial_cmp(&data[a]).unwrap());
    let mut running_min = 1.0f64;
    let mut corrected = data.clone();
    for &i in &order {
        running_min = running_min.min(data[i]);
        corrected[i] = running_min;
    }
    vol.data_mut().copy_from_slice(&corrected);
    Ok(())
}

/// `inm`: rescales each 3D sub-volume of a (possibly 4D) series so its own
/// mean equals `target`.
pub fn inm(vol: &mut Volume, target: f64) {
    for_each_volume_chunk(vol, move |chunk| {
        let mean = non_nan_mean(chunk);
        if mean != 0.0 {
            let scale = target / mean;
            fma_in_place(chunk, scale, 0.0);
        }
    });
}

/// `ing`: like `inm` but rescales the whole (possibly 4D) buffer by one
/// global factor derived from its overall mean, instead of per-volume.
pub fn ing(vol: &mut Volume, target: f64) {
    let mean = non_nan_mean(vol.data());
    if mean != 0.0 {
        let scale = target / mean;
        fma_in_place(vol.data_mut(), scale, 0.0);
    }
}

/// How `index` orders the raster scan relative to the volume's affine
/// handedness. See `DESIGN.md` open-question resolution #5.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexOrientation {
    /// Flip the X axis of the scan when the affine's linear part is not
    /// left-handed (i.e. determinant >= 0) — the reference tool's default.
    AffineDependent,
    /// Never flip; always scan in buffer order.
    Never,
}

fn flip_x_for(orientation: IndexOrientation, affine: &Affine) -> bool {
    match orientation {
        IndexOrientation::Never => false,
        IndexOrientation::AffineDependent => !affine.is_left_handed(),
    }
}

/// Assigns ascending integers (starting at 1) to non-zero voxels in raster
/// scan order, optionally flipping the X axis of the scan according to
/// `orientation`. All other voxels become 0.
pub fn index(vol: &mut Volume, orientation: IndexOrientation) {
    let flip_x = flip_x_for(orientation, vol.affine());
    let (nx, ny, nz, nt) = (vol.nx(), vol.ny(), vol.nz(), vol.nt());
    let snapshot = vol.data().to_vec();
    let mut out = vec![0.0; snapshot.len()];
    let mut counter: i64 = 0;
    for t in 0..nt {
        for z in 0..nz {
            for y in 0..ny {
                for xi in 0..nx {
                    let x = if flip_x { nx - 1 - xi } else { xi };
                    let i = vol.index(x, y, z, t);
                    if snapshot[i] != 0.0 {
                        counter += 1;
                        out[i] = counter as f64;
                    }
                }
            }
        }
    }
    vol.data_mut().copy_from_slice(&out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::WorkingType;

    fn make_volume(data: Vec<f64>) -> Volume {
        let n = data.len();
        Volume::new(data, n, 1, 1, 1, (1.0, 1.0, 1.0, 1.0), Affine::identity(), WorkingType::Double).unwrap()
    }

    #[test]
    fn bin_is_idempotent() {
        let mut v = make_volume(vec![-1.0, 0.0, 0.5, 3.0, f64::NAN]);
        bin(&mut v);
        let once = v.data().to_vec();
        bin(&mut v);
        assert_eq!(v.data(), once.as_slice());
    }

    #[test]
    fn abs_is_idempotent() {
        let mut v = make_volume(vec![-3.0, 2.0, 0.0]);
        abs(&mut v);
        let once = v.data().to_vec();
        abs(&mut v);
        assert_eq!(v.data(), once.as_slice());
    }

    #[test]
    fn sqr_then_sqrt_recovers_nonnegative_input() {
        let mut v = make_volume(vec![1.0, 2.0, 3.5, 0.0]);
        let original = v.data().to_vec();
        sqr(&mut v);
        sqrt(&mut v);
        for (a, b) in original.iter().zip(v.data().iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn rank_assigns_ascending_integers() {
        let mut v = make_volume(vec![30.0, 10.0, 20.0]);
        rank(&mut v);
        assert_eq!(v.data(), &[3.0, 1.0, 2.0]);
    }

    #[test]
    fn ztop_ptoz_round_trip() {
        let mut v = make_volume(vec![-2.0, -1.0, 0.0, 1.0, 2.0]);
        let original = v.data().to_vec();
        ztop(&mut v);
        ptoz(&mut v);
        for (a, b) in original.iter().zip(v.data().iter()) {
            assert!((a - b).abs() < 1e-2, "{} vs {}", a, b);
        }
    }

    #[test]
    fn pval_of_global_max_is_smallest() {
        let mut v = make_volume(vec![1.0, 5.0, 10.0]);
        let null = vec![0.0, 2.0, 4.0, 6.0, 8.0];
        pval(&mut v, &null).unwrap();
        assert!(v.data()[2] <= v.data()[1]);
        assert!(v.data()[1] <= v.data()[0]);
    }

    #[test]
    fn index_counts_only_nonzero_voxels_in_order() {
        let mut v = make_volume(vec![0.0, 5.0, 0.0, 7.0]);
        index(&mut v, IndexOrientation::Never);
        assert_eq!(v.data(), &[0.0, 1.0, 0.0, 2.0]);
    }

    #[test]
    fn mas_zeroes_where_mask_not_positive() {
        let mut v = make_volume(vec![1.0, 2.0, 3.0]);
        let mask = make_volume(vec![1.0, 0.0, -1.0]);
        mask_with(&mut v, &mask).unwrap();
        assert_eq!(v.data(), &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn add_vol_broadcasts_a_3d_operand_over_a_4d_series() {
        let mut series = Volume::new(
            vec![1.0, 2.0, 3.0, 4.0],
            2, 1, 1, 2,
            (1.0, 1.0, 1.0, 1.0),
            Affine::identity(),
            WorkingType::Double,
        )
        .unwrap();
        let single = make_volume(vec![10.0, 20.0]);
        add_vol(&mut series, &single).unwrap();
        assert_eq!(series.data(), &[11.0, 22.0, 13.0, 24.0]);
    }

    #[test]
    fn add_vol_rejects_shapes_that_cannot_repeat_evenly() {
        let mut v = make_volume(vec![1.0, 2.0, 3.0]);
        let rhs = make_volume(vec![1.0, 2.0]);
        assert!(add_vol(&mut v, &rhs).is_err());
    }
}
