//! Robust intensity range, Otsu multi-level thresholding, and the
//! binarise/dark-fill family built on top of them.

use crate::volume::Volume;

const ROBUST_BINS: usize = 1001;
const OTSU_BINS: usize = 256;

/// How a thresholded-away voxel is filled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FillMode {
    Zero,
    Darkest,
}

/// The 2nd-98th percentile interval of non-NaN (optionally non-zero)
/// voxels. Degenerate inputs (fewer than 100 eligible voxels, or a flat
/// image) short-circuit to `(min, max)`.
pub fn robust_range(data: &[f64], exclude_zero: bool) -> (f64, f64) {
    let eligible: Vec<f64> = data
        .iter()
        .copied()
        .filter(|v| !v.is_nan() && !(exclude_zero && *v == 0.0))
        .collect();
    if eligible.len() < 100 {
        return min_max(&eligible).unwrap_or((0.0, 0.0));
    }
    let (min, max) = match min_max(&eligible) {
        Some(mm) if mm.0 < mm.1 => mm,
        Some(mm) => return mm,
        None => return (0.0, 0.0),
    };
    let bin_width = (max - min) / ROBUST_BINS as f64;
    let mut hist = vec![0u32; ROBUST_BINS];
    for &v in &eligible {
        let mut b = ((v - min) / bin_width) as usize;
        if b >= ROBUST_BINS {
            b = ROBUST_BINS - 1;
        }
        hist[b] += 1;
    }
    let total: u32 = hist.iter().sum();
    let lo_count = (total as f64 * 0.02).round() as u32;
    let hi_count = (total as f64 * 0.98).round() as u32;

    let mut lo_bin = 0usize;
    let mut acc = 0u32;
    for (b, &c) in hist.iter().enumerate() {
        acc += c;
        if acc >= lo_count.max(1) {
            lo_bin = b;
            break;
        }
    }
    let mut hi_bin = ROBUST_BINS - 1;
    acc = 0;
    for (b, &c) in hist.iter().enumerate() {
        acc += c;
        if acc >= hi_count {
            hi_bin = b;
            break;
        }
    }
    // Widen outward through empty bins when both percentiles land in the
    // same bin, so the returned interval is never degenerate on data with
    // a sharp central histogram spike.
    while hi_bin == lo_bin && (lo_bin > 0 || hi_bin < ROBUST_BINS - 1) {
        if lo_bin > 0 {
            lo_bin -= 1;
        }
        if hi_bin < ROBUST_BINS - 1 {
            hi_bin += 1;
        }
    }
    (
        min + lo_bin as f64 * bin_width,
        min + (hi_bin + 1) as f64 * bin_width,
    )
}

fn min_max(data: &[f64]) -> Option<(f64, f64)> {
    if data.is_empty() {
        return None;
    }
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in data {
        min = min.min(v);
        max = max.max(v);
    }
    Some((min, max))
}

/// Which boundary of an Otsu multi-way split `otsu` should report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OtsuMode {
    /// 4-way split, lightest boundary.
    Lightest4,
    /// 3-way split, lightest boundary.
    Lightest3,
    /// Classic 2-way split.
    TwoWay,
    /// 3-way split, darkest boundary.
    Darkest3,
    /// 4-way split, darkest boundary.
    Darkest4,
}

impl OtsuMode {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => OtsuMode::Lightest4,
            2 => OtsuMode::Lightest3,
            4 => OtsuMode::Darkest3,
            5 => OtsuMode::Darkest4,
            _ => OtsuMode::TwoWay,
        }
    }
}

/// Liao et al.'s "fast multilevel thresholding" objective: maximise the
/// between-class variance term `sum_k S_k^2 / P_k` over the partition
/// boundaries. `classes` is 2 (one threshold) up to 5 (four thresholds).
fn otsu_boundaries(hist: &[f64], classes: usize) -> Vec<usize> {
    let n = hist.len();
    let p: Vec<f64> = hist.to_vec();
    let mut cum_p = vec![0.0; n + 1];
    let mut cum_s = vec![0.0; n + 1];
    for i in 0..n {
        cum_p[i + 1] = cum_p[i] + p[i];
        cum_s[i + 1] = cum_s[i] + p[i] * i as f64;
    }
    let seg = |lo: usize, hi: usize| -> f64 {
        // sum over [lo, hi) of intensity*count, and count
        let pk = cum_p[hi] - cum_p[lo];
        if pk <= 0.0 {
            return 0.0;
        }
        let sk = cum_s[hi] - cum_s[lo];
        sk * sk / pk
    };

    // Dynamic program over "best score splitting [0,i) into k segments",
    // rather than an exhaustive search over all C(n-1, nthresh) threshold
    // combinations — the latter blows up combinatorially past two or three
    // thresholds at 256 bins, the former is O(classes * n^2).
    let mut score = vec![vec![f64::NEG_INFINITY; n + 1]; classes + 1];
    let mut back = vec![vec![0usize; n + 1]; classes + 1];
    score[0][0] = 0.0;
    for k in 1..=classes {
        for i in k..=n {
            for j in (k - 1)..i {
                if score[k - 1][j] == f64::NEG_INFINITY {
                    continue;
                }
                let candidate = score[k - 1][j] + seg(j, i);
                if candidate > score[k][i] {
                    score[k][i] = candidate;
                    back[k][i] = j;
                }
            }
        }
    }
    let mut bounds = vec![n];
    let mut i = n;
    for k in (1..=classes).rev() {
        let j = back[k][i];
        if k > 1 {
            bounds.push(j);
        }
        i = j;
    }
    bounds.reverse();
    bounds
}

/// Builds a 256-bin histogram over `[lo, hi]` and returns Otsu's threshold
/// boundaries for the requested mode, as intensity values.
pub fn otsu_thresholds(data: &[f64], mode: OtsuMode, exclude_zero: bool) -> Option<f64> {
    let (lo, hi) = robust_range(data, exclude_zero);
    if hi <= lo {
        return None;
    }
    let bin_width = (hi - lo) / OTSU_BINS as f64;
    let mut hist = vec![0.0; OTSU_BINS];
    for &v in data {
        if v.is_nan() || (exclude_zero && v == 0.0) {
            continue;
        }
        let mut b = ((v - lo) / bin_width) as i64;
        b = b.clamp(0, OTSU_BINS as i64 - 1);
        hist[b as usize] += 1.0;
    }

    let (classes, pick_index) = match mode {
        OtsuMode::Lightest4 => (5, 0usize),
        OtsuMode::Lightest3 => (4, 0usize),
        OtsuMode::TwoWay => (2, 0usize),
        OtsuMode::Darkest3 => (4, 2usize),
        OtsuMode::Darkest4 => (5, 3usize),
    };
    let boundaries = otsu_boundaries(&hist, classes);
    let bin = *boundaries.get(pick_index)?;
    Some(lo + bin as f64 * bin_width)
}

/// Applies the requested fill to voxels strictly below `threshold`.
/// `Darkest` fill uses the volume's own minimum non-NaN value rather than
/// zero, matching the call sites that ask for a "fade to background" look
/// instead of a hard zero cutout.
pub fn mask_below(vol: &mut Volume, threshold: f64, fill: FillMode) {
    let fill_value = match fill {
        FillMode::Zero => 0.0,
        FillMode::Darkest => crate::arithmetic::non_nan_min_max(vol.data()).map(|(lo, _)| lo).unwrap_or(0.0),
    };
    for v in vol.data_mut() {
        if !v.is_nan() && *v < threshold {
            *v = fill_value;
        }
    }
}

/// Otsu mask application: a background voxel is zeroed outright in
/// `Zero`/binarize modes, but in the dilated mode a background voxel keeps
/// its value unless it and all six face-neighbours test as background —
/// this feathers the mask so isolated dim voxels inside a bright region
/// survive.
pub fn otsu_mask(vol: &mut Volume, threshold: f64, binarize: bool, dilated: bool) {
    if binarize {
        for v in vol.data_mut() {
            *v = if !v.is_nan() && *v >= threshold { 1.0 } else { 0.0 };
        }
        return;
    }
    if !dilated {
        mask_below(vol, threshold, FillMode::Zero);
        return;
    }
    let (nx, ny, nz, nt) = (vol.nx(), vol.ny(), vol.nz(), vol.nt());
    let snapshot = vol.data().to_vec();
    let is_bg = |v: f64| v.is_nan() || v < threshold;
    for t in 0..nt {
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    let i = vol.index(x, y, z, t);
                    if !is_bg(snapshot[i]) {
                        continue;
                    }
                    let mut all_bg = true;
                    for (ddx, ddy, ddz) in [(1i64, 0i64, 0i64), (-1, 0, 0), (0, 1, 0), (0, -1, 0), (0, 0, 1), (0, 0, -1)] {
                        let (nxp, nyp, nzp) = (x as i64 + ddx, y as i64 + ddy, z as i64 + ddz);
                        if nxp < 0 || nxp >= nx as i64 || nyp < 0 || nyp >= ny as i64 || nzp < 0 || nzp >= nz as i64 {
                            continue;
                        }
                        let j = vol.index(nxp as usize, nyp as usize, nzp as usize, t);
                        if !is_bg(snapshot[j]) {
                            all_bg = false;
                            break;
                        }
                    }
                    if all_bg {
                        vol.data_mut()[i] = 0.0;
                    }
                }
            }
        }
    }
}

/// Cormack-to-Hounsfield CT unit remap (piecewise-linear, fixed constants).
pub fn c2h(vol: &mut Volume) {
    for v in vol.data_mut() {
        *v = if *v < 0.0 { *v * 0.5 - 1000.0 } else { *v - 1000.0 };
    }
}

/// Hounsfield-to-Cormack CT unit remap: the inverse of [`c2h`].
pub fn h2c(vol: &mut Volume) {
    for v in vol.data_mut() {
        *v = if *v < -1000.0 { (*v + 1000.0) * 2.0 } else { *v + 1000.0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::Affine;
    use crate::volume::WorkingType;

    fn make_volume(data: Vec<f64>) -> Volume {
        let n = data.len();
        Volume::new(data, n, 1, 1, 1, (1.0, 1.0, 1.0, 1.0), Affine::identity(), WorkingType::Double).unwrap()
    }

    #[test]
    fn robust_range_short_circuits_on_small_input() {
        let data: Vec<f64> = (0..10).map(|i| i as f64).collect();
        assert_eq!(robust_range(&data, false), (0.0, 9.0));
    }

    #[test]
    fn robust_range_is_within_min_max() {
        let data: Vec<f64> = (0..1000).map(|i| i as f64).collect();
        let (lo, hi) = robust_range(&data, false);
        assert!(lo >= 0.0 && hi <= 999.0 && lo < hi);
    }

    #[test]
    fn otsu_on_bimodal_data_lands_between_modes() {
        let mut data = vec![0.0; 500];
        data.extend(vec![100.0; 500]);
        let t = otsu_thresholds(&data, OtsuMode::TwoWay, false).unwrap();
        assert!(t > 1.0 && t < 99.0);
    }

    #[test]
    fn mask_below_darkest_fill_uses_volume_minimum() {
        let mut v = make_volume(vec![5.0, 1.0, 10.0, 2.0]);
        mask_below(&mut v, 4.0, FillMode::Darkest);
        assert_eq!(v.data(), &[5.0, 1.0, 10.0, 1.0]);
    }

    #[test]
    fn c2h_h2c_round_trip() {
        let mut v = make_volume(vec![500.0, -200.0, 1500.0]);
        let original = v.data().to_vec();
        c2h(&mut v);
        h2c(&mut v);
        for (a, b) in original.iter().zip(v.data().iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }
}
