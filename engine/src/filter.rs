//! Reconstruction filters for `resize`: per-output-column lists of
//! `{source_index, weight}` pairs.

/// The reconstruction kernel `resize` samples with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconstructionFilter {
    Box,
    Triangle,
    CubicBSpline,
    Lanczos3,
    MitchellNetravali,
}

impl ReconstructionFilter {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ReconstructionFilter::Box,
            1 => ReconstructionFilter::Triangle,
            2 => ReconstructionFilter::CubicBSpline,
            4 => ReconstructionFilter::MitchellNetravali,
            _ => ReconstructionFilter::Lanczos3,
        }
    }

    fn support(self) -> f64 {
        match self {
            ReconstructionFilter::Box => 0.5,
            ReconstructionFilter::Triangle => 1.0,
            ReconstructionFilter::CubicBSpline => 2.0,
            ReconstructionFilter::MitchellNetravali => 2.0,
            ReconstructionFilter::Lanczos3 => 3.0,
        }
    }

    fn weight(self, x: f64) -> f64 {
        let x = x.abs();
        match self {
            ReconstructionFilter::Box => {
                if x < 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
            ReconstructionFilter::Triangle => (1.0 - x).max(0.0),
            ReconstructionFilter::CubicBSpline => cubic_bspline(x),
            ReconstructionFilter::MitchellNetravali => mitchell_netravali(x),
            ReconstructionFilter::Lanczos3 => lanczos3(x),
        }
    }
}

fn cubic_bspline(x: f64) -> f64 {
    if x < 1.0 {
        (4.0 + x * x * (3.0 * x - 6.0)) / 6.0
    } else if x < 2.0 {
        let t = 2.0 - x;
        t * t * t / 6.0
    } else {
        0.0
    }
}

fn mitchell_netravali(x: f64) -> f64 {
    const B: f64 = 1.0 / 3.0;
    const C: f64 = 1.0 / 3.0;
    if x < 1.0 {
        ((12.0 - 9.0 * B - 6.0 * C) * x.powi(3) + (-18.0 + 12.0 * B + 6.0 * C) * x.powi(2) + (6.0 - 2.0 * B)) / 6.0
    } else if x < 2.0 {
        ((-B - 6.0 * C) * x.powi(3)
            + (6.0 * B + 30.0 * C) * x.powi(2)
            + (-12.0 * B - 48.0 * C) * x
            + (8.0 * B + 24.0 * C))
            / 6.0
    } else {
        0.0
    }
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        (std::f64::consts::PI * x).sin() / (std::f64::consts::PI * x)
    }
}

fn lanczos3(x: f64) -> f64 {
    if x < 3.0 {
        sinc(x) * sinc(x / 3.0)
    } else {
        0.0
    }
}

/// One output column's contributing source taps.
#[derive(Clone, Debug)]
pub struct FilterRow {
    pub entries: Vec<(usize, f64)>,
}

/// Builds one `FilterRow` per output index, for resampling a 1D axis of
/// length `src_len` to `dst_len`. When `scale = dst_len/src_len < 1` (a
/// downsample) the kernel's support is widened by `1/scale` to anti-alias;
/// source indices beyond `[0, src_len-1]` are reflected at the boundary.
pub fn build_filter_rows(src_len: usize, dst_len: usize, filter: ReconstructionFilter) -> Vec<FilterRow> {
    if src_len == 0 || dst_len == 0 {
        return Vec::new();
    }
    let scale = dst_len as f64 / src_len as f64;
    let widen = if scale < 1.0 { 1.0 / scale } else { 1.0 };
    let support = filter.support() * widen;
    let mut rows = Vec::with_capacity(dst_len);
    for out_i in 0..dst_len {
        let center = (out_i as f64 + 0.5) / scale - 0.5;
        let lo = (center - support).floor() as i64;
        let hi = (center + support).ceil() as i64;
        let mut entries = Vec::new();
        let mut total = 0.0;
        for src_i in lo..=hi {
            let w = filter.weight((src_i as f64 - center) / widen);
            if w.abs() < 1e-12 {
                continue;
            }
            let reflected = reflect(src_i, src_len as i64) as usize;
            entries.push((reflected, w));
            total += w;
        }
        if total.abs() > 1e-12 {
            for e in entries.iter_mut() {
                e.1 /= total;
            }
        }
        rows.push(FilterRow { entries });
    }
    rows
}

fn reflect(i: i64, len: i64) -> i64 {
    if len == 1 {
        return 0;
    }
    let period = 2 * len - 2;
    let mut m = i.rem_euclid(period.max(1));
    if m >= len {
        m = period - m;
    }
    m.clamp(0, len - 1)
}

/// Applies a set of filter rows along the given axis, producing a new
/// buffer of length `rows.len()` for that axis (other axes unchanged).
pub fn apply_filter_1d(src: &[f64], rows: &[FilterRow]) -> Vec<f64> {
    rows.iter()
        .map(|row| row.entries.iter().map(|&(i, w)| src[i] * w).sum())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsample_preserves_constant_signal() {
        let src = vec![3.0; 10];
        let rows = build_filter_rows(10, 20, ReconstructionFilter::Lanczos3);
        let dst = apply_filter_1d(&src, &rows);
        for v in dst {
            assert!((v - 3.0).abs() < 1e-6);
        }
    }

    #[test]
    fn box_filter_picks_nearest() {
        let rows = build_filter_rows(4, 4, ReconstructionFilter::Box);
        let src = vec![1.0, 2.0, 3.0, 4.0];
        let dst = apply_filter_1d(&src, &rows);
        assert_eq!(dst, src);
    }

    #[test]
    fn reflect_stays_in_bounds() {
        for i in -5..10 {
            let r = reflect(i, 4);
            assert!((0..4).contains(&r));
        }
    }
}
