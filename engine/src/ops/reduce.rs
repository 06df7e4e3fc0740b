//! Dimension reduction: collapses one logical axis (typically time) to a
//! single order statistic per remaining voxel.

use crate::error::Result;
use crate::volume::Volume;
use rayon::prelude::*;

/// Which axis a reduction collapses. `T` is by far the common case (the
/// `-Tmean` family and friends); `X`/`Y`/`Z` exist for completeness since
/// the underlying gather-reduce-scatter shape is identical for any axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
    T,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reduce {
    Mean,
    Std,
    Max,
    MaxIndex,
    Min,
    Median,
    Perc,
    Ar1,
}

/// Gathers the values along `axis` at a fixed position of the other three
/// axes into `buf`, in ascending order along `axis`.
fn gather(vol: &Volume, axis: Axis, fixed: (usize, usize, usize), buf: &mut Vec<f64>) {
    buf.clear();
    let (nx, ny, nz, nt) = (vol.nx(), vol.ny(), vol.nz(), vol.nt());
    let data = vol.data();
    match axis {
        Axis::T => {
            let (x, y, z) = fixed;
            for t in 0..nt {
                buf.push(data[vol.index(x, y, z, t)]);
            }
        }
        Axis::Z => {
            let (x, y, t) = fixed;
            for z in 0..nz {
                buf.push(data[vol.index(x, y, z, t)]);
            }
        }
        Axis::Y => {
            let (x, z, t) = fixed;
            for y in 0..ny {
                buf.push(data[vol.index(x, y, z, t)]);
            }
        }
        Axis::X => {
            let (y, z, t) = fixed;
            for x in 0..nx {
                buf.push(data[vol.index(x, y, z, t)]);
            }
        }
    }
}

fn reduce_one(values: &mut [f64], reduce: Reduce, percentile: f64) -> f64 {
    let n = values.len();
    match reduce {
        Reduce::Mean => values.iter().sum::<f64>() / n as f64,
        Reduce::Std => {
            let mean = values.iter().sum::<f64>() / n as f64;
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
            var.sqrt()
        }
        Reduce::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        Reduce::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
        Reduce::MaxIndex => {
            let mut best_i = 0;
            let mut best_v = f64::NEG_INFINITY;
            for (i, &v) in values.iter().enumerate() {
                if v > best_v {
                    best_v = v;
                    best_i = i;
                }
            }
            best_i as f64
        }
        Reduce::Median => {
            values.sort_by(|a, b| a.partial_cmp(b).unwrap());
            values[n / 2]
        }
        Reduce::Ar1 => {
            if n < 2 {
                return 0.0;
            }
            let mean = values.iter().sum::<f64>() / n as f64;
            let mut num = 0.0;
            let mut den = 0.0;
            for i in 0..n {
                den += (values[i] - mean).powi(2);
                if i > 0 {
                    num += (values[i] - mean) * (values[i - 1] - mean);
                }
            }
            if den == 0.0 {
                0.0
            } else {
                num / den
            }
        }
        Reduce::Perc => percentile_of(values, percentile),
    }
}

fn percentile_of(values: &mut [f64], p: f64) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = values.len();
    let idx = ((n as f64 * p / 100.0).floor() as usize).min(n - 1);
    values[idx]
}

/// Collapses `axis` to length 1 using `reduce` (or, for `Perc`, the given
/// percentile in `[0,100]`). Returns the reduced volume's new buffer and
/// dimensions; the caller rebinds the volume via `Volume::replace`.
pub fn reduce(vol: &Volume, axis: Axis, reduce_kind: Reduce, percentile: f64) -> Result<(Vec<f64>, usize, usize, usize, usize)> {
    let (nx, ny, nz, nt) = (vol.nx(), vol.ny(), vol.nz(), vol.nt());
    let (out_nx, out_ny, out_nz, out_nt, outer_dims) = match axis {
        Axis::X => (1, ny, nz, nt, (ny, nz, nt)),
        Axis::Y => (nx, 1, nz, nt, (nx, nz, nt)),
        Axis::Z => (nx, ny, 1, nt, (nx, ny, nt)),
        Axis::T => (nx, ny, nz, 1, (nx, ny, nz)),
    };
    let total_outer = outer_dims.0 * outer_dims.1 * outer_dims.2;
    let mut out = vec![0.0; total_outer];
    out.par_iter_mut().enumerate().for_each(|(flat, slot)| {
        let a = flat % outer_dims.0;
        let b = (flat / outer_dims.0) % outer_dims.1;
        let c = flat / (outer_dims.0 * outer_dims.1);
        let mut buf = Vec::new();
        gather(vol, axis, (a, b, c), &mut buf);
        *slot = reduce_one(&mut buf, reduce_kind, percentile);
    });
    Ok((out, out_nx, out_ny, out_nz, out_nt))
}

/// `Tperc`'s percentile variant, exposed separately since it needs the
/// extra scalar argument the other reductions don't.
pub fn percentile(vol: &Volume, axis: Axis, p: f64) -> Result<(Vec<f64>, usize, usize, usize, usize)> {
    reduce(vol, axis, Reduce::Perc, p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::Affine;
    use crate::volume::WorkingType;

    fn series(values: &[f64]) -> Volume {
        Volume::new(values.to_vec(), 1, 1, 1, values.len(), (1.0, 1.0, 1.0, 1.0), Affine::identity(), WorkingType::Double).unwrap()
    }

    #[test]
    fn tmean_of_two_volumes() {
        let v = series(&[1.0, 2.0]);
        let (data, nx, ny, nz, nt) = reduce(&v, Axis::T, Reduce::Mean, 0.0).unwrap();
        assert_eq!((nx, ny, nz, nt), (1, 1, 1, 1));
        assert_eq!(data, vec![1.5]);
    }

    #[test]
    fn tmedian_uses_floor_index_after_sort() {
        // matches the documented three-volume example: median of [4,2,6] -> 4
        let v = series(&[4.0, 2.0, 6.0]);
        let (data, ..) = reduce(&v, Axis::T, Reduce::Median, 0.0).unwrap();
        assert_eq!(data, vec![4.0]);
    }

    #[test]
    fn tmax_and_tmaxn_agree_on_position() {
        let v = series(&[3.0, 9.0, 1.0]);
        let (max_data, ..) = reduce(&v, Axis::T, Reduce::Max, 0.0).unwrap();
        let (idx_data, ..) = reduce(&v, Axis::T, Reduce::MaxIndex, 0.0).unwrap();
        assert_eq!(max_data, vec![9.0]);
        assert_eq!(idx_data, vec![1.0]);
    }
}
