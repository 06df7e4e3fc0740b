//! Exact squared Euclidean distance transform (Felzenszwalb & Huttenlocher's
//! lower envelope of parabolas), applied separably along X, Y, then Z.

use crate::volume::Volume;
use rayon::prelude::*;

const INF: f64 = 1.0e20;

/// One-dimensional transform of `f` (squared distance so far, `INF` for
/// foreground) into `d` via the lower envelope of parabolas rooted at each
/// finite sample.
fn envelope_1d(f: &[f64], d: &mut [f64]) {
    let n = f.len();
    let mut v = vec![0usize; n];
    let mut z = vec![0.0f64; n + 1];
    let mut k = 0usize;
    v[0] = 0;
    z[0] = -INF;
    z[1] = INF;
    for q in 1..n {
        loop {
            let p = v[k];
            let s = ((f[q] + (q * q) as f64) - (f[p] + (p * p) as f64)) / (2.0 * q as f64 - 2.0 * p as f64);
            if s <= z[k] {
                if k == 0 {
                    break;
                }
                k -= 1;
                continue;
            }
            k += 1;
            v[k] = q;
            z[k] = s;
            z[k + 1] = INF;
            break;
        }
    }
    k = 0;
    for q in 0..n {
        while z[k + 1] < q as f64 {
            k += 1;
        }
        let p = v[k];
        let dx = q as f64 - p as f64;
        d[q] = dx * dx + f[p];
    }
}

/// `foreground` voxels (value > 0) start at distance `INF` (unknown until
/// the envelope finds a background root); `background` voxels start at 0.
fn init_row(row: &[f64], out: &mut [f64]) {
    for (o, &v) in out.iter_mut().zip(row) {
        *o = if v > 0.0 { INF } else { 0.0 };
    }
}

fn edt_3d(vol: &mut [f64], nx: usize, ny: usize, nz: usize) {
    let mut f = vec![0.0; vol.len()];
    init_row(vol, &mut f);

    // X axis (already contiguous).
    let mut d = vec![0.0; vol.len()];
    for z in 0..nz {
        for y in 0..ny {
            let s = nx * (y + ny * z);
            envelope_1d(&f[s..s + nx], &mut d[s..s + nx]);
        }
    }

    // Y axis via transpose.
    let mut transposed = vec![0.0; vol.len()];
    for z in 0..nz {
        let ps = nx * ny * z;
        for y in 0..ny {
            for x in 0..nx {
                transposed[ps + y + ny * x] = d[ps + x + nx * y];
            }
        }
    }
    let mut d2 = vec![0.0; vol.len()];
    for z in 0..nz {
        let ps = nx * ny * z;
        for x in 0..nx {
            envelope_1d(&transposed[ps + ny * x..ps + ny * x + ny], &mut d2[ps + ny * x..ps + ny * x + ny]);
        }
    }
    for z in 0..nz {
        let ps = nx * ny * z;
        for y in 0..ny {
            for x in 0..nx {
                f[ps + x + nx * y] = d2[ps + y + ny * x];
            }
        }
    }

    // Z axis via transpose.
    let nxy = nx * ny;
    for xy in 0..nxy {
        for z in 0..nz {
            transposed[xy * nz + z] = f[xy + nxy * z];
        }
    }
    for xy in 0..nxy {
        envelope_1d(&transposed[xy * nz..xy * nz + nz], &mut d2[xy * nz..xy * nz + nz]);
    }
    for xy in 0..nxy {
        for z in 0..nz {
            vol[xy + nxy * z] = d2[xy * nz + z];
        }
    }
}

/// Replaces every voxel with its squared Euclidean distance (in voxel
/// units) to the nearest non-positive ("background") voxel, independently
/// for each 3D volume of a 4D series.
pub fn edt(vol: &mut Volume) {
    let (nx, ny, nz) = (vol.nx(), vol.ny(), vol.nz());
    vol.volumes3_mut().par_bridge().for_each(|v| edt_3d(v, nx, ny, nz));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::Affine;
    use crate::volume::WorkingType;

    fn make_1d(data: Vec<f64>) -> Volume {
        let n = data.len();
        Volume::new(data, n, 1, 1, 1, (1.0, 1.0, 1.0, 1.0), Affine::identity(), WorkingType::Double).unwrap()
    }

    #[test]
    fn single_foreground_surrounded_by_background() {
        let mut v = make_1d(vec![1.0, 0.0, 1.0]);
        edt(&mut v);
        assert_eq!(v.data(), &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn wide_gap_grows_quadratically() {
        let mut v = make_1d(vec![0.0, 0.0, 1.0, 0.0, 0.0]);
        edt(&mut v);
        assert_eq!(v.data(), &[4.0, 1.0, 0.0, 1.0, 4.0]);
    }

    #[test]
    fn matches_brute_force_on_small_2d_volume() {
        let n = 6;
        let mut data = vec![0.0; n * n];
        data[2 + n * 2] = 1.0;
        data[2 + n * 3] = 1.0;
        data[3 + n * 2] = 1.0;
        let mut v = Volume::new(data.clone(), n, n, 1, 1, (1.0, 1.0, 1.0, 1.0), Affine::identity(), WorkingType::Double).unwrap();
        edt(&mut v);
        for y in 0..n {
            for x in 0..n {
                let mut best = f64::INFINITY;
                for by in 0..n {
                    for bx in 0..n {
                        if data[bx + n * by] <= 0.0 {
                            let dd = ((x as f64 - bx as f64).powi(2) + (y as f64 - by as f64).powi(2)).min(best);
                            best = dd.min(best);
                        }
                    }
                }
                assert!((v.data()[x + n * y] - best).abs() < 1e-9);
            }
        }
    }
}
