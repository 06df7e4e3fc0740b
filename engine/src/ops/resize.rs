//! Resampling (`resize`) and naive 2x downsampling (`subsamp2`).

use crate::error::Result;
use crate::filter::{apply_filter_1d, build_filter_rows, ReconstructionFilter};
use crate::volume::Volume;
use rayon::prelude::*;

fn resize_axis(src: &[f64], nx: usize, ny: usize, nz: usize, axis: usize, new_len: usize, filter: ReconstructionFilter) -> (Vec<f64>, usize, usize, usize) {
    match axis {
        0 => {
            let rows = build_filter_rows(nx, new_len, filter);
            let mut out = vec![0.0; new_len * ny * nz];
            for z in 0..nz {
                for y in 0..ny {
                    let s = nx * (y + ny * z);
                    let d = new_len * (y + ny * z);
                    out[d..d + new_len].copy_from_slice(&apply_filter_1d(&src[s..s + nx], &rows));
                }
            }
            (out, new_len, ny, nz)
        }
        1 => {
            let rows = build_filter_rows(ny, new_len, filter);
            let mut out = vec![0.0; nx * new_len * nz];
            for z in 0..nz {
                for x in 0..nx {
                    let col: Vec<f64> = (0..ny).map(|y| src[x + nx * (y + ny * z)]).collect();
                    let filtered = apply_filter_1d(&col, &rows);
                    for (y, v) in filtered.into_iter().enumerate() {
                        out[x + nx * (y + new_len * z)] = v;
                    }
                }
            }
            (out, nx, new_len, nz)
        }
        _ => {
            let rows = build_filter_rows(nz, new_len, filter);
            let nxy = nx * ny;
            let mut out = vec![0.0; nxy * new_len];
            for xy in 0..nxy {
                let col: Vec<f64> = (0..nz).map(|z| src[xy + nxy * z]).collect();
                let filtered = apply_filter_1d(&col, &rows);
                for (z, v) in filtered.into_iter().enumerate() {
                    out[xy + nxy * z] = v;
                }
            }
            (out, nx, ny, new_len)
        }
    }
}

/// Resamples each axis independently by the given scale factors, updating
/// the affine's linear part to keep the world-space footprint unchanged.
/// Every 3D volume of a 4D series is resized independently.
pub fn resize(vol: &mut Volume, zx: f64, zy: f64, zz: f64, filter: ReconstructionFilter) -> Result<()> {
    let (nx, ny, nz) = (vol.nx(), vol.ny(), vol.nz());
    let new_nx = ((nx as f64 * zx).round().max(1.0)) as usize;
    let new_ny = ((ny as f64 * zy).round().max(1.0)) as usize;
    let new_nz = ((nz as f64 * zz).round().max(1.0)) as usize;

    let resized: Vec<Vec<f64>> = vol
        .volumes3()
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|v3| {
            let (buf, nx1, ny1, _) = resize_axis(v3, nx, ny, nz, 0, new_nx, filter);
            let (buf, nx2, ny2, nz2) = resize_axis(&buf, nx1, ny1, nz, 1, new_ny, filter);
            let (buf, _, _, _) = resize_axis(&buf, nx2, ny2, nz2, 2, new_nz, filter);
            buf
        })
        .collect();

    let nt = vol.nt();
    let mut combined = Vec::with_capacity(new_nx * new_ny * new_nz * nt);
    for v in resized {
        combined.extend(v);
    }
    vol.replace(combined, new_nx, new_ny, new_nz, nt)?;
    let affine = vol.affine().rescaled(zx as f32, zy as f32, zz as f32);
    vol.set_affine(affine);
    Ok(())
}

/// Naive factor-2 downsample (no anti-alias filter): averages each 2x2x2
/// block. `offc` selects the "offset centre" convention, always shifting
/// the origin by a half new-voxel per axis rather than only on odd input
/// dimensions.
pub fn subsamp2(vol: &mut Volume, offc: bool) -> Result<()> {
    let (nx, ny, nz, nt) = (vol.nx(), vol.ny(), vol.nz(), vol.nt());
    let (new_nx, new_ny, new_nz) = ((nx / 2).max(1), (ny / 2).max(1), (nz / 2).max(1));
    let mut out = vec![0.0; new_nx * new_ny * new_nz * nt];
    let data = vol.data();
    for t in 0..nt {
        for z in 0..new_nz {
            for y in 0..new_ny {
                for x in 0..new_nx {
                    let mut sum = 0.0;
                    let mut count = 0;
                    for dz in 0..2 {
                        for dy in 0..2 {
                            for dx in 0..2 {
                                let (sx, sy, sz) = (2 * x + dx, 2 * y + dy, 2 * z + dz);
                                if sx < nx && sy < ny && sz < nz {
                                    sum += data[sx + nx * (sy + ny * (sz + nz * t))];
                                    count += 1;
                                }
                            }
                        }
                    }
                    out[x + new_nx * (y + new_ny * (z + new_nz * t))] = sum / count.max(1) as f64;
                }
            }
        }
    }
    vol.replace(out, new_nx, new_ny, new_nz, nt)?;
    let shift_x = if offc || nx % 2 == 1 { 0.5 } else { 0.0 };
    let shift_y = if offc || ny % 2 == 1 { 0.5 } else { 0.0 };
    let shift_z = if offc || nz % 2 == 1 { 0.5 } else { 0.0 };
    let affine = vol.affine().shifted_origin(shift_x, shift_y, shift_z).rescaled(0.5, 0.5, 0.5);
    vol.set_affine(affine);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::Affine;
    use crate::volume::WorkingType;

    fn make_volume(nx: usize, ny: usize, nz: usize, data: Vec<f64>) -> Volume {
        Volume::new(data, nx, ny, nz, 1, (1.0, 1.0, 1.0, 1.0), Affine::identity(), WorkingType::Double).unwrap()
    }

    #[test]
    fn resize_preserves_constant_volume() {
        let mut v = make_volume(4, 4, 4, vec![5.0; 64]);
        resize(&mut v, 2.0, 2.0, 2.0, ReconstructionFilter::Lanczos3).unwrap();
        assert_eq!(v.nx(), 8);
        for &x in v.data() {
            assert!((x - 5.0).abs() < 1e-6);
        }
    }

    #[test]
    fn subsamp2_halves_every_dim() {
        let mut v = make_volume(4, 4, 4, vec![1.0; 64]);
        subsamp2(&mut v, false).unwrap();
        assert_eq!((v.nx(), v.ny(), v.nz()), (2, 2, 2));
        for &x in v.data() {
            assert!((x - 1.0).abs() < 1e-9);
        }
    }
}
