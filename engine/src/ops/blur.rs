//! Separable Gaussian blur and its unsharp-mask companion.
//!
//! Each axis is blurred by convolving contiguous rows with a 1D kernel.
//! The X axis is already contiguous; Y and Z are blurred by transposing
//! into a scratch buffer so the inner loop always walks a contiguous run,
//! then transposing back — the same shape as a transposed separable
//! 2D transform, just generalised to three axes and an arbitrary kernel
//! width instead of a fixed 8-point block.

use crate::error::{Error, Result};
use crate::volume::Volume;
use rayon::prelude::*;
use voxmath_kernels::convolve_row;

/// Builds a symmetric 1D Gaussian tap table `[w(0), w(1), ..., w(radius)]`
/// for a given sigma (already in voxel units) and half-width factor:
/// negative means "radius = round(|factor|*sigma)", positive means
/// "radius = ceil(factor)".
fn gaussian_taps(sigma_vox: f64, width_factor: f64) -> Vec<f64> {
    let radius = if width_factor < 0.0 {
        (width_factor.abs() * sigma_vox).round().max(0.0) as usize
    } else {
        width_factor.ceil().max(0.0) as usize
    };
    let two_sigma2 = 2.0 * sigma_vox * sigma_vox;
    (0..=radius).map(|k| (-((k * k) as f64) / two_sigma2).exp()).collect()
}

/// Blurs one axis of a single 3D volume in place, given the (already
/// voxel-unit) sigma for that axis. No-op if `sigma <= 0` or the axis has
/// fewer than 2 voxels.
fn blur_axis(vol: &mut [f64], nx: usize, ny: usize, nz: usize, axis: usize, sigma_vox: f64, width_factor: f64) {
    if sigma_vox <= 0.0 {
        return;
    }
    let taps = gaussian_taps(sigma_vox, width_factor);
    match axis {
        0 => {
            if nx < 2 {
                return;
            }
            for z in 0..nz {
                for y in 0..ny {
                    let row_start = nx * (y + ny * z);
                    let row = &mut vol[row_start..row_start + nx];
                    let src = row.to_vec();
                    convolve_row(&src, &taps, row);
                }
            }
        }
        1 => {
            if ny < 2 {
                return;
            }
            for z in 0..nz {
                let plane_start = nx * ny * z;
                let plane = &mut vol[plane_start..plane_start + nx * ny];
                let mut transposed = vec![0.0; nx * ny];
                for y in 0..ny {
                    for x in 0..nx {
                        transposed[y + ny * x] = plane[x + nx * y];
                    }
                }
                let mut out = vec![0.0; nx * ny];
                for x in 0..nx {
                    let col = &transposed[ny * x..ny * x + ny];
                    convolve_row(col, &taps, &mut out[ny * x..ny * x + ny]);
                }
                for y in 0..ny {
                    for x in 0..nx {
                        plane[x + nx * y] = out[y + ny * x];
                    }
                }
            }
        }
        2 => {
            if nz < 2 {
                return;
            }
            let nxy = nx * ny;
            let mut transposed = vec![0.0; vol.len()];
            for z in 0..nz {
                for xy in 0..nxy {
                    transposed[z + nz * xy] = vol[xy + nxy * z];
                }
            }
            let mut out = vec![0.0; vol.len()];
            for xy in 0..nxy {
                let col = &transposed[nz * xy..nz * xy + nz];
                convolve_row(col, &taps, &mut out[nz * xy..nz * xy + nz]);
            }
            for z in 0..nz {
                for xy in 0..nxy {
                    vol[xy + nxy * z] = out[z + nz * xy];
                }
            }
        }
        _ => unreachable!(),
    }
}

/// Blurs every 3D sub-volume of `vol` with per-axis sigma given in
/// millimetres (negative meaning voxels), parallelising across the 4D
/// series.
pub fn blur(vol: &mut Volume, sx_mm: f64, sy_mm: f64, sz_mm: f64, width_factor: f64) -> Result<()> {
    let (dx, dy, dz, _) = vol.spacing();
    let to_vox = |s: f64, d: f64| if s < 0.0 { s.abs() } else { s / d };
    let (sx, sy, sz) = (to_vox(sx_mm, dx), to_vox(sy_mm, dy), to_vox(sz_mm, dz));
    let (nx, ny, nz) = (vol.nx(), vol.ny(), vol.nz());
    vol.volumes3_mut().par_bridge().for_each(|v| {
        blur_axis(v, nx, ny, nz, 0, sx, width_factor);
        blur_axis(v, nx, ny, nz, 1, sy, width_factor);
        blur_axis(v, nx, ny, nz, 2, sz, width_factor);
    });
    Ok(())
}

/// `orig + amount*(orig - blurred)`: sharpens by subtracting a blurred
/// copy from the original and adding the (scaled) residual back.
pub fn unsharp(vol: &mut Volume, sx_mm: f64, sy_mm: f64, sz_mm: f64, amount: f64) -> Result<()> {
    if amount < 0.0 {
        return Err(Error::argument("unsharp", "amount must be non-negative"));
    }
    let original = vol.data().to_vec();
    blur(vol, sx_mm, sy_mm, sz_mm, -1.0)?;
    let data = vol.data_mut();
    data.par_iter_mut().zip(original.par_iter()).for_each(|(b, o)| {
        *b = o + amount * (o - *b);
    });
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
    fn zero_sigma_is_identity() {
        let mut v = make_volume(3, 3, 3, (0..27).map(|i| i as f64).collect());
        let before = v.data().to_vec();
        blur(&mut v, 0.0, 0.0, 0.0, -1.0).unwrap();
        assert_eq!(v.data(), before.as_slice());
    }

    #[test]
    fn blur_preserves_constant_volume() {
        let mut v = make_volume(5, 5, 5, vec![7.0; 125]);
        blur(&mut v, 2.0, 2.0, 2.0, -3.0).unwrap();
        for &x in v.data() {
            assert!((x - 7.0).abs() < 1e-6);
        }
    }

    #[test]
    fn blur_smooths_an_impulse_symmetrically() {
        let mut data = vec![0.0; 7 * 7 * 7];
        data[3 + 7 * (3 + 7 * 3)] = 1.0;
        let mut v = make_volume(7, 7, 7, data);
        blur(&mut v, -1.0, -1.0, -1.0, -3.0).unwrap();
        let center = v.data()[3 + 7 * (3 + 7 * 3)];
        let neighbour = v.data()[4 + 7 * (3 + 7 * 3)];
        let opposite = v.data()[2 + 7 * (3 + 7 * 3)];
        assert!(center > neighbour);
        assert!((neighbour - opposite).abs() < 1e-9);
    }
}
