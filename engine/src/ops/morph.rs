//! Morphological neighbourhood operations: dilation/erosion family, kernel
//! filters, and the edge/difference-of-Gaussians operators that share the
//! same snapshot-then-write discipline.

use crate::error::Result;
use crate::ops::blur;
use crate::volume::Volume;
use rayon::prelude::*;
use voxmath_kernels::neighbourhood::{apply, KernelEntry, Reduction};

/// Applies `reduction` with `kernel` to every 3D sub-volume of `vol`,
/// independently per time point. Each sub-volume is snapshotted before the
/// write so every output voxel sees the pre-operation neighbourhood, which
/// is what permits the per-volume parallelism across a 4D series.
fn apply_kernel_op(vol: &mut Volume, kernel: &[KernelEntry], reduction: Reduction) {
    let (nx, ny, nz) = (vol.nx(), vol.ny(), vol.nz());
    vol.volumes3_mut().par_bridge().for_each(|v| {
        let snapshot = v.to_vec();
        apply(&snapshot, v, kernel, nx, ny, nz, reduction);
    });
}

pub fn dilate_mean(vol: &mut Volume, kernel: &[KernelEntry]) {
    apply_kernel_op(vol, kernel, Reduction::DilateMean);
}

pub fn dilate_max(vol: &mut Volume, kernel: &[KernelEntry]) {
    apply_kernel_op(vol, kernel, Reduction::DilateMax);
}

pub fn dilate_filter(vol: &mut Volume, kernel: &[KernelEntry]) {
    apply_kernel_op(vol, kernel, Reduction::DilateFilter);
}

/// Repeats `dilate_mean` until no voxel reads exactly zero, or until a
/// round makes no further progress (an isolated region with no non-zero
/// neighbour anywhere in the kernel's reach never fills in).
pub fn dilate_all(vol: &mut Volume, kernel: &[KernelEntry]) {
    loop {
        let zero_before = vol.data().iter().filter(|&&v| v == 0.0).count();
        if zero_before == 0 {
            break;
        }
        dilate_mean(vol, kernel);
        let zero_after = vol.data().iter().filter(|&&v| v == 0.0).count();
        if zero_after == zero_before {
            break;
        }
    }
}

pub fn erode(vol: &mut Volume, kernel: &[KernelEntry]) {
    apply_kernel_op(vol, kernel, Reduction::Erode);
}

pub fn erode_filter(vol: &mut Volume, kernel: &[KernelEntry]) {
    apply_kernel_op(vol, kernel, Reduction::ErodeFilter);
}

pub fn median_filter(vol: &mut Volume, kernel: &[KernelEntry]) {
    apply_kernel_op(vol, kernel, Reduction::Median);
}

pub fn weighted_mean_filter(vol: &mut Volume, kernel: &[KernelEntry]) {
    apply_kernel_op(vol, kernel, Reduction::WeightedMean);
}

pub fn weighted_sum_filter(vol: &mut Volume, kernel: &[KernelEntry]) {
    apply_kernel_op(vol, kernel, Reduction::WeightedSum);
}

/// Laplacian-style filter: splits a signed-weight kernel into its positive
/// and negative lobes, takes the normalised weighted mean of each
/// separately, and sums the two means. Emulates a difference-of-means
/// edge response without the sign cancellation a single weighted sum over
/// both lobes would produce.
pub fn mean_zero_filter(vol: &mut Volume, kernel: &[KernelEntry]) {
    let positive: Vec<KernelEntry> = kernel.iter().copied().filter(|e| e.weight > 0.0).collect();
    let negative: Vec<KernelEntry> = kernel
        .iter()
        .copied()
        .filter(|e| e.weight < 0.0)
        .map(|mut e| {
            e.weight = e.weight.abs();
            e
        })
        .collect();
    let (nx, ny, nz) = (vol.nx(), vol.ny(), vol.nz());
    vol.volumes3_mut().par_bridge().for_each(|v| {
        let snapshot = v.to_vec();
        let mut pos_out = vec![0.0; v.len()];
        let mut neg_out = vec![0.0; v.len()];
        apply(&snapshot, &mut pos_out, &positive, nx, ny, nz, Reduction::WeightedMean);
        apply(&snapshot, &mut neg_out, &negative, nx, ny, nz, Reduction::WeightedMean);
        for i in 0..v.len() {
            v[i] = pos_out[i] + neg_out[i];
        }
    });
}

/// 3x3x3 Sobel-derived gradient magnitude: `sqrt(gx^2+gy^2+gz^2)`.
pub fn edge(vol: &mut Volume) -> Result<()> {
    let (nx, ny, nz) = (vol.nx(), vol.ny(), vol.nz());
    let sobel = |axis: usize| -> Vec<KernelEntry> {
        let mut out = Vec::new();
        for dz in -1..=1i32 {
            for dy in -1..=1i32 {
                for dx in -1..=1i32 {
                    let (primary, o1, o2) = match axis {
                        0 => (dx, dy, dz),
                        1 => (dy, dx, dz),
                        _ => (dz, dx, dy),
                    };
                    if primary == 0 {
                        continue;
                    }
                    let w = primary as f64 * (2.0 - o1.abs() as f64) * (2.0 - o2.abs() as f64) / 2.0;
                    if w != 0.0 {
                        out.push(KernelEntry {
                            offset: dx as i64 + nx as i64 * (dy as i64 + ny as i64 * dz as i64),
                            dx,
                            dy,
                            weight: w,
                        });
                    }
                }
            }
        }
        out
    };
    let (kx, ky, kz) = (sobel(0), sobel(1), sobel(2));
    vol.volumes3_mut().par_bridge().for_each(|v| {
        let snapshot = v.to_vec();
        let mut gx = vec![0.0; v.len()];
        let mut gy = vec![0.0; v.len()];
        let mut gz = vec![0.0; v.len()];
        apply(&snapshot, &mut gx, &kx, nx, ny, nz, Reduction::WeightedSum);
        apply(&snapshot, &mut gy, &ky, nx, ny, nz, Reduction::WeightedSum);
        apply(&snapshot, &mut gz, &kz, nx, ny, nz, Reduction::WeightedSum);
        for i in 0..v.len() {
            v[i] = (gx[i] * gx[i] + gy[i] * gy[i] + gz[i] * gz[i]).sqrt();
        }
    });
    Ok(())
}

/// Difference of Gaussians: two blurs at different sigma, subtracted.
pub fn dog(vol: &mut Volume, sigma1_mm: f64, sigma2_mm: f64) -> Result<()> {
    let mut narrow = vol.clone();
    let mut wide = vol.clone();
    blur::blur(&mut narrow, sigma1_mm, sigma1_mm, sigma1_mm, -3.0)?;
    blur::blur(&mut wide, sigma2_mm, sigma2_mm, sigma2_mm, -3.0)?;
    let out: Vec<f64> = narrow
        .data()
        .iter()
        .zip(wide.data().iter())
        .map(|(a, b)| a - b)
        .collect();
    vol.set_data(out);
    Ok(())
}

/// Marks voxels adjacent to a sign change (typically run on a `dog` output)
/// with 1, all others with 0 — the edge map a Marr-Hildreth detector reads
/// its contours from.
pub fn zero_crossing(vol: &mut Volume) {
    let (nx, ny, nz) = (vol.nx(), vol.ny(), vol.nz());
    vol.volumes3_mut().par_bridge().for_each(|v| {
        let snapshot = v.to_vec();
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    let i = x + nx * (y + ny * z);
                    let here = snapshot[i];
                    let mut crosses = false;
                    for (ddx, ddy, ddz) in [(1, 0, 0), (-1, 0, 0), (0, 1, 0), (0, -1, 0), (0, 0, 1), (0, 0, -1)] {
                        let (nxp, nyp, nzp) = (x as i64 + ddx, y as i64 + ddy, z as i64 + ddz);
                        if nxp < 0 || nxp >= nx as i64 || nyp < 0 || nyp >= ny as i64 || nzp < 0 || nzp >= nz as i64 {
                            continue;
                        }
                        let j = nxp as usize + nx * (nyp as usize + ny * nzp as usize);
                        if (here > 0.0) != (snapshot[j] > 0.0) {
                            crosses = true;
                            break;
                        }
                    }
                    v[i] = if crosses { 1.0 } else { 0.0 };
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::Affine;
    use crate::volume::WorkingType;

    fn make_volume(nx: usize, ny: usize, data: Vec<f64>) -> Volume {
        Volume::new(data, nx, ny, 1, 1, (1.0, 1.0, 1.0, 1.0), Affine::identity(), WorkingType::Double).unwrap()
    }

    fn box2d() -> Vec<KernelEntry> {
        let mut k = vec![];
        for dy in -1..=1i32 {
            for dx in -1..=1i32 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                k.push(KernelEntry {
                    offset: dx as i64 + dy as i64 * 2,
                    dx,
                    dy,
                    weight: 1.0,
                });
            }
        }
        k
    }

    #[test]
    fn dilall_fills_every_zero_reachable_voxel() {
        let mut v = make_volume(2, 2, vec![0.0, 1.0, 1.0, 0.0]);
        dilate_all(&mut v, &box2d());
        assert!(v.data().iter().all(|&x| x == 1.0));
    }

    #[test]
    fn erode_filter_is_a_min_filter() {
        let mut v = make_volume(2, 2, vec![5.0, 1.0, 3.0, 2.0]);
        erode_filter(&mut v, &box2d());
        for &x in v.data() {
            assert_eq!(x, 1.0);
        }
    }

    #[test]
    fn zero_crossing_flags_sign_change() {
        let mut v = make_volume(3, 1, vec![-1.0, 1.0, -1.0]);
        zero_crossing(&mut v);
        assert_eq!(v.data(), &[1.0, 1.0, 1.0]);
    }
}
