//! Builders for the 3D neighbourhood kernels the morphological operations
//! and threshold-free cluster enhancement apply.

use crate::error::{Error, Result};
use crate::volume::Volume;
use voxmath_kernels::KernelEntry;

/// How a kernel's shape is specified on the operation-token stream.
#[derive(Clone, Debug)]
pub enum KernelShape {
    /// A cuboid of the given extent along each axis, in voxels.
    Box { x: usize, y: usize, z: usize },
    /// A Euclidean ball of the given radius, in millimetres.
    Sphere { radius_mm: f64 },
    /// Gaussian-weighted taps out to a 6-sigma cutoff, sigma in millimetres.
    Gauss { sigma_mm: f64 },
    /// Non-zero voxels of an externally supplied mask volume become kernel
    /// entries, weighted proportional to `|value|`.
    Mask(Volume),
}

/// Builds the kernel's entries, centred on voxel `(0,0,0)`, given the
/// volume's own voxel spacing (needed to convert the millimetre-scale
/// `Sphere`/`Gauss` shapes into voxel extents).
pub fn build_kernel(shape: &KernelShape, spacing: (f64, f64, f64), nx: usize, ny: usize) -> Result<Vec<KernelEntry>> {
    let (dx, dy, dz) = spacing;
    match shape {
        KernelShape::Box { x, y, z } => Ok(build_box(*x, *y, *z, nx, ny)),
        KernelShape::Sphere { radius_mm } => Ok(build_sphere(*radius_mm, dx, dy, dz, nx, ny)),
        KernelShape::Gauss { sigma_mm } => Ok(build_gauss(*sigma_mm, dx, dy, dz, nx, ny)),
        KernelShape::Mask(mask) => build_mask(mask, nx, ny),
    }
}

fn entry(ix: i32, iy: i32, iz: i32, nx: usize, ny: usize, weight: f64) -> KernelEntry {
    KernelEntry {
        offset: ix as i64 + nx as i64 * (iy as i64 + ny as i64 * iz as i64),
        dx: ix,
        dy: iy,
        weight,
    }
}

fn build_box(ex: usize, ey: usize, ez: usize, nx: usize, ny: usize) -> Vec<KernelEntry> {
    let hx = (ex / 2) as i32;
    let hy = (ey / 2) as i32;
    let hz = (ez / 2) as i32;
    let mut out = Vec::new();
    for iz in -hz..=hz {
        for iy in -hy..=hy {
            for ix in -hx..=hx {
                out.push(entry(ix, iy, iz, nx, ny, 1.0));
            }
        }
    }
    out
}

fn build_sphere(radius_mm: f64, dx: f64, dy: f64, dz: f64, nx: usize, ny: usize) -> Vec<KernelEntry> {
    let radius_mm = radius_mm.abs();
    let hx = (radius_mm / dx).floor() as i32;
    let hy = (radius_mm / dy).floor() as i32;
    let hz = (radius_mm / dz).floor() as i32;
    let mut out = Vec::new();
    for iz in -hz..=hz {
        for iy in -hy..=hy {
            for ix in -hx..=hx {
                let mm = ((ix as f64 * dx).powi(2) + (iy as f64 * dy).powi(2) + (iz as f64 * dz).powi(2)).sqrt();
                if mm <= radius_mm {
                    out.push(entry(ix, iy, iz, nx, ny, 1.0));
                }
            }
        }
    }
    out
}

/// 6-sigma half-width Gaussian kernel, the shape `make_kernel_gauss` in the
/// reference engine uses for its smoothing-adjacent morphological filters
/// (distinct from the dedicated separable blur in `ops::blur`, which builds
/// its own 1D tap table — this kernel is for `-fmean`/`-fmeanu` style
/// weighted neighbourhood filters where a full 3D tap list is wanted).
fn build_gauss(sigma_mm: f64, dx: f64, dy: f64, dz: f64, nx: usize, ny: usize) -> Vec<KernelEntry> {
    let sigma_mm = sigma_mm.abs();
    let cutoff = sigma_mm * 6.0;
    let hx = (cutoff / dx).floor() as i32;
    let hy = (cutoff / dy).floor() as i32;
    let hz = (cutoff / dz).floor() as i32;
    let two_sigma2 = 2.0 * sigma_mm * sigma_mm;
    let mut out = Vec::new();
    for iz in -hz..=hz {
        for iy in -hy..=hy {
            for ix in -hx..=hx {
                let mm2 = (ix as f64 * dx).powi(2) + (iy as f64 * dy).powi(2) + (iz as f64 * dz).powi(2);
                let w = (-mm2 / two_sigma2).exp();
                if w > 1e-6 {
                    out.push(entry(ix, iy, iz, nx, ny, w));
                }
            }
        }
    }
    out
}

/// The face/edge/corner neighbour kernel threshold-free cluster
/// enhancement floods through, shared with the morphological kernel
/// builders above so both apply the same X/Y wrap rejection. `connectivity`
/// is 6 (faces only), 18 (faces+edges), or 26 (faces+edges+corners); any
/// other value is treated as 26.
pub fn connectivity_kernel(connectivity: u8, nx: usize, ny: usize) -> Vec<KernelEntry> {
    let mut out = Vec::new();
    for iz in -1..=1i32 {
        for iy in -1..=1i32 {
            for ix in -1..=1i32 {
                if ix == 0 && iy == 0 && iz == 0 {
                    continue;
                }
                let taxicab = ix.abs() + iy.abs() + iz.abs();
                let keep = match connectivity {
                    6 => taxicab == 1,
                    18 => taxicab <= 2,
                    _ => true,
                };
                if keep {
                    out.push(entry(ix, iy, iz, nx, ny, 1.0));
                }
            }
        }
    }
    out
}

fn build_mask(mask: &Volume, nx: usize, ny: usize) -> Result<Vec<KernelEntry>> {
    if mask.nt() != 1 {
        return Err(Error::shape("build_kernel", "a mask kernel volume must be 3D"));
    }
    let (mnx, mny, mnz) = (mask.nx(), mask.ny(), mask.nz());
    if mnx % 2 == 0 || mny % 2 == 0 || mnz % 2 == 0 {
        tracing::warn!("mask kernel has an even dimension; its centre voxel is ambiguous");
    }
    let (cx, cy, cz) = (mnx as i32 / 2, mny as i32 / 2, mnz as i32 / 2);
    let mut out = Vec::new();
    let mut total = 0.0;
    let data = mask.data();
    for z in 0..mnz {
        for y in 0..mny {
            for x in 0..mnx {
                let v = data[x + mnx * (y + mny * z)];
                if v != 0.0 {
                    total += v.abs();
                }
            }
        }
    }
    if total == 0.0 {
        return Err(Error::argument("build_kernel", "mask kernel has no non-zero voxels"));
    }
    for z in 0..mnz {
        for y in 0..mny {
            for x in 0..mnx {
                let v = data[x + mnx * (y + mny * z)];
                if v != 0.0 {
                    let ix = x as i32 - cx;
                    let iy = y as i32 - cy;
                    let iz = z as i32 - cz;
                    out.push(entry(ix, iy, iz, nx, ny, v.abs() / total));
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_kernel_has_expected_count() {
        let k = build_box(3, 3, 1, 10, 10);
        assert_eq!(k.len(), 9);
    }

    #[test]
    fn sphere_kernel_excludes_corners() {
        let k = build_sphere(1.0, 1.0, 1.0, 1.0, 10, 10);
        // radius-1 sphere in unit voxels: centre + 6 face neighbours only
        assert_eq!(k.len(), 7);
    }

    #[test]
    fn connectivity_kernel_sizes_match_face_edge_corner_counts() {
        assert_eq!(connectivity_kernel(6, 10, 10).len(), 6);
        assert_eq!(connectivity_kernel(18, 10, 10).len(), 18);
        assert_eq!(connectivity_kernel(26, 10, 10).len(), 26);
    }

    #[test]
    fn gauss_kernel_weight_decays_with_distance() {
        let k = build_gauss(1.0, 1.0, 1.0, 1.0, 10, 10);
        let center = k.iter().find(|e| e.dx == 0 && e.dy == 0 && e.offset == 0).unwrap();
        let far = k
            .iter()
            .filter(|e| e.dx.abs() + e.dy.abs() > 0)
            .max_by(|a, b| a.weight.partial_cmp(&b.weight).unwrap())
            .unwrap();
        assert!(center.weight > far.weight);
    }
}
