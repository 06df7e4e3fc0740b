//! Symmetric 3x3 diffusion-tensor eigendecomposition: per-voxel
//! eigenvalues/eigenvectors plus the derived fractional anisotropy (FA),
//! mean diffusivity (MD), and mode (MO) scalars.

use crate::error::{Error, Result};
use crate::volume::Volume;
use rayon::prelude::*;

/// One voxel's decomposition result.
#[derive(Clone, Copy, Debug)]
pub struct TensorVoxel {
    pub l1: f64,
    pub l2: f64,
    pub l3: f64,
    pub v1: [f64; 3],
    pub v2: [f64; 3],
    pub v3: [f64; 3],
    pub md: f64,
    pub fa: f64,
    pub mo: f64,
}

/// Closed-form eigendecomposition of a real symmetric 3x3 matrix, via the
/// trigonometric (Kopp) method: stable for the near-isotropic and
/// near-degenerate tensors diffusion data produces, without pulling in a
/// full numerical linear algebra stack for a problem this size.
fn eigen_symmetric_3x3(m: [[f64; 3]; 3]) -> ([f64; 3], [[f64; 3]; 3]) {
    let p1 = m[0][1].powi(2) + m[0][2].powi(2) + m[1][2].powi(2);
    let q = (m[0][0] + m[1][1] + m[2][2]) / 3.0;
    if p1 < 1e-300 {
        // Already diagonal.
        let mut vals = [m[0][0], m[1][1], m[2][2]];
        let mut idx = [0, 1, 2];
        idx.sort_by(|&a, &b| vals[b].partial_cmp(&vals[a]).unwrap());
        vals = [vals[idx[0]], vals[idx[1]], vals[idx[2]]];
        let mut vecs = [[0.0; 3]; 3];
        for (k, &i) in idx.iter().enumerate() {
            vecs[k][i] = 1.0;
        }
        return (vals, vecs);
    }
    let p2 = (m[0][0] - q).powi(2) + (m[1][1] - q).powi(2) + (m[2][2] - q).powi(2) + 2.0 * p1;
    let p = (p2 / 6.0).sqrt();
    let b = [
        [(m[0][0] - q) / p, m[0][1] / p, m[0][2] / p],
        [m[0][1] / p, (m[1][1] - q) / p, m[1][2] / p],
        [m[0][2] / p, m[1][2] / p, (m[2][2] - q) / p],
    ];
    let det_b = b[0][0] * (b[1][1] * b[2][2] - b[1][2] * b[2][1])
        - b[0][1] * (b[1][0] * b[2][2] - b[1][2] * b[2][0])
        + b[0][2] * (b[1][0] * b[2][1] - b[1][1] * b[2][0]);
    let r = (det_b / 2.0).clamp(-1.0, 1.0);
    let phi = r.acos() / 3.0;
    let eig1 = q + 2.0 * p * phi.cos();
    let eig3 = q + 2.0 * p * (phi + 2.0 * std::f64::consts::PI / 3.0).cos();
    let eig2 = 3.0 * q - eig1 - eig3;

    let eigenvector_for = |lambda: f64| -> [f64; 3] {
        // (M - lambda I) has rank <= 2; take the cross product of two rows.
        let a = [m[0][0] - lambda, m[0][1], m[0][2]];
        let b = [m[1][0], m[1][1] - lambda, m[1][2]];
        let c = [m[2][0], m[2][1], m[2][2] - lambda];
        let candidates = [cross(a, b), cross(a, c), cross(b, c)];
        let mut best = candidates[0];
        let mut best_norm = norm(best);
        for cand in &candidates[1..] {
            let n = norm(*cand);
            if n > best_norm {
                best = *cand;
                best_norm = n;
            }
        }
        if best_norm < 1e-12 {
            [1.0, 0.0, 0.0]
        } else {
            let inv = 1.0 / best_norm;
            [best[0] * inv, best[1] * inv, best[2] * inv]
        }
    };

    ([eig1, eig2, eig3], [eigenvector_for(eig1), eigenvector_for(eig2), eigenvector_for(eig3)])
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[1] * b[2] - a[2] * b[1], a[2] * b[0] - a[0] * b[2], a[0] * b[1] - a[1] * b[0]]
}

fn norm(a: [f64; 3]) -> f64 {
    (a[0] * a[0] + a[1] * a[1] + a[2] * a[2]).sqrt()
}

fn decompose_voxel(dxx: f64, dxy: f64, dxz: f64, dyy: f64, dyz: f64, dzz: f64) -> TensorVoxel {
    let m = [[dxx, dxy, dxz], [dxy, dyy, dyz], [dxz, dyz, dzz]];
    let (vals, vecs) = eigen_symmetric_3x3(m);
    let (l1, l2, l3) = (vals[0], vals[1], vals[2]);
    let md = (l1 + l2 + l3) / 3.0;
    let (e1, e2, e3) = (l1 - md, l2 - md, l3 - md);
    let ss = l1 * l1 + l2 * l2 + l3 * l3;
    let fa = if ss > 1e-300 {
        (1.5 * ((l1 - md).powi(2) + (l2 - md).powi(2) + (l3 - md).powi(2)) / ss).sqrt()
    } else {
        0.0
    };
    let anisotropy_mag2 = e1 * e1 + e2 * e2 + e3 * e3;
    let mo = if anisotropy_mag2 > 1e-300 {
        let numerator = (e1 + e2 - 2.0 * e3) * (2.0 * e1 - e2 - e3) * (e1 - 2.0 * e2 + e3);
        let denominator = 2.0 * anisotropy_mag2.powf(1.5);
        (numerator / denominator).clamp(-1.0, 1.0)
    } else {
        0.0
    };
    TensorVoxel {
        l1,
        l2,
        l3,
        v1: vecs[0],
        v2: vecs[1],
        v3: vecs[2],
        md,
        fa,
        mo,
    }
}

/// Decomposes a 6-volume symmetric-tensor series (lower-triangle order:
/// Dxx, Dxy, Dxz, Dyy, Dyz, Dzz) into nine derived volumes: L1-L3, V1-V3
/// (each a 3-vector, stored as three consecutive volumes), MD, MO, FA.
pub fn tensor_decomp(vol: &Volume) -> Result<Vec<Volume>> {
    if vol.nt() != 6 {
        return Err(Error::shape("tensor_decomp", "requires a 6-volume tensor series"));
    }
    let n3 = vol.nvox3();
    let data = vol.data();
    let results: Vec<TensorVoxel> = (0..n3)
        .into_par_iter()
        .map(|i| {
            decompose_voxel(
                data[i],
                data[i + n3],
                data[i + 2 * n3],
                data[i + 3 * n3],
                data[i + 4 * n3],
                data[i + 5 * n3],
            )
        })
        .collect();

    let mut l1 = vec![0.0; n3];
    let mut l2 = vec![0.0; n3];
    let mut l3 = vec![0.0; n3];
    let mut v1 = vec![0.0; n3 * 3];
    let mut v2 = vec![0.0; n3 * 3];
    let mut v3 = vec![0.0; n3 * 3];
    let mut md = vec![0.0; n3];
    let mut mo = vec![0.0; n3];
    let mut fa = vec![0.0; n3];
    for (i, r) in results.iter().enumerate() {
        l1[i] = r.l1;
        l2[i] = r.l2;
        l3[i] = r.l3;
        for k in 0..3 {
            v1[i + k * n3] = r.v1[k];
            v2[i + k * n3] = r.v2[k];
            v3[i + k * n3] = r.v3[k];
        }
        md[i] = r.md;
        mo[i] = r.mo;
        fa[i] = r.fa;
    }

    let (nx, ny, nz) = (vol.nx(), vol.ny(), vol.nz());
    let working = vol.working_type();
    let spacing = vol.spacing();
    let affine = *vol.affine();
    let mk = |data: Vec<f64>, nt: usize| {
        let mut v = Volume::new(data, nx, ny, nz, nt, spacing, affine, working).unwrap();
        v.set_affine(affine);
        v
    };
    Ok(vec![
        mk(l1, 1),
        mk(l2, 1),
        mk(l3, 1),
        mk(v1, 3),
        mk(v2, 3),
        mk(v3, 3),
        mk(md, 1),
        mk(mo, 1),
        mk(fa, 1),
    ])
}

/// Permutes a 6-volume tensor series between lower-triangle
/// (Dxx,Dxy,Dxz,Dyy,Dyz,Dzz) and upper-triangle (Dxx,Dxy,Dyy,Dxz,Dyz,Dzz)
/// storage order. The permutation is its own inverse.
pub fn tensor_2(vol: &mut Volume) -> Result<()> {
    if vol.nt() != 6 {
        return Err(Error::shape("tensor_2", "requires a 6-volume tensor series"));
    }
    const PERM: [usize; 6] = [0, 1, 3, 2, 4, 5];
    let n3 = vol.nvox3();
    let original = vol.data().to_vec();
    let data = vol.data_mut();
    for (new_t, &old_t) in PERM.iter().enumerate() {
        data[new_t * n3..(new_t + 1) * n3].copy_from_slice(&original[old_t * n3..(old_t + 1) * n3]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagonal_tensor_has_axis_aligned_eigenvectors() {
        let v = decompose_voxel(3.0, 0.0, 0.0, 2.0, 0.0, 1.0);
        assert!((v.l1 - 3.0).abs() < 1e-9);
        assert!((v.l2 - 2.0).abs() < 1e-9);
        assert!((v.l3 - 1.0).abs() < 1e-9);
        assert!((v.md - 2.0).abs() < 1e-9);
    }

    #[test]
    fn isotropic_tensor_has_zero_fa() {
        let v = decompose_voxel(1.0, 0.0, 0.0, 1.0, 0.0, 1.0);
        assert!(v.fa.abs() < 1e-9);
    }

    #[test]
    fn tensor_2_is_its_own_inverse() {
        use crate::affine::Affine;
        use crate::volume::WorkingType;
        let data: Vec<f64> = (0..6).map(|i| i as f64).collect();
        let mut v = Volume::new(data.clone(), 1, 1, 1, 6, (1.0, 1.0, 1.0, 1.0), Affine::identity(), WorkingType::Double).unwrap();
        tensor_2(&mut v).unwrap();
        tensor_2(&mut v).unwrap();
        assert_eq!(v.data(), data.as_slice());
    }
}
