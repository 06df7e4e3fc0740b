//! Threshold-free cluster enhancement: for 100 linearly spaced thresholds,
//! flood-fill connected supra-threshold components and accumulate
//! `|component|^E * threshold^H` into every voxel of the component.

use crate::arithmetic::non_nan_min_max;
use crate::kernel::connectivity_kernel;
use crate::volume::Volume;
use rayon::prelude::*;
use std::collections::VecDeque;
use voxmath_kernels::neighbourhood::KernelEntry;

const STEPS: usize = 100;

fn flood_component(
    snapshot: &[f64],
    kernel: &[KernelEntry],
    nx: usize,
    ny: usize,
    nz: usize,
    seed: usize,
    threshold: f64,
    visited: &mut [bool],
) -> Vec<usize> {
    let mut members = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back(seed);
    visited[seed] = true;
    while let Some(i) = queue.pop_front() {
        members.push(i);
        let z = i / (nx * ny);
        let rem = i % (nx * ny);
        let y = rem / nx;
        let x = rem % nx;
        for k in kernel {
            let nxp = x as i64 + k.dx as i64;
            let nyp = y as i64 + k.dy as i64;
            if nxp < 0 || nxp >= nx as i64 || nyp < 0 || nyp >= ny as i64 {
                continue;
            }
            let idx = i as i64 + k.offset;
            if idx < 0 || idx >= (nx * ny * nz) as i64 {
                continue;
            }
            let j = idx as usize;
            if !visited[j] && snapshot[j] > threshold {
                visited[j] = true;
                queue.push_back(j);
            }
        }
    }
    members
}

fn tfce_3d(snapshot: &[f64], nx: usize, ny: usize, nz: usize, h: f64, e: f64, connectivity: u8) -> Vec<f64> {
    let n = nx * ny * nz;
    let kernel = connectivity_kernel(connectivity, nx, ny);
    let max = non_nan_min_max(snapshot).map(|(_, hi)| hi).unwrap_or(0.0);
    let mut out = vec![0.0; n];
    if max <= 0.0 {
        return out;
    }
    for step in 1..=STEPS {
        let threshold = max * step as f64 / STEPS as f64;
        let mut visited = vec![false; n];
        for seed in 0..n {
            if visited[seed] || snapshot[seed] <= threshold {
                continue;
            }
            let members = flood_component(snapshot, &kernel, nx, ny, nz, seed, threshold, &mut visited);
            let contribution = (members.len() as f64).powf(e) * threshold.powf(h);
            for &m in &members {
                out[m] += contribution;
            }
        }
    }
    out
}

/// Applies TFCE independently to every 3D sub-volume of a (possibly 4D)
/// series.
pub fn tfce(vol: &mut Volume, h: f64, e: f64, connectivity: u8) {
    let (nx, ny, nz) = (vol.nx(), vol.ny(), vol.nz());
    let results: Vec<Vec<f64>> = vol
        .volumes3()
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|v3| tfce_3d(v3, nx, ny, nz, h, e, connectivity))
        .collect();
    for (chunk, result) in vol.volumes3_mut().zip(results) {
        chunk.copy_from_slice(&result);
    }
}

/// Seeded variant: floods from a single coordinate only, walking
/// thresholds from the volume's maximum down to `max/100`, and stops as
/// soon as the seed voxel's accumulated TFCE value exceeds `tfce_thresh`.
/// Voxels the seed's component never reaches (accumulator stays at zero)
/// are zeroed in the output, isolating just the cluster through the seed
/// rather than reporting a score everywhere.
pub fn tfce_seeded(vol: &mut Volume, h: f64, e: f64, connectivity: u8, seed: (usize, usize, usize, usize), tfce_thresh: f64) {
    let (nx, ny, nz, nt) = (vol.nx(), vol.ny(), vol.nz(), vol.nt());
    let (sx, sy, sz, st) = seed;
    if sx >= nx || sy >= ny || sz >= nz || st >= nt {
        return;
    }
    let n3 = nx * ny * nz;
    let kernel = connectivity_kernel(connectivity, nx, ny);
    let snapshot = vol.volume3(st).to_vec();
    let seed_idx = sx + nx * (sy + ny * sz);
    let max = non_nan_min_max(&snapshot).map(|(_, hi)| hi).unwrap_or(0.0);
    let mut out = vec![0.0; n3];
    if max <= 0.0 || snapshot[seed_idx] <= 0.0 {
        vol.volume3_mut(st).copy_from_slice(&out);
        return;
    }
    let mut seed_value = 0.0;
    for step in (1..=STEPS).rev() {
        let threshold = max * step as f64 / STEPS as f64;
        if snapshot[seed_idx] <= threshold {
            continue;
        }
        let mut visited = vec![false; n3];
        let members = flood_component(&snapshot, &kernel, nx, ny, nz, seed_idx, threshold, &mut visited);
        let contribution = (members.len() as f64).powf(e) * threshold.powf(h);
        for &m in &members {
            out[m] += contribution;
        }
        seed_value += contribution;
        if seed_value > tfce_thresh {
            break;
        }
    }
    vol.volume3_mut(st).copy_from_slice(&out);
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
    fn larger_cluster_scores_higher_than_isolated_voxel() {
        let mut data = vec![0.0; 8 * 8 * 1];
        for i in 0..4 {
            data[i] = 10.0;
        }
        data[7 * 8 + 7] = 10.0;
        let mut v = make_volume(8, 8, 1, data);
        tfce(&mut v, 2.0, 0.5, 6);
        let cluster_score = v.data()[0];
        let isolated_score = v.data()[7 * 8 + 7];
        assert!(cluster_score > isolated_score);
    }

    #[test]
    fn all_zero_volume_stays_zero() {
        let mut v = make_volume(4, 4, 4, vec![0.0; 64]);
        tfce(&mut v, 2.0, 0.5, 26);
        assert!(v.data().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn seeded_variant_zeroes_voxels_outside_the_seed_component() {
        let mut data = vec![0.0; 8 * 8];
        data[0] = 10.0;
        data[1] = 10.0;
        data[63] = 10.0; // disconnected from the seed's component
        let mut v = make_volume(8, 8, 1, data);
        tfce_seeded(&mut v, 2.0, 0.5, 6, (0, 0, 0, 0), 1e9);
        assert_eq!(v.data()[63], 0.0);
        assert!(v.data()[0] > 0.0);
    }
}
