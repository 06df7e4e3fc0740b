//! Fixed-tap symmetric row convolution, the inner loop of the separable
//! Gaussian blur and the two-sweep axis of the distance transform.

mod scalar_impl {
    /// Convolves one row with a symmetric kernel `weights[0..=radius]`
    /// (`weights[0]` is the centre tap, `weights[k]` the tap at offset
    /// `±k`). Taps that fall outside the row are dropped rather than
    /// mirrored or wrapped, and the normalising denominator is recomputed
    /// per output position to match.
    pub fn convolve_row(src: &[f64], weights: &[f64], out: &mut [f64], from: usize, to: usize) {
        let radius = weights.len() - 1;
        for i in from..to {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius).min(src.len() - 1);
            let mut acc = 0.0;
            let mut denom = 0.0;
            for j in lo..=hi {
                let w = weights[(j as isize - i as isize).unsigned_abs() as usize];
                acc += w * src[j];
                denom += w;
            }
            out[i] = if denom > 0.0 { acc / denom } else { src[i] };
        }
    }
}

mod simd_impl {
    use wide::f64x4;

    /// Same contract as `scalar_impl::convolve_row`, vectorised four output
    /// positions at a time over the fully-interior region of the row (where
    /// every tap of the kernel is in bounds, so the denominator is constant
    /// and equal to the kernel's total weight).
    pub fn convolve_row_interior(src: &[f64], weights: &[f64], out: &mut [f64], from: usize, to: usize) {
        let radius = weights.len() - 1;
        let total: f64 = weights[0] + 2.0 * weights[1..].iter().sum::<f64>();
        let inv_total = 1.0 / total;

        let mut i = from;
        while i + 4 <= to {
            let mut acc = f64x4::splat(weights[0]) * f64x4::from(<[f64; 4]>::try_from(&src[i..i + 4]).unwrap());
            for k in 1..=radius {
                let left = f64x4::from(<[f64; 4]>::try_from(&src[i - k..i - k + 4]).unwrap());
                let right = f64x4::from(<[f64; 4]>::try_from(&src[i + k..i + k + 4]).unwrap());
                acc += f64x4::splat(weights[k]) * (left + right);
            }
            let res = (acc * f64x4::splat(inv_total)).to_array();
            out[i..i + 4].copy_from_slice(&res);
            i += 4;
        }
        if i < to {
            scalar_impl::convolve_row(src, weights, out, i, to);
        }
    }
}

/// Convolves a full row with a symmetric, zero-truncated-at-the-edges
/// kernel. Interior positions (far enough from both ends that every tap is
/// in bounds) go through the SIMD path; the near-edge positions at each end
/// fall back to the scalar path, which handles the per-position truncated
/// denominator.
pub fn convolve_row(src: &[f64], weights: &[f64], out: &mut [f64]) {
    debug_assert_eq!(src.len(), out.len());
    let radius = weights.len() - 1;
    let len = src.len();
    if len == 0 {
        return;
    }
    if radius == 0 || len <= 2 * radius {
        scalar_impl::convolve_row(src, weights, out, 0, len);
        return;
    }
    scalar_impl::convolve_row(src, weights, out, 0, radius);
    simd_impl::convolve_row_interior(src, weights, out, radius, len - radius);
    scalar_impl::convolve_row(src, weights, out, len - radius, len);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_kernel_is_passthrough() {
        let src = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let mut out = vec![0.0; src.len()];
        convolve_row(&src, &[1.0], &mut out);
        assert_eq!(out, src);
    }

    #[test]
    fn box3_matches_manual_average() {
        let src = vec![0.0, 3.0, 6.0, 9.0, 12.0, 15.0, 18.0, 21.0];
        let mut out = vec![0.0; src.len()];
        convolve_row(&src, &[1.0, 1.0], &mut out);
        // interior: each output is the average of its 3-wide window
        assert!((out[3] - (6.0 + 9.0 + 12.0) / 3.0).abs() < 1e-9);
        assert!((out[4] - (9.0 + 12.0 + 15.0) / 3.0).abs() < 1e-9);
        // edges drop the missing tap and renormalise
        assert!((out[0] - (0.0 + 3.0) / 2.0).abs() < 1e-9);
    }

    #[test]
    fn scalar_and_simd_paths_agree() {
        let src: Vec<f64> = (0..37).map(|i| (i as f64).sin()).collect();
        let weights = [0.4, 0.3, 0.2, 0.1];
        let mut via_public = vec![0.0; src.len()];
        convolve_row(&src, &weights, &mut via_public);
        let mut via_scalar = vec![0.0; src.len()];
        scalar_impl::convolve_row(&src, &weights, &mut via_scalar, 0, src.len());
        for (a, b) in via_public.iter().zip(via_scalar.iter()) {
            assert!((a - b).abs() < 1e-9, "{} vs {}", a, b);
        }
    }
}
