//! Normal-distribution helpers shared by `ranknorm`, `ztop`/`ptoz`, `pval`,
//! and the robust-range/Otsu percentile machinery.

/// Upper-tail standard normal CDF: `Q(x) = 1/2 * erfc(x/sqrt(2))`.
pub fn qg(x: f64) -> f64 {
    0.5 * erfc(x / std::f64::consts::SQRT_2)
}

/// Inverse of `qg`: given an upper-tail probability, returns the z-score.
/// Abramowitz & Stegun 26.2.23 initial estimate, refined by three Newton
/// steps against `qg`: its derivative is `-phi(x)` (the standard normal
/// density), which converges quickly enough that three steps suffice to
/// double-precision accuracy over the whole unit interval.
pub fn qginv(p: f64) -> f64 {
    let p = p.clamp(1e-300, 1.0 - 1e-16);
    let (sign, p) = if p > 0.5 { (-1.0, 1.0 - p) } else { (1.0, p) };
    let t = (-2.0 * p.ln()).sqrt();
    const C0: f64 = 2.515517;
    const C1: f64 = 0.802853;
    const C2: f64 = 0.010328;
    const D1: f64 = 1.432788;
    const D2: f64 = 0.189269;
    const D3: f64 = 0.001308;
    let mut x = sign * (t - (C0 + C1 * t + C2 * t * t) / (1.0 + D1 * t + D2 * t * t + D3 * t * t * t));

    // Newton steps against `qg(x) == target`, target being the upper-tail
    // probability for the original (pre-reflection) `p`.
    let target = if sign < 0.0 { 1.0 - p } else { p };
    for _ in 0..3 {
        let phi = (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt();
        if phi < 1e-300 {
            break;
        }
        x -= (qg(x) - target) / (-phi);
    }
    x.clamp(-13.0, 13.0)
}

/// Complementary error function via Abramowitz & Stegun 7.1.26, accurate to
/// about 1.5e-7 — more than enough given voxel data's own measurement noise.
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let tau = t
        * (-z * z - 1.26551223
            + t * (1.00002368
                + t * (0.37409196
                    + t * (0.09678418
                        + t * (-0.18628806
                            + t * (0.27886807
                                + t * (-1.13520398
                                    + t * (1.48851587 + t * (-0.82215223 + t * 0.17087277)))))))))
        .exp();
    if x >= 0.0 {
        tau
    } else {
        2.0 - tau
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qg_of_zero_is_one_half() {
        assert!((qg(0.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn qginv_of_one_half_is_zero() {
        assert!(qginv(0.5).abs() < 1e-3);
    }

    #[test]
    fn qg_and_qginv_round_trip() {
        for p in [0.01, 0.05, 0.1, 0.5, 0.9, 0.95, 0.99] {
            let z = qginv(p);
            let back = qg(z);
            assert!((back - p).abs() < 1e-3, "p={} z={} back={}", p, z, back);
        }
    }
}
