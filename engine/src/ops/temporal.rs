//! Temporal filtering along the time axis of a 4D series: `bptf`'s
//! Gaussian-weighted high/low-pass pair, a zero-phase Butterworth
//! band-pass, and linear detrending.

use crate::error::{Error, Result};
use crate::volume::Volume;

/// Gaussian-weighted linear regression high-pass: at each time `v`, fits a
/// weighted line over `[v-3*sigma, v+3*sigma]` and subtracts the fitted
/// value at `v` (not just the intercept — using the local fit keeps slow
/// drift on either side of `v` from leaking back in).
fn highpass_series(series: &[f64], sigma: f64) -> Vec<f64> {
    let n = series.len();
    let radius = (3.0 * sigma).ceil() as i64;
    let mut out = vec![0.0; n];
    for v in 0..n {
        let lo = (v as i64 - radius).max(0) as usize;
        let hi = ((v as i64 + radius) as usize).min(n - 1);
        let (mut sw, mut swx, mut swy, mut swxy, mut swxx) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for t in lo..=hi {
            let dt = (t as f64) - v as f64;
            let w = (-0.5 * (dt * dt) / (sigma * sigma)).exp();
            sw += w;
            swx += w * dt;
            swy += w * series[t];
            swxy += w * dt * series[t];
            swxx += w * dt * dt;
        }
        let denom = sw * swxx - swx * swx;
        let fitted = if denom.abs() < 1e-12 {
            swy / sw.max(1e-12)
        } else {
            let slope = (sw * swxy - swx * swy) / denom;
            let intercept = (swy - slope * swx) / sw;
            intercept // value of the fitted line at dt=0, i.e. at v itself
        };
        out[v] = series[v] - fitted;
    }
    out
}

/// Gaussian-weighted moving average low-pass over `[v-8*sigma, v+8*sigma]`.
fn lowpass_series(series: &[f64], sigma: f64) -> Vec<f64> {
    let n = series.len();
    let radius = (8.0 * sigma).ceil() as i64;
    let mut out = vec![0.0; n];
    for v in 0..n {
        let lo = (v as i64 - radius).max(0) as usize;
        let hi = ((v as i64 + radius) as usize).min(n - 1);
        let mut sw = 0.0;
        let mut swy = 0.0;
        for t in lo..=hi {
            let dt = (t as f64) - v as f64;
            let w = (-0.5 * (dt * dt) / (sigma * sigma)).exp();
            sw += w;
            swy += w * series[t];
        }
        out[v] = swy / sw.max(1e-12);
    }
    out
}

/// `bptf`: per-voxel Gaussian high-pass (sigma in TRs) optionally followed
/// by a Gaussian low-pass, applied along the time axis of a 4D series.
pub fn bptf(vol: &mut Volume, hp_sigma: f64, lp_sigma: f64, demean: bool) -> Result<()> {
    if vol.nt() < 2 {
        return Err(Error::shape("bptf", "requires a 4D series"));
    }
    let nt = vol.nt();
    let n3 = vol.nvox3();
    let data = vol.data_mut();
    // Time series along T are strided, not contiguous; gather per voxel,
    // filter, then scatter back.
    let mut gathered = vec![0.0; nt];
    let mut new_data = vec![0.0; data.len()];
    for voxel in 0..n3 {
        for t in 0..nt {
            gathered[t] = data[voxel + n3 * t];
        }
        let mut filtered = if hp_sigma > 0.0 {
            highpass_series(&gathered, hp_sigma)
        } else {
            gathered.clone()
        };
        if demean && hp_sigma > 0.0 {
            let mean = filtered.iter().sum::<f64>() / nt as f64;
            for v in filtered.iter_mut() {
                *v -= mean;
            }
        }
        if lp_sigma > 0.0 {
            filtered = lowpass_series(&filtered, lp_sigma);
        }
        for t in 0..nt {
            new_data[voxel + n3 * t] = filtered[t];
        }
    }
    vol.data_mut().copy_from_slice(&new_data);
    Ok(())
}

/// Subtracts, per voxel, the ordinary-least-squares best-fit line across
/// the time axis. A simpler alternative to `bptf`'s high-pass.
pub fn detrend_linear(vol: &mut Volume) -> Result<()> {
    let nt = vol.nt();
    if nt < 2 {
        return Err(Error::shape("detrend_linear", "requires at least two volumes"));
    }
    let n3 = vol.nvox3();
    let sx: f64 = (0..nt).map(|t| t as f64).sum();
    let sxx: f64 = (0..nt).map(|t| (t as f64).powi(2)).sum();
    let denom = nt as f64 * sxx - sx * sx;
    if denom.abs() < 1e-12 {
        return Ok(());
    }
    let data = vol.data_mut();
    for voxel in 0..n3 {
        let mut sy = 0.0;
        let mut sxy = 0.0;
        for t in 0..nt {
            let y = data[voxel + n3 * t];
            sy += y;
            sxy += y * t as f64;
        }
        let slope = (nt as f64 * sxy - sx * sy) / denom;
        let intercept = (sy - slope * sx) / nt as f64;
        for t in 0..nt {
            data[voxel + n3 * t] -= slope * t as f64 + intercept;
        }
    }
    Ok(())
}

/// A 2nd-order Butterworth low-pass section, run forward then reverse for
/// zero-phase response (net 4th-order), with edge-reflected padding so the
/// filter's initial transient doesn't contaminate the ends of short series.
struct Butter2 {
    b: [f64; 3],
    a: [f64; 3],
}

impl Butter2 {
    fn design(cutoff_normalized: f64) -> Self {
        // Bilinear-transform design of a 2nd-order Butterworth low-pass,
        // cutoff given as a fraction of the Nyquist frequency (0,1).
        let wc = (std::f64::consts::PI * cutoff_normalized.clamp(1e-6, 0.999)).tan();
        let k = wc;
        let k2 = k * k;
        let sqrt2 = std::f64::consts::SQRT_2;
        let norm = 1.0 + sqrt2 * k + k2;
        let b0 = k2 / norm;
        Butter2 {
            b: [b0, 2.0 * b0, b0],
            a: [1.0, (2.0 * (k2 - 1.0)) / norm, (1.0 - sqrt2 * k + k2) / norm],
        }
    }

    fn apply(&self, x: &[f64]) -> Vec<f64> {
        let n = x.len();
        let pad = (n / 4).max(3).min(n.saturating_sub(1).max(1));
        let mut padded = Vec::with_capacity(n + 2 * pad);
        for i in (1..=pad).rev() {
            padded.push(2.0 * x[0] - x[i.min(n - 1)]);
        }
        padded.extend_from_slice(x);
        for i in 0..pad {
            let idx = n.saturating_sub(2 + i).max(0).min(n - 1);
            padded.push(2.0 * x[n - 1] - x[idx]);
        }
        let filtered = self.filter_forward(&padded);
        let reversed: Vec<f64> = filtered.iter().rev().copied().collect();
        let filtered_back = self.filter_forward(&reversed);
        let result: Vec<f64> = filtered_back.iter().rev().copied().collect();
        result[pad..pad + n].to_vec()
    }

    fn filter_forward(&self, x: &[f64]) -> Vec<f64> {
        let mut y = vec![0.0; x.len()];
        for i in 0..x.len() {
            let x0 = x[i];
            let x1 = if i >= 1 { x[i - 1] } else { x0 };
            let x2 = if i >= 2 { x[i - 2] } else { x1 };
            let y1 = if i >= 1 { y[i - 1] } else { 0.0 };
            let y2 = if i >= 2 { y[i - 2] } else { 0.0 };
            y[i] = self.b[0] * x0 + self.b[1] * x1 + self.b[2] * x2 - self.a[1] * y1 - self.a[2] * y2;
        }
        y
    }
}

/// Zero-phase Butterworth band-pass: a low-pass at `hp_hz` subtracted out
/// (high-pass) composed with a low-pass at `lp_hz`, both applied forward
/// and reverse.
pub fn bandpass(vol: &mut Volume, sampling_hz: f64, hp_hz: f64, lp_hz: f64) -> Result<()> {
    if vol.nt() < 2 {
        return Err(Error::shape("bandpass", "requires a 4D series"));
    }
    let nyquist = sampling_hz / 2.0;
    let nt = vol.nt();
    let n3 = vol.nvox3();
    let lp = (lp_hz > 0.0 && lp_hz < nyquist).then(|| Butter2::design(lp_hz / nyquist));
    let hp = (hp_hz > 0.0 && hp_hz < nyquist).then(|| Butter2::design(hp_hz / nyquist));

    let data = vol.data_mut();
    let mut gathered = vec![0.0; nt];
    for voxel in 0..n3 {
        for t in 0..nt {
            gathered[t] = data[voxel + n3 * t];
        }
        let mut series = gathered.clone();
        if let Some(hp) = &hp {
            let low = hp.apply(&series);
            for i in 0..nt {
                series[i] -= low[i];
            }
        }
        if let Some(lp) = &lp {
            series = lp.apply(&series);
        }
        for t in 0..nt {
            data[voxel + n3 * t] = series[t];
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::Affine;
    use crate::volume::WorkingType;

    fn series_volume(values: &[f64]) -> Volume {
        Volume::new(values.to_vec(), 1, 1, 1, values.len(), (1.0, 1.0, 1.0, 1.0), Affine::identity(), WorkingType::Double).unwrap()
    }

    #[test]
    fn detrend_removes_linear_ramp() {
        let mut v = series_volume(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        detrend_linear(&mut v).unwrap();
        for &x in v.data() {
            assert!(x.abs() < 1e-9, "{}", x);
        }
    }

    #[test]
    fn bptf_highpass_removes_constant_offset() {
        let mut v = series_volume(&[10.0; 30]);
        bptf(&mut v, 2.0, 0.0, false).unwrap();
        for &x in v.data() {
            assert!(x.abs() < 1e-6);
        }
    }

    #[test]
    fn bptf_requires_4d() {
        let mut v = series_volume(&[1.0]);
        assert!(bptf(&mut v, 1.0, 0.0, false).is_err());
    }
}
