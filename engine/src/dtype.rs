//! Conversion between the working float buffer and the eight storage
//! datatypes a container format may hold voxels in.

use crate::error::{Error, Result};

/// The storage datatypes a volume's voxels may be persisted as. Numeric
/// values match the reference container format's own datatype codes, kept
/// stable because `voxio` round-trips them through file headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Uint8 = 2,
    Int16 = 4,
    Int32 = 8,
    Float32 = 16,
    Float64 = 64,
    Int8 = 256,
    Uint16 = 512,
    Uint32 = 768,
}

impl DataType {
    pub fn from_code(code: i16) -> Option<Self> {
        Some(match code {
            2 => DataType::Uint8,
            4 => DataType::Int16,
            8 => DataType::Int32,
            16 => DataType::Float32,
            64 => DataType::Float64,
            256 => DataType::Int8,
            512 => DataType::Uint16,
            768 => DataType::Uint32,
            _ => return None,
        })
    }

    pub fn code(self) -> i16 {
        self as i16
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, DataType::Float32 | DataType::Float64)
    }

    fn range(self) -> Option<(f64, f64)> {
        match self {
            DataType::Uint8 => Some((u8::MIN as f64, u8::MAX as f64)),
            DataType::Int16 => Some((i16::MIN as f64, i16::MAX as f64)),
            DataType::Int32 => Some((i32::MIN as f64, i32::MAX as f64)),
            DataType::Int8 => Some((i8::MIN as f64, i8::MAX as f64)),
            DataType::Uint16 => Some((u16::MIN as f64, u16::MAX as f64)),
            DataType::Uint32 => Some((u32::MIN as f64, u32::MAX as f64)),
            DataType::Float32 | DataType::Float64 => None,
        }
    }

    /// Decode a raw stored byte sequence (already interpreted as the right
    /// width) into working-precision voxels, applying `stored*slope+intercept`.
    pub fn decode(self, raw: &[u8], slope: f64, intercept: f64) -> Result<Vec<f64>> {
        let slope = if slope == 0.0 { 1.0 } else { slope };
        macro_rules! decode_as {
            ($t:ty) => {{
                let width = std::mem::size_of::<$t>();
                if raw.len() % width != 0 {
                    return Err(Error::internal("dtype::decode", "raw buffer misaligned"));
                }
                raw.chunks_exact(width)
                    .map(|c| {
                        let mut buf = [0u8; 8];
                        buf[..width].copy_from_slice(c);
                        let v = <$t>::from_le_bytes(buf[..width].try_into().unwrap());
                        v as f64 * slope + intercept
                    })
                    .collect()
            }};
        }
        Ok(match self {
            DataType::Uint8 => decode_as!(u8),
            DataType::Int8 => decode_as!(i8),
            DataType::Int16 => decode_as!(i16),
            DataType::Uint16 => decode_as!(u16),
            DataType::Int32 => decode_as!(i32),
            DataType::Uint32 => decode_as!(u32),
            DataType::Float32 => raw
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes(c.try_into().unwrap()) as f64)
                .collect(),
            DataType::Float64 => raw
                .chunks_exact(8)
                .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
                .collect(),
        })
    }

    /// Encode working-precision voxels back into the raw byte form of this
    /// datatype, returning the slope/intercept applied so a caller can
    /// persist them into the container header.
    pub fn encode(self, data: &[f64]) -> (Vec<u8>, f64, f64) {
        match self.range() {
            None => {
                let mut out = Vec::with_capacity(data.len() * if self == DataType::Float64 { 8 } else { 4 });
                for &v in data {
                    if self == DataType::Float64 {
                        out.extend_from_slice(&v.to_le_bytes());
                    } else {
                        out.extend_from_slice(&(v as f32).to_le_bytes());
                    }
                }
                (out, 1.0, 0.0)
            }
            Some((lo, hi)) => {
                let (slope, intercept) = quantization_params(data, lo, hi);
                let inv = if slope == 0.0 { 1.0 } else { 1.0 / slope };
                let width = match self {
                    DataType::Uint8 | DataType::Int8 => 1,
                    DataType::Int16 | DataType::Uint16 => 2,
                    _ => 4,
                };
                let mut out = Vec::with_capacity(data.len() * width);
                for &v in data {
                    let q = ((v - intercept) * inv).round().clamp(lo, hi);
                    match self {
                        DataType::Uint8 => out.push(q as u8),
                        DataType::Int8 => out.extend_from_slice(&(q as i8).to_le_bytes()),
                        DataType::Int16 => out.extend_from_slice(&(q as i16).to_le_bytes()),
                        DataType::Uint16 => out.extend_from_slice(&(q as u16).to_le_bytes()),
                        DataType::Int32 => out.extend_from_slice(&(q as i32).to_le_bytes()),
                        DataType::Uint32 => out.extend_from_slice(&(q as u32).to_le_bytes()),
                        DataType::Float32 | DataType::Float64 => unreachable!(),
                    }
                }
                (out, slope, intercept)
            }
        }
    }

    /// Re-encode with a caller-supplied slope/intercept instead of deriving
    /// one from the data range — used when restoring the datatype a volume
    /// was originally read as, so a round trip through the working buffer
    /// is lossless.
    pub fn encode_with(self, data: &[f64], slope: f64, intercept: f64) -> Vec<u8> {
        let slope = if slope == 0.0 { 1.0 } else { slope };
        let width = match self {
            DataType::Uint8 | DataType::Int8 => 1,
            DataType::Int16 | DataType::Uint16 => 2,
            DataType::Float32 => 4,
            DataType::Float64 => 8,
            _ => 4,
        };
        let mut out = Vec::with_capacity(data.len() * width);
        for &v in data {
            match self {
                DataType::Float64 => out.extend_from_slice(&v.to_le_bytes()),
                DataType::Float32 => out.extend_from_slice(&(v as f32).to_le_bytes()),
                _ => {
                    let q = ((v - intercept) / slope).round();
                    match self {
                        DataType::Uint8 => out.push(q as u8),
                        DataType::Int8 => out.extend_from_slice(&(q as i8).to_le_bytes()),
                        DataType::Int16 => out.extend_from_slice(&(q as i16).to_le_bytes()),
                        DataType::Uint16 => out.extend_from_slice(&(q as u16).to_le_bytes()),
                        DataType::Int32 => out.extend_from_slice(&(q as i32).to_le_bytes()),
                        DataType::Uint32 => out.extend_from_slice(&(q as u32).to_le_bytes()),
                        DataType::Float32 | DataType::Float64 => unreachable!(),
                    }
                }
            }
        }
        out
    }
}

/// Choose a slope/intercept mapping `[lo, hi]` of the storage range onto
/// the data's own `[min, max]`, so the quantization step below is lossy
/// only in the expected, deliberate way (not clipped unnecessarily).
fn quantization_params(data: &[f64], lo: f64, hi: f64) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in data {
        if v.is_nan() {
            continue;
        }
        min = min.min(v);
        max = max.max(v);
    }
    if !min.is_finite() || !max.is_finite() || min == max {
        return (1.0, 0.0);
    }
    let slope = (max - min) / (hi - lo);
    let intercept = min - lo * slope;
    (slope, intercept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int16_round_trip_with_restored_slope() {
        let original: Vec<f64> = vec![-100.0, 0.0, 250.0, 32000.0];
        let (raw, slope, intercept) = DataType::Int16.encode(&original);
        let decoded = DataType::Int16.decode(&raw, slope, intercept).unwrap();
        for (a, b) in original.iter().zip(decoded.iter()) {
            assert!((a - b).abs() < 1.0, "{} vs {}", a, b);
        }
    }

    #[test]
    fn uint8_exact_round_trip() {
        let original: Vec<f64> = (0..=255).map(|v| v as f64).collect();
        let (raw, slope, intercept) = DataType::Uint8.encode(&original);
        let decoded = DataType::Uint8.decode(&raw, slope, intercept).unwrap();
        for (a, b) in original.iter().zip(decoded.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn float32_passthrough_has_unit_scale() {
        let data = vec![1.5, -2.25, 3.75];
        let (_, slope, intercept) = DataType::Float32.encode(&data);
        assert_eq!((slope, intercept), (1.0, 0.0));
    }
}
