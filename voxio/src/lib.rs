//! The volume I/O collaborator interface, plus a reference implementation.
//!
//! Container-format I/O — reading and writing the on-disk volume and its
//! header metadata — is explicitly out of scope for the engine itself: the
//! engine and pipeline driver code against the [`VolumeIo`] trait defined
//! here, never against a concrete file format. [`FlatFileIo`] is the one
//! implementation that ships in-tree, good enough for round-trip tests and
//! the CLI's own smoke use. It is not a NIfTI/DICOM reader: no compression,
//! no multi-file `.hdr`/`.img` pairs, no extension blocks.

use std::fs;
use std::io::{self, Read, Write};

use glam::Mat4;
use voxmath_engine::affine::Affine;
use voxmath_engine::dtype::DataType;
use voxmath_engine::volume::WorkingType;
use voxmath_engine::Volume;

/// Errors from the I/O boundary itself, distinct from [`voxmath_engine::Error`]
/// so a caller can tell "the pipeline failed" from "the file was bad" apart
/// (§6 maps the two to different process exit codes).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("malformed container at {path}: {detail}")]
    Malformed { path: String, detail: String },
    #[error(transparent)]
    Engine(#[from] voxmath_engine::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// What [`VolumeIo::read`] hands back: the volume itself, plus the storage
/// datatype and quantization parameters it was read as — needed so
/// `-odt input` can restore them losslessly on write.
pub struct ReadVolume {
    pub volume: Volume,
    pub datatype: DataType,
    pub scale: f64,
    pub intercept: f64,
}

/// The trait boundary the CLI and pipeline driver code against (§6). A
/// production implementation (NIfTI, NIfTI2, compressed pairs selected by
/// `FSLOUTPUTTYPE`) is pluggable and out of scope here.
pub trait VolumeIo {
    fn read(&self, path: &str, working: WorkingType) -> Result<ReadVolume>;

    /// Writes `volume` to `path`, with `postfix` (if given) inserted before
    /// the file extension — the convention `tensor_decomp`'s derived
    /// outputs use. `restore_quantization`, when given, re-uses the
    /// original slope/intercept instead of deriving a fresh one from the
    /// data's current range; this is what makes `-odt input` lossless for
    /// an otherwise-untouched volume.
    fn write(&self, volume: &Volume, path: &str, postfix: Option<&str>, datatype: DataType, restore_quantization: Option<(f64, f64)>) -> Result<()>;
}

// Fixed little-endian header: magic(4) + dims(4*u32) + spacing(4*f64) +
// scale/intercept(2*f64) + affine(16*f32) + datatype(u16) + pad(6).
const MAGIC: [u8; 4] = *b"VXM1";
const HEADER_LEN: usize = 4 + 16 + 32 + 16 + 64 + 2 + 6;

/// The reference flat-file container: one fixed-size header followed by
/// the raw voxel bytes in the storage datatype, no compression.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlatFileIo;

impl FlatFileIo {
    pub fn new() -> Self {
        FlatFileIo
    }
}

fn apply_postfix(path: &str, postfix: Option<&str>) -> String {
    match postfix {
        None => path.to_string(),
        Some(p) => match path.rfind('.') {
            Some(idx) => format!("{}{}{}", &path[..idx], p, &path[idx..]),
            None => format!("{path}{p}"),
        },
    }
}

fn io_err(path: &str) -> impl Fn(io::Error) -> Error + '_ {
    move |source| Error::Io { path: path.to_string(), source }
}

impl VolumeIo for FlatFileIo {
    fn read(&self, path: &str, working: WorkingType) -> Result<ReadVolume> {
        let mut f = fs::File::open(path).map_err(io_err(path))?;
        let mut header = [0u8; HEADER_LEN];
        f.read_exact(&mut header).map_err(io_err(path))?;
        if header[0..4] != MAGIC {
            return Err(Error::Malformed {
                path: path.to_string(),
                detail: "bad magic number".to_string(),
            });
        }

        let mut cur = 4usize;
        let mut read_u32 = || {
            let v = u32::from_le_bytes(header[cur..cur + 4].try_into().unwrap());
            cur += 4;
            v as usize
        };
        let (nx, ny, nz, nt) = (read_u32(), read_u32(), read_u32(), read_u32());

        let mut read_f64 = || {
            let v = f64::from_le_bytes(header[cur..cur + 8].try_into().unwrap());
            cur += 8;
            v
        };
        let (dx, dy, dz, dt) = (read_f64(), read_f64(), read_f64(), read_f64());
        let (scale, intercept) = (read_f64(), read_f64());

        let mut cols = [0f32; 16];
        for c in cols.iter_mut() {
            *c = f32::from_le_bytes(header[cur..cur + 4].try_into().unwrap());
            cur += 4;
        }
        let matrix = Mat4::from_cols_array(&cols);

        let dt_code = i16::from_le_bytes(header[cur..cur + 2].try_into().unwrap());
        let datatype = DataType::from_code(dt_code).ok_or_else(|| Error::Malformed {
            path: path.to_string(),
            detail: format!("unknown datatype code {dt_code}"),
        })?;

        let mut raw = Vec::new();
        f.read_to_end(&mut raw).map_err(io_err(path))?;
        let data = datatype.decode(&raw, scale, intercept)?;
        let volume = Volume::new(data, nx, ny, nz, nt, (dx, dy, dz, dt), Affine::from_matrix(matrix), working)?;
        Ok(ReadVolume { volume, datatype, scale, intercept })
    }

    fn write(&self, volume: &Volume, path: &str, postfix: Option<&str>, datatype: DataType, restore_quantization: Option<(f64, f64)>) -> Result<()> {
        let out_path = apply_postfix(path, postfix);
        let (raw, slope, intercept) = match restore_quantization {
            Some((slope, intercept)) => (datatype.encode_with(volume.data(), slope, intercept), slope, intercept),
            None => datatype.encode(volume.data()),
        };

        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(&MAGIC);
        header.extend_from_slice(&(volume.nx() as u32).to_le_bytes());
        header.extend_from_slice(&(volume.ny() as u32).to_le_bytes());
        header.extend_from_slice(&(volume.nz() as u32).to_le_bytes());
        header.extend_from_slice(&(volume.nt() as u32).to_le_bytes());
        let (dx, dy, dz, dt) = volume.spacing();
        for v in [dx, dy, dz, dt, slope, intercept] {
            header.extend_from_slice(&v.to_le_bytes());
        }
        for c in volume.affine().matrix().to_cols_array() {
            header.extend_from_slice(&c.to_le_bytes());
        }
        header.extend_from_slice(&datatype.code().to_le_bytes());
        header.extend_from_slice(&[0u8; 6]);
        debug_assert_eq!(header.len(), HEADER_LEN);

        let mut f = fs::File::create(&out_path).map_err(io_err(&out_path))?;
        f.write_all(&header).map_err(io_err(&out_path))?;
        f.write_all(&raw).map_err(io_err(&out_path))?;
        tracing::info!(path = %out_path, bytes = raw.len(), "wrote volume");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> String {
        std::env::temp_dir().join(format!("voxmath-voxio-test-{}-{name}", std::process::id())).to_string_lossy().into_owned()
    }

    #[test]
    fn round_trips_a_float32_volume() {
        let path = scratch_path("float32.vxm");
        let vol = Volume::new(
            vec![1.0, -2.5, 3.75, 0.0, 100.0, -100.0, 42.0, 7.0],
            2,
            2,
            2,
            1,
            (1.0, 1.0, 1.0, 1.0),
            Affine::identity(),
            WorkingType::Double,
        )
        .unwrap();
        let io = FlatFileIo::new();
        io.write(&vol, &path, None, DataType::Float32, None).unwrap();
        let read = io.read(&path, WorkingType::Double).unwrap();
        assert_eq!(read.datatype, DataType::Float32);
        for (a, b) in vol.data().iter().zip(read.volume.data().iter()) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn postfix_is_inserted_before_the_extension() {
        assert_eq!(apply_postfix("out.vxm", Some("_L1")), "out_L1.vxm");
        assert_eq!(apply_postfix("out", Some("_L1")), "out_L1");
    }

    #[test]
    fn bad_magic_is_rejected() {
        let path = scratch_path("garbage.vxm");
        fs::write(&path, [0u8; HEADER_LEN]).unwrap();
        let io = FlatFileIo::new();
        assert!(io.read(&path, WorkingType::Double).is_err());
        let _ = fs::remove_file(&path);
    }
}
