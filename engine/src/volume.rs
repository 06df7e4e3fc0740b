//! The dense N-D scalar grid every operation works against.

use crate::affine::Affine;
use crate::error::{Error, Result};

/// The floating-point precision a pipeline run was asked to compute in.
///
/// The buffer itself is always kept in `f64` internally (the accuracy loss
/// from doing otherwise is not worth doubling the size of every operation
/// in this crate with a generic float parameter); `Single` only changes how
/// aggressively intermediate values are rounded back down before being
/// handed to the datatype converter, and is reported to callers that care
/// (e.g. a `-dt float` run should not claim double-precision provenance).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkingType {
    Single,
    Double,
}

impl WorkingType {
    pub fn round_trip(self, v: f64) -> f64 {
        match self {
            WorkingType::Single => v as f32 as f64,
            WorkingType::Double => v,
        }
    }
}

/// A dense, row-major 4D scalar grid: `i = x + y*nx + z*nx*ny + t*nx*ny*nz`.
#[derive(Clone, Debug)]
pub struct Volume {
    data: Vec<f64>,
    nx: usize,
    ny: usize,
    nz: usize,
    nt: usize,
    dx: f64,
    dy: f64,
    dz: f64,
    dt: f64,
    /// Scale/intercept pair restored on output if the output datatype
    /// matches the datatype the volume was originally read as.
    scale: f64,
    intercept: f64,
    affine: Affine,
    working: WorkingType,
}

impl Volume {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        data: Vec<f64>,
        nx: usize,
        ny: usize,
        nz: usize,
        nt: usize,
        spacing: (f64, f64, f64, f64),
        affine: Affine,
        working: WorkingType,
    ) -> Result<Self> {
        let nvox = nx * ny * nz * nt;
        if data.len() != nvox {
            return Err(Error::shape(
                "Volume::new",
                format!("buffer length {} does not match nx*ny*nz*nt={}", data.len(), nvox),
            ));
        }
        if nx == 0 || ny == 0 || nz == 0 || nt == 0 {
            return Err(Error::shape("Volume::new", "no dimension may be zero"));
        }
        Ok(Volume {
            data,
            nx,
            ny,
            nz,
            nt,
            dx: spacing.0,
            dy: spacing.1,
            dz: spacing.2,
            dt: spacing.3,
            scale: 1.0,
            intercept: 0.0,
            affine,
            working,
        })
    }

    pub fn zeros(nx: usize, ny: usize, nz: usize, nt: usize, working: WorkingType) -> Self {
        Volume {
            data: vec![0.0; nx * ny * nz * nt],
            nx,
            ny,
            nz,
            nt,
            dx: 1.0,
            dy: 1.0,
            dz: 1.0,
            dt: 1.0,
            scale: 1.0,
            intercept: 0.0,
            affine: Affine::identity(),
            working,
        }
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    pub fn set_data(&mut self, data: Vec<f64>) {
        debug_assert_eq!(data.len(), self.nvox());
        self.data = data;
    }

    pub fn nx(&self) -> usize {
        self.nx
    }
    pub fn ny(&self) -> usize {
        self.ny
    }
    pub fn nz(&self) -> usize {
        self.nz
    }
    pub fn nt(&self) -> usize {
        self.nt
    }
    pub fn nvox3(&self) -> usize {
        self.nx * self.ny * self.nz
    }
    pub fn nvox(&self) -> usize {
        self.nx * self.ny * self.nz * self.nt
    }
    pub fn is_4d(&self) -> bool {
        self.nt > 1
    }

    pub fn spacing(&self) -> (f64, f64, f64, f64) {
        (self.dx, self.dy, self.dz, self.dt)
    }

    pub fn affine(&self) -> &Affine {
        &self.affine
    }
    pub fn set_affine(&mut self, affine: Affine) {
        self.affine = affine;
    }

    pub fn scale_intercept(&self) -> (f64, f64) {
        (self.scale, self.intercept)
    }
    pub fn set_scale_intercept(&mut self, scale: f64, intercept: f64) {
        self.scale = scale;
        self.intercept = intercept;
    }

    pub fn working_type(&self) -> WorkingType {
        self.working
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize, t: usize) -> usize {
        x + self.nx * (y + self.ny * (z + self.nz * t))
    }

    /// Reinterpret the logical dimensions of the buffer without touching
    /// the data, used by operations (dimension reduction, tensor_2) that
    /// collapse or reorder an axis but keep the same voxel count per volume.
    pub fn reshape(&mut self, nx: usize, ny: usize, nz: usize, nt: usize) -> Result<()> {
        if nx * ny * nz * nt != self.nvox() {
            return Err(Error::shape(
                "Volume::reshape",
                "reshape must preserve total voxel count",
            ));
        }
        self.nx = nx;
        self.ny = ny;
        self.nz = nz;
        self.nt = nt;
        Ok(())
    }

    /// Replace the buffer and dimensions wholesale (dimension reduction,
    /// resizing, subsampling). Always supersedes the prior buffer entirely;
    /// callers never observe a partially-updated volume.
    pub fn replace(&mut self, data: Vec<f64>, nx: usize, ny: usize, nz: usize, nt: usize) -> Result<()> {
        if data.len() != nx * ny * nz * nt {
            return Err(Error::shape("Volume::replace", "buffer/dimension mismatch"));
        }
        self.data = data;
        self.nx = nx;
        self.ny = ny;
        self.nz = nz;
        self.nt = nt;
        Ok(())
    }

    pub fn set_spacing(&mut self, dx: f64, dy: f64, dz: f64, dt: f64) {
        self.dx = dx;
        self.dy = dy;
        self.dz = dz;
        self.dt = dt;
    }

    /// A single 3D sub-volume's slice of a possibly-4D series.
    pub fn volume3(&self, t: usize) -> &[f64] {
        let n = self.nvox3();
        &self.data[t * n..(t + 1) * n]
    }

    pub fn volume3_mut(&mut self, t: usize) -> &mut [f64] {
        let n = self.nvox3();
        &mut self.data[t * n..(t + 1) * n]
    }

    /// Mutable access to every 3D sub-volume at once, for `rayon`-driven
    /// per-volume parallelism over a 4D series.
    pub fn volumes3_mut(&mut self) -> std::slice::ChunksMut<'_, f64> {
        let n = self.nvox3();
        self.data.chunks_mut(n)
    }

    pub fn volumes3(&self) -> std::slice::Chunks<'_, f64> {
        let n = self.nvox3();
        self.data.chunks(n)
    }

    pub fn same_shape_as(&self, other: &Volume) -> bool {
        self.nx == other.nx && self.ny == other.ny && self.nz == other.nz && self.nt == other.nt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_is_row_major() {
        let v = Volume::zeros(2, 3, 4, 1, WorkingType::Double);
        assert_eq!(v.index(0, 0, 0, 0), 0);
        assert_eq!(v.index(1, 0, 0, 0), 1);
        assert_eq!(v.index(0, 1, 0, 0), 2);
        assert_eq!(v.index(0, 0, 1, 0), 6);
    }

    #[test]
    fn rejects_mismatched_buffer() {
        let err = Volume::new(
            vec![0.0; 3],
            2,
            2,
            1,
            1,
            (1.0, 1.0, 1.0, 1.0),
            Affine::identity(),
            WorkingType::Double,
        );
        assert!(err.is_err());
    }

    #[test]
    fn volumes3_mut_splits_4d_series() {
        let mut v = Volume::new(
            vec![1.0, 2.0, 3.0, 4.0],
            1,
            1,
            1,
            4,
            (1.0, 1.0, 1.0, 1.0),
            Affine::identity(),
            WorkingType::Double,
        )
        .unwrap();
        let chunks: Vec<_> = v.volumes3_mut().map(|c| c[0]).collect();
        assert_eq!(chunks, vec![1.0, 2.0, 3.0, 4.0]);
    }
}
