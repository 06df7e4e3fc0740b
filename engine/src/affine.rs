//! The voxel-to-world spatial transform.

use glam::{Mat4, Quat, Vec3, Vec4};

/// A 4x4 affine transform from voxel-grid coordinates to world coordinates,
/// plus the quaternion-derived form the reference container format keeps
/// alongside the plain matrix form.
///
/// Invariant: the last row of `matrix` is always `(0, 0, 0, 1)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Affine {
    matrix: Mat4,
    quaternion: Quat,
    qoffset: Vec3,
    /// Sign used by `qform`-derived matrices to encode left/right-handed
    /// voxel ordering; ignored once `matrix` is built from an `sform`.
    qfac: f32,
}

impl Default for Affine {
    fn default() -> Self {
        Self::identity()
    }
}

impl Affine {
    pub fn identity() -> Self {
        Affine {
            matrix: Mat4::IDENTITY,
            quaternion: Quat::IDENTITY,
            qoffset: Vec3::ZERO,
            qfac: 1.0,
        }
    }

    pub fn from_matrix(matrix: Mat4) -> Self {
        let (_, quaternion, translation) = matrix.to_scale_rotation_translation();
        Affine {
            matrix,
            quaternion,
            qoffset: translation,
            qfac: 1.0,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        self.matrix
    }

    /// The sign of the determinant of the 3x3 linear part. Several
    /// operations (the `index` flip, `subsamp2` centring) key behaviour off
    /// this handedness.
    pub fn is_left_handed(&self) -> bool {
        let m = self.matrix;
        let upper = glam::Mat3::from_cols(m.x_axis.truncate(), m.y_axis.truncate(), m.z_axis.truncate());
        upper.determinant() < 0.0
    }

    /// Rescale the linear part's columns by `1/scale` per axis, preserving
    /// translation. Used by `resize` to keep the world-space footprint of
    /// the volume constant after a resampling.
    pub fn rescaled(&self, sx: f32, sy: f32, sz: f32) -> Self {
        let mut m = self.matrix;
        m.x_axis = m.x_axis / sx.max(f32::MIN_POSITIVE);
        m.y_axis = m.y_axis / sy.max(f32::MIN_POSITIVE);
        m.z_axis = m.z_axis / sz.max(f32::MIN_POSITIVE);
        Affine {
            matrix: m,
            quaternion: self.quaternion,
            qoffset: self.qoffset,
            qfac: self.qfac,
        }
    }

    /// Shift the world-space origin by a half-voxel along each given axis,
    /// used by `subsamp2`'s centring conventions.
    pub fn shifted_origin(&self, dx: f32, dy: f32, dz: f32) -> Self {
        let mut m = self.matrix;
        let shift = m.transform_vector3(Vec3::new(dx, dy, dz));
        m.w_axis += Vec4::from((shift, 0.0));
        Affine {
            matrix: m,
            quaternion: self.quaternion,
            qoffset: self.qoffset + shift,
            qfac: self.qfac,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_right_handed() {
        let a = Affine::identity();
        assert!(!a.is_left_handed());
    }

    #[test]
    fn rescaled_preserves_translation() {
        let a = Affine::from_matrix(Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)));
        let r = a.rescaled(2.0, 2.0, 2.0);
        assert_eq!(r.matrix().w_axis.truncate(), Vec3::new(1.0, 2.0, 3.0));
    }
}
