//! Row and neighbourhood inner loops shared by the separable blur, the
//! exact distance transform, and the morphological kernel operations.
//!
//! `convolve` carries a scalar/SIMD split in the style of a classic
//! deblocking filter: a fixed per-tap weighted sum applied across a row,
//! vectorised four lanes at a time with a scalar remainder. `neighbourhood`
//! is the irregular-kernel counterpart (arbitrary offsets, not a fixed tap
//! count) and stays scalar, since the offsets differ per output voxel near
//! a volume edge and don't share a single vector shape.

pub mod convolve;
pub mod neighbourhood;

pub use convolve::convolve_row;
pub use neighbourhood::{KernelEntry, Reduction};
