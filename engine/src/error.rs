//! The engine's error taxonomy.
//!
//! Every fallible function in this crate returns `Result<T>`. Operations
//! never panic on bad input; a panic anywhere below the pipeline driver
//! indicates an internal bug, not user error.

use thiserror::Error as ThisError;

/// All ways an operation against a volume can fail.
#[derive(ThisError, Debug)]
pub enum Error {
    /// The external volume loader could not produce a volume from a path.
    #[error("failed to read volume from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A binary operation was given operands with incompatible shapes, or
    /// an operation that requires 4D input was given a 3D volume.
    #[error("shape mismatch in `{op}`: {detail}")]
    ShapeMismatch { op: &'static str, detail: String },

    /// A token in the operation stream was missing a required argument, or
    /// an argument failed to parse as the expected type.
    #[error("argument error in `{op}`: {detail}")]
    Argument { op: &'static str, detail: String },

    /// An operation encountered a buffer that was not in the working
    /// floating-point type it expects.
    #[error("`{op}` requires the working float type, found something else")]
    UnsupportedDatatype { op: &'static str },

    /// An operation name was not recognised by the pipeline driver.
    #[error("unknown operation `{0}`")]
    UnknownOperation(String),

    /// Internal invariant violation; should never happen on valid input.
    #[error("internal engine error in `{op}`: {detail}")]
    Internal { op: &'static str, detail: String },
}

/// Convenience alias used throughout the crate, mirroring the teacher's
/// `crate::error::{Error, Result}` convention.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn shape(op: &'static str, detail: impl Into<String>) -> Self {
        Error::ShapeMismatch {
            op,
            detail: detail.into(),
        }
    }

    pub fn argument(op: &'static str, detail: impl Into<String>) -> Self {
        Error::Argument {
            op,
            detail: detail.into(),
        }
    }

    pub fn internal(op: &'static str, detail: impl Into<String>) -> Self {
        Error::Internal {
            op,
            detail: detail.into(),
        }
    }
}
