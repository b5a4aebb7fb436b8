//! Errors raised while loading, validating and writing state files.

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::witness::WitnessError;

/// An alias for `Result<T, StateError>`.
pub type StateResult<T> = Result<T, StateError>;

/// A decoded state record failed structural validation.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum StateValidationError {
    /// The status byte of the state hash is not a known [`VmStatus`].
    ///
    /// [`VmStatus`]: crate::VmStatus
    #[error("invalid stateHash: unknown exitCode {0}")]
    UnknownExitCode(u8),

    /// The status byte of the state hash disagrees with the exited flag.
    #[error("invalid stateHash: invalid exitCode {0}")]
    InvalidExitCode(u8),

    /// The witness is malformed.
    #[error(transparent)]
    Witness(#[from] WitnessError),
}

/// Failure to load or store a state or proof file. Every variant names the
/// file it concerns.
#[derive(Debug, Error)]
pub enum StateError {
    /// The file could not be opened, read or decompressed.
    #[error("cannot open state file ({}): {source}", path.display())]
    Open {
        /// The file being read.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },

    /// The file contents are not a valid JSON record.
    #[error("invalid asterisc VM state ({}): {source}", path.display())]
    Decode {
        /// The file being read.
        path: PathBuf,
        /// The underlying error, with the JSON path at which it occurred.
        source: serde_path_to_error::Error<serde_json::Error>,
    },

    /// The record was decoded but failed validation.
    #[error("invalid asterisc VM state ({}): {source}", path.display())]
    Invalid {
        /// The file being read.
        path: PathBuf,
        /// The validation failure.
        source: StateValidationError,
    },

    /// The file could not be written.
    #[error("cannot write state file ({}): {source}", path.display())]
    Write {
        /// The file being written.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },
}

impl StateError {
    /// The file this error concerns.
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Open { path, .. }
            | Self::Decode { path, .. }
            | Self::Invalid { path, .. }
            | Self::Write { path, .. } => path,
        }
    }
}
