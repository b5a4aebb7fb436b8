//! The VM status carried in the first byte of every state hash.

use std::fmt;

use thiserror::Error;

/// Outcome of a VM run, as committed to by the state hash.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum VmStatus {
    /// The program exited with code 0.
    Valid = 0,
    /// The program exited with code 1.
    Invalid = 1,
    /// The program exited with any other code.
    Panic = 2,
    /// The program has not exited yet.
    Unfinished = 3,
}

/// A status byte outside of `0..=3`.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[error("unknown VM status {0}")]
pub struct UnknownVmStatus(pub u8);

impl VmStatus {
    /// Derives the status from the exit flag and exit code of a VM.
    pub const fn from_exit(exited: bool, exit_code: u8) -> Self {
        if !exited {
            return Self::Unfinished;
        }
        match exit_code {
            0 => Self::Valid,
            1 => Self::Invalid,
            _ => Self::Panic,
        }
    }

    /// The byte written over the first byte of the state hash.
    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for VmStatus {
    type Error = UnknownVmStatus;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Valid),
            1 => Ok(Self::Invalid),
            2 => Ok(Self::Panic),
            3 => Ok(Self::Unfinished),
            n => Err(UnknownVmStatus(n)),
        }
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Panic => "panic",
            Self::Unfinished => "unfinished",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_from_exit() {
        assert_eq!(VmStatus::from_exit(false, 0), VmStatus::Unfinished);
        assert_eq!(VmStatus::from_exit(false, 7), VmStatus::Unfinished);
        assert_eq!(VmStatus::from_exit(true, 0), VmStatus::Valid);
        assert_eq!(VmStatus::from_exit(true, 1), VmStatus::Invalid);
        assert_eq!(VmStatus::from_exit(true, 2), VmStatus::Panic);
        assert_eq!(VmStatus::from_exit(true, 255), VmStatus::Panic);
    }

    #[test]
    fn status_byte() {
        for byte in 0..4 {
            assert_eq!(VmStatus::try_from(byte).unwrap().to_u8(), byte);
        }
        assert_eq!(VmStatus::try_from(4), Err(UnknownVmStatus(4)));
        assert_eq!(VmStatus::Panic.to_string(), "panic");
    }
}
