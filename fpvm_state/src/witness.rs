//! The fixed-size VM witness and the state hash derived from it.
//!
//! Layout, all integers big-endian:
//!
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0 | 32 | memory root |
//! | 32 | 32 | preimage key |
//! | 64 | 8 | preimage offset |
//! | 72 | 8 | pc |
//! | 80 | 1 | exit code |
//! | 81 | 1 | exited |
//! | 82 | 8 | step |
//! | 90 | 8 | heap |
//! | 98 | 8 | load reservation |
//! | 106 | 256 | registers |

use std::fmt;

use ethereum_types::H256;
use keccak_hash::keccak;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::status::VmStatus;

/// Number of general purpose registers.
pub const REGISTER_COUNT: usize = 32;

/// Length of an encoded witness in bytes.
pub const WITNESS_LEN: usize = 32 + 32 + 8 + 8 + 1 + 1 + 8 + 8 + 8 + 8 * REGISTER_COUNT;

pub(crate) const MEMORY_ROOT_OFFSET: usize = 0;
pub(crate) const PREIMAGE_KEY_OFFSET: usize = MEMORY_ROOT_OFFSET + 32;
pub(crate) const PREIMAGE_OFFSET_OFFSET: usize = PREIMAGE_KEY_OFFSET + 32;
pub(crate) const PC_OFFSET: usize = PREIMAGE_OFFSET_OFFSET + 8;
pub(crate) const EXIT_CODE_OFFSET: usize = PC_OFFSET + 8;
pub(crate) const EXITED_OFFSET: usize = EXIT_CODE_OFFSET + 1;
pub(crate) const STEP_OFFSET: usize = EXITED_OFFSET + 1;
pub(crate) const HEAP_OFFSET: usize = STEP_OFFSET + 8;
pub(crate) const LOAD_RESERVATION_OFFSET: usize = HEAP_OFFSET + 8;
pub(crate) const REGISTERS_OFFSET: usize = LOAD_RESERVATION_OFFSET + 8;

/// Errors raised while decoding or hashing witnesses.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum WitnessError {
    /// The witness does not have exactly [`WITNESS_LEN`] bytes.
    #[error("invalid witness: Length must be {WITNESS_LEN} but got {0}")]
    Length(usize),

    /// The witness is too short to carry the exit code and exited flag.
    #[error("state witness too short to hash: {0} bytes")]
    TooShort(usize),
}

/// An encoded VM witness.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Witness([u8; WITNESS_LEN]);

/// The fields committed to by a [`Witness`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WitnessFields {
    /// Merkle root of the VM memory.
    pub memory_root: H256,
    /// Key of the preimage currently being read.
    pub preimage_key: H256,
    /// Read offset into the current preimage.
    pub preimage_offset: u64,
    /// Program counter.
    pub pc: u64,
    /// Exit code, meaningful once `exited` is set.
    pub exit_code: u8,
    /// Whether the program has exited.
    pub exited: bool,
    /// Number of instructions executed.
    pub step: u64,
    /// Heap pointer.
    pub heap: u64,
    /// Reservation address of the last load-reserved instruction.
    pub load_reservation: u64,
    /// General purpose registers.
    pub registers: [u64; REGISTER_COUNT],
}

impl WitnessFields {
    /// Encodes the fields into a witness.
    pub fn encode(&self) -> Witness {
        let mut out = [0; WITNESS_LEN];
        out[MEMORY_ROOT_OFFSET..PREIMAGE_KEY_OFFSET].copy_from_slice(self.memory_root.as_bytes());
        out[PREIMAGE_KEY_OFFSET..PREIMAGE_OFFSET_OFFSET]
            .copy_from_slice(self.preimage_key.as_bytes());
        put_u64(&mut out, PREIMAGE_OFFSET_OFFSET, self.preimage_offset);
        put_u64(&mut out, PC_OFFSET, self.pc);
        out[EXIT_CODE_OFFSET] = self.exit_code;
        out[EXITED_OFFSET] = self.exited.into();
        put_u64(&mut out, STEP_OFFSET, self.step);
        put_u64(&mut out, HEAP_OFFSET, self.heap);
        put_u64(&mut out, LOAD_RESERVATION_OFFSET, self.load_reservation);
        for (i, register) in self.registers.iter().enumerate() {
            put_u64(&mut out, REGISTERS_OFFSET + 8 * i, *register);
        }
        Witness(out)
    }

    /// The status these fields commit to.
    pub const fn status(&self) -> VmStatus {
        VmStatus::from_exit(self.exited, self.exit_code)
    }
}

fn put_u64(out: &mut [u8; WITNESS_LEN], offset: usize, value: u64) {
    out[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
}

fn get_u64(bytes: &[u8; WITNESS_LEN], offset: usize) -> u64 {
    let mut buf = [0; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_be_bytes(buf)
}

impl Witness {
    /// The raw witness bytes.
    pub const fn as_bytes(&self) -> &[u8; WITNESS_LEN] {
        &self.0
    }

    /// Decodes the committed fields.
    pub fn decode(&self) -> WitnessFields {
        let bytes = &self.0;
        let mut registers = [0; REGISTER_COUNT];
        for (i, register) in registers.iter_mut().enumerate() {
            *register = get_u64(bytes, REGISTERS_OFFSET + 8 * i);
        }
        WitnessFields {
            memory_root: H256::from_slice(&bytes[MEMORY_ROOT_OFFSET..PREIMAGE_KEY_OFFSET]),
            preimage_key: H256::from_slice(&bytes[PREIMAGE_KEY_OFFSET..PREIMAGE_OFFSET_OFFSET]),
            preimage_offset: get_u64(bytes, PREIMAGE_OFFSET_OFFSET),
            pc: get_u64(bytes, PC_OFFSET),
            exit_code: bytes[EXIT_CODE_OFFSET],
            exited: bytes[EXITED_OFFSET] == 1,
            step: get_u64(bytes, STEP_OFFSET),
            heap: get_u64(bytes, HEAP_OFFSET),
            load_reservation: get_u64(bytes, LOAD_RESERVATION_OFFSET),
            registers,
        }
    }

    /// The status committed to by this witness.
    pub const fn status(&self) -> VmStatus {
        VmStatus::from_exit(self.0[EXITED_OFFSET] == 1, self.0[EXIT_CODE_OFFSET])
    }

    /// The state hash of this witness.
    pub fn state_hash(&self) -> H256 {
        let mut hash = keccak(self.0);
        hash.0[0] = self.status().to_u8();
        hash
    }
}

impl TryFrom<&[u8]> for Witness {
    type Error = WitnessError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        bytes
            .try_into()
            .map(Self)
            .map_err(|_| WitnessError::Length(bytes.len()))
    }
}

impl AsRef<[u8]> for Witness {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Witness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Witness(0x{})", hex::encode(self.0))
    }
}

impl Serialize for Witness {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        crate::hex::serialize(self, serializer)
    }
}

impl<'de> Deserialize<'de> for Witness {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = crate::hex::deserialize(deserializer)?;
        Self::try_from(bytes.as_slice()).map_err(D::Error::custom)
    }
}

/// Computes the state hash of a raw witness without decoding it: the Keccak
/// digest of the bytes with the first byte replaced by the [`VmStatus`] read
/// from the exit code and exited flag.
///
/// Only the offsets of those two fields are relied upon, so any input long
/// enough to contain them is accepted.
pub fn state_hash_from_witness(witness: &[u8]) -> Result<H256, WitnessError> {
    if witness.len() <= EXITED_OFFSET {
        return Err(WitnessError::TooShort(witness.len()));
    }
    let status = VmStatus::from_exit(witness[EXITED_OFFSET] == 1, witness[EXIT_CODE_OFFSET]);
    let mut hash = keccak(witness);
    hash.0[0] = status.to_u8();
    Ok(hash)
}
