//! VM state records and the state file loader.

use std::path::Path;

use ethereum_types::H256;
use fpvm_memory::Memory;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::{StateError, StateResult, StateValidationError},
    fs::{read_json, write_json},
    status::VmStatus,
    witness::{Witness, WitnessFields, REGISTER_COUNT},
};

/// A full VM state: memory plus every register.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmState {
    /// The paged memory.
    pub memory: Memory,
    /// Key of the preimage currently being read.
    pub preimage_key: H256,
    /// Read offset into the current preimage.
    pub preimage_offset: u64,
    /// Program counter.
    pub pc: u64,
    /// Exit code, meaningful once `exited` is set.
    #[serde(rename = "exit")]
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
    /// The last hint sent to the host. Only a prefix may have been fully
    /// written, so nothing is derived from it and it is not committed to by
    /// the witness.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::hex::option"
    )]
    pub last_hint: Option<Vec<u8>>,
}

impl VmState {
    /// The fields committed to by the witness, computing the memory root.
    pub fn witness_fields(&mut self) -> WitnessFields {
        WitnessFields {
            memory_root: self.memory.merkle_root(),
            preimage_key: self.preimage_key,
            preimage_offset: self.preimage_offset,
            pc: self.pc,
            exit_code: self.exit_code,
            exited: self.exited,
            step: self.step,
            heap: self.heap,
            load_reservation: self.load_reservation,
            registers: self.registers,
        }
    }

    /// Encodes the witness of this state.
    pub fn encode_witness(&mut self) -> Witness {
        self.witness_fields().encode()
    }

    /// The state hash of this state.
    pub fn state_hash(&mut self) -> H256 {
        self.encode_witness().state_hash()
    }

    /// The status of this state.
    pub const fn status(&self) -> VmStatus {
        VmStatus::from_exit(self.exited, self.exit_code)
    }

    /// The witness-only form of this state.
    pub fn to_state_witness(&mut self) -> StateWitness {
        let mut state = StateWitness::from_witness(self.encode_witness());
        state.last_hint.clone_from(&self.last_hint);
        state
    }
}

/// The witness-only form of a VM state, as consumed by proof conversion.
///
/// Immutable once built. The status byte of the state hash is known and
/// agrees with `exited`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StateWitness {
    witness: Witness,
    state_hash: H256,
    status: VmStatus,
    step: u64,
    exited: bool,
    last_hint: Option<Vec<u8>>,
}

/// The on-disk shape of a [`StateWitness`], before validation.
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct StateWitnessFile {
    #[serde(with = "crate::hex")]
    witness: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state_hash: Option<H256>,
    #[serde(default)]
    step: u64,
    #[serde(default)]
    exited: bool,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::hex::option"
    )]
    last_hint: Option<Vec<u8>>,
}

impl StateWitness {
    /// Wraps a witness, taking `step` and `exited` from its fields and
    /// hashing it.
    pub fn from_witness(witness: Witness) -> Self {
        let fields = witness.decode();
        Self {
            state_hash: witness.state_hash(),
            status: witness.status(),
            witness,
            step: fields.step,
            exited: fields.exited,
            last_hint: None,
        }
    }

    /// The encoded witness.
    pub const fn witness(&self) -> &Witness {
        &self.witness
    }

    /// The state hash: the one recorded in the state file if there was one,
    /// otherwise the hash of the witness.
    pub const fn state_hash(&self) -> H256 {
        self.state_hash
    }

    /// The status carried in the first byte of the state hash.
    pub const fn status(&self) -> VmStatus {
        self.status
    }

    /// Number of instructions executed.
    pub const fn step(&self) -> u64 {
        self.step
    }

    /// Whether the program has exited.
    pub const fn exited(&self) -> bool {
        self.exited
    }

    /// The last hint sent to the host, if recorded.
    pub fn last_hint(&self) -> Option<&[u8]> {
        self.last_hint.as_deref()
    }

    fn to_file(&self) -> StateWitnessFile {
        StateWitnessFile {
            witness: self.witness.as_ref().to_vec(),
            state_hash: Some(self.state_hash),
            step: self.step,
            exited: self.exited,
            last_hint: self.last_hint.clone(),
        }
    }
}

impl TryFrom<StateWitnessFile> for StateWitness {
    type Error = StateValidationError;

    fn try_from(file: StateWitnessFile) -> Result<Self, Self::Error> {
        // A recorded header is checked before the witness; a derived one can
        // only be checked once the witness is known to be well formed.
        let (witness, state_hash, status) = match file.state_hash {
            Some(hash) => {
                let status = validate_state_hash(hash, file.exited)?;
                (Witness::try_from(file.witness.as_slice())?, hash, status)
            }
            None => {
                let witness = Witness::try_from(file.witness.as_slice())?;
                let hash = witness.state_hash();
                let status = validate_state_hash(hash, file.exited)?;
                (witness, hash, status)
            }
        };
        Ok(Self {
            witness,
            state_hash,
            status,
            step: file.step,
            exited: file.exited,
            last_hint: file.last_hint,
        })
    }
}

/// Checks that the status byte of `hash` is known and agrees with `exited`.
fn validate_state_hash(hash: H256, exited: bool) -> Result<VmStatus, StateValidationError> {
    let exit_code = hash[0];
    let status = VmStatus::try_from(exit_code)
        .map_err(|_| StateValidationError::UnknownExitCode(exit_code))?;
    if exited == (status == VmStatus::Unfinished) {
        return Err(StateValidationError::InvalidExitCode(exit_code));
    }
    Ok(status)
}

/// Loads a witness-only state file, gzip-framed or not.
///
/// The state hash header and the witness length are validated; unknown JSON
/// fields are ignored.
pub fn load_state(path: &Path) -> StateResult<StateWitness> {
    let file: StateWitnessFile = read_json(path)?;
    let state = StateWitness::try_from(file).map_err(|source| StateError::Invalid {
        path: path.to_owned(),
        source,
    })?;
    debug!(
        path = %path.display(),
        step = state.step,
        exited = state.exited,
        "loaded state witness"
    );
    Ok(state)
}

/// Loads a register-ful state file, gzip-framed or not.
pub fn load_vm_state(path: &Path) -> StateResult<VmState> {
    let state: VmState = read_json(path)?;
    info!(
        path = %path.display(),
        step = state.step,
        pages = state.memory.page_count(),
        usage = %state.memory.usage(),
        "loaded VM state"
    );
    Ok(state)
}

/// Writes a witness-only state file, gzip-compressed if `path` ends in `.gz`.
/// The state hash is always recorded.
pub fn write_state(path: &Path, state: &StateWitness) -> StateResult<()> {
    write_json(path, &state.to_file())
}

/// Writes a register-ful state file, gzip-compressed if `path` ends in `.gz`.
pub fn write_vm_state(path: &Path, state: &VmState) -> StateResult<()> {
    write_json(path, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::witness::WITNESS_LEN;

    fn hash_with_status(status: u8) -> H256 {
        let mut hash = H256::repeat_byte(0x5a);
        hash.0[0] = status;
        hash
    }

    #[test]
    fn state_hash_header() {
        assert_eq!(
            validate_state_hash(hash_with_status(3), false),
            Ok(VmStatus::Unfinished)
        );
        for status in 0..3 {
            assert_eq!(
                validate_state_hash(hash_with_status(status), true).map(VmStatus::to_u8),
                Ok(status)
            );
            assert_eq!(
                validate_state_hash(hash_with_status(status), false),
                Err(StateValidationError::InvalidExitCode(status))
            );
        }
        assert_eq!(
            validate_state_hash(hash_with_status(3), true),
            Err(StateValidationError::InvalidExitCode(3))
        );
        for exited in [false, true] {
            assert_eq!(
                validate_state_hash(hash_with_status(4), exited),
                Err(StateValidationError::UnknownExitCode(4))
            );
        }
    }

    #[test]
    fn header_is_checked_before_witness() {
        let file = StateWitnessFile {
            witness: vec![0; 10],
            state_hash: Some(hash_with_status(7)),
            step: 0,
            exited: true,
            last_hint: None,
        };
        assert_eq!(
            StateWitness::try_from(file).unwrap_err().to_string(),
            "invalid stateHash: unknown exitCode 7"
        );
    }

    #[test]
    fn derived_header_must_match_exited() {
        let mut exited_witness = vec![0; WITNESS_LEN];
        exited_witness[80] = 1;
        exited_witness[81] = 1;

        // The witness says the program exited, the record says it did not.
        let file = StateWitnessFile {
            witness: exited_witness.clone(),
            state_hash: None,
            step: 3,
            exited: false,
            last_hint: None,
        };
        assert_eq!(
            StateWitness::try_from(file),
            Err(StateValidationError::InvalidExitCode(1))
        );

        // And the reverse.
        let file = StateWitnessFile {
            witness: vec![0; WITNESS_LEN],
            state_hash: None,
            step: 0,
            exited: true,
            last_hint: None,
        };
        assert_eq!(
            StateWitness::try_from(file),
            Err(StateValidationError::InvalidExitCode(3))
        );

        let file = StateWitnessFile {
            witness: exited_witness,
            state_hash: None,
            step: 3,
            exited: true,
            last_hint: None,
        };
        let state = StateWitness::try_from(file).unwrap();
        assert_eq!(state.status(), VmStatus::Invalid);
        assert_eq!(state.state_hash(), state.witness().state_hash());
    }

    #[test]
    fn from_vm_state() {
        let mut vm = VmState {
            exited: true,
            exit_code: 1,
            step: 7,
            ..Default::default()
        };
        vm.memory.set_u64(0x1000, 0xdead_beef).unwrap();

        let state = vm.to_state_witness();
        assert_eq!(state.state_hash(), vm.state_hash());
        assert_eq!(state.status(), VmStatus::Invalid);
        assert_eq!(state.status(), vm.status());
        assert_eq!(state.step(), 7);
        assert!(state.exited());
    }

    #[test]
    fn witness_commits_to_memory_root() {
        let mut vm = VmState::default();
        let empty = vm.encode_witness();
        assert_eq!(empty.decode().memory_root, vm.memory.merkle_root());

        vm.memory.set_u64(0x2000, 1).unwrap();
        let written = vm.encode_witness();
        assert_ne!(written.decode().memory_root, empty.decode().memory_root);
        assert_eq!(written.as_bytes()[32..], empty.as_bytes()[32..]);
    }

    #[test]
    fn last_hint_is_not_committed() {
        let mut vm = VmState::default();
        let before = vm.state_hash();
        vm.last_hint = Some(vec![0, 0, 0, 4, 1, 2]);
        assert_eq!(vm.state_hash(), before);
        assert_eq!(vm.to_state_witness().last_hint(), Some(&[0, 0, 0, 4, 1, 2][..]));
    }
}
