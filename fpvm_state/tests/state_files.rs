use std::{
    fs::File,
    io::Write as _,
    path::{Path, PathBuf},
};

use ethereum_types::H256;
use flate2::{write::GzEncoder, Compression};
use fpvm_memory::Memory;
use fpvm_state::{
    load_state, load_vm_state,
    state::{write_state, write_vm_state},
    StateError, StateValidationError, VmState, VmStatus, WitnessError,
};
use hex_literal::hex;
use serde_json::{json, Value};
use tempfile::TempDir;

/// 362 zero bytes with exit code 1 and the exited flag set.
fn invalid_exit_witness() -> Vec<u8> {
    let mut witness = vec![0; 362];
    witness[80] = 1;
    witness[81] = 1;
    witness
}

const INVALID_EXIT_HASH: [u8; 32] =
    hex!("01e21db6e3aca4c1e8d189d2ab8e5b8b2f57fc0f57bb1fe4e86c1fe68a2e4d34");

fn witness_json(witness: &[u8], state_hash: &[u8], exited: bool) -> Value {
    json!({
        "witness": format!("0x{}", hex::encode(witness)),
        "stateHash": format!("0x{}", hex::encode(state_hash)),
        "step": 1234,
        "exited": exited,
    })
}

fn write_plain(dir: &TempDir, name: &str, value: &Value) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, serde_json::to_vec(value).unwrap()).unwrap();
    path
}

fn write_gzip(dir: &TempDir, name: &str, value: &Value) -> PathBuf {
    let path = dir.path().join(name);
    let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    encoder.write_all(&serde_json::to_vec(value).unwrap()).unwrap();
    encoder.finish().unwrap();
    path
}

fn validation_error(path: &Path) -> StateValidationError {
    match load_state(path) {
        Err(StateError::Invalid { source, .. }) => source,
        other => panic!("expected a validation error, got {other:?}"),
    }
}

#[test]
fn loads_plain_and_gzip_identically() {
    let dir = tempfile::tempdir().unwrap();
    let value = witness_json(&invalid_exit_witness(), &INVALID_EXIT_HASH, true);

    let plain = load_state(&write_plain(&dir, "state.json", &value)).unwrap();
    // No `.gz` suffix; the content is sniffed.
    let gzip = load_state(&write_gzip(&dir, "state.json", &value)).unwrap();
    assert_eq!(plain, gzip);

    assert_eq!(plain.state_hash(), H256(INVALID_EXIT_HASH));
    assert_eq!(plain.status(), VmStatus::Invalid);
    assert_eq!(plain.step(), 1234);
    assert!(plain.exited());
    assert_eq!(plain.witness().as_ref(), invalid_exit_witness().as_slice());
}

#[test]
fn unknown_fields_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let mut value = witness_json(&invalid_exit_witness(), &INVALID_EXIT_HASH, true);
    value["foo"] = json!("bar");
    value["nested"] = json!({ "deep": [1, 2, 3] });

    let state = load_state(&write_plain(&dir, "state.json", &value)).unwrap();
    assert_eq!(state.state_hash(), H256(INVALID_EXIT_HASH));
}

#[test]
fn missing_state_hash_is_derived() {
    let dir = tempfile::tempdir().unwrap();
    let mut value = witness_json(&invalid_exit_witness(), &INVALID_EXIT_HASH, true);
    value.as_object_mut().unwrap().remove("stateHash");

    let state = load_state(&write_plain(&dir, "state.json", &value)).unwrap();
    assert_eq!(state.state_hash(), H256(INVALID_EXIT_HASH));
    assert_eq!(state.status(), VmStatus::Invalid);
}

#[test]
fn derived_state_hash_is_validated() {
    let dir = tempfile::tempdir().unwrap();

    // The witness records an exit with code 1 while the file claims the
    // program is still running.
    let value = json!({
        "witness": format!("0x{}", hex::encode(invalid_exit_witness())),
        "exited": false,
        "step": 3,
    });
    let path = write_plain(&dir, "running.json", &value);
    assert_eq!(
        validation_error(&path),
        StateValidationError::InvalidExitCode(1)
    );
    assert!(matches!(
        fpvm_state::convert_state_to_proof(&path),
        Err(StateError::Invalid { .. })
    ));

    // An unfinished witness with the file claiming an exit.
    let value = json!({
        "witness": format!("0x{}", hex::encode([0u8; 362])),
        "exited": true,
    });
    let path = write_plain(&dir, "exited.json", &value);
    assert_eq!(
        validation_error(&path),
        StateValidationError::InvalidExitCode(3)
    );

    // A bare unfinished witness agrees with the default `exited: false`.
    let value = json!({ "witness": format!("0x{}", hex::encode([0u8; 362])) });
    let state = load_state(&write_plain(&dir, "bare.json", &value)).unwrap();
    assert_eq!(state.status(), VmStatus::Unfinished);
    assert!(!state.exited());
}

#[test]
fn rejects_short_witness() {
    let dir = tempfile::tempdir().unwrap();
    let value = witness_json(&[0; 361], &INVALID_EXIT_HASH, true);
    let path = write_plain(&dir, "short.json", &value);

    let err = load_state(&path).unwrap_err();
    let message = err.to_string();
    assert!(
        message.contains("invalid witness: Length must be 362 but got 361"),
        "{message}"
    );
    assert!(message.contains("invalid asterisc VM state"), "{message}");
    assert!(message.contains(&path.display().to_string()), "{message}");

    assert_eq!(
        validation_error(&path),
        StateValidationError::Witness(WitnessError::Length(361))
    );
}

#[test]
fn rejects_long_witness() {
    let dir = tempfile::tempdir().unwrap();
    let value = witness_json(&[0; 363], &INVALID_EXIT_HASH, true);
    let path = write_plain(&dir, "long.json", &value);
    assert_eq!(
        validation_error(&path),
        StateValidationError::Witness(WitnessError::Length(363))
    );
}

#[test]
fn rejects_unknown_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let mut hash = INVALID_EXIT_HASH;
    hash[0] = 4;
    let path = write_plain(
        &dir,
        "state.json",
        &witness_json(&invalid_exit_witness(), &hash, true),
    );

    let err = load_state(&path).unwrap_err();
    assert!(err
        .to_string()
        .contains("invalid stateHash: unknown exitCode 4"));
}

#[test]
fn rejects_exit_code_inconsistent_with_exited() {
    let dir = tempfile::tempdir().unwrap();
    let witness = invalid_exit_witness();

    for (status, exited) in [(3, true), (0, false), (1, false), (2, false)] {
        let mut hash = INVALID_EXIT_HASH;
        hash[0] = status;
        let path = write_plain(&dir, "state.json", &witness_json(&witness, &hash, exited));
        let err = load_state(&path).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!(
                "invalid asterisc VM state ({}): invalid stateHash: invalid exitCode {status}",
                path.display()
            )
        );
    }

    // The consistent combinations load.
    for (status, exited) in [(3, false), (0, true), (2, true)] {
        let mut hash = INVALID_EXIT_HASH;
        hash[0] = status;
        let path = write_plain(&dir, "state.json", &witness_json(&witness, &hash, exited));
        assert_eq!(load_state(&path).unwrap().status().to_u8(), status);
    }
}

#[test]
fn malformed_json_names_the_field() {
    let dir = tempfile::tempdir().unwrap();
    let mut value = witness_json(&invalid_exit_witness(), &INVALID_EXIT_HASH, true);
    value["step"] = json!("not a number");
    let path = write_plain(&dir, "state.json", &value);

    match load_state(&path) {
        Err(StateError::Decode { source, .. }) => assert_eq!(source.path().to_string(), "step"),
        other => panic!("expected a decode error, got {other:?}"),
    }
}

#[test]
fn missing_file_is_an_open_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json.gz");
    let err = load_state(&path).unwrap_err();
    assert!(matches!(err, StateError::Open { .. }));
    assert!(err
        .to_string()
        .starts_with(&format!("cannot open state file ({})", path.display())));
}

fn sample_vm_state() -> VmState {
    let mut memory = Memory::new();
    memory.set_u64(0x1000, 0x0000_0000_0000_0073).unwrap();
    memory.set_unaligned(0x7fff_fffc, b"stack top");

    let mut registers = [0; 32];
    registers[2] = 0x7fff_fff0;
    registers[10] = 1;

    VmState {
        memory,
        preimage_key: H256::repeat_byte(0x02),
        preimage_offset: 8,
        pc: 0x1000,
        exit_code: 0,
        exited: false,
        step: 99,
        heap: 0x1000_0000,
        load_reservation: 0,
        registers,
        last_hint: Some(b"\x00\x00\x00\x01h".to_vec()),
    }
}

#[test]
fn vm_state_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = sample_vm_state();

    for name in ["vm.json", "vm.json.gz"] {
        let path = dir.path().join(name);
        write_vm_state(&path, &state).unwrap();
        let mut loaded = load_vm_state(&path).unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.state_hash(), state.state_hash());
    }
}

#[test]
fn vm_state_json_names() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vm.json");
    write_vm_state(&path, &sample_vm_state()).unwrap();

    let value: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
    keys.sort();
    assert_eq!(
        keys,
        [
            "exit",
            "exited",
            "heap",
            "lastHint",
            "loadReservation",
            "memory",
            "pc",
            "preimageKey",
            "preimageOffset",
            "registers",
            "step",
        ]
    );
    assert_eq!(value["lastHint"], "0x0000000168");
    assert_eq!(value["memory"].as_array().unwrap().len(), 3);
    assert_eq!(value["memory"][0]["index"], 1);
}

#[test]
fn witness_form_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut vm = sample_vm_state();
    let expected_hash = vm.state_hash();
    let witness = vm.to_state_witness();

    for name in ["state.json", "state.json.gz"] {
        let path = dir.path().join(name);
        write_state(&path, &witness).unwrap();
        let loaded = load_state(&path).unwrap();
        assert_eq!(loaded, witness);
        assert_eq!(loaded.state_hash(), expected_hash);
        assert_eq!(loaded.status(), VmStatus::Unfinished);
        assert_eq!(loaded.step(), 99);
        assert_eq!(loaded.witness().decode().pc, 0x1000);
        assert_eq!(loaded.last_hint(), Some(&b"\x00\x00\x00\x01h"[..]));
    }
}
