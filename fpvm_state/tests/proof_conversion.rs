use ethereum_types::H256;
use fpvm_state::{
    convert_state_to_proof, read_proof, state::write_state, ProofData, StateError, VmState,
};
use hex_literal::hex;
use serde_json::json;

#[test]
fn converts_witness_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut witness = vec![0; 362];
    witness[80] = 1;
    witness[81] = 1;
    let path = dir.path().join("state.json");
    std::fs::write(
        &path,
        serde_json::to_vec(&json!({
            "witness": format!("0x{}", hex::encode(&witness)),
            "stateHash": "0x01e21db6e3aca4c1e8d189d2ab8e5b8b2f57fc0f57bb1fe4e86c1fe68a2e4d34",
            "step": 10,
            "exited": true,
        }))
        .unwrap(),
    )
    .unwrap();

    let (proof, step, exited) = convert_state_to_proof(&path).unwrap();
    assert_eq!(
        proof,
        ProofData {
            claim_value: H256(hex!(
                "01e21db6e3aca4c1e8d189d2ab8e5b8b2f57fc0f57bb1fe4e86c1fe68a2e4d34"
            )),
            state_data: witness,
            proof_data: Vec::new(),
            oracle_key: None,
            oracle_value: None,
            oracle_offset: 0,
        }
    );
    assert_eq!(step, 10);
    assert!(exited);

    let json = serde_json::to_value(&proof).unwrap();
    assert!(json.get("oracle-key").is_none());
    assert!(json.get("oracle-value").is_none());
    assert_eq!(json["proof-data"], "0x");
    assert_eq!(json["oracle-offset"], 0);
}

#[test]
fn converts_encoded_vm_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut vm = VmState {
        pc: 0x8000_0000,
        step: 5,
        ..Default::default()
    };
    vm.memory.set_u64(0x8000_0000, 0x0000_0073).unwrap();

    let path = dir.path().join("state.json.gz");
    write_state(&path, &vm.to_state_witness()).unwrap();

    let (proof, step, exited) = convert_state_to_proof(&path).unwrap();
    assert_eq!(proof.claim_value, vm.state_hash());
    assert_eq!(proof.claim_value[0], 3);
    assert_eq!(proof.state_data, vm.encode_witness().as_ref());
    assert_eq!(step, 5);
    assert!(!exited);

    let proof_path = dir.path().join("proof.json");
    std::fs::write(&proof_path, serde_json::to_vec(&proof).unwrap()).unwrap();
    assert_eq!(read_proof(&proof_path).unwrap(), proof);
}

#[test]
fn failed_conversion_names_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(
        &path,
        serde_json::to_vec(&json!({
            "witness": "0x00",
            "stateHash": format!("0x03{}", "00".repeat(31)),
        }))
        .unwrap(),
    )
    .unwrap();

    let err = convert_state_to_proof(&path).unwrap_err();
    assert!(matches!(err, StateError::Invalid { .. }));
    assert_eq!(err.path(), path);
    assert_eq!(
        err.to_string(),
        format!(
            "invalid asterisc VM state ({}): invalid witness: Length must be 362 but got 1",
            path.display()
        )
    );
}

#[test]
fn reads_compressed_proof() {
    let dir = tempfile::tempdir().unwrap();
    let proof = ProofData {
        claim_value: H256::repeat_byte(0x02),
        state_data: vec![1, 2, 3],
        proof_data: vec![4; 64],
        oracle_key: Some(vec![0x02; 32]),
        oracle_value: Some(vec![0, 0, 0, 0, 0, 0, 0, 1, 0xff]),
        oracle_offset: 8,
    };
    let path = dir.path().join("proof.json.gz");
    let file = std::fs::File::create(&path).unwrap();
    let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::best());
    serde_json::to_writer(&mut encoder, &proof).unwrap();
    encoder.finish().unwrap();

    assert_eq!(read_proof(&path).unwrap(), proof);
}
