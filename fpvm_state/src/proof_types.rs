//! The proof artefact exchanged with the external proof generator.

use std::path::Path;

use ethereum_types::H256;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{error::StateResult, fs::read_json, state::load_state};

/// A claim about a VM state together with the data needed to check one step
/// from it.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProofData {
    /// The state hash being claimed.
    #[serde(rename = "post")]
    pub claim_value: H256,
    /// The encoded witness of the state.
    #[serde(rename = "state-data", with = "crate::hex")]
    pub state_data: Vec<u8>,
    /// Memory proofs accessed by the step.
    #[serde(rename = "proof-data", with = "crate::hex")]
    pub proof_data: Vec<u8>,
    /// Key of the preimage read by the step, if any.
    #[serde(
        rename = "oracle-key",
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::hex::option"
    )]
    pub oracle_key: Option<Vec<u8>>,
    /// Value of the preimage read by the step, if any.
    #[serde(
        rename = "oracle-value",
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::hex::option"
    )]
    pub oracle_value: Option<Vec<u8>>,
    /// Offset into the preimage read by the step.
    #[serde(rename = "oracle-offset", default)]
    pub oracle_offset: u32,
}

/// Loads a proof artefact, gzip-framed or not.
pub fn read_proof(path: &Path) -> StateResult<ProofData> {
    read_json(path)
}

/// Loads a witness-only state file and turns it into a [`ProofData`]
/// claiming its state hash, with no step proof attached. The step count and
/// exited flag of the state are returned alongside.
pub fn convert_state_to_proof(path: &Path) -> StateResult<(ProofData, u64, bool)> {
    let state = load_state(path)?;
    let proof = ProofData {
        claim_value: state.state_hash(),
        state_data: state.witness().as_ref().to_vec(),
        proof_data: Vec::new(),
        oracle_key: None,
        oracle_value: None,
        oracle_offset: 0,
    };
    info!(
        path = %path.display(),
        claim = ?proof.claim_value,
        status = %state.status(),
        step = state.step(),
        "converted state to proof"
    );
    Ok((proof, state.step(), state.exited()))
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn json_names() {
        let proof = ProofData {
            claim_value: H256::repeat_byte(0x01),
            state_data: vec![0xab, 0xcd],
            proof_data: Vec::new(),
            oracle_key: Some(hex!("02aa").to_vec()),
            oracle_value: None,
            oracle_offset: 4,
        };
        let json = serde_json::to_value(&proof).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "post": format!("0x{}", "01".repeat(32)),
                "state-data": "0xabcd",
                "proof-data": "0x",
                "oracle-key": "0x02aa",
                "oracle-offset": 4,
            })
        );
        assert_eq!(serde_json::from_value::<ProofData>(json).unwrap(), proof);
    }

    #[test]
    fn optional_fields_default() {
        let json = serde_json::json!({
            "post": format!("0x{}", "bb".repeat(32)),
            "state-data": "0x00",
            "proof-data": "",
            "oracle-value": null,
        });
        let proof: ProofData = serde_json::from_value(json).unwrap();
        assert_eq!(proof.claim_value, H256::repeat_byte(0xbb));
        assert_eq!(proof.state_data, vec![0]);
        assert!(proof.proof_data.is_empty());
        assert_eq!(proof.oracle_key, None);
        assert_eq!(proof.oracle_value, None);
        assert_eq!(proof.oracle_offset, 0);
    }
}
