//! Fault-proof VM state records and the artefacts derived from them.
//!
//! A VM state is committed to by its 362-byte [`Witness`]: the memory root
//! followed by every scalar register of the VM. The [state
//! hash](witness::state_hash_from_witness) is the Keccak digest of the
//! witness with its first byte replaced by the [`VmStatus`].
//!
//! State files come in two forms, both JSON and optionally gzip-framed:
//! - the register-ful [`VmState`], which carries the full [paged
//!   memory](fpvm_memory::Memory);
//! - the witness-only [`StateWitness`], which only carries the encoded
//!   witness and its state hash.
//!
//! The latter is what [`convert_state_to_proof`] turns into a
//! [`ProofData`] artefact.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]
#![deny(missing_docs)]

pub mod error;
pub mod fs;
pub mod proof_types;
pub mod state;
pub mod status;
pub mod tracing;
pub mod witness;

pub use error::{StateError, StateResult, StateValidationError};
pub use proof_types::{convert_state_to_proof, read_proof, ProofData};
pub use state::{load_state, load_vm_state, StateWitness, VmState};
pub use status::VmStatus;
pub use witness::{state_hash_from_witness, Witness, WitnessError, WitnessFields};

/// Like `#[serde(with = "::hex")]`, but tolerates and emits leading `0x`
/// prefixes
mod hex {
    use serde::{de::Error as _, Deserialize as _, Deserializer, Serializer};

    pub fn serialize<S: Serializer, T>(data: T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: hex::ToHex,
    {
        let s = data.encode_hex::<String>();
        serializer.serialize_str(&format!("0x{}", s))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, T>(deserializer: D) -> Result<T, D::Error>
    where
        T: hex::FromHex,
        T::Error: std::fmt::Display,
    {
        let s = String::deserialize(deserializer)?;
        match s.strip_prefix("0x") {
            Some(rest) => T::from_hex(rest),
            None => T::from_hex(&*s),
        }
        .map_err(D::Error::custom)
    }

    /// The same encoding for optional fields. Absent and `null` values both
    /// decode to `None`.
    pub mod option {
        use serde::{Deserialize as _, Deserializer, Serializer};

        pub fn serialize<S: Serializer, T>(data: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
        where
            T: AsRef<[u8]>,
        {
            match data {
                Some(data) => super::serialize(data.as_ref(), serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>, T>(
            deserializer: D,
        ) -> Result<Option<T>, D::Error>
        where
            T: hex::FromHex,
            T::Error: std::fmt::Display,
        {
            #[derive(serde::Deserialize)]
            struct Hex<T>(#[serde(deserialize_with = "crate::hex::deserialize")] T)
            where
                T: hex::FromHex,
                T::Error: std::fmt::Display;

            Ok(Option::<Hex<T>>::deserialize(deserializer)?.map(|Hex(data)| data))
        }
    }
}
