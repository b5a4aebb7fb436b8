use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueHint};

/// Inspect and convert fault-proof VM state files
#[derive(Parser)]
#[command(version, propagate_version = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Prints the state hash, status and step of a witness-form state file.
    Hash {
        /// The state file, optionally gzip-compressed.
        #[arg(value_hint = ValueHint::FilePath)]
        state: PathBuf,
    },
    /// Prints the memory root and witness of a register-ful state file.
    Root {
        /// The state file, optionally gzip-compressed.
        #[arg(value_hint = ValueHint::FilePath)]
        state: PathBuf,
    },
    /// Converts a witness-form state file into a proof artefact, written to
    /// stdout as JSON.
    Proof {
        /// The state file, optionally gzip-compressed.
        #[arg(value_hint = ValueHint::FilePath)]
        state: PathBuf,
    },
    /// Re-encodes a register-ful state file into its witness form.
    Convert {
        /// The register-ful state file, optionally gzip-compressed.
        #[arg(value_hint = ValueHint::FilePath)]
        input: PathBuf,
        /// Where to write the witness-form state. Compressed if the name ends
        /// in `.gz`.
        #[arg(value_hint = ValueHint::FilePath)]
        output: PathBuf,
    },
}
