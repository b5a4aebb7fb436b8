use std::io::{self, Write as _};

use anyhow::{Context, Result};
use clap::Parser;
use fpvm_state::{convert_state_to_proof, load_state, load_vm_state, state::write_state};
use tracing::info;

use self::fpvm::*;
mod fpvm {
    pub mod cli;
}

fn main() -> Result<()> {
    fpvm_state::tracing::init();

    let args = cli::Cli::parse();
    let mut stdout = io::stdout().lock();

    match args.command {
        cli::Command::Hash { state } => {
            let state = load_state(&state)?;
            writeln!(stdout, "state hash: {:?}", state.state_hash())?;
            writeln!(stdout, "status: {}", state.status())?;
            writeln!(stdout, "step: {}", state.step())?;
        }
        cli::Command::Root { state } => {
            let mut state = load_vm_state(&state)?;
            writeln!(stdout, "memory root: {:?}", state.memory.merkle_root())?;
            writeln!(stdout, "witness: 0x{}", hex::encode(state.encode_witness()))?;
        }
        cli::Command::Proof { state } => {
            let (proof, step, exited) = convert_state_to_proof(&state)?;
            info!(step, exited, "proof artefact ready");
            serde_json::to_writer_pretty(&mut stdout, &proof)
                .context("Failed to write proof to stdout")?;
            writeln!(stdout)?;
        }
        cli::Command::Convert { input, output } => {
            let mut state = load_vm_state(&input)?;
            let witness = state.to_state_witness();
            write_state(&output, &witness)?;
            info!(
                output = %output.display(),
                state_hash = ?witness.state_hash(),
                "wrote witness-form state"
            );
        }
    }

    Ok(())
}
