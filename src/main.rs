//! Trocear CLI
//!
//! Command-line front end for the trocear tokenizer library.
//!
//! # Usage
//!
//! ```bash
//! # Train from a YAML spec
//! trocear train spec.yaml
//!
//! # Train with overrides
//! trocear train spec.yaml --vocab-size 8000 --model-prefix out/tok
//!
//! # Encode text
//! trocear encode --model tok.model input.txt
//!
//! # Decode ids
//! trocear decode --model tok.model --input-format id ids.txt
//!
//! # Normalize text
//! trocear normalize --model tok.model input.txt
//!
//! # Export the vocabulary
//! trocear export-vocab --model tok.model --output tok.tsv
//! ```

use clap::Parser;
use std::process::ExitCode;
use trocear::cli::{run_command, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
