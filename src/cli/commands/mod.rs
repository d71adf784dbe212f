//! CLI command handlers

mod decode;
mod encode;
mod export_vocab;
mod normalize;
mod train;

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::cli::{Cli, Command};
use crate::logging::LogLevel;

/// Dispatches a parsed command line to its handler.
pub fn run_command(cli: Cli) -> Result<(), String> {
    let level = if cli.quiet {
        LogLevel::Quiet
    } else if cli.verbose {
        LogLevel::Verbose
    } else {
        LogLevel::Normal
    };

    match cli.command {
        Command::Train(args) => train::run_train(args, level),
        Command::Encode(args) => encode::run_encode(args, level),
        Command::Decode(args) => decode::run_decode(args, level),
        Command::Normalize(args) => normalize::run_normalize(args, level),
        Command::ExportVocab(args) => export_vocab::run_export_vocab(args, level),
    }
}

/// Line reader over a file, or stdin when no path is given.
pub(crate) fn input_lines(path: Option<&Path>) -> Result<Box<dyn Iterator<Item = io::Result<String>>>, String> {
    match path {
        Some(path) => {
            let file =
                File::open(path).map_err(|e| format!("cannot open {}: {e}", path.display()))?;
            Ok(Box::new(BufReader::new(file).lines()))
        }
        None => Ok(Box::new(io::stdin().lock().lines())),
    }
}
