//! CLI module for trocear
//!
//! This module contains the command definitions and handlers for the
//! `trocear` binary: train, encode, decode, normalize, and export-vocab.

mod commands;

pub use commands::run_command;
pub use crate::logging::LogLevel;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Trocear: subword tokenizer toolkit
#[derive(Parser, Debug, Clone)]
#[command(name = "trocear")]
#[command(version)]
#[command(about = "Subword tokenizer training and inference: unigram, BPE, word and char models")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Train a tokenizer from a YAML spec
    Train(TrainArgs),

    /// Encode text into pieces or ids
    Encode(EncodeArgs),

    /// Decode pieces or ids back into text
    Decode(DecodeArgs),

    /// Normalize text without segmenting it
    Normalize(NormalizeArgs),

    /// Export the vocabulary as a piece/score TSV
    ExportVocab(ExportVocabArgs),
}

/// Arguments for the train command
#[derive(Parser, Debug, Clone)]
pub struct TrainArgs {
    /// Path to the YAML training spec
    #[arg(value_name = "SPEC")]
    pub spec: PathBuf,

    /// Override the input corpus files
    #[arg(long, value_name = "FILE")]
    pub input: Vec<PathBuf>,

    /// Override the output model prefix
    #[arg(long)]
    pub model_prefix: Option<PathBuf>,

    /// Override the vocabulary size
    #[arg(long)]
    pub vocab_size: Option<usize>,

    /// Override the random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Validate the spec without training
    #[arg(long)]
    pub dry_run: bool,
}

/// Output format for encode
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeFormat {
    /// Piece strings joined by spaces
    Piece,
    /// Ids joined by spaces
    Id,
}

/// Arguments for the encode command
#[derive(Parser, Debug, Clone)]
pub struct EncodeArgs {
    /// Path to the trained model
    #[arg(long, value_name = "MODEL")]
    pub model: PathBuf,

    /// Input text file; stdin when omitted
    #[arg(value_name = "INPUT")]
    pub input: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "piece")]
    pub output_format: EncodeFormat,

    /// Colon-separated options from {reverse, bos, eos}
    #[arg(long)]
    pub extra_options: Option<String>,

    /// Restrict segmentation to a piece<TAB>freq vocabulary file
    #[arg(long)]
    pub vocabulary: Option<PathBuf>,

    /// Frequency threshold applied with --vocabulary
    #[arg(long, default_value = "0")]
    pub vocabulary_threshold: u64,
}

/// Arguments for the decode command
#[derive(Parser, Debug, Clone)]
pub struct DecodeArgs {
    /// Path to the trained model
    #[arg(long, value_name = "MODEL")]
    pub model: PathBuf,

    /// Input file of space-joined pieces or ids; stdin when omitted
    #[arg(value_name = "INPUT")]
    pub input: Option<PathBuf>,

    /// Interpret the input as ids instead of pieces
    #[arg(long, value_enum, default_value = "piece")]
    pub input_format: EncodeFormat,

    /// Colon-separated options from {reverse, bos, eos}
    #[arg(long)]
    pub extra_options: Option<String>,
}

/// Arguments for the normalize command
#[derive(Parser, Debug, Clone)]
pub struct NormalizeArgs {
    /// Take the normalizer from a trained model
    #[arg(long, value_name = "MODEL")]
    pub model: Option<PathBuf>,

    /// Builtin rule name used when no model is given
    #[arg(long, default_value = "nmt_nfkc")]
    pub name: String,

    /// Input text file; stdin when omitted
    #[arg(value_name = "INPUT")]
    pub input: Option<PathBuf>,
}

/// Arguments for the export-vocab command
#[derive(Parser, Debug, Clone)]
pub struct ExportVocabArgs {
    /// Path to the trained model
    #[arg(long, value_name = "MODEL")]
    pub model: PathBuf,

    /// Output file; stdout when omitted
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_train() {
        let cli = Cli::try_parse_from(["trocear", "train", "spec.yaml", "--vocab-size", "100"])
            .unwrap();
        match cli.command {
            Command::Train(args) => {
                assert_eq!(args.spec, PathBuf::from("spec.yaml"));
                assert_eq!(args.vocab_size, Some(100));
                assert!(!args.dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_parses_encode_flags() {
        let cli = Cli::try_parse_from([
            "trocear",
            "encode",
            "--model",
            "m.model",
            "--output-format",
            "id",
            "--extra-options",
            "bos:eos",
            "input.txt",
        ])
        .unwrap();
        match cli.command {
            Command::Encode(args) => {
                assert_eq!(args.output_format, EncodeFormat::Id);
                assert_eq!(args.extra_options.as_deref(), Some("bos:eos"));
                assert_eq!(args.input, Some(PathBuf::from("input.txt")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_global_flags() {
        let cli =
            Cli::try_parse_from(["trocear", "--quiet", "export-vocab", "--model", "m.model"])
                .unwrap();
        assert!(cli.quiet);
        assert!(!cli.verbose);
    }
}
