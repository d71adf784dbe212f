//! Decode command implementation

use crate::cli::commands::input_lines;
use crate::cli::{DecodeArgs, EncodeFormat};
use crate::logging::{log, LogLevel};
use crate::processor::Tokenizer;

pub fn run_decode(args: DecodeArgs, level: LogLevel) -> Result<(), String> {
    let mut tokenizer =
        Tokenizer::from_file(&args.model).map_err(|e| format!("Model error: {e}"))?;
    log(
        level,
        LogLevel::Verbose,
        &format!("Loaded {} pieces", tokenizer.vocab_size()),
    );

    if let Some(options) = &args.extra_options {
        tokenizer
            .set_decode_extra_options(options)
            .map_err(|e| format!("Option error: {e}"))?;
    }

    for line in input_lines(args.input.as_deref())? {
        let line = line.map_err(|e| format!("read error: {e}"))?;
        let text = match args.input_format {
            EncodeFormat::Piece => {
                let pieces: Vec<String> =
                    line.split_whitespace().map(str::to_string).collect();
                tokenizer
                    .decode_pieces(&pieces)
                    .map_err(|e| format!("Decode error: {e}"))?
            }
            EncodeFormat::Id => {
                let mut ids = Vec::new();
                for field in line.split_whitespace() {
                    ids.push(
                        field
                            .parse::<u32>()
                            .map_err(|_| format!("bad id `{field}`"))?,
                    );
                }
                tokenizer
                    .decode_ids(&ids)
                    .map_err(|e| format!("Decode error: {e}"))?
            }
        };
        println!("{text}");
    }
    Ok(())
}
