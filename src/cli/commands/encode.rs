//! Encode command implementation

use crate::cli::commands::input_lines;
use crate::cli::{EncodeArgs, EncodeFormat};
use crate::logging::{log, LogLevel};
use crate::processor::Tokenizer;

pub fn run_encode(args: EncodeArgs, level: LogLevel) -> Result<(), String> {
    let mut tokenizer =
        Tokenizer::from_file(&args.model).map_err(|e| format!("Model error: {e}"))?;
    log(
        level,
        LogLevel::Verbose,
        &format!("Loaded {} pieces", tokenizer.vocab_size()),
    );

    if let Some(options) = &args.extra_options {
        tokenizer
            .set_encode_extra_options(options)
            .map_err(|e| format!("Option error: {e}"))?;
    }
    if let Some(vocabulary) = &args.vocabulary {
        tokenizer
            .load_vocabulary(vocabulary, args.vocabulary_threshold)
            .map_err(|e| format!("Vocabulary error: {e}"))?;
    }

    for line in input_lines(args.input.as_deref())? {
        let line = line.map_err(|e| format!("read error: {e}"))?;
        let output = match args.output_format {
            EncodeFormat::Piece => tokenizer
                .encode_pieces(&line)
                .map_err(|e| format!("Encode error: {e}"))?
                .join(" "),
            EncodeFormat::Id => tokenizer
                .encode_ids(&line)
                .map_err(|e| format!("Encode error: {e}"))?
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(" "),
        };
        println!("{output}");
    }
    Ok(())
}
