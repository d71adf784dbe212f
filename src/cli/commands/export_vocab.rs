//! Export-vocab command implementation

use std::fs::File;
use std::io::Write;

use crate::cli::ExportVocabArgs;
use crate::logging::{log, LogLevel};
use crate::model::TokenizerModel;

pub fn run_export_vocab(args: ExportVocabArgs, level: LogLevel) -> Result<(), String> {
    let model = TokenizerModel::load(&args.model).map_err(|e| format!("Model error: {e}"))?;
    log(
        level,
        LogLevel::Verbose,
        &format!("Exporting {} pieces", model.pieces.len()),
    );

    match &args.output {
        Some(path) => {
            let mut file =
                File::create(path).map_err(|e| format!("cannot create {}: {e}", path.display()))?;
            for piece in &model.pieces {
                writeln!(file, "{}\t{}", piece.piece, piece.score)
                    .map_err(|e| format!("write error: {e}"))?;
            }
        }
        None => {
            for piece in &model.pieces {
                println!("{}\t{}", piece.piece, piece.score);
            }
        }
    }
    Ok(())
}
