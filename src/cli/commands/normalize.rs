//! Normalize command implementation

use crate::cli::commands::input_lines;
use crate::cli::NormalizeArgs;
use crate::config::NormalizerSpec;
use crate::logging::{log, LogLevel};
use crate::model::TokenizerModel;
use crate::normalizer::Normalizer;

pub fn run_normalize(args: NormalizeArgs, level: LogLevel) -> Result<(), String> {
    let normalizer = match &args.model {
        Some(model_path) => {
            let model =
                TokenizerModel::load(model_path).map_err(|e| format!("Model error: {e}"))?;
            log(
                level,
                LogLevel::Verbose,
                &format!("Using normalizer from {}", model_path.display()),
            );
            Normalizer::with_trainer_spec(&model.normalizer, &model.trainer)
                .map_err(|e| format!("Normalizer error: {e}"))?
        }
        None => {
            let spec = NormalizerSpec::default().with_name(args.name.as_str());
            Normalizer::new(&spec).map_err(|e| format!("Normalizer error: {e}"))?
        }
    };

    for line in input_lines(args.input.as_deref())? {
        let line = line.map_err(|e| format!("read error: {e}"))?;
        let normalized = normalizer
            .normalize_string(&line)
            .map_err(|e| format!("Normalize error: {e}"))?;
        println!("{normalized}");
    }
    Ok(())
}
