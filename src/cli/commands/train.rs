//! Train command implementation

use serde::Deserialize;

use crate::cli::TrainArgs;
use crate::config::{NormalizerSpec, TrainerSpec};
use crate::logging::{log, LogLevel};
use crate::trainer::{train_with_context, TrainerContext};

/// YAML training file: a trainer section plus an optional normalizer
/// section, both falling back to defaults field by field.
#[derive(Debug, Deserialize)]
struct TrainFile {
    #[serde(default)]
    trainer: TrainerSpec,
    #[serde(default)]
    normalizer: NormalizerSpec,
}

pub fn run_train(args: TrainArgs, level: LogLevel) -> Result<(), String> {
    log(
        level,
        LogLevel::Normal,
        &format!("Trocear: training from {}", args.spec.display()),
    );

    let yaml = std::fs::read_to_string(&args.spec)
        .map_err(|e| format!("cannot read {}: {e}", args.spec.display()))?;
    let mut file: TrainFile =
        serde_yaml::from_str(&yaml).map_err(|e| format!("Spec error: {e}"))?;

    apply_overrides(&mut file.trainer, &args);
    file.trainer
        .validate()
        .map_err(|e| format!("Spec error: {e}"))?;

    if args.dry_run {
        log(level, LogLevel::Normal, "Dry run - spec validated successfully");
        log(
            level,
            LogLevel::Verbose,
            &format!("  Model type: {:?}", file.trainer.model_type),
        );
        log(
            level,
            LogLevel::Verbose,
            &format!("  Vocab size: {}", file.trainer.vocab_size),
        );
        log(
            level,
            LogLevel::Verbose,
            &format!("  Inputs: {}", file.trainer.input.len()),
        );
        return Ok(());
    }

    let mut ctx = TrainerContext::new(file.trainer.seed, level);
    train_with_context(&file.trainer, &file.normalizer, &mut ctx)
        .map_err(|e| format!("Training error: {e}"))?;

    log(level, LogLevel::Normal, "Training complete!");
    Ok(())
}

fn apply_overrides(spec: &mut TrainerSpec, args: &TrainArgs) {
    if !args.input.is_empty() {
        spec.input = args.input.clone();
    }
    if let Some(prefix) = &args.model_prefix {
        spec.model_prefix = Some(prefix.clone());
    }
    if let Some(vocab_size) = args.vocab_size {
        spec.vocab_size = vocab_size;
    }
    if let Some(seed) = args.seed {
        spec.seed = seed;
    }
}
