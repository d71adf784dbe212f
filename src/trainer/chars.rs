//! Character trainer.
//!
//! The vocabulary is the required-character set itself, scored by relative
//! log frequency. The vocabulary may come out smaller than `vocab_size`
//! when the corpus has fewer characters than requested.

use crate::error::{Error, Result};
use crate::trainer::{Trainer, TrainerContext};

pub(crate) fn train(t: &mut Trainer, ctx: &mut TrainerContext) -> Result<Vec<(String, f32)>> {
    let total: f64 = t.required_chars.iter().map(|&(_, freq)| freq as f64).sum();
    if total == 0.0 {
        return Err(Error::internal("no characters found in the corpus"));
    }
    let logsum = total.ln();
    let reserved = t.reserved_piece_names();
    let slots = t.spec.vocab_size.saturating_sub(t.meta_pieces.len());

    let mut pieces: Vec<(String, f32)> = Vec::new();
    for &(c, freq) in &t.required_chars {
        if pieces.len() == slots {
            break;
        }
        let piece = c.to_string();
        if reserved.contains(&piece) {
            continue;
        }
        pieces.push((piece, ((freq as f64).ln() - logsum) as f32));
    }
    ctx.log(&format!("Character vocabulary: {} pieces", pieces.len()));
    Ok(pieces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NormalizerSpec, TrainerSpec};
    use crate::logging::LogLevel;
    use crate::unicode::SPACE_SYMBOL;

    fn run(lines: &[&str], vocab_size: usize) -> Vec<String> {
        let spec = TrainerSpec::char().with_vocab_size(vocab_size);
        let mut ctx = TrainerContext::new(spec.seed, LogLevel::Quiet);
        let mut t = Trainer::new(spec, NormalizerSpec::default()).unwrap();
        t.load_sentences(lines.iter().map(|s| s.to_string()).collect(), &mut ctx)
            .unwrap();
        train(&mut t, &mut ctx)
            .unwrap()
            .into_iter()
            .map(|(p, _)| p)
            .collect()
    }

    #[test]
    fn test_char_vocab_sorted_by_frequency() {
        let pieces = run(&["I have a pen", "I have an apple", "apple pen"], 100);
        assert_eq!(
            pieces.join(" "),
            format!("{SPACE_SYMBOL} a e p n I h l v")
        );
    }

    #[test]
    fn test_char_vocab_truncates_to_size() {
        let pieces = run(&["I have a pen", "I have an apple", "apple pen"], 5);
        assert_eq!(pieces.join(" "), format!("{SPACE_SYMBOL} a"));
    }

    #[test]
    fn test_char_scores_are_log_probs() {
        let spec = TrainerSpec::char().with_vocab_size(50);
        let mut ctx = TrainerContext::new(spec.seed, LogLevel::Quiet);
        let mut t = Trainer::new(spec, NormalizerSpec::default()).unwrap();
        t.load_sentences(vec!["aab".to_string()], &mut ctx).unwrap();
        let pieces = train(&mut t, &mut ctx).unwrap();
        let total: f64 = pieces.iter().map(|&(_, s)| f64::from(s).exp()).sum();
        assert!((total - 1.0).abs() < 1e-6);
    }
}
