//! Word trainer.
//!
//! Counts whitespace-delimited tokens and keeps the most frequent ones,
//! scored by relative log frequency.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::model::split_into_words;
use crate::trainer::{sorted_by_value_desc, Trainer, TrainerContext};

pub(crate) fn train(t: &mut Trainer, ctx: &mut TrainerContext) -> Result<Vec<(String, f32)>> {
    let mut freq: HashMap<String, u64> = HashMap::new();
    for (sentence, count) in &t.sentences {
        for word in split_into_words(sentence, t.spec.treat_whitespace_as_suffix) {
            *freq.entry(word.to_string()).or_insert(0) += count;
        }
    }
    if freq.is_empty() {
        return Err(Error::internal("no words found in the corpus"));
    }
    let total: f64 = freq.values().map(|&v| v as f64).sum();
    let logsum = total.ln();

    let reserved = t.reserved_piece_names();
    let slots = t.spec.vocab_size.saturating_sub(t.meta_pieces.len());
    let mut pieces: Vec<(String, f32)> = Vec::new();
    for (word, count) in sorted_by_value_desc(freq) {
        if pieces.len() == slots {
            break;
        }
        if reserved.contains(&word) {
            continue;
        }
        let chars: Vec<char> = word.chars().collect();
        if !t.is_valid_piece(&chars) {
            continue;
        }
        pieces.push((word, ((count as f64).ln() - logsum) as f32));
    }
    if pieces.is_empty() {
        return Err(Error::internal("all words were filtered out"));
    }
    ctx.log(&format!("Word vocabulary: {} pieces", pieces.len()));
    Ok(pieces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NormalizerSpec, TrainerSpec};
    use crate::logging::LogLevel;
    use crate::unicode::SPACE_SYMBOL_CHAR;

    fn run(lines: &[&str], vocab_size: usize) -> Vec<(String, f32)> {
        let spec = TrainerSpec::word().with_vocab_size(vocab_size);
        let mut ctx = TrainerContext::new(spec.seed, LogLevel::Quiet);
        let mut t = Trainer::new(spec, NormalizerSpec::default()).unwrap();
        t.load_sentences(lines.iter().map(|s| s.to_string()).collect(), &mut ctx)
            .unwrap();
        train(&mut t, &mut ctx).unwrap()
    }

    #[test]
    fn test_word_vocab_sorted_by_frequency() {
        let ws = SPACE_SYMBOL_CHAR;
        let pieces = run(&["pen pen pen", "apple pen", "apple"], 20);
        assert_eq!(pieces[0].0, format!("{ws}pen"));
        assert_eq!(pieces[1].0, format!("{ws}apple"));
        assert!(pieces[0].1 > pieces[1].1);
    }

    #[test]
    fn test_word_vocab_truncates() {
        let pieces = run(&["a b c d e f"], 5);
        // vocab_size 5 minus three meta pieces
        assert_eq!(pieces.len(), 2);
    }

    #[test]
    fn test_word_skips_overlong_words() {
        let mut spec = TrainerSpec::word().with_vocab_size(20);
        spec.max_piece_length = 8;
        let mut ctx = TrainerContext::new(spec.seed, LogLevel::Quiet);
        let mut t = Trainer::new(spec, NormalizerSpec::default()).unwrap();
        t.load_sentences(
            vec!["tiny enormousword tiny".to_string()],
            &mut ctx,
        )
        .unwrap();
        let pieces = train(&mut t, &mut ctx).unwrap();
        let names: Vec<&str> = pieces.iter().map(|(p, _)| p.as_str()).collect();
        assert!(names.iter().all(|p| !p.contains("enormousword")));
        assert!(names.iter().any(|p| p.contains("tiny")));
    }
}
