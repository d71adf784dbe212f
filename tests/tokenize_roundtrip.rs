//! Encode/decode behavior on trained models.

use trocear::logging::LogLevel;
use trocear::trainer::{self, TrainerContext};
use trocear::{NormalizerSpec, Tokenizer, TrainerSpec};

fn train_tokenizer(spec: TrainerSpec, lines: &[&str]) -> Tokenizer {
    let mut ctx = TrainerContext::new(spec.seed, LogLevel::Quiet);
    let model = trainer::train_from_sentences(
        &spec,
        &NormalizerSpec::default(),
        lines.iter().map(|s| s.to_string()).collect(),
        &mut ctx,
    )
    .unwrap();
    Tokenizer::from_model(model).unwrap()
}

fn unigram_tokenizer() -> Tokenizer {
    let lines = [
        "I have a pen",
        "I have an apple",
        "apple pen",
        "I have a pen",
        "I have an apple",
        "apple pen",
        "pen apple pen",
    ];
    train_tokenizer(
        TrainerSpec::unigram()
            .with_vocab_size(14)
            .with_character_coverage(1.0)
            .with_num_threads(2),
        &lines,
    )
}

#[test]
fn test_encode_concatenation_restores_normalized_input() {
    let tokenizer = unigram_tokenizer();
    for input in ["I have a pen", "apple", "pen pen pen", "a"] {
        let normalized = tokenizer.normalize(input).unwrap();
        let pieces = tokenizer.encode_pieces(input).unwrap();
        assert_eq!(pieces.concat(), normalized, "input {input:?}");
    }
}

#[test]
fn test_decode_inverts_encode_up_to_normalization() {
    let tokenizer = unigram_tokenizer();
    for input in ["I have a pen", "apple pen", " apple  pen "] {
        let pieces = tokenizer.encode_pieces(input).unwrap();
        let decoded = tokenizer.decode_pieces(&pieces).unwrap();
        assert_eq!(decoded, input.split_whitespace().collect::<Vec<_>>().join(" "));
    }
}

#[test]
fn test_decode_ids_matches_decode_pieces() {
    let tokenizer = unigram_tokenizer();
    let input = "I have an apple";
    let ids = tokenizer.encode_ids(input).unwrap();
    let pieces = tokenizer.encode_pieces(input).unwrap();
    assert_eq!(
        tokenizer.decode_ids(&ids).unwrap(),
        tokenizer.decode_pieces(&pieces).unwrap()
    );
}

#[test]
fn test_unknown_chars_roundtrip_as_one_span() {
    let tokenizer = unigram_tokenizer();
    // Z never appears in the corpus and is not a required char
    let spans = tokenizer.encode("penZZpen").unwrap();
    let unknown: Vec<_> = spans.iter().filter(|s| tokenizer.is_unknown(s.id)).collect();
    assert_eq!(unknown.len(), 1);
    assert_eq!(unknown[0].piece, "ZZ");
}

#[test]
fn test_viterbi_beats_all_nbest_alternatives() {
    let tokenizer = unigram_tokenizer();
    let nbests = tokenizer.nbest_encode("apple pen", 10).unwrap();
    assert!(!nbests.is_empty());
    let best_score = nbests[0].1;
    for (pieces, score) in &nbests {
        assert!(best_score >= *score);
        assert!(!pieces.is_empty());
    }
    // distinct segmentations
    for i in 0..nbests.len() {
        for j in i + 1..nbests.len() {
            let a: Vec<&str> = nbests[i].0.iter().map(|s| s.piece.as_str()).collect();
            let b: Vec<&str> = nbests[j].0.iter().map(|s| s.piece.as_str()).collect();
            assert_ne!(a, b);
        }
    }
}

#[test]
fn test_sample_encode_only_emits_valid_segmentations() {
    let tokenizer = unigram_tokenizer();
    let normalized = tokenizer.normalize("apple pen").unwrap();
    for _ in 0..30 {
        let spans = tokenizer.sample_encode("apple pen", -1, 0.5).unwrap();
        let joined: String = spans.iter().map(|s| s.piece.as_str()).collect();
        assert_eq!(joined, normalized);
    }
}

#[test]
fn test_surface_spans_cover_original_input() {
    let tokenizer = unigram_tokenizer();
    let input = "I have a pen";
    let spans = tokenizer.encode(input).unwrap();
    for span in &spans {
        assert_eq!(&input[span.begin..span.end], span.surface);
    }
    for pair in spans.windows(2) {
        assert!(pair[0].end <= pair[1].begin);
    }
}

#[test]
fn test_bpe_tokenizer_roundtrip() {
    let tokenizer = train_tokenizer(
        TrainerSpec::bpe()
            .with_vocab_size(12)
            .with_character_coverage(1.0),
        &["abab abab ab", "ba baab abab", "aabb ab"],
    );
    for input in ["abab", "ab ba", "aabb abab"] {
        let normalized = tokenizer.normalize(input).unwrap();
        let pieces = tokenizer.encode_pieces(input).unwrap();
        assert_eq!(pieces.concat(), normalized);
        assert_eq!(tokenizer.decode_pieces(&pieces).unwrap(), input);
    }
}

#[test]
fn test_extra_options_through_trained_model() {
    let mut tokenizer = unigram_tokenizer();
    tokenizer.set_encode_extra_options("bos:eos").unwrap();
    let ids = tokenizer.encode_ids("apple").unwrap();
    assert_eq!(ids.first().copied(), Some(tokenizer.bos_id() as u32));
    assert_eq!(ids.last().copied(), Some(tokenizer.eos_id() as u32));

    tokenizer.set_decode_extra_options("reverse").unwrap();
    let pieces = tokenizer.encode_pieces("apple").unwrap();
    // pieces handed over reversed; decoding reverses them back and the
    // control pieces vanish
    let decoded = tokenizer
        .decode_pieces(&pieces.iter().rev().cloned().collect::<Vec<_>>())
        .unwrap();
    assert_eq!(decoded, "apple");
}

#[test]
fn test_vocabulary_restriction_on_trained_model() {
    let mut tokenizer = unigram_tokenizer();
    let baseline = tokenizer.encode_pieces("apple").unwrap();

    // restricting to nothing forces single-character segmentation
    tokenizer.set_vocabulary(&[]).unwrap();
    let restricted = tokenizer.encode_pieces("apple").unwrap();
    assert!(restricted.len() >= baseline.len());
    for piece in &restricted {
        assert!(piece.chars().count() == 1, "piece {piece:?} is not a char");
    }

    tokenizer.reset_vocabulary().unwrap();
    assert_eq!(tokenizer.encode_pieces("apple").unwrap(), baseline);
}
