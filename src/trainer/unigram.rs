//! Unigram trainer.
//!
//! Starts from a large suffix-array-seeded vocabulary and shrinks it:
//! each outer round runs a few EM sub-iterations (forward-backward
//! expectations, Bayesianified M-step) and then prunes the pieces whose
//! removal costs the corpus likelihood least, until the vocabulary fits
//! within 110% of the target. Finalization guarantees required-character
//! coverage and fills the remaining slots by score.

use std::collections::{BTreeMap, HashMap};
use std::thread;

use crate::error::{Error, Result};
use crate::model::lattice::Lattice;
use crate::model::unigram::PieceIndex;
use crate::trainer::{sorted_by_value_desc, suffix, Trainer, TrainerContext};
use crate::unicode::UNK_CHAR;

const SENTENCE_BOUNDARY: u32 = 0;

/// Soft counts below this are dropped in the M-step.
const EXPECTED_FREQUENCY_THRESHOLD: f64 = 0.5;

/// Keeps required characters from sharing one score during finalization.
const MIN_SCORE_PENALTY_DELTA: f32 = 0.0001;

pub(crate) fn train(t: &mut Trainer, ctx: &mut TrainerContext) -> Result<Vec<(String, f32)>> {
    let mut pieces = make_seed_pieces(t, ctx)?;

    if t.spec.split_by_whitespace {
        t.split_sentences_by_whitespace();
    }
    ctx.log(&format!(
        "Using {} sentences for EM training",
        t.sentences.len()
    ));

    let desired_vocab_size = (t.spec.vocab_size as f64 * 1.1) as usize;

    loop {
        for iter in 0..t.spec.num_sub_iterations {
            let index = build_index(&pieces)?;
            let estep = run_e_step(t, &index, pieces.len())?;
            pieces = run_m_step(&pieces, &estep.expected)?;
            ctx.log(&format!(
                "EM sub_iter={iter} size={} obj={:.6} num_tokens={} num_tokens/piece={:.4}",
                pieces.len(),
                estep.objective,
                estep.num_tokens,
                estep.num_tokens as f64 / pieces.len().max(1) as f64
            ));
        }

        if pieces.len() <= desired_vocab_size {
            break;
        }
        pieces = prune_pieces(t, &pieces, desired_vocab_size)?;
        ctx.check_cancel()?;
    }

    finalize_pieces(t, &pieces)
}

/// Digamma approximation via the recurrence and the asymptotic series.
fn digamma(mut x: f64) -> f64 {
    let mut result = 0.0;
    while x < 7.0 {
        result -= 1.0 / x;
        x += 1.0;
    }
    x -= 0.5;
    let xx = 1.0 / x;
    let xx2 = xx * xx;
    let xx4 = xx2 * xx2;
    result += x.ln() + (1.0 / 24.0) * xx2 - (7.0 / 960.0) * xx4 + (31.0 / 8064.0) * xx4 * xx2
        - (127.0 / 30720.0) * xx4 * xx4;
    result
}

fn to_log_prob(pieces: &mut [(String, f64)]) {
    let sum: f64 = pieces.iter().map(|&(_, s)| s).sum();
    let logsum = sum.ln();
    for (_, score) in pieces.iter_mut() {
        *score = score.ln() - logsum;
    }
}

fn build_index(pieces: &[(String, f32)]) -> Result<PieceIndex> {
    let entries: Vec<(&str, u32, f32, bool, bool)> = pieces
        .iter()
        .enumerate()
        .map(|(i, (piece, score))| (piece.as_str(), i as u32, *score, false, false))
        .collect();
    PieceIndex::build(&entries, pieces.len(), -1)
}

/// Seeds the vocabulary with every observed character plus the highest
/// `freq × len` repeated substrings from the suffix array, log-normalized.
fn make_seed_pieces(t: &Trainer, ctx: &TrainerContext) -> Result<Vec<(String, f32)>> {
    let mut array: Vec<u32> = Vec::new();
    let mut all_chars: BTreeMap<char, u64> = BTreeMap::new();
    for (sentence, freq) in &t.sentences {
        for c in sentence.chars() {
            array.push(c as u32);
            if c != UNK_CHAR {
                *all_chars.entry(c).or_insert(0) += freq;
            }
        }
        array.push(SENTENCE_BOUNDARY);
    }

    ctx.log("Making suffix array...");
    let sa = suffix::suffix_array(&array);
    let lcp = suffix::lcp_array(&array, &sa);

    ctx.log("Extracting frequent sub strings...");
    let mut substrings: Vec<(String, u64)> = Vec::new();
    for interval in suffix::lcp_intervals(&sa, &lcp) {
        if interval.len <= 1 {
            continue;
        }
        let slice = &array[interval.offset..interval.offset + interval.len];
        if slice.contains(&SENTENCE_BOUNDARY) {
            continue;
        }
        let chars: Option<Vec<char>> = slice.iter().map(|&v| char::from_u32(v)).collect();
        let Some(chars) = chars else { continue };
        if !t.is_valid_piece(&chars) {
            continue;
        }
        let piece: String = chars.iter().collect();
        substrings.push((piece, interval.freq as u64 * interval.len as u64));
    }

    let reserved = t.reserved_piece_names();
    let mut seed: Vec<(String, f64)> = Vec::new();
    for (c, freq) in sorted_by_value_desc(all_chars) {
        let piece = c.to_string();
        if reserved.contains(&piece) {
            continue;
        }
        seed.push((piece, freq as f64));
    }
    for (piece, score) in sorted_by_value_desc(substrings) {
        if seed.len() >= t.spec.seed_piece_size {
            break;
        }
        if reserved.contains(&piece) {
            continue;
        }
        seed.push((piece, score as f64));
    }

    to_log_prob(&mut seed);
    ctx.log(&format!("Initialized {} seed pieces", seed.len()));
    Ok(seed.into_iter().map(|(p, s)| (p, s as f32)).collect())
}

struct EStep {
    expected: Vec<f64>,
    objective: f64,
    num_tokens: u64,
}

/// Parallel E-step: per-worker soft counts over a sentence shard, reduced
/// in worker order so results are deterministic.
fn run_e_step(t: &Trainer, index: &PieceIndex, piece_count: usize) -> Result<EStep> {
    let sentences = &t.sentences;
    let num_threads = t.spec.num_threads.clamp(1, sentences.len().max(1));
    let all_sentence_freq: u64 = sentences.iter().map(|&(_, freq)| freq).sum();

    let worker_results: Vec<Result<(Vec<f64>, f64, u64)>> = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(num_threads);
        for n in 0..num_threads {
            handles.push(scope.spawn(move || {
                let mut lattice = Lattice::new();
                let mut expected = vec![0.0f64; piece_count];
                let mut objective = 0.0f64;
                let mut num_tokens = 0u64;
                let mut i = n;
                while i < sentences.len() {
                    let (sentence, freq) = &sentences[i];
                    lattice.set_sentence(sentence);
                    index.populate_nodes(&mut lattice);
                    let z = lattice.populate_marginal(*freq as f64, &mut expected);
                    if z.is_nan() {
                        return Err(Error::internal(
                            "likelihood is NAN. Input sentence may be too long",
                        ));
                    }
                    num_tokens += lattice.viterbi()?.len() as u64;
                    objective -= z / all_sentence_freq as f64;
                    i += num_threads;
                }
                Ok((expected, objective, num_tokens))
            }));
        }
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(Error::internal("E-step worker panicked")))
            })
            .collect()
    });

    let mut expected = vec![0.0f64; piece_count];
    let mut objective = 0.0;
    let mut num_tokens = 0;
    for result in worker_results {
        let (worker_expected, worker_objective, worker_tokens) = result?;
        for (acc, v) in expected.iter_mut().zip(worker_expected) {
            *acc += v;
        }
        objective += worker_objective;
        num_tokens += worker_tokens;
    }
    Ok(EStep {
        expected,
        objective,
        num_tokens,
    })
}

/// M-step: drop pieces with negligible soft counts and renormalize with
/// the digamma form, which acts as a sparsity-inducing prior.
fn run_m_step(pieces: &[(String, f32)], expected: &[f64]) -> Result<Vec<(String, f32)>> {
    if pieces.len() != expected.len() {
        return Err(Error::internal("expected counts out of sync with pieces"));
    }
    let mut kept: Vec<(String, f64)> = Vec::with_capacity(pieces.len());
    let mut sum = 0.0f64;
    for (i, (piece, _)) in pieces.iter().enumerate() {
        let freq = expected[i];
        if freq < EXPECTED_FREQUENCY_THRESHOLD {
            continue;
        }
        kept.push((piece.clone(), freq));
        sum += freq;
    }
    let logsum = digamma(sum);
    Ok(kept
        .into_iter()
        .map(|(piece, freq)| (piece, (digamma(freq) - logsum) as f32))
        .collect())
}

/// Ranks pieces by the likelihood lost when each is removed (its Viterbi
/// mass re-routed to its second-best segmentation) and keeps the best
/// `max(desired, shrinking_factor · n)`.
fn prune_pieces(
    t: &Trainer,
    pieces: &[(String, f32)],
    desired_vocab_size: usize,
) -> Result<Vec<(String, f32)>> {
    let index = build_index(pieces)?;
    let n_pieces = pieces.len();

    // How each piece resegments without itself: the second-best path of
    // its own surface.
    let mut always_keep = vec![true; n_pieces];
    let mut alternatives: Vec<Vec<usize>> = vec![Vec::new(); n_pieces];
    {
        let mut lattice = Lattice::new();
        for (i, (piece, _)) in pieces.iter().enumerate() {
            lattice.set_sentence(piece);
            index.populate_nodes(&mut lattice);
            let nbests = lattice.nbest(2)?;
            if nbests.len() == 1 {
                // no second best; keep unconditionally
                always_keep[i] = true;
            } else if nbests[0].len() >= 2 {
                // the best path already splits; removal is free
                always_keep[i] = false;
            } else if nbests[0].len() == 1 {
                always_keep[i] = true;
                for &node in &nbests[1] {
                    let id = lattice.node(node).id;
                    if id >= 0 {
                        alternatives[i].push(id as usize);
                    }
                }
            }
        }
    }

    // Viterbi frequency of every piece over the corpus, plus the sentences
    // each piece occurs in.
    let sentences = &t.sentences;
    let num_threads = t.spec.num_threads.clamp(1, sentences.len().max(1));
    let index_ref = &index;
    type FreqShard = (f64, Vec<f64>, Vec<Vec<usize>>);
    let worker_results: Vec<Result<FreqShard>> = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(num_threads);
        for n in 0..num_threads {
            handles.push(scope.spawn(move || {
                let mut lattice = Lattice::new();
                let mut vsum = 0.0f64;
                let mut freq = vec![0.0f64; n_pieces];
                let mut inverted: Vec<Vec<usize>> = vec![Vec::new(); n_pieces];
                let mut i = n;
                while i < sentences.len() {
                    let (sentence, sentence_freq) = &sentences[i];
                    lattice.set_sentence(sentence);
                    index_ref.populate_nodes(&mut lattice);
                    vsum += *sentence_freq as f64;
                    for node in lattice.viterbi()? {
                        let id = lattice.node(node).id;
                        if id >= 0 {
                            freq[id as usize] += *sentence_freq as f64;
                            inverted[id as usize].push(i);
                        }
                    }
                    i += num_threads;
                }
                Ok((vsum, freq, inverted))
            }));
        }
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(Error::internal("pruning worker panicked")))
            })
            .collect()
    });

    let mut vsum = 0.0f64;
    let mut freq = vec![0.0f64; n_pieces];
    let mut inverted: Vec<Vec<usize>> = vec![Vec::new(); n_pieces];
    for result in worker_results {
        let (worker_vsum, worker_freq, worker_inverted) = result?;
        vsum += worker_vsum;
        for i in 0..n_pieces {
            freq[i] += worker_freq[i];
            inverted[i].extend(&worker_inverted[i]);
        }
    }

    let sum: f64 = freq.iter().sum();
    let logsum = sum.ln();
    let mut candidates: Vec<(usize, f64)> = Vec::new();
    let mut new_pieces: Vec<(String, f32)> = Vec::new();

    // Loss of removing piece i, approximated by re-assigning its Viterbi
    // mass to its alternatives.
    for i in 0..n_pieces {
        if freq[i] == 0.0 || !always_keep[i] {
            continue;
        } else if alternatives[i].is_empty() {
            new_pieces.push(pieces[i].clone());
        } else {
            let mut piece_freq = 0.0f64;
            for &sid in &inverted[i] {
                piece_freq += sentences[sid].1 as f64;
            }
            piece_freq /= vsum;

            let logprob_piece = freq[i].ln() - logsum;
            let logsum_alt = (sum + freq[i] * (alternatives[i].len() as f64 - 1.0)).ln();
            let mut logprob_alt = 0.0f64;
            for &alt in &alternatives[i] {
                logprob_alt += (freq[alt] + freq[i]).ln() - logsum_alt;
            }
            let loss = piece_freq * (logprob_piece - logprob_alt);
            candidates.push((i, loss));
        }
    }

    let pruned_size =
        desired_vocab_size.max((t.spec.shrinking_factor * n_pieces as f64) as usize);
    for (i, _) in sorted_by_value_desc(candidates) {
        if new_pieces.len() == pruned_size {
            break;
        }
        new_pieces.push(pieces[i].clone());
    }
    Ok(new_pieces)
}

/// Guarantees required-character coverage, then fills the remaining slots
/// with the highest scoring pieces. The result is sorted for stable ids.
fn finalize_pieces(t: &Trainer, pieces: &[(String, f32)]) -> Result<Vec<(String, f32)>> {
    let reserved = t.reserved_piece_names();
    let scores: HashMap<&str, f32> = pieces
        .iter()
        .map(|(piece, score)| (piece.as_str(), *score))
        .collect();
    let min_score = pieces
        .iter()
        .map(|&(_, score)| score)
        .fold(f32::MAX, f32::min);

    let slots = t.spec.vocab_size - t.meta_pieces.len();

    let mut final_map: HashMap<String, f32> = HashMap::new();
    let mut penalty = 0.0f32;
    for &(c, _) in &t.required_chars {
        let piece = c.to_string();
        if reserved.contains(&piece) {
            continue;
        }
        match scores.get(piece.as_str()) {
            Some(&score) => {
                final_map.insert(piece, score);
            }
            None => {
                final_map.insert(piece, min_score + penalty);
                penalty += MIN_SCORE_PENALTY_DELTA;
            }
        }
    }
    if final_map.len() > slots {
        return Err(Error::invalid_argument(format!(
            "vocab_size {} cannot cover the {} required characters",
            t.spec.vocab_size,
            final_map.len()
        )));
    }

    for (piece, score) in sorted_by_value_desc(pieces.to_vec()) {
        if final_map.len() == slots {
            break;
        }
        if final_map.contains_key(&piece) || reserved.contains(&piece) {
            continue;
        }
        final_map.insert(piece, score);
    }

    Ok(sorted_by_value_desc(final_map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NormalizerSpec, TrainerSpec};
    use crate::logging::LogLevel;
    use crate::unicode::SPACE_SYMBOL_CHAR;

    fn loaded_trainer(lines: &[&str], spec: TrainerSpec) -> (Trainer, TrainerContext) {
        let mut ctx = TrainerContext::new(spec.seed, LogLevel::Quiet);
        let mut t = Trainer::new(spec, NormalizerSpec::default()).unwrap();
        t.load_sentences(lines.iter().map(|s| s.to_string()).collect(), &mut ctx)
            .unwrap();
        (t, ctx)
    }

    #[test]
    fn test_digamma_matches_known_values() {
        // psi(1) = -gamma
        assert!((digamma(1.0) + 0.5772156649).abs() < 1e-6);
        // psi(x+1) = psi(x) + 1/x
        assert!((digamma(2.5) - digamma(1.5) - 1.0 / 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_to_log_prob_normalizes() {
        let mut pieces = vec![("a".to_string(), 1.0), ("b".to_string(), 3.0)];
        to_log_prob(&mut pieces);
        let total: f64 = pieces.iter().map(|&(_, s)| s.exp()).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(pieces[1].1 > pieces[0].1);
    }

    #[test]
    fn test_seed_pieces_contain_chars_and_substrings() {
        let spec = TrainerSpec::default().with_character_coverage(1.0);
        let (t, ctx) = loaded_trainer(&["abab", "abab abab"], spec);
        let seed = make_seed_pieces(&t, &ctx).unwrap();
        let names: Vec<&str> = seed.iter().map(|(p, _)| p.as_str()).collect();

        // every observed char is seeded
        assert!(names.contains(&"a"));
        assert!(names.contains(&"b"));
        let ws = SPACE_SYMBOL_CHAR.to_string();
        assert!(names.contains(&ws.as_str()));
        // the dominant repeated substring is seeded
        assert!(names.contains(&"ab"));

        // scores are log probabilities
        let total: f64 = seed.iter().map(|&(_, s)| f64::from(s).exp()).sum();
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_seed_pieces_skip_sentence_boundaries() {
        let spec = TrainerSpec::default().with_character_coverage(1.0);
        let (t, ctx) = loaded_trainer(&["ab", "ba"], spec);
        let seed = make_seed_pieces(&t, &ctx).unwrap();
        // "b▁a" style substrings crossing sentences must not appear; each
        // sentence normalizes to 3 chars, so no piece exceeds that
        for (piece, _) in &seed {
            assert!(piece.chars().count() <= 3, "piece {piece:?}");
        }
    }

    #[test]
    fn test_e_step_objective_and_tokens() {
        let spec = TrainerSpec::default()
            .with_character_coverage(1.0)
            .with_num_threads(2);
        let (mut t, ctx) = loaded_trainer(&["ab", "ab", "cd"], spec);
        let pieces = make_seed_pieces(&t, &ctx).unwrap();
        t.split_sentences_by_whitespace();
        let index = build_index(&pieces).unwrap();
        let estep = run_e_step(&t, &index, pieces.len()).unwrap();

        assert!(estep.objective.is_finite());
        assert!(estep.num_tokens > 0);
        // soft counts are non-negative and some mass was assigned
        assert!(estep.expected.iter().all(|&v| v >= 0.0));
        assert!(estep.expected.iter().sum::<f64>() > 0.0);
    }

    #[test]
    fn test_e_step_deterministic_across_thread_counts() {
        let lines = ["abc abd", "abc", "bd abd"];
        let spec = TrainerSpec::default()
            .with_character_coverage(1.0)
            .with_num_threads(1);
        let (mut t1, ctx1) = loaded_trainer(&lines, spec.clone());
        let pieces1 = make_seed_pieces(&t1, &ctx1).unwrap();
        t1.split_sentences_by_whitespace();
        let index1 = build_index(&pieces1).unwrap();
        let e1 = run_e_step(&t1, &index1, pieces1.len()).unwrap();

        let (mut t3, ctx3) = loaded_trainer(&lines, spec.with_num_threads(3));
        let pieces3 = make_seed_pieces(&t3, &ctx3).unwrap();
        t3.split_sentences_by_whitespace();
        let index3 = build_index(&pieces3).unwrap();
        let e3 = run_e_step(&t3, &index3, pieces3.len()).unwrap();

        assert_eq!(pieces1, pieces3);
        assert_eq!(e1.num_tokens, e3.num_tokens);
        for (a, b) in e1.expected.iter().zip(&e3.expected) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_m_step_drops_low_counts() {
        let pieces = vec![
            ("a".to_string(), -1.0f32),
            ("b".to_string(), -1.0),
            ("c".to_string(), -1.0),
        ];
        let expected = vec![10.0, 0.1, 5.0];
        let new_pieces = run_m_step(&pieces, &expected).unwrap();
        let names: Vec<&str> = new_pieces.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        // higher expectation, higher score
        assert!(new_pieces[0].1 > new_pieces[1].1);
    }

    #[test]
    fn test_m_step_rejects_mismatched_lengths() {
        let pieces = vec![("a".to_string(), -1.0f32)];
        assert!(run_m_step(&pieces, &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_finalize_covers_required_chars() {
        let spec = TrainerSpec::default()
            .with_vocab_size(8)
            .with_character_coverage(1.0);
        let (t, _ctx) = loaded_trainer(&["ab", "ab", "ab"], spec);
        // pretend EM kept only "ab"; chars must still be re-added
        let pieces = vec![("ab".to_string(), -0.5f32)];
        let final_pieces = finalize_pieces(&t, &pieces).unwrap();
        let names: Vec<&str> = final_pieces.iter().map(|(p, _)| p.as_str()).collect();
        assert!(names.contains(&"a"));
        assert!(names.contains(&"b"));
        assert!(names.contains(&"ab"));
    }

    #[test]
    fn test_finalize_rejects_tiny_vocab() {
        let spec = TrainerSpec::default()
            .with_vocab_size(4)
            .with_character_coverage(1.0);
        let (t, _ctx) = loaded_trainer(&["abcdefgh"], spec);
        let pieces = vec![("ab".to_string(), -0.5f32)];
        assert!(finalize_pieces(&t, &pieces).is_err());
    }

    #[test]
    fn test_train_end_to_end_small_corpus() {
        let spec = TrainerSpec::default()
            .with_vocab_size(12)
            .with_character_coverage(1.0)
            .with_num_threads(2);
        let (mut t, mut ctx) = loaded_trainer(
            &["I have a pen", "I have an apple", "apple pen", "pen pen pen"],
            spec,
        );
        let final_pieces = train(&mut t, &mut ctx).unwrap();
        // exactly vocab_size - meta pieces
        assert_eq!(final_pieces.len(), 12 - 3);
        // every required char survives
        for &(c, _) in &t.required_chars {
            assert!(
                final_pieces.iter().any(|(p, _)| p == &c.to_string()),
                "missing char {c:?}"
            );
        }
        // scores are finite log probabilities
        for (_, score) in &final_pieces {
            assert!(score.is_finite());
            assert!(*score < 0.0);
        }
    }
}
