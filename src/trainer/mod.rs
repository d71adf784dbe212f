//! Training driver.
//!
//! Loads and normalizes the corpus, computes the required-character set
//! from the coverage budget, reserves the meta pieces, dispatches to the
//! per-algorithm trainer, and serializes the result into a
//! [`TokenizerModel`] with the compiled normalization blob embedded.
//!
//! Training is deterministic: a fixed corpus, thread count and seed always
//! produce the same model. The RNG, log level and cancel flag travel in an
//! explicit [`TrainerContext`]; there is no process-wide state.

mod bpe;
mod chars;
pub(crate) mod suffix;
mod unigram;
mod word;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::{ModelType, NormalizerSpec, TrainerSpec};
use crate::error::{Error, Result};
use crate::logging::{log, LogLevel};
use crate::model::{split_into_words, Piece, PieceType, SelfTestSample, TokenizerModel};
use crate::normalizer::Normalizer;
use crate::processor::Tokenizer;
use crate::unicode::{script, Script, SPACE_SYMBOL_CHAR, UNK_CHAR};

/// Explicit training context: seeded RNG, diagnostics level, and a
/// cooperative cancel flag checked between iterations.
pub struct TrainerContext {
    pub rng: StdRng,
    pub log_level: LogLevel,
    pub cancel: Arc<AtomicBool>,
}

impl TrainerContext {
    pub fn new(seed: u64, log_level: LogLevel) -> Self {
        TrainerContext {
            rng: StdRng::seed_from_u64(seed),
            log_level,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn check_cancel(&self) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(Error::Cancelled("training cancelled".to_string()))
        } else {
            Ok(())
        }
    }

    pub(crate) fn log(&self, msg: &str) {
        log(self.log_level, LogLevel::Normal, msg);
    }
}

/// Trains a model, reading the corpus from `trainer_spec.input` and saving
/// to `trainer_spec.model_prefix` when set.
pub fn train(trainer_spec: &TrainerSpec, normalizer_spec: &NormalizerSpec) -> Result<TokenizerModel> {
    let mut ctx = TrainerContext::new(trainer_spec.seed, LogLevel::Normal);
    train_with_context(trainer_spec, normalizer_spec, &mut ctx)
}

/// [`train`] with an explicit context.
pub fn train_with_context(
    trainer_spec: &TrainerSpec,
    normalizer_spec: &NormalizerSpec,
    ctx: &mut TrainerContext,
) -> Result<TokenizerModel> {
    trainer_spec.validate()?;
    if trainer_spec.input.is_empty() {
        return Err(Error::invalid_argument("no input corpus files"));
    }
    let mut lines = Vec::new();
    for path in &trainer_spec.input {
        let file = File::open(path).map_err(|e| {
            Error::NotFound(format!("cannot open {}: {e}", path.display()))
        })?;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if !line.is_empty() {
                lines.push(line);
            }
        }
    }
    train_from_sentences(trainer_spec, normalizer_spec, lines, ctx)
}

/// Trains from in-memory sentences; the entry point everything else funnels
/// into.
pub fn train_from_sentences(
    trainer_spec: &TrainerSpec,
    normalizer_spec: &NormalizerSpec,
    lines: Vec<String>,
    ctx: &mut TrainerContext,
) -> Result<TokenizerModel> {
    trainer_spec.validate()?;
    if !normalizer_spec.escape_whitespaces {
        return Err(Error::invalid_argument(
            "training requires escape_whitespaces",
        ));
    }
    if lines.is_empty() {
        return Err(Error::invalid_argument("no input sentences"));
    }

    let mut trainer = Trainer::new(trainer_spec.clone(), normalizer_spec.clone())?;
    trainer.load_sentences(lines, ctx)?;

    let final_pieces = match trainer_spec.model_type {
        ModelType::Unigram => unigram::train(&mut trainer, ctx)?,
        ModelType::Bpe => bpe::train(&mut trainer, ctx)?,
        ModelType::Word => word::train(&mut trainer, ctx)?,
        ModelType::Char => chars::train(&mut trainer, ctx)?,
    };

    let mut model = trainer.serialize(final_pieces)?;

    if trainer_spec.self_test_sample_size > 0 {
        let tokenizer = Tokenizer::from_model(model.clone())?;
        let mut samples = Vec::new();
        for input in &trainer.self_test_samples {
            let pieces = tokenizer.encode_pieces(input)?;
            samples.push(SelfTestSample {
                input: input.clone(),
                expected: pieces.join(" "),
            });
        }
        model.self_test = samples;
    }

    if let Some(prefix) = &trainer_spec.model_prefix {
        save_model(&model, prefix)?;
        ctx.log(&format!("Saved {}.model", prefix.display()));
    }
    Ok(model)
}

/// Writes `<prefix>.model` (the JSON container) and `<prefix>.vocab`
/// (piece<TAB>score TSV).
pub fn save_model(model: &TokenizerModel, prefix: &Path) -> Result<()> {
    let mut model_path = prefix.as_os_str().to_owned();
    model_path.push(".model");
    model.save(Path::new(&model_path))?;

    let mut vocab_path = prefix.as_os_str().to_owned();
    vocab_path.push(".vocab");
    let mut file = File::create(Path::new(&vocab_path))?;
    for piece in &model.pieces {
        writeln!(file, "{}\t{}", piece.piece, piece.score)?;
    }
    Ok(())
}

/// Sorts `(key, value)` pairs by value descending, key ascending; the
/// ordering every frequency ranking in training uses.
pub(crate) fn sorted_by_value_desc<K, V>(items: impl IntoIterator<Item = (K, V)>) -> Vec<(K, V)>
where
    K: Ord,
    V: PartialOrd,
{
    let mut v: Vec<(K, V)> = items.into_iter().collect();
    v.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    v
}

/// Shared trainer state: the normalized corpus and the vocabulary
/// bookkeeping every algorithm needs.
pub(crate) struct Trainer {
    pub(crate) spec: TrainerSpec,
    /// Normalizer spec with the rule blob resolved, as it will be saved.
    pub(crate) normalizer_spec: NormalizerSpec,
    /// Normalized sentences with frequencies.
    pub(crate) sentences: Vec<(String, u64)>,
    /// Characters the final vocabulary must cover, most frequent first.
    pub(crate) required_chars: Vec<(char, u64)>,
    /// Reserved pieces by id.
    pub(crate) meta_pieces: BTreeMap<u32, (String, PieceType)>,
    /// Raw sentences reserved for the model's self-test block.
    pub(crate) self_test_samples: Vec<String>,
}

impl Trainer {
    pub(crate) fn new(spec: TrainerSpec, normalizer_spec: NormalizerSpec) -> Result<Self> {
        let blob = Normalizer::compile_blob(&normalizer_spec)?;
        let mut resolved = normalizer_spec;
        resolved.precompiled_charsmap = blob;
        resolved.normalization_rule_tsv = None;

        let meta_pieces = init_meta_pieces(&spec)?;
        Ok(Trainer {
            spec,
            normalizer_spec: resolved,
            sentences: Vec::new(),
            required_chars: Vec::new(),
            meta_pieces,
            self_test_samples: Vec::new(),
        })
    }

    /// Normalizes the corpus, computes the required-character set from the
    /// coverage budget, and masks everything outside it with the internal
    /// unknown character.
    pub(crate) fn load_sentences(&mut self, mut lines: Vec<String>, ctx: &mut TrainerContext) -> Result<()> {
        if self.spec.input_sentence_size > 0 && lines.len() > self.spec.input_sentence_size {
            if self.spec.shuffle_input_sentence {
                lines.shuffle(&mut ctx.rng);
            }
            lines.truncate(self.spec.input_sentence_size);
        }

        self.self_test_samples = lines
            .iter()
            .take(self.spec.self_test_sample_size)
            .cloned()
            .collect();

        let normalizer = Normalizer::with_trainer_spec(&self.normalizer_spec, &self.spec)?;
        self.sentences.clear();
        for line in &lines {
            let normalized = normalizer.normalize_string(line)?;
            if normalized.is_empty() {
                continue;
            }
            self.sentences.push((normalized, 1));
        }
        if self.sentences.is_empty() {
            return Err(Error::invalid_argument(
                "all sentences normalized to the empty string",
            ));
        }
        ctx.log(&format!("Loaded {} sentences", self.sentences.len()));

        let mut chars_count: BTreeMap<char, u64> = BTreeMap::new();
        let mut all_chars_count = 0u64;
        for (sentence, freq) in &self.sentences {
            for c in sentence.chars() {
                *chars_count.entry(c).or_insert(0) += freq;
                all_chars_count += freq;
            }
        }

        self.required_chars.clear();
        let mut accumulated = 0u64;
        for (c, freq) in sorted_by_value_desc(chars_count) {
            let coverage = accumulated as f64 / all_chars_count as f64;
            if coverage >= self.spec.character_coverage {
                break;
            }
            accumulated += freq;
            self.required_chars.push((c, freq));
        }
        ctx.log(&format!(
            "Alphabet size: {} (character coverage {})",
            self.required_chars.len(),
            self.spec.character_coverage
        ));

        let required: HashSet<char> = self.required_chars.iter().map(|&(c, _)| c).collect();
        for (sentence, _) in &mut self.sentences {
            if sentence.chars().any(|c| !required.contains(&c)) {
                *sentence = sentence
                    .chars()
                    .map(|c| if required.contains(&c) { c } else { UNK_CHAR })
                    .collect();
            }
        }
        Ok(())
    }

    /// Replaces the sentence list with whitespace-delimited tokens and
    /// their aggregated frequencies.
    pub(crate) fn split_sentences_by_whitespace(&mut self) {
        let mut freq: HashMap<String, u64> = HashMap::new();
        for (sentence, count) in &self.sentences {
            for word in split_into_words(sentence, self.spec.treat_whitespace_as_suffix) {
                *freq.entry(word.to_string()).or_insert(0) += count;
            }
        }
        self.sentences = sorted_by_value_desc(freq);
    }

    /// Whether `piece` may enter the vocabulary, honoring the length
    /// budget, sentinel placement, and the split flags.
    pub(crate) fn is_valid_piece(&self, piece: &[char]) -> bool {
        if piece.is_empty() {
            return false;
        }
        let byte_len: usize = piece.iter().map(|c| c.len_utf8()).sum();
        if byte_len > self.spec.max_piece_length {
            return false;
        }

        let ws = SPACE_SYMBOL_CHAR;
        if piece.len() > 1 {
            if self.spec.treat_whitespace_as_suffix {
                if piece[0] == ws {
                    return false;
                }
                if self.spec.split_by_whitespace && piece[..piece.len() - 1].contains(&ws) {
                    return false;
                }
            } else {
                if piece[piece.len() - 1] == ws {
                    return false;
                }
                if self.spec.split_by_whitespace && piece[1..].contains(&ws) {
                    return false;
                }
            }
        }

        let mut prev: Option<CharClass> = None;
        for &c in piece {
            if c == UNK_CHAR || c == '\0' {
                return false;
            }
            if c == ws {
                continue;
            }
            let class = self.char_class(c);
            if class == CharClass::Any {
                continue;
            }
            if let Some(p) = prev {
                if p != class {
                    return false;
                }
            }
            prev = Some(class);
        }
        true
    }

    /// Names no trained piece may reuse.
    pub(crate) fn reserved_piece_names(&self) -> HashSet<String> {
        self.meta_pieces
            .values()
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn char_class(&self, c: char) -> CharClass {
        if c.is_numeric() {
            return if self.spec.split_by_number {
                CharClass::Number
            } else {
                CharClass::Any
            };
        }
        if self.spec.split_by_unicode_script {
            CharClass::Script(script(c))
        } else {
            CharClass::Any
        }
    }

    /// Assembles the piece table: meta pieces at their reserved ids, the
    /// trained pieces filling every other slot in order.
    pub(crate) fn serialize(&self, final_pieces: Vec<(String, f32)>) -> Result<TokenizerModel> {
        let total = final_pieces.len() + self.meta_pieces.len();
        if matches!(self.spec.model_type, ModelType::Unigram | ModelType::Bpe)
            && total != self.spec.vocab_size
        {
            return Err(Error::internal(format!(
                "vocabulary size mismatch: produced {total}, requested {}",
                self.spec.vocab_size
            )));
        }
        if total > self.spec.vocab_size {
            return Err(Error::internal(format!(
                "produced {total} pieces for vocab_size {}",
                self.spec.vocab_size
            )));
        }
        if let Some((&id, _)) = self.meta_pieces.iter().next_back() {
            if id as usize >= total {
                return Err(Error::internal(format!(
                    "meta piece id {id} exceeds the final vocabulary size {total}"
                )));
            }
        }

        let meta_names: HashSet<&str> = self
            .meta_pieces
            .values()
            .map(|(name, _)| name.as_str())
            .collect();
        let user_defined: BTreeSet<&str> = self
            .spec
            .user_defined_symbols
            .iter()
            .map(String::as_str)
            .collect();

        let mut pieces = Vec::with_capacity(total);
        let mut trained = final_pieces.into_iter();
        for id in 0..total as u32 {
            if let Some((name, kind)) = self.meta_pieces.get(&id) {
                pieces.push(Piece::new(name.clone(), 0.0, *kind));
                continue;
            }
            let (name, score) = trained
                .next()
                .ok_or_else(|| Error::internal("ran out of trained pieces during serialization"))?;
            if meta_names.contains(name.as_str()) || user_defined.contains(name.as_str()) {
                return Err(Error::internal(format!("{name} is already defined")));
            }
            pieces.push(Piece::normal(name, score));
        }

        Ok(TokenizerModel {
            pieces,
            trainer: self.spec.clone(),
            normalizer: self.normalizer_spec.clone(),
            self_test: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    /// Compatible with anything
    Any,
    Number,
    Script(Script),
}

/// Reserves ids for `<unk>/<s>/</s>/<pad>` plus the configured control and
/// user-defined symbols.
fn init_meta_pieces(spec: &TrainerSpec) -> Result<BTreeMap<u32, (String, PieceType)>> {
    let mut meta: BTreeMap<u32, (String, PieceType)> = BTreeMap::new();
    let mut names: HashSet<String> = HashSet::new();

    let insert = |meta: &mut BTreeMap<u32, (String, PieceType)>,
                      names: &mut HashSet<String>,
                      id: i32,
                      name: &str,
                      kind: PieceType|
     -> Result<()> {
        if id < 0 {
            return Ok(());
        }
        if id as usize >= spec.vocab_size {
            return Err(Error::invalid_argument(format!(
                "reserved id {id} must be smaller than vocab_size"
            )));
        }
        if meta.contains_key(&(id as u32)) || !names.insert(name.to_string()) {
            return Err(Error::invalid_argument(format!(
                "reserved piece {name} (id {id}) conflicts with another reserved piece"
            )));
        }
        meta.insert(id as u32, (name.to_string(), kind));
        Ok(())
    };

    insert(&mut meta, &mut names, spec.unk_id, &spec.unk_piece, PieceType::Unknown)?;
    insert(&mut meta, &mut names, spec.bos_id, &spec.bos_piece, PieceType::Control)?;
    insert(&mut meta, &mut names, spec.eos_id, &spec.eos_piece, PieceType::Control)?;
    insert(&mut meta, &mut names, spec.pad_id, &spec.pad_piece, PieceType::Control)?;

    let mut next_id = 0u32;
    for (symbols, kind) in [
        (&spec.control_symbols, PieceType::Control),
        (&spec.user_defined_symbols, PieceType::UserDefined),
    ] {
        for symbol in symbols {
            while meta.contains_key(&next_id) {
                next_id += 1;
            }
            insert(&mut meta, &mut names, next_id as i32, symbol, kind)?;
        }
    }
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trainer(spec: TrainerSpec) -> Trainer {
        Trainer::new(spec, NormalizerSpec::default()).unwrap()
    }

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn test_meta_pieces_defaults() {
        let t = trainer(TrainerSpec::default());
        assert_eq!(t.meta_pieces.len(), 3);
        assert_eq!(t.meta_pieces[&0], ("<unk>".to_string(), PieceType::Unknown));
        assert_eq!(t.meta_pieces[&1], ("<s>".to_string(), PieceType::Control));
        assert_eq!(t.meta_pieces[&2], ("</s>".to_string(), PieceType::Control));
    }

    #[test]
    fn test_meta_pieces_with_symbols() {
        let mut spec = TrainerSpec::default();
        spec.control_symbols = vec!["<mask>".to_string()];
        spec.user_defined_symbols = vec!["<sep>".to_string()];
        let t = trainer(spec);
        // first free ids after unk/bos/eos
        assert_eq!(t.meta_pieces[&3], ("<mask>".to_string(), PieceType::Control));
        assert_eq!(
            t.meta_pieces[&4],
            ("<sep>".to_string(), PieceType::UserDefined)
        );
    }

    #[test]
    fn test_meta_pieces_conflicting_ids() {
        let mut spec = TrainerSpec::default();
        spec.bos_id = 0; // collides with unk
        assert!(Trainer::new(spec, NormalizerSpec::default()).is_err());
    }

    #[test]
    fn test_load_sentences_counts_required_chars() {
        let mut t = trainer(TrainerSpec::default().with_character_coverage(1.0));
        let mut ctx = TrainerContext::new(42, LogLevel::Quiet);
        t.load_sentences(vec!["a b".to_string(), "b a".to_string()], &mut ctx)
            .unwrap();
        // normalized: "▁a▁b", "▁b▁a"; the sentinel dominates with 4 hits
        let chars: Vec<char> = t.required_chars.iter().map(|&(c, _)| c).collect();
        assert_eq!(chars[0], SPACE_SYMBOL_CHAR);
        assert!(chars.contains(&'a') && chars.contains(&'b'));
    }

    #[test]
    fn test_load_sentences_masks_rare_chars() {
        let mut spec = TrainerSpec::default();
        spec.character_coverage = 0.5;
        let mut t = trainer(spec);
        let mut ctx = TrainerContext::new(42, LogLevel::Quiet);
        // 'z' appears once among many 'a's and falls outside coverage
        t.load_sentences(vec!["aaaaaaaaaaaaaaaaaaaaz".to_string()], &mut ctx)
            .unwrap();
        let masked = &t.sentences[0].0;
        assert!(masked.contains(UNK_CHAR));
        assert!(!masked.contains('z'));
    }

    #[test]
    fn test_split_sentences_by_whitespace() {
        let mut t = trainer(TrainerSpec::default().with_character_coverage(1.0));
        let mut ctx = TrainerContext::new(42, LogLevel::Quiet);
        t.load_sentences(
            vec!["hello world".to_string(), "hi world".to_string()],
            &mut ctx,
        )
        .unwrap();
        t.split_sentences_by_whitespace();
        let ws = SPACE_SYMBOL_CHAR;
        // "▁world" occurs twice and sorts first
        assert_eq!(t.sentences[0].0, format!("{ws}world"));
        assert_eq!(t.sentences[0].1, 2);
        assert_eq!(t.sentences.len(), 3);
    }

    #[test]
    fn test_is_valid_piece_length_budget() {
        let mut spec = TrainerSpec::default();
        spec.max_piece_length = 4;
        let t = trainer(spec);
        assert!(t.is_valid_piece(&chars("abcd")));
        assert!(!t.is_valid_piece(&chars("abcde")));
        // multibyte chars count in bytes
        assert!(!t.is_valid_piece(&chars("京都")));
        assert!(!t.is_valid_piece(&chars("")));
    }

    #[test]
    fn test_is_valid_piece_whitespace_placement() {
        let t = trainer(TrainerSpec::default());
        let ws = SPACE_SYMBOL_CHAR;
        assert!(t.is_valid_piece(&chars(&format!("{ws}ab"))));
        assert!(!t.is_valid_piece(&chars(&format!("ab{ws}"))));
        assert!(!t.is_valid_piece(&chars(&format!("a{ws}b"))));
        assert!(t.is_valid_piece(&[ws]));

        let t = trainer(TrainerSpec::default().with_treat_whitespace_as_suffix(true));
        assert!(t.is_valid_piece(&chars(&format!("ab{ws}"))));
        assert!(!t.is_valid_piece(&chars(&format!("{ws}ab"))));
    }

    #[test]
    fn test_is_valid_piece_mid_whitespace_allowed_without_split() {
        let mut spec = TrainerSpec::default();
        spec.split_by_whitespace = false;
        let t = trainer(spec);
        let ws = SPACE_SYMBOL_CHAR;
        assert!(t.is_valid_piece(&chars(&format!("{ws}a{ws}b"))));
        assert!(!t.is_valid_piece(&chars(&format!("a{ws}b{ws}"))));
    }

    #[test]
    fn test_is_valid_piece_script_boundaries() {
        let t = trainer(TrainerSpec::default());
        assert!(t.is_valid_piece(&chars("abc")));
        assert!(t.is_valid_piece(&chars("京都")));
        // Latin + Han crosses a script boundary
        assert!(!t.is_valid_piece(&chars("ab京")));
        // hiragana + kanji folds into one script
        assert!(t.is_valid_piece(&chars("の京")));

        let mut spec = TrainerSpec::default();
        spec.split_by_unicode_script = false;
        let t = trainer(spec);
        assert!(t.is_valid_piece(&chars("ab京")));
    }

    #[test]
    fn test_is_valid_piece_numbers() {
        let t = trainer(TrainerSpec::default());
        assert!(t.is_valid_piece(&chars("12")));
        assert!(!t.is_valid_piece(&chars("a1")));

        let mut spec = TrainerSpec::default();
        spec.split_by_number = false;
        spec.split_by_unicode_script = false;
        let t = trainer(spec);
        assert!(t.is_valid_piece(&chars("a1")));
    }

    #[test]
    fn test_is_valid_piece_rejects_internal_unk() {
        let t = trainer(TrainerSpec::default());
        assert!(!t.is_valid_piece(&[UNK_CHAR]));
        assert!(!t.is_valid_piece(&['a', UNK_CHAR]));
    }

    #[test]
    fn test_serialize_layout() {
        let t = trainer(TrainerSpec::default().with_vocab_size(6));
        let model = t
            .serialize(vec![("a".to_string(), -1.0), ("b".to_string(), -2.0), ("c".to_string(), -3.0)])
            .unwrap();
        assert_eq!(model.pieces.len(), 6);
        assert_eq!(model.pieces[0].piece, "<unk>");
        assert_eq!(model.pieces[1].piece, "<s>");
        assert_eq!(model.pieces[2].piece, "</s>");
        assert_eq!(model.pieces[3].piece, "a");
        assert_eq!(model.pieces[5].piece, "c");
        assert_eq!(model.pieces[3].kind, PieceType::Normal);
    }

    #[test]
    fn test_serialize_enforces_exact_size_for_subword() {
        let t = trainer(TrainerSpec::default().with_vocab_size(10));
        assert!(t.serialize(vec![("a".to_string(), -1.0)]).is_err());
    }

    #[test]
    fn test_serialize_allows_smaller_vocab_for_char() {
        let t = trainer(TrainerSpec::char().with_vocab_size(10));
        let model = t.serialize(vec![("a".to_string(), -1.0)]).unwrap();
        assert_eq!(model.pieces.len(), 4);
    }

    #[test]
    fn test_sorted_by_value_desc() {
        let items = vec![("b".to_string(), 2u64), ("a".to_string(), 2), ("c".to_string(), 5)];
        let sorted = sorted_by_value_desc(items);
        assert_eq!(sorted[0].0, "c");
        assert_eq!(sorted[1].0, "a"); // ties break by key
        assert_eq!(sorted[2].0, "b");
    }
}
