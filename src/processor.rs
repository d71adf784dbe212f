//! Tokenizer front end.
//!
//! Owns a loaded model and its normalizer, and exposes the full text
//! pipeline: normalize, encode (best / n-best / sampled) with byte spans
//! into the original input, decode with the whitespace-sentinel surface
//! rules, piece/id lookups, vocabulary restriction, and the optional
//! self-test verified at load. Encoding is reentrant; only sampling
//! serializes internally on the shared RNG.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::ModelType;
use crate::error::{Error, Result};
use crate::model::{build_model, EncodeResult, Model, Piece, PieceType, TokenizerModel};
use crate::normalizer::{Normalizer, PrefixMatcher};
use crate::unicode::SPACE_SYMBOL;

/// Post-segmentation transforms, applied in the order given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraOption {
    Reverse,
    Bos,
    Eos,
}

/// One encoded piece with its surface span in the original input.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenSpan {
    /// Piece text
    pub piece: String,
    /// Vocabulary id
    pub id: u32,
    /// Original input slice this piece covers
    pub surface: String,
    /// Byte span in the original input
    pub begin: usize,
    pub end: usize,
}

/// Loaded tokenizer.
pub struct Tokenizer {
    data: TokenizerModel,
    model: Box<dyn Model>,
    normalizer: Normalizer,
    encode_extra: Vec<ExtraOption>,
    decode_extra: Vec<ExtraOption>,
    rng: Mutex<StdRng>,
}

impl Tokenizer {
    /// Loads a model container from disk and verifies its self-test block.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_model(TokenizerModel::load(path)?)
    }

    /// Parses a serialized model container and loads it.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_model(TokenizerModel::from_json(json)?)
    }

    /// Builds a tokenizer from an in-memory container and verifies its
    /// self-test block; on failure the tokenizer is not returned.
    pub fn from_model(data: TokenizerModel) -> Result<Self> {
        let tokenizer = Self::build(data)?;
        tokenizer.run_self_test()?;
        Ok(tokenizer)
    }

    fn build(data: TokenizerModel) -> Result<Self> {
        let model = build_model(&data)?;
        let mut normalizer = Normalizer::with_trainer_spec(&data.normalizer, &data.trainer)?;
        let matcher = Arc::new(PrefixMatcher::new(model.vocab().user_defined_symbols())?);
        normalizer.set_prefix_matcher(matcher);
        let seed = data.trainer.seed;
        Ok(Tokenizer {
            data,
            model,
            normalizer,
            encode_extra: Vec::new(),
            decode_extra: Vec::new(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }

    fn run_self_test(&self) -> Result<()> {
        let mut failures = Vec::new();
        for sample in &self.data.self_test {
            let result = self.encode_pieces(&sample.input)?.join(" ");
            if result != sample.expected {
                failures.push(format!(
                    "{}\texpected `{}` got `{}`",
                    sample.input, sample.expected, result
                ));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::internal(format!(
                "{}/{} self-test samples failed: {}",
                failures.len(),
                self.data.self_test.len(),
                failures.join("; ")
            )))
        }
    }

    /// The underlying piece table in id order.
    pub fn pieces(&self) -> &[Piece] {
        &self.data.pieces
    }

    pub fn vocab_size(&self) -> usize {
        self.model.vocab().len()
    }

    /// Id of `piece`, or the unknown id.
    pub fn piece_to_id(&self, piece: &str) -> u32 {
        self.model.vocab().piece_to_id(piece)
    }

    pub fn id_to_piece(&self, id: u32) -> Result<&str> {
        self.model
            .vocab()
            .id_to_piece(id)
            .map_err(invalid_id_error)
    }

    pub fn get_score(&self, id: u32) -> Result<f32> {
        self.model.vocab().get_score(id).map_err(invalid_id_error)
    }

    pub fn is_unknown(&self, id: u32) -> bool {
        self.model.vocab().is_unknown(id)
    }

    pub fn is_control(&self, id: u32) -> bool {
        self.model.vocab().is_control(id)
    }

    pub fn is_unused(&self, id: u32) -> bool {
        self.model.vocab().is_unused(id)
    }

    pub fn is_user_defined(&self, id: u32) -> bool {
        self.model.vocab().is_user_defined(id)
    }

    /// Id of the unknown piece, or -1 when the configured surface does not
    /// resolve to one (mirrored by `bos_id`/`eos_id`/`pad_id`).
    pub fn unk_id(&self) -> i32 {
        let id = self.piece_to_id(&self.data.trainer.unk_piece);
        if self.is_unknown(id) {
            id as i32
        } else {
            -1
        }
    }

    pub fn bos_id(&self) -> i32 {
        self.control_id(&self.data.trainer.bos_piece)
    }

    pub fn eos_id(&self) -> i32 {
        self.control_id(&self.data.trainer.eos_piece)
    }

    pub fn pad_id(&self) -> i32 {
        self.control_id(&self.data.trainer.pad_piece)
    }

    fn control_id(&self, piece: &str) -> i32 {
        let id = self.piece_to_id(piece);
        if self.is_control(id) {
            id as i32
        } else {
            -1
        }
    }

    /// Parses a colon-separated option string (`"bos:eos"`, `"reverse"`)
    /// for encode results.
    pub fn set_encode_extra_options(&mut self, options: &str) -> Result<()> {
        self.encode_extra = self.parse_extra_options(options)?;
        Ok(())
    }

    /// Same as [`Tokenizer::set_encode_extra_options`], for decoding.
    pub fn set_decode_extra_options(&mut self, options: &str) -> Result<()> {
        self.decode_extra = self.parse_extra_options(options)?;
        Ok(())
    }

    fn parse_extra_options(&self, options: &str) -> Result<Vec<ExtraOption>> {
        let mut parsed = Vec::new();
        if options.is_empty() {
            return Ok(parsed);
        }
        for field in options.split(':') {
            let option = match field {
                "reverse" => ExtraOption::Reverse,
                "bos" => ExtraOption::Bos,
                "eos" => ExtraOption::Eos,
                other => {
                    return Err(Error::invalid_argument(format!(
                        "option `{other}` is not available"
                    )))
                }
            };
            if option == ExtraOption::Bos && self.bos_id() < 0 {
                return Err(Error::invalid_argument(format!(
                    "id for `{}` is not defined",
                    self.data.trainer.bos_piece
                )));
            }
            if option == ExtraOption::Eos && self.eos_id() < 0 {
                return Err(Error::invalid_argument(format!(
                    "id for `{}` is not defined",
                    self.data.trainer.eos_piece
                )));
            }
            parsed.push(option);
        }
        Ok(parsed)
    }

    /// Normalizes `input`.
    pub fn normalize(&self, input: &str) -> Result<String> {
        Ok(self.normalizer.normalize(input)?.0)
    }

    /// Normalizes `input`, also returning the byte alignment from the
    /// normalized string back to `input`.
    pub fn normalize_with_alignment(&self, input: &str) -> Result<(String, Vec<usize>)> {
        self.normalizer.normalize(input)
    }

    /// Encodes `input` into pieces with ids and original byte spans.
    pub fn encode(&self, input: &str) -> Result<Vec<TokenSpan>> {
        let (normalized, norm_to_orig) = self.normalizer.normalize(input)?;
        let result = self.model.encode(&normalized)?;
        self.populate_spans(input, &normalized, &norm_to_orig, result)
    }

    /// Encodes `input` and returns the piece strings.
    pub fn encode_pieces(&self, input: &str) -> Result<Vec<String>> {
        Ok(self.encode(input)?.into_iter().map(|s| s.piece).collect())
    }

    /// Encodes `input` and returns the ids.
    pub fn encode_ids(&self, input: &str) -> Result<Vec<u32>> {
        Ok(self.encode(input)?.into_iter().map(|s| s.id).collect())
    }

    /// Top-`nbest_size` segmentations with their scores.
    pub fn nbest_encode(&self, input: &str, nbest_size: usize) -> Result<Vec<(Vec<TokenSpan>, f32)>> {
        let (normalized, norm_to_orig) = self.normalizer.normalize(input)?;
        let nbests = self.model.nbest_encode(&normalized, nbest_size)?;
        let mut out = Vec::with_capacity(nbests.len());
        for (result, score) in nbests {
            out.push((
                self.populate_spans(input, &normalized, &norm_to_orig, result)?,
                score,
            ));
        }
        Ok(out)
    }

    /// Samples a segmentation: `nbest_size <= 0` samples directly from the
    /// lattice with temperature `alpha`; `nbest_size > 1` draws from the
    /// n-best list under `softmax(alpha · score)`; 0 and 1 fall back to the
    /// best path.
    pub fn sample_encode(&self, input: &str, nbest_size: i32, alpha: f32) -> Result<Vec<TokenSpan>> {
        if nbest_size > 512 {
            return Err(Error::invalid_argument(
                "nbest_size must be nbest_size <= 512",
            ));
        }
        let (normalized, norm_to_orig) = self.normalizer.normalize(input)?;
        if normalized.is_empty() {
            return Ok(Vec::new());
        }

        let result: EncodeResult = if nbest_size == 0 || nbest_size == 1 {
            self.model.encode(&normalized)?
        } else if nbest_size > 1 {
            let nbests = self.model.nbest_encode(&normalized, nbest_size as usize)?;
            if nbests.is_empty() {
                return Err(Error::internal("nbest_encode returned no result"));
            }
            let probs: Vec<f64> = nbests
                .iter()
                .map(|&(_, score)| f64::from(alpha * score).exp())
                .collect();
            let total: f64 = probs.iter().sum();
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| Error::internal("sampler lock poisoned"))?;
            let mut draw = rng.gen::<f64>() * total;
            let mut chosen = nbests.len() - 1;
            for (i, &p) in probs.iter().enumerate() {
                draw -= p;
                if draw <= 0.0 {
                    chosen = i;
                    break;
                }
            }
            nbests.into_iter().nth(chosen).map(|(r, _)| r).unwrap_or_default()
        } else {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| Error::internal("sampler lock poisoned"))?;
            self.model.sample_encode(&normalized, alpha, &mut *rng)?
        };

        self.populate_spans(input, &normalized, &norm_to_orig, result)
    }

    /// Decodes pieces back into text per the surface rules: a leading
    /// sentinel becomes a space except at the start of the text, unknown
    /// pieces render as the configured unknown surface, control pieces
    /// vanish.
    pub fn decode_pieces(&self, pieces: &[String]) -> Result<String> {
        let vocab = self.model.vocab();
        let mut items: Vec<(String, u32)> = pieces
            .iter()
            .map(|piece| (piece.clone(), vocab.piece_to_id(piece)))
            .collect();

        for option in &self.decode_extra {
            match option {
                ExtraOption::Reverse => items.reverse(),
                ExtraOption::Bos => {
                    let piece = self.data.trainer.bos_piece.clone();
                    let id = vocab.piece_to_id(&piece);
                    items.insert(0, (piece, id));
                }
                ExtraOption::Eos => {
                    let piece = self.data.trainer.eos_piece.clone();
                    let id = vocab.piece_to_id(&piece);
                    items.push((piece, id));
                }
            }
        }

        let mut text = String::new();
        for (piece, id) in items {
            if vocab.is_control(id) {
                continue; // invisible
            }
            if vocab.is_unknown(id) {
                if self.id_to_piece(id)? == piece {
                    text.push_str(&self.data.trainer.unk_surface);
                } else {
                    // merged unknown runs carry their own surface
                    text.push_str(&piece);
                }
                continue;
            }
            let piece = if text.is_empty() {
                piece.strip_prefix(SPACE_SYMBOL).unwrap_or(&piece).to_string()
            } else {
                piece
            };
            text.push_str(&piece.replace(SPACE_SYMBOL, " "));
        }
        Ok(text)
    }

    /// Decodes ids back into text; out-of-range ids are rejected.
    pub fn decode_ids(&self, ids: &[u32]) -> Result<String> {
        let mut pieces = Vec::with_capacity(ids.len());
        for &id in ids {
            pieces.push(self.id_to_piece(id)?.to_string());
        }
        self.decode_pieces(&pieces)
    }

    /// Restricts segmentation to `valid_vocab`: every multi-character piece
    /// outside the set becomes unused. Only subword models support this.
    pub fn set_vocabulary(&mut self, valid_vocab: &[String]) -> Result<()> {
        if !matches!(
            self.data.trainer.model_type,
            ModelType::Unigram | ModelType::Bpe
        ) {
            return Err(Error::FailedPrecondition(
                "vocabulary restriction is only enabled in subword models".to_string(),
            ));
        }
        let valid: BTreeSet<&str> = valid_vocab.iter().map(String::as_str).collect();
        for piece in &mut self.data.pieces {
            if matches!(
                piece.kind,
                PieceType::Control | PieceType::Unknown | PieceType::UserDefined
            ) {
                continue;
            }
            let single_char = piece.piece.chars().count() == 1;
            piece.kind = if single_char || valid.contains(piece.piece.as_str()) {
                PieceType::Normal
            } else {
                PieceType::Unused
            };
        }
        self.rebuild()
    }

    /// Reverts [`Tokenizer::set_vocabulary`].
    pub fn reset_vocabulary(&mut self) -> Result<()> {
        for piece in &mut self.data.pieces {
            if piece.kind == PieceType::Unused {
                piece.kind = PieceType::Normal;
            }
        }
        self.rebuild()
    }

    /// Reads a `piece<TAB>frequency` vocabulary file and restricts to the
    /// pieces at or above `threshold`.
    pub fn load_vocabulary(&mut self, path: impl AsRef<Path>, threshold: u64) -> Result<()> {
        let content = fs::read_to_string(path.as_ref())?;
        let mut vocab = Vec::new();
        for line in content.lines() {
            let mut fields = line.split('\t');
            let Some(piece) = fields.next() else { continue };
            if piece.is_empty() {
                return Err(Error::invalid_argument("empty piece in vocabulary file"));
            }
            let freq: u64 = match fields.next() {
                Some(value) => value.parse().map_err(|_| {
                    Error::invalid_argument(format!("bad frequency for piece `{piece}`"))
                })?,
                None => 1,
            };
            if freq >= threshold {
                vocab.push(piece.to_string());
            }
        }
        self.set_vocabulary(&vocab)
    }

    fn rebuild(&mut self) -> Result<()> {
        self.model = build_model(&self.data)?;
        Ok(())
    }

    /// Converts model output into spans over the original input, merging
    /// consecutive unknown pieces so decoders see one token per unknown
    /// run.
    fn populate_spans(
        &self,
        input: &str,
        normalized: &str,
        norm_to_orig: &[usize],
        result: EncodeResult,
    ) -> Result<Vec<TokenSpan>> {
        let vocab = self.model.vocab();
        let mut spans: Vec<TokenSpan> = Vec::with_capacity(result.len());
        let mut consumed = 0usize;
        let mut is_prev_unk = false;

        for (piece, id) in result {
            if piece.is_empty() {
                return Err(Error::internal("empty piece is not allowed"));
            }
            let is_unk = vocab.is_unknown(id);

            if vocab.is_control(id) {
                // control pieces have no source surface
                let at = norm_to_orig[consumed];
                spans.push(TokenSpan {
                    piece: piece.to_string(),
                    id,
                    surface: String::new(),
                    begin: at,
                    end: at,
                });
            } else {
                let begin = consumed;
                let end = consumed + piece.len();
                if end >= norm_to_orig.len() {
                    return Err(Error::internal("encode result escapes the alignment"));
                }
                let orig_begin = norm_to_orig[begin];
                let orig_end = norm_to_orig[end];
                let surface = input
                    .get(orig_begin..orig_end)
                    .ok_or_else(|| Error::internal("alignment is not on a char boundary"))?
                    .to_string();
                match spans.last_mut() {
                    Some(last) if is_prev_unk && is_unk => {
                        last.piece.push_str(piece);
                        last.surface.push_str(&surface);
                        last.end = orig_end;
                    }
                    _ => spans.push(TokenSpan {
                        piece: piece.to_string(),
                        id,
                        surface,
                        begin: orig_begin,
                        end: orig_end,
                    }),
                }
                consumed += piece.len();
            }
            is_prev_unk = is_unk;
        }

        if consumed != normalized.len() {
            return Err(Error::internal(
                "all normalized characters are not consumed",
            ));
        }
        self.apply_extra_options(&mut spans);
        Ok(spans)
    }

    fn apply_extra_options(&self, spans: &mut Vec<TokenSpan>) {
        for option in &self.encode_extra {
            match option {
                ExtraOption::Reverse => spans.reverse(),
                ExtraOption::Bos => {
                    let piece = self.data.trainer.bos_piece.clone();
                    let id = self.piece_to_id(&piece);
                    spans.insert(
                        0,
                        TokenSpan {
                            piece,
                            id,
                            surface: String::new(),
                            begin: 0,
                            end: 0,
                        },
                    );
                }
                ExtraOption::Eos => {
                    let piece = self.data.trainer.eos_piece.clone();
                    let id = self.piece_to_id(&piece);
                    spans.push(TokenSpan {
                        piece,
                        id,
                        surface: String::new(),
                        begin: 0,
                        end: 0,
                    });
                }
            }
        }
    }
}

fn invalid_id_error(err: Error) -> Error {
    match err {
        Error::OutOfRange(msg) => Error::InvalidArgument(msg),
        other => other,
    }
}
