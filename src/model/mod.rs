//! Segmentation models.
//!
//! Four algorithm families sit behind one piece/id interface: the unigram
//! language model (lattice based), BPE (merge rank based), and the trivial
//! word and character splitters. A trained model is persisted as a
//! [`TokenizerModel`] container embedding its piece table and both specs,
//! so loading one file restores the exact preprocessing pipeline.

mod bpe;
mod chars;
pub mod lattice;
pub(crate) mod unigram;
mod vocab;
mod word;

pub use bpe::BpeModel;
pub use chars::CharModel;
pub use lattice::Lattice;
pub use unigram::UnigramModel;
pub use vocab::{Piece, PieceType, Vocabulary};
pub use word::WordModel;

use std::fs;
use std::path::Path;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::config::{ModelType, NormalizerSpec, TrainerSpec};
use crate::error::{Error, Result};
use crate::unicode::SPACE_SYMBOL_CHAR;

/// Piece views into the normalized input with their vocabulary ids.
pub type EncodeResult<'a> = Vec<(&'a str, u32)>;

/// Interface shared by the four segmentation families. Implementations
/// hold only read-only state after construction and may be called from
/// multiple threads concurrently.
pub trait Model: Send + Sync {
    /// Piece registry backing this model.
    fn vocab(&self) -> &Vocabulary;

    /// Segments normalized text. The concatenation of the returned pieces
    /// equals the input.
    fn encode<'a>(&self, normalized: &'a str) -> Result<EncodeResult<'a>>;

    /// Top-k segmentations with their total scores.
    fn nbest_encode<'a>(
        &self,
        _normalized: &'a str,
        _nbest_size: usize,
    ) -> Result<Vec<(EncodeResult<'a>, f32)>> {
        Err(Error::Unimplemented(
            "nbest_encode is only available for the unigram model".to_string(),
        ))
    }

    /// Samples one segmentation with temperature `theta`.
    fn sample_encode<'a>(
        &self,
        _normalized: &'a str,
        _theta: f32,
        _rng: &mut dyn RngCore,
    ) -> Result<EncodeResult<'a>> {
        Err(Error::Unimplemented(
            "sample_encode is only available for the unigram model".to_string(),
        ))
    }
}

/// Constructs the model named by the container's trainer spec.
pub fn build_model(data: &TokenizerModel) -> Result<Box<dyn Model>> {
    let vocab = Vocabulary::new(data.pieces.clone())?;
    match data.trainer.model_type {
        ModelType::Unigram => Ok(Box::new(UnigramModel::new(vocab)?)),
        ModelType::Bpe => Ok(Box::new(BpeModel::new(vocab)?)),
        ModelType::Char => Ok(Box::new(CharModel::new(vocab)?)),
        ModelType::Word => Ok(Box::new(WordModel::new(
            vocab,
            data.trainer.treat_whitespace_as_suffix,
        ))),
    }
}

/// One load-time check: `input` must encode to the space-joined pieces in
/// `expected`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfTestSample {
    pub input: String,
    pub expected: String,
}

/// Persisted model container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizerModel {
    /// Piece table; the index is the id
    pub pieces: Vec<Piece>,
    /// Trainer settings the model was built with
    pub trainer: TrainerSpec,
    /// Normalization settings including the compiled rule blob
    pub normalizer: NormalizerSpec,
    /// Optional samples verified at load time
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub self_test: Vec<SelfTestSample>,
}

impl TokenizerModel {
    /// Reads a model container from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path.as_ref())?;
        Self::from_json(&json)
    }

    /// Parses a model container from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Serialization(format!("model parse failed: {e}")))
    }

    /// Writes the container as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("model serialization failed: {e}")))?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }
}

/// Splits normalized text at whitespace sentinels, keeping the sentinel
/// attached to the following word (or to the preceding word with
/// `treat_whitespace_as_suffix`).
pub fn split_into_words(text: &str, treat_whitespace_as_suffix: bool) -> Vec<&str> {
    let mut spans: Vec<(usize, usize)> = Vec::new();
    if treat_whitespace_as_suffix {
        if !text.is_empty() {
            spans.push((0, 0));
        }
        for (offset, c) in text.char_indices() {
            let end = offset + c.len_utf8();
            if let Some(span) = spans.last_mut() {
                span.1 = end;
            }
            if end < text.len() && c == SPACE_SYMBOL_CHAR {
                spans.push((end, end));
            }
        }
    } else {
        for (offset, c) in text.char_indices() {
            if offset == 0 || c == SPACE_SYMBOL_CHAR {
                spans.push((offset, offset));
            }
            if let Some(span) = spans.last_mut() {
                span.1 = offset + c.len_utf8();
            }
        }
    }
    spans.into_iter().map(|(a, b)| &text[a..b]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const WS: char = SPACE_SYMBOL_CHAR;

    #[test]
    fn test_split_into_words_prefix() {
        let text = format!("{WS}this{WS}is{WS}a{WS}pen");
        let words = split_into_words(&text, false);
        assert_eq!(
            words,
            vec![
                format!("{WS}this"),
                format!("{WS}is"),
                format!("{WS}a"),
                format!("{WS}pen"),
            ]
        );
    }

    #[test]
    fn test_split_into_words_no_leading_sentinel() {
        let text = format!("hi{WS}there");
        let words = split_into_words(&text, false);
        assert_eq!(words, vec!["hi".to_string(), format!("{WS}there")]);
    }

    #[test]
    fn test_split_into_words_suffix() {
        let text = format!("this{WS}is{WS}");
        let words = split_into_words(&text, true);
        assert_eq!(words, vec![format!("this{WS}"), format!("is{WS}")]);
    }

    #[test]
    fn test_split_into_words_empty() {
        assert!(split_into_words("", false).is_empty());
        assert!(split_into_words("", true).is_empty());
    }

    #[test]
    fn test_model_container_roundtrip() {
        let model = TokenizerModel {
            pieces: vec![
                Piece::new("<unk>", 0.0, PieceType::Unknown),
                Piece::normal("a", -1.0),
            ],
            trainer: TrainerSpec::default(),
            normalizer: NormalizerSpec::default(),
            self_test: Vec::new(),
        };
        let json = serde_json::to_string(&model).unwrap();
        let restored = TokenizerModel::from_json(&json).unwrap();
        assert_eq!(restored.pieces.len(), 2);
        assert_eq!(restored.pieces[1].piece, "a");
        assert!(restored.self_test.is_empty());
    }

    #[test]
    fn test_model_container_rejects_garbage() {
        assert!(TokenizerModel::from_json("not json").is_err());
    }
}
