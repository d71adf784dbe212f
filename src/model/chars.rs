//! Character segmentation.
//!
//! Splits normalized text into single characters, except that user-defined
//! symbols match whole via the prefix matcher.

use std::sync::Arc;

use crate::error::Result;
use crate::model::{EncodeResult, Model, Vocabulary};
use crate::normalizer::PrefixMatcher;

pub struct CharModel {
    vocab: Vocabulary,
    matcher: Arc<PrefixMatcher>,
}

impl CharModel {
    pub fn new(vocab: Vocabulary) -> Result<Self> {
        let matcher = Arc::new(PrefixMatcher::new(vocab.user_defined_symbols())?);
        Ok(CharModel { vocab, matcher })
    }
}

impl Model for CharModel {
    fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    fn encode<'a>(&self, normalized: &'a str) -> Result<EncodeResult<'a>> {
        let mut output = Vec::new();
        let bytes = normalized.as_bytes();
        let mut offset = 0;
        while offset < bytes.len() {
            let (len, _) = self.matcher.prefix_match(&bytes[offset..]);
            let piece = &normalized[offset..offset + len];
            output.push((piece, self.vocab.piece_to_id(piece)));
            offset += len;
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Piece, PieceType};
    use crate::unicode::SPACE_SYMBOL;

    fn model() -> CharModel {
        let ws = SPACE_SYMBOL;
        let table = vec![
            Piece::new("<unk>", 0.0, PieceType::Unknown),
            Piece::new("<s>", 0.0, PieceType::Control),
            Piece::new("</s>", 0.0, PieceType::Control),
            Piece::normal(ws, -1.0),
            Piece::normal("a", -1.5),
            Piece::normal("b", -2.0),
            Piece::normal("c", -2.5),
            Piece::normal("d", -3.0),
            Piece::new("ABC", 0.0, PieceType::UserDefined),
        ];
        CharModel::new(Vocabulary::new(table).unwrap()).unwrap()
    }

    #[test]
    fn test_encode_chars_and_user_defined() {
        let m = model();
        let input = format!("{SPACE_SYMBOL}abABCcd");
        let result = m.encode(&input).unwrap();
        let pieces: Vec<&str> = result.iter().map(|&(p, _)| p).collect();
        assert_eq!(pieces, vec![SPACE_SYMBOL, "a", "b", "ABC", "c", "d"]);
    }

    #[test]
    fn test_encode_unknown_chars() {
        let m = model();
        let result = m.encode("az").unwrap();
        assert_eq!(result[1].0, "z");
        assert_eq!(result[1].1, m.vocab().unk_id());
    }

    #[test]
    fn test_encode_empty() {
        let m = model();
        assert!(m.encode("").unwrap().is_empty());
    }
}
