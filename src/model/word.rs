//! Word segmentation.
//!
//! Splits normalized text at whitespace sentinels; each word maps to its
//! vocabulary id or the unknown id.

use crate::error::Result;
use crate::model::{split_into_words, EncodeResult, Model, Vocabulary};

pub struct WordModel {
    vocab: Vocabulary,
    treat_whitespace_as_suffix: bool,
}

impl WordModel {
    pub fn new(vocab: Vocabulary, treat_whitespace_as_suffix: bool) -> Self {
        WordModel {
            vocab,
            treat_whitespace_as_suffix,
        }
    }
}

impl Model for WordModel {
    fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    fn encode<'a>(&self, normalized: &'a str) -> Result<EncodeResult<'a>> {
        Ok(split_into_words(normalized, self.treat_whitespace_as_suffix)
            .into_iter()
            .map(|word| (word, self.vocab.piece_to_id(word)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Piece, PieceType};
    use crate::unicode::SPACE_SYMBOL_CHAR;

    #[test]
    fn test_encode_words() {
        let ws = SPACE_SYMBOL_CHAR;
        let table = vec![
            Piece::new("<unk>", 0.0, PieceType::Unknown),
            Piece::normal(format!("{ws}hello"), -1.0),
            Piece::normal(format!("{ws}world"), -1.5),
        ];
        let m = WordModel::new(Vocabulary::new(table).unwrap(), false);
        let input = format!("{ws}hello{ws}world{ws}there");
        let result = m.encode(&input).unwrap();
        let pieces: Vec<&str> = result.iter().map(|&(p, _)| p).collect();
        assert_eq!(
            pieces,
            vec![
                format!("{ws}hello"),
                format!("{ws}world"),
                format!("{ws}there")
            ]
        );
        assert_eq!(result[0].1, 1);
        assert_eq!(result[2].1, m.vocab().unk_id());
    }
}
