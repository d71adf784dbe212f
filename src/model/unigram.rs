//! Unigram language model segmentation.
//!
//! Pieces are indexed in a double-array trie; for each unicode position of
//! the normalized input, every vocabulary piece starting there becomes a
//! lattice node, with a single-character unknown fallback guaranteeing the
//! lattice stays connected. Viterbi gives the best segmentation, the A*
//! n-best and the sampler come straight from the lattice.

use rand::RngCore;

use crate::error::{Error, Result};
use crate::model::lattice::Lattice;
use crate::model::{EncodeResult, Model, Vocabulary};
use crate::trie::DoubleArray;

/// Score offset of the unknown fallback below the worst piece.
const UNK_PENALTY: f32 = 10.0;

/// Trie-indexed scored pieces: the populate core shared by inference and
/// the unigram trainer (which runs EM over piece lists that have no meta
/// pieces and no registry).
#[derive(Debug)]
pub(crate) struct PieceIndex {
    trie: DoubleArray,
    scores: Vec<f32>,
    unused: Vec<bool>,
    user_defined: Vec<bool>,
    min_score: f32,
    max_score: f32,
    /// Id assigned to unknown fallback nodes; -1 keeps them out of
    /// marginal accumulation during training.
    unk_id: i32,
    /// Deepest prefix chain in the trie, bounding per-position matches.
    trie_results_size: usize,
}

impl PieceIndex {
    /// Builds the index over `(piece, id, score, unused, user_defined)`
    /// entries. Ids must be dense enough to index score arrays directly.
    pub(crate) fn build(
        entries: &[(&str, u32, f32, bool, bool)],
        vocab_len: usize,
        unk_id: i32,
    ) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::internal("no pieces are loaded"));
        }
        let mut sorted: Vec<(&[u8], i32)> = entries
            .iter()
            .map(|&(piece, id, _, _, _)| (piece.as_bytes(), id as i32))
            .collect();
        sorted.sort();
        let trie = DoubleArray::build(&sorted)?;

        let mut scores = vec![0.0f32; vocab_len];
        let mut unused = vec![false; vocab_len];
        let mut user_defined = vec![false; vocab_len];
        let mut min_score = f32::MAX;
        let mut max_score = f32::MIN;
        for &(_, id, score, is_unused, is_user) in entries {
            scores[id as usize] = score;
            unused[id as usize] = is_unused;
            user_defined[id as usize] = is_user;
            if !is_unused && !is_user {
                min_score = min_score.min(score);
                max_score = max_score.max(score);
            }
        }
        if min_score > max_score {
            // vocabulary of only user-defined/unused pieces
            min_score = 0.0;
            max_score = 0.0;
        }

        let mut trie_results_size = 0;
        for &(key, _) in &sorted {
            let hits = trie.common_prefix_search(key, usize::MAX).len();
            trie_results_size = trie_results_size.max(hits);
        }
        if trie_results_size == 0 {
            return Err(Error::internal("no entry is found in the trie"));
        }

        Ok(PieceIndex {
            trie,
            scores,
            unused,
            user_defined,
            min_score,
            max_score,
            unk_id,
            trie_results_size,
        })
    }

    pub(crate) fn min_score(&self) -> f32 {
        self.min_score
    }

    /// Inserts every piece occurrence into `lattice`, plus one unknown
    /// node wherever no single-character piece exists. After this call
    /// `lattice.viterbi()` yields the best segmentation.
    pub(crate) fn populate_nodes(&self, lattice: &mut Lattice) {
        let unk_score = self.min_score - UNK_PENALTY;
        let len = lattice.size();

        for begin_pos in 0..len {
            let begin_byte = lattice.surface_offset(begin_pos);
            let query = &lattice.sentence().as_bytes()[begin_byte..];

            let mut has_single_node = false;
            let hits = self.trie.common_prefix_search(query, self.trie_results_size);
            for (value, key_len) in hits {
                // unicode length of the matched byte span
                let target = begin_byte + key_len;
                let mut end_pos = begin_pos;
                while lattice.surface_offset(end_pos) < target {
                    end_pos += 1;
                }
                let length = end_pos - begin_pos;

                let id = value as usize;
                if self.unused[id] {
                    continue;
                }
                let node = lattice.insert(begin_pos, length);
                let score = if self.user_defined[id] {
                    // user defined symbols always win
                    length as f32 * self.max_score + 1.0
                } else {
                    self.scores[id]
                };
                let n = lattice.node_mut(node);
                n.id = value;
                n.score = score;
                if !has_single_node && length == 1 {
                    has_single_node = true;
                }
            }

            if !has_single_node {
                let node = lattice.insert(begin_pos, 1);
                let n = lattice.node_mut(node);
                n.id = self.unk_id;
                n.score = unk_score;
            }
        }
    }
}

/// Unigram segmentation model.
pub struct UnigramModel {
    vocab: Vocabulary,
    index: PieceIndex,
}

impl UnigramModel {
    pub fn new(vocab: Vocabulary) -> Result<Self> {
        let entries: Vec<(&str, u32, f32, bool, bool)> = vocab
            .pieces()
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                !matches!(
                    p.kind,
                    crate::model::PieceType::Control | crate::model::PieceType::Unknown
                )
            })
            .map(|(i, p)| {
                (
                    p.piece.as_str(),
                    i as u32,
                    p.score,
                    vocab.is_unused(i as u32),
                    vocab.is_user_defined(i as u32),
                )
            })
            .collect();
        let index = PieceIndex::build(&entries, vocab.len(), vocab.unk_id() as i32)?;
        Ok(UnigramModel { vocab, index })
    }

    fn lattice_for(&self, normalized: &str) -> Lattice {
        let mut lattice = Lattice::new();
        lattice.set_sentence(normalized);
        self.index.populate_nodes(&mut lattice);
        lattice
    }

    /// Maps a lattice path back onto `normalized` byte spans.
    fn path_to_result<'a>(normalized: &'a str, lattice: &Lattice, path: &[u32]) -> EncodeResult<'a> {
        path.iter()
            .map(|&node_id| {
                let node = lattice.node(node_id);
                let piece = &normalized[node.byte_begin as usize..node.byte_end as usize];
                (piece, node.id as u32)
            })
            .collect()
    }
}

impl Model for UnigramModel {
    fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    fn encode<'a>(&self, normalized: &'a str) -> Result<EncodeResult<'a>> {
        if normalized.is_empty() {
            return Ok(Vec::new());
        }
        let mut lattice = self.lattice_for(normalized);
        let path = lattice.viterbi()?;
        Ok(Self::path_to_result(normalized, &lattice, &path))
    }

    fn nbest_encode<'a>(
        &self,
        normalized: &'a str,
        nbest_size: usize,
    ) -> Result<Vec<(EncodeResult<'a>, f32)>> {
        if normalized.is_empty() {
            return Ok(Vec::new());
        }
        let nbest_size = nbest_size.clamp(1, 1024);
        let mut lattice = self.lattice_for(normalized);
        let mut results = Vec::new();
        for path in lattice.nbest(nbest_size)? {
            let score: f32 = path.iter().map(|&n| lattice.node(n).score).sum();
            results.push((Self::path_to_result(normalized, &lattice, &path), score));
        }
        Ok(results)
    }

    fn sample_encode<'a>(
        &self,
        normalized: &'a str,
        theta: f32,
        rng: &mut dyn RngCore,
    ) -> Result<EncodeResult<'a>> {
        if normalized.is_empty() {
            return Ok(Vec::new());
        }
        let mut lattice = self.lattice_for(normalized);
        let path = lattice.sample(theta, rng);
        Ok(Self::path_to_result(normalized, &lattice, &path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Piece, PieceType};

    fn model(pieces: &[(&str, f32)]) -> UnigramModel {
        let mut table = vec![
            Piece::new("<unk>", 0.0, PieceType::Unknown),
            Piece::new("<s>", 0.0, PieceType::Control),
            Piece::new("</s>", 0.0, PieceType::Control),
        ];
        for &(piece, score) in pieces {
            table.push(Piece::normal(piece, score));
        }
        UnigramModel::new(Vocabulary::new(table).unwrap()).unwrap()
    }

    #[test]
    fn test_encode_picks_best_segmentation() {
        let m = model(&[
            ("ab", -0.5),
            ("a", -1.0),
            ("b", -1.0),
            ("c", -1.0),
        ]);
        let result = m.encode("abc").unwrap();
        let pieces: Vec<&str> = result.iter().map(|&(p, _)| p).collect();
        assert_eq!(pieces, vec!["ab", "c"]);
    }

    #[test]
    fn test_encode_concatenation_restores_input() {
        let m = model(&[("ab", -0.5), ("a", -1.0), ("b", -1.0), ("c", -1.0)]);
        for input in ["abc", "abcabc", "cab"] {
            let result = m.encode(input).unwrap();
            let joined: String = result.iter().map(|&(p, _)| p).collect();
            assert_eq!(joined, input);
        }
    }

    #[test]
    fn test_encode_unknown_fallback() {
        let m = model(&[("a", -1.0)]);
        let result = m.encode("axa").unwrap();
        let ids: Vec<u32> = result.iter().map(|&(_, id)| id).collect();
        assert_eq!(result[1].0, "x");
        assert_eq!(ids[1], m.vocab().unk_id());
        assert_ne!(ids[0], m.vocab().unk_id());
    }

    #[test]
    fn test_encode_empty() {
        let m = model(&[("a", -1.0)]);
        assert!(m.encode("").unwrap().is_empty());
    }

    #[test]
    fn test_user_defined_always_selected() {
        let mut table = vec![
            Piece::new("<unk>", 0.0, PieceType::Unknown),
            Piece::new("<s>", 0.0, PieceType::Control),
            Piece::new("</s>", 0.0, PieceType::Control),
            Piece::normal("a", -0.1),
            Piece::normal("b", -0.1),
            Piece::normal("abc", -0.1),
            Piece::new("ab", 0.0, PieceType::UserDefined),
            Piece::normal("c", -0.1),
        ];
        table.push(Piece::normal("x", -0.1));
        let m = UnigramModel::new(Vocabulary::new(table).unwrap()).unwrap();
        let result = m.encode("abc").unwrap();
        let pieces: Vec<&str> = result.iter().map(|&(p, _)| p).collect();
        assert_eq!(pieces, vec!["ab", "c"]);
    }

    #[test]
    fn test_unused_pieces_are_skipped() {
        let table = vec![
            Piece::new("<unk>", 0.0, PieceType::Unknown),
            Piece::new("ab", -0.5, PieceType::Unused),
            Piece::normal("a", -1.0),
            Piece::normal("b", -1.0),
        ];
        let m = UnigramModel::new(Vocabulary::new(table).unwrap()).unwrap();
        let result = m.encode("ab").unwrap();
        let pieces: Vec<&str> = result.iter().map(|&(p, _)| p).collect();
        assert_eq!(pieces, vec!["a", "b"]);
    }

    #[test]
    fn test_nbest_first_equals_viterbi() {
        let m = model(&[("ab", -0.5), ("a", -1.0), ("b", -1.0)]);
        let best = m.encode("ab").unwrap();
        let nbests = m.nbest_encode("ab", 5).unwrap();
        assert_eq!(nbests[0].0, best);
        // two segmentations: "ab" and "a|b"
        assert_eq!(nbests.len(), 2);
        assert!(nbests[0].1 >= nbests[1].1);
    }

    #[test]
    fn test_sample_encode_concatenation() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;
        let m = model(&[("ab", -0.5), ("a", -1.0), ("b", -1.0)]);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let result = m.sample_encode("abab", 0.5, &mut rng).unwrap();
            let joined: String = result.iter().map(|&(p, _)| p).collect();
            assert_eq!(joined, "abab");
        }
    }
}
