//! BPE segmentation.
//!
//! Pieces carry merge ranks as scores (higher score = earlier merge), so
//! encoding replays the training merges: an agenda of adjacent symbol
//! pairs ordered by score, merging greedily until no adjacent pair forms a
//! known piece. User-defined symbols are frozen during the initial split
//! and never participate in merges.

use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::error::Result;
use crate::model::{EncodeResult, Model, Vocabulary};
use crate::normalizer::PrefixMatcher;

pub struct BpeModel {
    vocab: Vocabulary,
    matcher: Arc<PrefixMatcher>,
}

/// Working symbol during the merge loop; an emptied span marks a symbol
/// consumed by a merge.
#[derive(Clone, Copy)]
struct Symbol {
    begin: usize,
    end: usize,
    prev: i32,
    next: i32,
    freeze: bool,
}

struct Pair {
    left: i32,
    right: i32,
    score: f32,
    /// Combined byte length when the pair was formed; a mismatch later
    /// means one side was merged away.
    size: usize,
}

impl PartialEq for Pair {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}
impl Eq for Pair {}
impl PartialOrd for Pair {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Pair {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // highest score first, then leftmost
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.left.cmp(&self.left))
    }
}

impl BpeModel {
    pub fn new(vocab: Vocabulary) -> Result<Self> {
        let matcher = Arc::new(PrefixMatcher::new(vocab.user_defined_symbols())?);
        Ok(BpeModel { vocab, matcher })
    }

    /// Pushes `[left, right]` onto the agenda when their concatenation is
    /// a usable vocabulary piece.
    fn maybe_add_pair(
        &self,
        normalized: &str,
        symbols: &[Symbol],
        agenda: &mut BinaryHeap<Pair>,
        left: i32,
        right: i32,
    ) {
        if left < 0 || right < 0 {
            return;
        }
        let (l, r) = (symbols[left as usize], symbols[right as usize]);
        if l.freeze || r.freeze {
            return;
        }
        let piece = &normalized[l.begin..r.end];
        let Some(id) = self.vocab.try_piece_to_id(piece) else {
            return;
        };
        if self.vocab.is_unused(id) {
            return;
        }
        let score = match self.vocab.get_score(id) {
            Ok(score) => score,
            Err(_) => return,
        };
        agenda.push(Pair {
            left,
            right,
            score,
            size: r.end - l.begin,
        });
    }
}

impl Model for BpeModel {
    fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    fn encode<'a>(&self, normalized: &'a str) -> Result<EncodeResult<'a>> {
        if normalized.is_empty() {
            return Ok(Vec::new());
        }

        // initial split: one symbol per character, user-defined symbols
        // kept whole and frozen
        let mut symbols: Vec<Symbol> = Vec::new();
        let bytes = normalized.as_bytes();
        let mut offset = 0;
        while offset < bytes.len() {
            let (len, found) = self.matcher.prefix_match(&bytes[offset..]);
            let index = symbols.len() as i32;
            symbols.push(Symbol {
                begin: offset,
                end: offset + len,
                prev: index - 1,
                next: index + 1,
                freeze: found,
            });
            offset += len;
        }
        if let Some(last) = symbols.last_mut() {
            last.next = -1;
        }

        let mut agenda: BinaryHeap<Pair> = BinaryHeap::new();
        for i in 1..symbols.len() {
            self.maybe_add_pair(normalized, &symbols, &mut agenda, i as i32 - 1, i as i32);
        }

        while let Some(top) = agenda.pop() {
            let left = symbols[top.left as usize];
            let right = symbols[top.right as usize];
            // a stale pair: one side was already merged into something else
            if left.begin == left.end
                || right.begin == right.end
                || (left.end - left.begin) + (right.end - right.begin) != top.size
            {
                continue;
            }

            symbols[top.left as usize].end = right.end;
            symbols[top.right as usize].begin = right.end; // tombstone
            symbols[top.right as usize].end = right.end;
            symbols[top.left as usize].next = right.next;
            if right.next >= 0 {
                symbols[right.next as usize].prev = top.left;
            }

            let merged = symbols[top.left as usize];
            self.maybe_add_pair(normalized, &symbols, &mut agenda, merged.prev, top.left);
            self.maybe_add_pair(normalized, &symbols, &mut agenda, top.left, merged.next);
        }

        let mut output = Vec::new();
        let mut index = 0i32;
        while index >= 0 {
            let symbol = symbols[index as usize];
            if symbol.begin < symbol.end {
                let piece = &normalized[symbol.begin..symbol.end];
                output.push((piece, self.vocab.piece_to_id(piece)));
            }
            index = symbol.next;
        }
        Ok(output)
    }
}
