//! Text normalization.
//!
//! The normalizer rewrites raw input into the canonical form the segmenters
//! operate on: longest-match character rewriting driven by a compiled rule
//! blob, whitespace escaping to the U+2581 sentinel, optional dummy
//! prefix/suffix, and redundant-space removal. Alongside the normalized
//! string it emits a monotone byte alignment back to the original input so
//! encode results can report original spans.
//!
//! Normalization never fails on arbitrary bytes: malformed UTF-8 becomes
//! U+FFFD, one byte at a time.

pub mod builder;

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::{NormalizerSpec, TrainerSpec};
use crate::error::{Error, Result};
use crate::trie::DoubleArray;
use crate::unicode::{one_char_len, REPLACEMENT_CHAR, SPACE_SYMBOL};

/// Upper bound on rule-trie prefix hits examined per position; matches the
/// deepest source sequence any rule set ships.
const MAX_TRIE_RESULTS: usize = 32;

/// Longest-prefix matcher over a fixed string set, used to pass
/// user-defined symbols through normalization and segmentation untouched.
#[derive(Debug)]
pub struct PrefixMatcher {
    trie: Option<DoubleArray>,
}

impl PrefixMatcher {
    /// Builds a matcher from a sorted symbol set. An empty set matches
    /// nothing and every query falls through to single-character advance.
    pub fn new(dic: &BTreeSet<String>) -> Result<Self> {
        if dic.is_empty() {
            return Ok(PrefixMatcher { trie: None });
        }
        let entries: Vec<(&[u8], i32)> = dic
            .iter()
            .enumerate()
            .map(|(i, k)| (k.as_bytes(), i as i32))
            .collect();
        Ok(PrefixMatcher {
            trie: Some(DoubleArray::build(&entries)?),
        })
    }

    /// Finds the longest entry that prefixes `w`. Returns the matched byte
    /// length and whether a dictionary entry matched; with no match, one
    /// UTF-8 character is consumed.
    pub fn prefix_match(&self, w: &[u8]) -> (usize, bool) {
        if w.is_empty() {
            return (0, false);
        }
        if let Some(trie) = &self.trie {
            if let Some(&(_, len)) = trie.common_prefix_search(w, usize::MAX).last() {
                return (len, true);
            }
        }
        (one_char_len(w[0]).min(w.len()), false)
    }

    /// Replaces every dictionary occurrence in `w` with `out`.
    pub fn global_replace(&self, w: &str, out: &str) -> String {
        let mut result = String::with_capacity(w.len());
        let mut rest = w.as_bytes();
        let mut offset = 0;
        while !rest.is_empty() {
            let (len, found) = self.prefix_match(rest);
            if found {
                result.push_str(out);
            } else {
                result.push_str(&w[offset..offset + len]);
            }
            offset += len;
            rest = &rest[len..];
        }
        result
    }
}

/// Longest-match text normalizer configured by a [`NormalizerSpec`].
#[derive(Debug)]
pub struct Normalizer {
    add_dummy_prefix: bool,
    remove_extra_whitespaces: bool,
    escape_whitespaces: bool,
    treat_whitespace_as_suffix: bool,
    trie: Option<DoubleArray>,
    replacements: Vec<u8>,
    matcher: Option<Arc<PrefixMatcher>>,
}

impl Normalizer {
    /// Builds a normalizer from `spec`, resolving its rule source (TSV
    /// path, inline blob, or symbolic name) into a compiled rule set.
    pub fn new(spec: &NormalizerSpec) -> Result<Self> {
        Self::from_spec(spec, false)
    }

    /// Like [`Normalizer::new`] but honoring the trainer's
    /// whitespace-as-suffix setting.
    pub fn with_trainer_spec(spec: &NormalizerSpec, trainer: &TrainerSpec) -> Result<Self> {
        Self::from_spec(spec, trainer.treat_whitespace_as_suffix)
    }

    /// Resolves `spec` to the compiled rule blob it will normalize with.
    /// Empty means identity rewriting.
    pub fn compile_blob(spec: &NormalizerSpec) -> Result<Vec<u8>> {
        if let Some(tsv) = &spec.normalization_rule_tsv {
            let map = builder::load_chars_map(tsv)?;
            return builder::compile_chars_map(&map);
        }
        if !spec.precompiled_charsmap.is_empty() {
            return Ok(spec.precompiled_charsmap.clone());
        }
        builder::precompiled_chars_map(&spec.name)
    }

    fn from_spec(spec: &NormalizerSpec, treat_whitespace_as_suffix: bool) -> Result<Self> {
        let blob = Self::compile_blob(spec)?;
        let (trie, replacements) = if blob.is_empty() {
            (None, Vec::new())
        } else {
            let (trie_blob, replacements) = builder::split_blob(&blob)?;
            (
                Some(DoubleArray::from_blob(trie_blob)?),
                replacements.to_vec(),
            )
        };
        Ok(Normalizer {
            add_dummy_prefix: spec.add_dummy_prefix,
            remove_extra_whitespaces: spec.remove_extra_whitespaces,
            escape_whitespaces: spec.escape_whitespaces,
            treat_whitespace_as_suffix,
            trie,
            replacements,
            matcher: None,
        })
    }

    /// Installs the user-defined-symbol matcher consulted before any rule.
    pub fn set_prefix_matcher(&mut self, matcher: Arc<PrefixMatcher>) {
        self.matcher = Some(matcher);
    }

    /// Normalizes `input`, returning the normalized string and the byte
    /// alignment `norm_to_orig` of length `normalized.len() + 1`.
    pub fn normalize(&self, input: impl AsRef<[u8]>) -> Result<(String, Vec<usize>)> {
        let mut input: &[u8] = input.as_ref();
        if input.is_empty() {
            return Ok((String::new(), vec![0]));
        }

        let mut normalized: Vec<u8> = Vec::with_capacity(input.len() * 3);
        let mut norm_to_orig: Vec<usize> = Vec::with_capacity(input.len() * 3 + 1);
        let mut consumed = 0usize;

        // heading spaces
        if self.remove_extra_whitespaces {
            while !input.is_empty() {
                let (p, len) = self.normalize_prefix(input);
                if p.as_ref() != b" " {
                    break;
                }
                consumed += len;
                input = &input[len..];
            }
        }
        if input.is_empty() {
            return Ok((String::new(), vec![consumed]));
        }

        if !self.treat_whitespace_as_suffix && self.add_dummy_prefix {
            self.append_space(&mut normalized, &mut norm_to_orig, consumed);
        }

        let mut is_prev_space = self.remove_extra_whitespaces;
        while !input.is_empty() {
            let (p, len) = self.normalize_prefix(input);
            let mut sp: &[u8] = p.as_ref();

            // drop heading spaces when the previous output ended in one
            while is_prev_space {
                match sp.strip_prefix(b" ") {
                    Some(rest) => sp = rest,
                    None => break,
                }
            }

            if !sp.is_empty() {
                for &b in sp {
                    if self.escape_whitespaces && b == b' ' {
                        normalized.extend_from_slice(SPACE_SYMBOL.as_bytes());
                        for _ in 0..SPACE_SYMBOL.len() {
                            norm_to_orig.push(consumed);
                        }
                    } else {
                        normalized.push(b);
                        norm_to_orig.push(consumed);
                    }
                }
                is_prev_space = sp.ends_with(b" ");
            }

            consumed += len;
            input = &input[len..];
            if !self.remove_extra_whitespaces {
                is_prev_space = false;
            }
        }

        // tailing spaces
        if self.remove_extra_whitespaces {
            let space: &[u8] = if self.escape_whitespaces {
                SPACE_SYMBOL.as_bytes()
            } else {
                b" "
            };
            while normalized.ends_with(space) {
                let length = normalized.len() - space.len();
                consumed = norm_to_orig[length];
                normalized.truncate(length);
                norm_to_orig.truncate(length);
            }
        }

        if self.treat_whitespace_as_suffix && self.add_dummy_prefix {
            self.append_space(&mut normalized, &mut norm_to_orig, consumed);
        }

        norm_to_orig.push(consumed);
        if norm_to_orig.len() != normalized.len() + 1 {
            return Err(Error::internal("normalization alignment out of sync"));
        }
        let normalized = String::from_utf8(normalized)
            .map_err(|_| Error::internal("normalizer emitted invalid UTF-8"))?;
        Ok((normalized, norm_to_orig))
    }

    /// Normalizes without producing the alignment, as training does.
    pub fn normalize_string(&self, input: impl AsRef<[u8]>) -> Result<String> {
        Ok(self.normalize(input)?.0)
    }

    fn append_space(&self, normalized: &mut Vec<u8>, norm_to_orig: &mut Vec<usize>, consumed: usize) {
        if self.escape_whitespaces {
            normalized.extend_from_slice(SPACE_SYMBOL.as_bytes());
            for _ in 0..SPACE_SYMBOL.len() {
                norm_to_orig.push(consumed);
            }
        } else {
            normalized.push(b' ');
            norm_to_orig.push(consumed);
        }
    }

    /// Normalizes the head of `input`: user-defined symbols pass through,
    /// otherwise the longest rule match applies, otherwise one codepoint is
    /// copied (U+FFFD per malformed byte). Returns the normalized prefix
    /// and the number of input bytes it consumed.
    fn normalize_prefix<'a>(&'a self, input: &'a [u8]) -> (Cow<'a, [u8]>, usize) {
        if let Some(matcher) = &self.matcher {
            let (len, found) = matcher.prefix_match(input);
            if found {
                return (Cow::Borrowed(&input[..len]), len);
            }
        }

        let mut longest: Option<(i32, usize)> = None;
        if let Some(trie) = &self.trie {
            // results come shortest-first; keep the last
            if let Some(&hit) = trie.common_prefix_search(input, MAX_TRIE_RESULTS).last() {
                longest = Some(hit);
            }
        }

        match longest {
            Some((value, len)) => {
                let offset = value as usize;
                let end = self.replacements[offset..]
                    .iter()
                    .position(|&b| b == 0)
                    .map_or(self.replacements.len(), |p| offset + p);
                (Cow::Borrowed(&self.replacements[offset..end]), len)
            }
            None => {
                let char_len = one_char_len(input[0]).min(input.len());
                match std::str::from_utf8(&input[..char_len]) {
                    Ok(_) => (Cow::Borrowed(&input[..char_len]), char_len),
                    Err(_) => {
                        let mut rc = [0u8; 4];
                        let rc = REPLACEMENT_CHAR.encode_utf8(&mut rc).as_bytes().to_vec();
                        (Cow::Owned(rc), 1)
                    }
                }
            }
        }
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::config::NormalizerSpec;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_alignment_is_monotone(input in "[ a-z①②③\u{3000}]{0,24}") {
            let spec = NormalizerSpec::default().with_name("nmt_nfkc");
            let normalizer = Normalizer::new(&spec).unwrap();
            let (normalized, n2i) = normalizer.normalize(&input).unwrap();
            prop_assert_eq!(n2i.len(), normalized.len() + 1);
            for w in n2i.windows(2) {
                prop_assert!(w[0] <= w[1]);
            }
            prop_assert!(*n2i.last().unwrap() <= input.len());
        }

        #[test]
        fn prop_trailing_alignment_without_trim(input in "[a-z]{1,16}") {
            let spec = NormalizerSpec::default().with_name("nmt_nfkc");
            let normalizer = Normalizer::new(&spec).unwrap();
            let (_, n2i) = normalizer.normalize(&input).unwrap();
            prop_assert_eq!(*n2i.last().unwrap(), input.len());
        }

        #[test]
        fn prop_never_fails_on_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..32)) {
            let spec = NormalizerSpec::default().with_name("nmt_nfkc");
            let normalizer = Normalizer::new(&spec).unwrap();
            prop_assert!(normalizer.normalize(&bytes).is_ok());
        }
    }
}
