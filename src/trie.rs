//! Static double-array trie.
//!
//! A read-only map from byte-string keys to non-negative `i32` values with
//! two lookups: exact match and common-prefix enumeration. Built offline
//! from lexicographically sorted keys; the result serializes to a flat blob
//! that can be embedded in a model container and reloaded without any
//! per-node allocation.
//!
//! Layout: two parallel `i32` arrays `base`/`check`. The transition from
//! state `s` on byte `b` lands on `base[s] + b + 1`; label `0` is reserved
//! for the end-of-key marker, whose cell stores the value in its `base`
//! slot. All lookups take `&self` only, so a built trie is freely shared
//! across threads.

use crate::error::{Error, Result};

const FREE: i32 = -1;

/// Read-only double-array trie.
#[derive(Debug, Clone)]
pub struct DoubleArray {
    base: Vec<i32>,
    check: Vec<i32>,
}

impl DoubleArray {
    /// Builds a trie from `entries`, which must be strictly sorted by key
    /// with no duplicates. Keys must be non-empty and values non-negative.
    pub fn build(entries: &[(&[u8], i32)]) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::invalid_argument("trie build requires at least one key"));
        }
        for window in entries.windows(2) {
            if window[0].0 >= window[1].0 {
                return Err(Error::invalid_argument(
                    "trie keys must be sorted and unique",
                ));
            }
        }
        for (key, value) in entries {
            if key.is_empty() {
                return Err(Error::invalid_argument("trie keys must be non-empty"));
            }
            if *value < 0 {
                return Err(Error::invalid_argument("trie values must be non-negative"));
            }
        }

        let mut builder = Builder {
            base: vec![0; 1024],
            check: vec![FREE; 1024],
            search_start: 1,
        };
        // cell 0 is the root and never free
        builder.check[0] = 0;
        builder.insert_range(entries, 0, entries.len(), 0, 0);

        let used = builder
            .check
            .iter()
            .rposition(|&c| c != FREE)
            .unwrap_or(0)
            + 1;
        builder.base.truncate(used);
        builder.check.truncate(used);
        Ok(DoubleArray {
            base: builder.base,
            check: builder.check,
        })
    }

    /// Looks up `key` exactly, returning its value if present.
    pub fn exact_match(&self, key: &[u8]) -> Option<i32> {
        let mut state = 0usize;
        for &b in key {
            state = self.child(state, b as usize + 1)?;
        }
        let leaf = self.child(state, 0)?;
        Some(self.base[leaf])
    }

    /// Enumerates every key that is a prefix of `query`, in increasing
    /// length order, truncated to `max_results` entries. Each result pairs
    /// the stored value with the matched byte length.
    pub fn common_prefix_search(&self, query: &[u8], max_results: usize) -> Vec<(i32, usize)> {
        let mut results = Vec::new();
        let mut state = 0usize;
        for (i, &b) in query.iter().enumerate() {
            if results.len() >= max_results {
                break;
            }
            match self.child(state, b as usize + 1) {
                Some(next) => state = next,
                None => break,
            }
            if let Some(leaf) = self.child(state, 0) {
                results.push((self.base[leaf], i + 1));
            }
        }
        results.truncate(max_results);
        results
    }

    /// Serializes to a flat little-endian blob.
    pub fn to_blob(&self) -> Vec<u8> {
        let n = self.base.len() as u32;
        let mut blob = Vec::with_capacity(4 + 8 * self.base.len());
        blob.extend_from_slice(&n.to_le_bytes());
        for &v in &self.base {
            blob.extend_from_slice(&v.to_le_bytes());
        }
        for &v in &self.check {
            blob.extend_from_slice(&v.to_le_bytes());
        }
        blob
    }

    /// Reconstructs a trie from [`DoubleArray::to_blob`] output.
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        if blob.len() < 4 {
            return Err(Error::DataLoss("trie blob is truncated".to_string()));
        }
        let n = u32::from_le_bytes([blob[0], blob[1], blob[2], blob[3]]) as usize;
        if blob.len() != 4 + 8 * n || n == 0 {
            return Err(Error::DataLoss(format!(
                "trie blob length mismatch: {} cells, {} bytes",
                n,
                blob.len()
            )));
        }
        let read = |offset: usize| {
            let at = 4 + 4 * offset;
            i32::from_le_bytes([blob[at], blob[at + 1], blob[at + 2], blob[at + 3]])
        };
        let base: Vec<i32> = (0..n).map(read).collect();
        let check: Vec<i32> = (n..2 * n).map(read).collect();
        Ok(DoubleArray { base, check })
    }

    /// Enumerates every `(key, value)` pair in lexicographic key order.
    pub fn entries(&self) -> Vec<(Vec<u8>, i32)> {
        let mut out = Vec::new();
        let mut key = Vec::new();
        self.collect_entries(0, &mut key, &mut out);
        out
    }

    fn collect_entries(&self, state: usize, key: &mut Vec<u8>, out: &mut Vec<(Vec<u8>, i32)>) {
        if let Some(leaf) = self.child(state, 0) {
            out.push((key.clone(), self.base[leaf]));
        }
        for b in 0u16..256 {
            if let Some(next) = self.child(state, b as usize + 1) {
                key.push(b as u8);
                self.collect_entries(next, key, out);
                key.pop();
            }
        }
    }

    fn child(&self, state: usize, label: usize) -> Option<usize> {
        let next = self.base[state] as usize + label;
        if next < self.check.len() && self.check[next] == state as i32 {
            Some(next)
        } else {
            None
        }
    }
}

struct Builder {
    base: Vec<i32>,
    check: Vec<i32>,
    search_start: usize,
}

impl Builder {
    /// Places the children of `state` for the sorted key range `[lo, hi)` at
    /// byte position `depth`, then recurses into each child group.
    fn insert_range(
        &mut self,
        entries: &[(&[u8], i32)],
        lo: usize,
        hi: usize,
        depth: usize,
        state: usize,
    ) {
        // (label, group range); label 0 marks a key ending here
        let mut groups: Vec<(usize, usize, usize)> = Vec::new();
        let mut i = lo;
        if entries[lo].0.len() == depth {
            groups.push((0, lo, lo + 1));
            i = lo + 1;
        }
        while i < hi {
            let byte = entries[i].0[depth];
            let mut j = i + 1;
            while j < hi && entries[j].0[depth] == byte {
                j += 1;
            }
            groups.push((byte as usize + 1, i, j));
            i = j;
        }

        let found = self.find_base(&groups);
        self.base[state] = found as i32;
        for &(label, _, _) in &groups {
            self.check[found + label] = state as i32;
        }
        // all children are reserved before recursing so grandchild
        // placement cannot steal their cells
        for &(label, glo, ghi) in &groups {
            let child = found + label;
            if label == 0 {
                self.base[child] = entries[glo].1;
            } else {
                self.insert_range(entries, glo, ghi, depth + 1, child);
            }
        }
    }

    fn find_base(&mut self, groups: &[(usize, usize, usize)]) -> usize {
        let mut b = self.search_start;
        'candidate: loop {
            for &(label, _, _) in groups {
                let cell = b + label;
                self.ensure_capacity(cell);
                if self.check[cell] != FREE {
                    b += 1;
                    continue 'candidate;
                }
            }
            // keep a rough lower bound so dense builds stay near-linear
            if groups.len() > 1 {
                self.search_start = self.search_start.max(b / 2);
            }
            return b;
        }
    }

    fn ensure_capacity(&mut self, cell: usize) {
        if cell >= self.check.len() {
            let new_len = (cell + 1).next_power_of_two();
            self.base.resize(new_len, 0);
            self.check.resize(new_len, FREE);
        }
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_exact_match_agrees_with_map(
            keys in proptest::collection::btree_map("[a-d]{1,6}", 0i32..1000, 1..24)
        ) {
            let keys: BTreeMap<String, i32> = keys;
            let entries: Vec<(&[u8], i32)> =
                keys.iter().map(|(k, &v)| (k.as_bytes(), v)).collect();
            let trie = DoubleArray::build(&entries).unwrap();
            for (k, &v) in &keys {
                prop_assert_eq!(trie.exact_match(k.as_bytes()), Some(v));
            }
            prop_assert_eq!(trie.exact_match(b"zzzz"), None);
        }

        #[test]
        fn prop_prefix_search_finds_all_prefixes(
            keys in proptest::collection::btree_map("[a-c]{1,5}", 0i32..100, 1..16),
            query in "[a-c]{0,8}"
        ) {
            let keys: BTreeMap<String, i32> = keys;
            let entries: Vec<(&[u8], i32)> =
                keys.iter().map(|(k, &v)| (k.as_bytes(), v)).collect();
            let trie = DoubleArray::build(&entries).unwrap();
            let hits = trie.common_prefix_search(query.as_bytes(), usize::MAX);
            let expected: Vec<(i32, usize)> = (1..=query.len())
                .filter_map(|len| keys.get(&query[..len]).map(|&v| (v, len)))
                .collect();
            prop_assert_eq!(hits, expected);
        }
    }
}
