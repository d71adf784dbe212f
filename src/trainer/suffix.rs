//! Suffix array over codepoint sequences.
//!
//! Seeds the unigram trainer: the corpus is concatenated into one `u32`
//! array with `0` sentence boundaries, and every repeated substring shows
//! up as an LCP interval of the suffix array — the internal suffix-tree
//! nodes, each carrying its occurrence count. Prefix-doubling construction
//! plus Kasai's LCP keeps this self-contained and fast enough for
//! multi-million-character corpora.

/// One internal node of the (virtual) suffix tree: the substring
/// `text[offset..offset + len]` occurs `freq` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Interval {
    pub offset: usize,
    pub len: usize,
    pub freq: usize,
}

/// Prefix-doubling suffix array construction.
pub(crate) fn suffix_array(text: &[u32]) -> Vec<usize> {
    let n = text.len();
    if n == 0 {
        return Vec::new();
    }
    let mut sa: Vec<usize> = (0..n).collect();
    let mut rank: Vec<i64> = text.iter().map(|&c| i64::from(c)).collect();
    let mut tmp: Vec<i64> = vec![0; n];
    let mut k = 1usize;
    loop {
        let key = |i: usize| (rank[i], if i + k < n { rank[i + k] } else { -1 });
        sa.sort_unstable_by_key(|&i| key(i));
        tmp[sa[0]] = 0;
        for j in 1..n {
            tmp[sa[j]] = tmp[sa[j - 1]] + i64::from(key(sa[j]) != key(sa[j - 1]));
        }
        rank.copy_from_slice(&tmp);
        if rank[sa[n - 1]] as usize == n - 1 {
            break;
        }
        k *= 2;
    }
    sa
}

/// Kasai's algorithm; `lcp[i]` is the common prefix length of
/// `sa[i - 1]` and `sa[i]`, with `lcp[0] = 0`.
pub(crate) fn lcp_array(text: &[u32], sa: &[usize]) -> Vec<usize> {
    let n = text.len();
    let mut rank = vec![0usize; n];
    for (i, &s) in sa.iter().enumerate() {
        rank[s] = i;
    }
    let mut lcp = vec![0usize; n];
    let mut h = 0usize;
    for i in 0..n {
        if rank[i] > 0 {
            let j = sa[rank[i] - 1];
            while i + h < n && j + h < n && text[i + h] == text[j + h] {
                h += 1;
            }
            lcp[rank[i]] = h;
            h = h.saturating_sub(1);
        } else {
            h = 0;
        }
    }
    lcp
}

/// Enumerates the LCP intervals (internal suffix-tree nodes) bottom-up.
/// Every returned interval has `len >= 1` and `freq >= 2`.
pub(crate) fn lcp_intervals(sa: &[usize], lcp: &[usize]) -> Vec<Interval> {
    let n = sa.len();
    let mut out = Vec::new();
    if n == 0 {
        return out;
    }
    // (lcp value, left boundary)
    let mut stack: Vec<(usize, usize)> = vec![(0, 0)];
    for i in 1..=n {
        let l = if i < n { lcp[i] } else { 0 };
        let mut left = i - 1;
        while let Some(&(top_lcp, top_left)) = stack.last() {
            if top_lcp <= l {
                break;
            }
            stack.pop();
            if top_lcp > 0 {
                out.push(Interval {
                    offset: sa[top_left],
                    len: top_lcp,
                    freq: i - top_left,
                });
            }
            left = top_left;
        }
        let top_lcp = stack.last().map_or(0, |&(v, _)| v);
        if top_lcp < l {
            stack.push((l, left));
        }
    }
    out
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_suffix_array_is_sorted_permutation(s in proptest::collection::vec(1u32..5, 0..48)) {
            let sa = suffix_array(&s);
            prop_assert_eq!(sa.len(), s.len());
            let mut seen = vec![false; s.len()];
            for &i in &sa {
                prop_assert!(!seen[i]);
                seen[i] = true;
            }
            for w in sa.windows(2) {
                prop_assert!(s[w[0]..] <= s[w[1]..]);
            }
        }

        #[test]
        fn prop_interval_freq_matches_occurrences(s in proptest::collection::vec(1u32..4, 1..32)) {
            let sa = suffix_array(&s);
            let lcp = lcp_array(&s, &sa);
            for iv in lcp_intervals(&sa, &lcp) {
                let needle = &s[iv.offset..iv.offset + iv.len];
                let count = (0..=s.len() - needle.len())
                    .filter(|&i| &s[i..i + needle.len()] == needle)
                    .count();
                prop_assert_eq!(count, iv.freq, "substring {:?}", needle);
            }
        }
    }
}
