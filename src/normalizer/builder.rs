//! Compiles character-rewrite rules into the normalizer's binary form.
//!
//! A rule set is a sorted map from source codepoint sequences to target
//! sequences. Compilation removes rules already implied by shorter ones,
//! packs every target into one `\0`-delimited string table, and builds a
//! trie over the sources whose values index that table. The resulting blob
//! is stored inside the model container so a trained model normalizes
//! text without any external data.
//!
//! Full Unicode NFKC is out of scope (it cannot be expressed as longest
//! match string rewriting once multiple combining marks are involved); the
//! named builtin rule sets cover the compatibility mappings that dominate
//! real text: fullwidth forms, halfwidth katakana with voiced-mark
//! composition, enclosed digits, common squared ligatures, space flavors
//! and control characters.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{Error, Result};
use crate::trie::DoubleArray;

/// Source or target codepoint sequence.
pub type Chars = Vec<char>;

/// Sorted rule map from source sequence to replacement sequence.
pub type CharsMap = BTreeMap<Chars, Chars>;

/// Compiles `chars_map` into the normalizer blob:
/// `u32 trie_len || trie blob || \0-delimited replacements`.
pub fn compile_chars_map(chars_map: &CharsMap) -> Result<Vec<u8>> {
    if chars_map.is_empty() {
        return Err(Error::invalid_argument("chars map has no rules"));
    }
    let mut reduced = chars_map.clone();
    remove_redundant_map(&mut reduced)?;

    let mut replacements: Vec<u8> = Vec::new();
    let mut keys: Vec<(Vec<u8>, i32)> = Vec::new();
    for (src, trg) in &reduced {
        if src.is_empty() {
            return Err(Error::invalid_argument("chars map rule with empty source"));
        }
        let key: String = src.iter().collect();
        let value = replacements.len() as i32;
        let target: String = trg.iter().collect();
        replacements.extend_from_slice(target.as_bytes());
        replacements.push(0);
        keys.push((key.into_bytes(), value));
    }
    // BTreeMap order over codepoints equals byte order of the UTF-8 keys
    let entries: Vec<(&[u8], i32)> = keys.iter().map(|(k, v)| (k.as_slice(), *v)).collect();
    let trie_blob = DoubleArray::build(&entries)?.to_blob();

    let mut blob = Vec::with_capacity(4 + trie_blob.len() + replacements.len());
    blob.extend_from_slice(&(trie_blob.len() as u32).to_le_bytes());
    blob.extend_from_slice(&trie_blob);
    blob.extend_from_slice(&replacements);
    Ok(blob)
}

/// Splits a compiled blob back into its trie and replacement table.
pub(crate) fn split_blob(blob: &[u8]) -> Result<(&[u8], &[u8])> {
    if blob.len() < 4 {
        return Err(Error::DataLoss("charsmap blob is truncated".to_string()));
    }
    let trie_len = u32::from_le_bytes([blob[0], blob[1], blob[2], blob[3]]) as usize;
    if 4 + trie_len > blob.len() {
        return Err(Error::DataLoss(format!(
            "charsmap blob declares {} trie bytes but holds {}",
            trie_len,
            blob.len() - 4
        )));
    }
    Ok((&blob[4..4 + trie_len], &blob[4 + trie_len..]))
}

/// Inverse of [`compile_chars_map`], for round-trip checks and rule export.
pub fn decompile_chars_map(blob: &[u8]) -> Result<CharsMap> {
    let (trie_blob, replacements) = split_blob(blob)?;
    let trie = DoubleArray::from_blob(trie_blob)?;

    let mut map = CharsMap::new();
    for (key, value) in trie.entries() {
        let src: Chars = String::from_utf8(key)
            .map_err(|_| Error::DataLoss("charsmap key is not UTF-8".to_string()))?
            .chars()
            .collect();
        let offset = value as usize;
        let end = replacements[offset..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| offset + p)
            .ok_or_else(|| Error::DataLoss("replacement table is unterminated".to_string()))?;
        let trg: Chars = std::str::from_utf8(&replacements[offset..end])
            .map_err(|_| Error::DataLoss("replacement is not UTF-8".to_string()))?
            .chars()
            .collect();
        map.insert(src, trg);
    }
    Ok(map)
}

/// Resolves a symbolic rule name to a compiled blob. `identity` (or the
/// empty name) means no rewriting and yields an empty blob.
pub fn precompiled_chars_map(name: &str) -> Result<Vec<u8>> {
    match name {
        "" | "identity" => Ok(Vec::new()),
        "nfkc" => compile_chars_map(&nfkc_map()),
        "nmt_nfkc" => compile_chars_map(&nmt_nfkc_map()),
        "nfkc_cf" => {
            let mut map = nfkc_map();
            merge_case_fold(&mut map);
            compile_chars_map(&map)
        }
        "nmt_nfkc_cf" => {
            let mut map = nmt_nfkc_map();
            merge_case_fold(&mut map);
            compile_chars_map(&map)
        }
        other => Err(Error::NotFound(format!(
            "no precompiled normalization rule named `{other}`"
        ))),
    }
}

/// Loads a TSV rule file: hex source codepoints, a tab, hex target
/// codepoints. Anything after a second tab is a comment.
pub fn load_chars_map(path: &Path) -> Result<CharsMap> {
    let content = fs::read_to_string(path)?;
    let mut map = CharsMap::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split('\t');
        let src = parse_hex_chars(fields.next().unwrap_or(""), lineno)?;
        let trg = parse_hex_chars(fields.next().unwrap_or(""), lineno)?;
        if src.is_empty() {
            return Err(Error::invalid_argument(format!(
                "line {}: empty source sequence",
                lineno + 1
            )));
        }
        map.insert(src, trg);
    }
    Ok(map)
}

/// Writes `chars_map` in the TSV form accepted by [`load_chars_map`].
pub fn save_chars_map(path: &Path, chars_map: &CharsMap) -> Result<()> {
    let mut file = fs::File::create(path)?;
    for (src, trg) in chars_map {
        let src_hex: Vec<String> = src.iter().map(|c| format!("{:04X}", *c as u32)).collect();
        let trg_hex: Vec<String> = trg.iter().map(|c| format!("{:04X}", *c as u32)).collect();
        writeln!(file, "{}\t{}", src_hex.join(" "), trg_hex.join(" "))?;
    }
    Ok(())
}

fn parse_hex_chars(field: &str, lineno: usize) -> Result<Chars> {
    let mut chars = Chars::new();
    for tok in field.split_whitespace() {
        let v = u32::from_str_radix(tok, 16).map_err(|_| {
            Error::invalid_argument(format!("line {}: bad hex codepoint `{tok}`", lineno + 1))
        })?;
        let c = char::from_u32(v).ok_or_else(|| {
            Error::invalid_argument(format!("line {}: U+{v:04X} is not a scalar", lineno + 1))
        })?;
        chars.push(c);
    }
    Ok(chars)
}

/// Drops every rule that the remaining shorter rules already realize under
/// longest-match application. The surviving set is the minimal equivalent
/// subset; equivalence is verified before the map is replaced.
pub(crate) fn remove_redundant_map(chars_map: &mut CharsMap) -> Result<()> {
    let mut reduced = CharsMap::new();
    let mut max_len = 0;
    for (src, trg) in chars_map.iter() {
        max_len = max_len.max(src.len());
        if src.len() == 1 {
            reduced.insert(src.clone(), trg.clone());
        }
    }
    if max_len == 0 {
        return Err(Error::invalid_argument("chars map has no rules"));
    }
    for len in 2..=max_len {
        for (src, trg) in chars_map.iter() {
            if src.len() == len && *trg != apply_map(&reduced, src) {
                reduced.insert(src.clone(), trg.clone());
            }
        }
    }
    for (src, trg) in chars_map.iter() {
        if *trg != apply_map(&reduced, src) {
            return Err(Error::internal(format!(
                "redundancy removal changed the mapping of {src:?}"
            )));
        }
    }
    *chars_map = reduced;
    Ok(())
}

/// Longest-match rewrite of `input` under `map`; unmatched characters pass
/// through unchanged.
fn apply_map(map: &CharsMap, input: &[char]) -> Chars {
    let max_len = map.keys().map(Vec::len).max().unwrap_or(0);
    let mut out = Chars::new();
    let mut pos = 0;
    while pos < input.len() {
        let limit = max_len.min(input.len() - pos);
        let mut matched = 0;
        for len in (1..=limit).rev() {
            if let Some(trg) = map.get(&input[pos..pos + len]) {
                out.extend_from_slice(trg);
                matched = len;
                break;
            }
        }
        if matched == 0 {
            out.push(input[pos]);
            matched = 1;
        }
        pos += matched;
    }
    out
}

fn rule(map: &mut CharsMap, src: &[u32], trg: &str) {
    let src: Chars = src
        .iter()
        .filter_map(|&v| char::from_u32(v))
        .collect();
    map.insert(src, trg.chars().collect());
}

/// Compatibility subset of NFKC expressible as longest-match rewrites.
fn nfkc_map() -> CharsMap {
    let mut map = CharsMap::new();

    // fullwidth ASCII block
    for v in 0xff01..=0xff5e_u32 {
        if let Some(half) = char::from_u32(v - 0xfee0) {
            rule(&mut map, &[v], &half.to_string());
        }
    }

    // space flavors
    rule(&mut map, &[0x3000], " ");
    rule(&mut map, &[0x00a0], " ");
    for v in 0x2000..=0x200a_u32 {
        rule(&mut map, &[v], " ");
    }
    rule(&mut map, &[0x202f], " ");
    rule(&mut map, &[0x205f], " ");
    rule(&mut map, &[0x1680], " ");

    // enclosed digits 1..20
    for (i, v) in (0x2460..=0x2473_u32).enumerate() {
        rule(&mut map, &[v], &(i + 1).to_string());
    }

    // common squared ligatures
    rule(&mut map, &[0x337f], "株式会社");
    rule(&mut map, &[0x3231], "(株)");

    // halfwidth katakana: plain forms
    const HALFWIDTH: &[(char, char)] = &[
        ('｡', '。'),
        ('｢', '「'),
        ('｣', '」'),
        ('､', '、'),
        ('･', '・'),
        ('ｦ', 'ヲ'),
        ('ｧ', 'ァ'),
        ('ｨ', 'ィ'),
        ('ｩ', 'ゥ'),
        ('ｪ', 'ェ'),
        ('ｫ', 'ォ'),
        ('ｬ', 'ャ'),
        ('ｭ', 'ュ'),
        ('ｮ', 'ョ'),
        ('ｯ', 'ッ'),
        ('ｰ', 'ー'),
        ('ｱ', 'ア'),
        ('ｲ', 'イ'),
        ('ｳ', 'ウ'),
        ('ｴ', 'エ'),
        ('ｵ', 'オ'),
        ('ｶ', 'カ'),
        ('ｷ', 'キ'),
        ('ｸ', 'ク'),
        ('ｹ', 'ケ'),
        ('ｺ', 'コ'),
        ('ｻ', 'サ'),
        ('ｼ', 'シ'),
        ('ｽ', 'ス'),
        ('ｾ', 'セ'),
        ('ｿ', 'ソ'),
        ('ﾀ', 'タ'),
        ('ﾁ', 'チ'),
        ('ﾂ', 'ツ'),
        ('ﾃ', 'テ'),
        ('ﾄ', 'ト'),
        ('ﾅ', 'ナ'),
        ('ﾆ', 'ニ'),
        ('ﾇ', 'ヌ'),
        ('ﾈ', 'ネ'),
        ('ﾉ', 'ノ'),
        ('ﾊ', 'ハ'),
        ('ﾋ', 'ヒ'),
        ('ﾌ', 'フ'),
        ('ﾍ', 'ヘ'),
        ('ﾎ', 'ホ'),
        ('ﾏ', 'マ'),
        ('ﾐ', 'ミ'),
        ('ﾑ', 'ム'),
        ('ﾒ', 'メ'),
        ('ﾓ', 'モ'),
        ('ﾔ', 'ヤ'),
        ('ﾕ', 'ユ'),
        ('ﾖ', 'ヨ'),
        ('ﾗ', 'ラ'),
        ('ﾘ', 'リ'),
        ('ﾙ', 'ル'),
        ('ﾚ', 'レ'),
        ('ﾛ', 'ロ'),
        ('ﾜ', 'ワ'),
        ('ﾝ', 'ン'),
        ('ﾞ', '゛'),
        ('ﾟ', '゜'),
    ];
    for &(hw, fw) in HALFWIDTH {
        map.insert(vec![hw], vec![fw]);
    }

    // voiced-mark composition; rules are longer than the plain forms so
    // longest match picks them first
    const VOICED: &str = "ｶガｷギｸグｹゲｺゴｻザｼジｽズｾゼｿゾﾀダﾁヂﾂヅﾃデﾄドﾊバﾋビﾌブﾍベﾎボｳヴ";
    let voiced: Vec<char> = VOICED.chars().collect();
    for pair in voiced.chunks(2) {
        map.insert(vec![pair[0], 'ﾞ'], vec![pair[1]]);
    }
    const SEMI_VOICED: &str = "ﾊパﾋピﾌプﾍペﾎポ";
    let semi: Vec<char> = SEMI_VOICED.chars().collect();
    for pair in semi.chunks(2) {
        map.insert(vec![pair[0], 'ﾟ'], vec![pair[1]]);
    }

    map
}

/// NFKC subset plus NMT-oriented control and whitespace handling.
fn nmt_nfkc_map() -> CharsMap {
    let mut map = nfkc_map();
    for v in 0x0001..=0x0008_u32 {
        rule(&mut map, &[v], "");
    }
    rule(&mut map, &[0x0009], " ");
    rule(&mut map, &[0x000a], " ");
    rule(&mut map, &[0x000b], "");
    rule(&mut map, &[0x000c], " ");
    rule(&mut map, &[0x000d], " ");
    for v in 0x000e..=0x001f_u32 {
        rule(&mut map, &[v], "");
    }
    for v in 0x007f..=0x009f_u32 {
        rule(&mut map, &[v], "");
    }
    rule(&mut map, &[0x200b], "");
    rule(&mut map, &[0x200c], "");
    rule(&mut map, &[0x200d], "");
    rule(&mut map, &[0x200e], "");
    rule(&mut map, &[0x200f], "");
    rule(&mut map, &[0x2028], " ");
    rule(&mut map, &[0x2029], " ");
    rule(&mut map, &[0xfeff], "");
    rule(&mut map, &[0x00ad], "");
    map
}

/// Adds simple one-to-one case folding to `map` and folds the targets of
/// the existing rules.
fn merge_case_fold(map: &mut CharsMap) {
    for (_, trg) in map.iter_mut() {
        let folded: Chars = trg.iter().flat_map(|c| c.to_lowercase()).collect();
        *trg = folded;
    }
    let upper_ranges: &[(u32, u32)] = &[
        (0x0041, 0x005a), // A-Z
        (0x00c0, 0x00de), // Latin-1 uppercase
        (0x0391, 0x03a9), // Greek capitals
        (0x0400, 0x042f), // Cyrillic capitals
    ];
    for &(lo, hi) in upper_ranges {
        for v in lo..=hi {
            if v == 0x00d7 {
                continue; // multiplication sign
            }
            let Some(c) = char::from_u32(v) else { continue };
            let src = vec![c];
            if !map.contains_key(&src) {
                map.insert(src, c.to_lowercase().collect());
            }
        }
    }
}
