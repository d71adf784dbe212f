//! UTF-8 and Unicode helpers shared by the normalizer, the segmenters and
//! the trainers.
//!
//! Byte-level decoding is deliberately lenient: a malformed sequence decodes
//! to U+FFFD and consumes exactly one byte, so downstream code never fails
//! on arbitrary input.

/// Whitespace sentinel (U+2581, Lower One Eighth Block) marking word
/// boundaries in normalized text.
pub const SPACE_SYMBOL: &str = "\u{2581}";

/// [`SPACE_SYMBOL`] as a char.
pub const SPACE_SYMBOL_CHAR: char = '\u{2581}';

/// Emitted for malformed UTF-8 input bytes.
pub const REPLACEMENT_CHAR: char = '\u{FFFD}';

/// Internal marker substituted for characters outside the coverage budget
/// during training. Never appears in emitted pieces.
pub(crate) const UNK_CHAR: char = '\u{0004}';

/// Length in bytes of the UTF-8 sequence introduced by `first_byte`.
/// Continuation and invalid leading bytes report 1 so the caller advances.
pub fn one_char_len(first_byte: u8) -> usize {
    match first_byte {
        0x00..=0x7f => 1,
        0xc2..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf4 => 4,
        _ => 1,
    }
}

/// Decodes one codepoint from the head of `bytes`.
///
/// Returns the char and the number of bytes consumed. Malformed input
/// (truncated sequence, overlong encoding, surrogate, stray continuation
/// byte) yields `(U+FFFD, 1)`.
pub fn decode_char(bytes: &[u8]) -> (char, usize) {
    if bytes.is_empty() {
        return (REPLACEMENT_CHAR, 0);
    }
    let len = one_char_len(bytes[0]).min(bytes.len());
    match std::str::from_utf8(&bytes[..len]) {
        Ok(s) => {
            // from_utf8 over exactly one sequence always yields one char
            let c = s.chars().next().unwrap_or(REPLACEMENT_CHAR);
            (c, len)
        }
        Err(_) => (REPLACEMENT_CHAR, 1),
    }
}

/// Iterator over `(char, consumed_bytes)` pairs of a lenient UTF-8 decode.
pub fn decode_chars(bytes: &[u8]) -> DecodeChars<'_> {
    DecodeChars { bytes }
}

pub struct DecodeChars<'a> {
    bytes: &'a [u8],
}

impl<'a> Iterator for DecodeChars<'a> {
    type Item = (char, usize);

    fn next(&mut self) -> Option<(char, usize)> {
        if self.bytes.is_empty() {
            return None;
        }
        let (c, len) = decode_char(self.bytes);
        self.bytes = &self.bytes[len..];
        Some((c, len))
    }
}

/// Coarse script classes used to keep pieces from crossing writing-system
/// boundaries. Hiragana, katakana and the prolonged sound mark are folded
/// into [`Script::Han`] so that ordinary Japanese text forms one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Latin,
    Greek,
    Cyrillic,
    Armenian,
    Hebrew,
    Arabic,
    Devanagari,
    Bengali,
    Tamil,
    Thai,
    Georgian,
    Hangul,
    Han,
    Common,
}

/// Script class of `c` with the Japanese folding applied.
pub fn script(c: char) -> Script {
    let v = c as u32;
    match v {
        0x0041..=0x005a | 0x0061..=0x007a | 0x00c0..=0x024f | 0x1e00..=0x1eff => Script::Latin,
        0x0370..=0x03ff | 0x1f00..=0x1fff => Script::Greek,
        0x0400..=0x052f => Script::Cyrillic,
        0x0530..=0x058f => Script::Armenian,
        0x0590..=0x05ff => Script::Hebrew,
        0x0600..=0x06ff | 0x0750..=0x077f => Script::Arabic,
        0x0900..=0x097f => Script::Devanagari,
        0x0980..=0x09ff => Script::Bengali,
        0x0b80..=0x0bff => Script::Tamil,
        0x0e00..=0x0e7f => Script::Thai,
        0x10a0..=0x10ff => Script::Georgian,
        0x1100..=0x11ff | 0x3130..=0x318f | 0xac00..=0xd7af => Script::Hangul,
        // Han plus hiragana/katakana (incl. halfwidth) and U+30FC
        0x3400..=0x4dbf | 0x4e00..=0x9fff | 0xf900..=0xfaff => Script::Han,
        0x3040..=0x30ff | 0x31f0..=0x31ff | 0xff66..=0xff9d => Script::Han,
        _ => Script::Common,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_char_len() {
        assert_eq!(one_char_len(b'a'), 1);
        assert_eq!(one_char_len(0xc3), 2); // é
        assert_eq!(one_char_len(0xe2), 3); // U+2581
        assert_eq!(one_char_len(0xf0), 4); // emoji plane
        assert_eq!(one_char_len(0x80), 1); // stray continuation
        assert_eq!(one_char_len(0xff), 1);
    }

    #[test]
    fn test_decode_char_ascii() {
        assert_eq!(decode_char(b"abc"), ('a', 1));
    }

    #[test]
    fn test_decode_char_multibyte() {
        let ws = SPACE_SYMBOL.as_bytes();
        assert_eq!(decode_char(ws), (SPACE_SYMBOL_CHAR, 3));
    }

    #[test]
    fn test_decode_char_malformed() {
        // truncated three-byte sequence: one replacement per bad byte
        assert_eq!(decode_char(&[0xe3, 0x81]), (REPLACEMENT_CHAR, 1));
        // overlong encoding
        assert_eq!(decode_char(&[0xc0, 0x82]), (REPLACEMENT_CHAR, 1));
        // lone continuation byte
        assert_eq!(decode_char(&[0x82]), (REPLACEMENT_CHAR, 1));
    }

    #[test]
    fn test_decode_chars_mixed() {
        let decoded: Vec<char> = decode_chars(b"a\x80b").map(|(c, _)| c).collect();
        assert_eq!(decoded, vec!['a', REPLACEMENT_CHAR, 'b']);
    }

    #[test]
    fn test_script_classes() {
        assert_eq!(script('a'), Script::Latin);
        assert_eq!(script('я'), Script::Cyrillic);
        assert_eq!(script('京'), Script::Han);
        // hiragana and katakana fold into Han
        assert_eq!(script('ぁ'), Script::Han);
        assert_eq!(script('ア'), Script::Han);
        assert_eq!(script('ー'), Script::Han);
        assert_eq!(script('한'), Script::Hangul);
        assert_eq!(script('!'), Script::Common);
        assert_eq!(script('1'), Script::Common);
    }
}
