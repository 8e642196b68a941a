//! Literal payload conversion.
//!
//! The lexer hands over raw lexemes; this module turns them into values:
//! escape decoding, interpolation segmentation, number parsing with
//! big-integer promotion, and bytes/bits payload decoding.

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::Num;

use funxy_common::token::{BitsBase, BytesBase};

/// Strip the delimiters off a string-family lexeme (`"..."`, `` `...` ``,
/// ``` ```...``` ```).
pub(crate) fn strip_quotes(lexeme: &str) -> &str {
    if let Some(inner) = lexeme.strip_prefix("```").and_then(|s| s.strip_suffix("```")) {
        return inner;
    }
    if let Some(inner) = lexeme.strip_prefix('`').and_then(|s| s.strip_suffix('`')) {
        return inner;
    }
    if let Some(inner) = lexeme.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return inner;
    }
    // Unterminated literal recovered by the lexer; take what is there.
    lexeme.trim_start_matches(['"', '`']).trim_end_matches(['"', '`'])
}

/// Decode backslash escapes in string content.
pub(crate) fn decode_escapes(raw: &str) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('$') => out.push('$'),
            Some('`') => out.push('`'),
            Some('u') => {
                // \u{XXXX}
                if chars.next() != Some('{') {
                    return Err("expected `{` after \\u".to_string());
                }
                let mut hex = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    hex.push(c);
                }
                let code = u32::from_str_radix(&hex, 16)
                    .map_err(|_| format!("invalid unicode escape \\u{{{hex}}}"))?;
                out.push(
                    char::from_u32(code)
                        .ok_or_else(|| format!("invalid unicode scalar \\u{{{hex}}}"))?,
                );
            }
            Some(other) => return Err(format!("invalid escape sequence \\{other}")),
            None => return Err("dangling backslash".to_string()),
        }
    }
    Ok(out)
}

/// A raw segment of an interpolated string body.
pub(crate) enum RawSegment {
    /// Literal text (escapes not yet decoded).
    Lit(String),
    /// The inside of a `${...}` with its byte offset into the content.
    Expr { offset: usize, text: String },
}

/// Split string content into literal and `${...}` segments.
///
/// The brace balance is token-shape aware (nested strings, chars, raw
/// strings, comments) so that braces inside them do not close the
/// interpolation -- mirroring the lexer's pre-scan.
pub(crate) fn segment_interpolation(raw: &str) -> Vec<RawSegment> {
    let bytes = raw.as_bytes();
    let mut segments = Vec::new();
    let mut lit_start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i = (i + 2).min(bytes.len()),
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                if i > lit_start {
                    segments.push(RawSegment::Lit(raw[lit_start..i].to_string()));
                }
                let inner_start = i + 2;
                let inner_end = scan_balanced(raw, inner_start);
                segments.push(RawSegment::Expr {
                    offset: inner_start,
                    text: raw[inner_start..inner_end].to_string(),
                });
                i = (inner_end + 1).min(bytes.len());
                lit_start = i;
            }
            _ => i += 1,
        }
    }
    if lit_start < bytes.len() {
        segments.push(RawSegment::Lit(raw[lit_start..].to_string()));
    }
    segments
}

/// Scan from `start` to the `}` closing the interpolation, honoring nested
/// braces, strings, chars, raw strings, and comments. Returns the byte
/// offset of that `}` (or the end of input).
fn scan_balanced(raw: &str, start: usize) -> usize {
    let bytes = raw.as_bytes();
    let mut depth: u32 = 1;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => {
                depth += 1;
                i += 1;
            }
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return i;
                }
                i += 1;
            }
            b'"' => i = skip_quoted(bytes, i, b'"'),
            b'\'' => i = skip_quoted(bytes, i, b'\''),
            b'`' => i = skip_quoted(bytes, i, b'`'),
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let mut comment_depth = 1u32;
                i += 2;
                while i < bytes.len() && comment_depth > 0 {
                    if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
                        comment_depth += 1;
                        i += 2;
                    } else if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                        comment_depth -= 1;
                        i += 2;
                    } else {
                        i += 1;
                    }
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Skip a quoted region starting at `i` (which holds the quote). Returns
/// the index just past the closing quote.
fn skip_quoted(bytes: &[u8], i: usize, quote: u8) -> usize {
    let mut j = i + 1;
    while j < bytes.len() {
        if bytes[j] == b'\\' {
            j += 2;
        } else if bytes[j] == quote {
            return j + 1;
        } else {
            j += 1;
        }
    }
    j
}

/// An integer literal parse result: small if it fits `i64`, promoted to a
/// big integer otherwise.
pub(crate) enum IntParse {
    Small(i64),
    Big(BigInt),
}

/// Parse an integer lexeme, handling radix prefixes, `_` separators, and
/// an optional trailing `n` (which forces a big integer).
pub(crate) fn parse_int_lexeme(lexeme: &str) -> Result<IntParse, String> {
    let forced_big = lexeme.ends_with('n');
    let body = lexeme.strip_suffix('n').unwrap_or(lexeme);
    let (radix, digits) = split_radix(body);
    let digits: String = digits.chars().filter(|&c| c != '_').collect();
    if digits.is_empty() {
        return Err(format!("invalid number literal: {lexeme}"));
    }

    if !forced_big {
        if let Ok(value) = i64::from_str_radix(&digits, radix) {
            return Ok(IntParse::Small(value));
        }
    }
    BigInt::from_str_radix(&digits, radix)
        .map(IntParse::Big)
        .map_err(|_| format!("invalid number literal: {lexeme}"))
}

fn split_radix(body: &str) -> (u32, &str) {
    if let Some(rest) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        (16, rest)
    } else if let Some(rest) = body.strip_prefix("0o").or_else(|| body.strip_prefix("0O")) {
        (8, rest)
    } else if let Some(rest) = body.strip_prefix("0b").or_else(|| body.strip_prefix("0B")) {
        (2, rest)
    } else {
        (10, body)
    }
}

/// Parse a rational lexeme (`3r`, `1.5r`) into an exact fraction.
pub(crate) fn parse_rational_lexeme(lexeme: &str) -> Result<BigRational, String> {
    let body = lexeme
        .strip_suffix('r')
        .ok_or_else(|| format!("invalid rational literal: {lexeme}"))?;
    let body: String = body.chars().filter(|&c| c != '_').collect();
    if let Some(dot) = body.find('.') {
        let (int_part, frac_part) = body.split_at(dot);
        let frac_part = &frac_part[1..];
        let digits = format!("{int_part}{frac_part}");
        let numer: BigInt = digits
            .parse()
            .map_err(|_| format!("invalid rational literal: {lexeme}"))?;
        let denom = BigInt::from(10u32).pow(frac_part.len() as u32);
        Ok(BigRational::new(numer, denom))
    } else {
        let numer: BigInt = body
            .parse()
            .map_err(|_| format!("invalid rational literal: {lexeme}"))?;
        Ok(BigRational::from_integer(numer))
    }
}

/// Parse a float lexeme.
pub(crate) fn parse_float_lexeme(lexeme: &str) -> Result<f64, String> {
    let body: String = lexeme.chars().filter(|&c| c != '_').collect();
    body.parse()
        .map_err(|_| format!("invalid float literal: {lexeme}"))
}

/// Decode a bytes literal payload.
pub(crate) fn decode_bytes(base: BytesBase, payload: &str) -> Result<Vec<u8>, String> {
    match base {
        BytesBase::Utf8 => Ok(decode_escapes(payload)?.into_bytes()),
        BytesBase::Hex => {
            let digits: Vec<char> = payload
                .chars()
                .filter(|c| !c.is_whitespace() && *c != '_')
                .collect();
            if digits.len() % 2 != 0 {
                return Err("hex bytes literal needs an even number of digits".to_string());
            }
            digits
                .chunks(2)
                .map(|pair| {
                    let hi = pair[0].to_digit(16).ok_or("invalid hex digit")?;
                    let lo = pair[1].to_digit(16).ok_or("invalid hex digit")?;
                    Ok((hi * 16 + lo) as u8)
                })
                .collect::<Result<Vec<u8>, &str>>()
                .map_err(|e| e.to_string())
        }
        BytesBase::Binary => {
            let digits: Vec<char> = payload
                .chars()
                .filter(|c| !c.is_whitespace() && *c != '_')
                .collect();
            if digits.len() % 8 != 0 {
                return Err("binary bytes literal needs a multiple of 8 digits".to_string());
            }
            digits
                .chunks(8)
                .map(|bits| {
                    let mut byte = 0u8;
                    for &b in bits {
                        byte = (byte << 1)
                            | match b {
                                '0' => 0,
                                '1' => 1,
                                _ => return Err("invalid binary digit"),
                            };
                    }
                    Ok(byte)
                })
                .collect::<Result<Vec<u8>, &str>>()
                .map_err(|e| e.to_string())
        }
    }
}

/// Decode a bits literal payload into MSB-first packed bytes plus the
/// exact bit length.
pub(crate) fn decode_bits(base: BitsBase, payload: &str) -> Result<(Vec<u8>, usize), String> {
    let bits_per_digit = match base {
        BitsBase::Binary => 1,
        BitsBase::Octal => 3,
        BitsBase::Hex => 4,
    };
    let radix = match base {
        BitsBase::Binary => 2,
        BitsBase::Octal => 8,
        BitsBase::Hex => 16,
    };
    let mut bits = Vec::new();
    for c in payload.chars() {
        if c.is_whitespace() || c == '_' {
            continue;
        }
        let value = c
            .to_digit(radix)
            .ok_or_else(|| format!("invalid digit `{c}` in bits literal"))?;
        for shift in (0..bits_per_digit).rev() {
            bits.push((value >> shift) & 1 == 1);
        }
    }
    let len = bits.len();
    let mut data = vec![0u8; len.div_ceil(8)];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            data[i / 8] |= 1 << (7 - (i % 8));
        }
    }
    Ok((data, len))
}

/// Decode a char literal lexeme (including quotes).
pub(crate) fn decode_char(lexeme: &str) -> Result<char, String> {
    let inner = lexeme
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .ok_or("malformed character literal")?;
    let decoded = decode_escapes(inner)?;
    let mut chars = decoded.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err("character literal must contain exactly one character".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_decode() {
        assert_eq!(decode_escapes(r"a\nb\t\\").unwrap(), "a\nb\t\\");
        assert_eq!(decode_escapes(r"\u{41}").unwrap(), "A");
        assert!(decode_escapes(r"\q").is_err());
    }

    #[test]
    fn interpolation_segments() {
        let segs = segment_interpolation("a ${x} b ${f(\"}\")} c");
        let shapes: Vec<String> = segs
            .iter()
            .map(|s| match s {
                RawSegment::Lit(t) => format!("L:{t}"),
                RawSegment::Expr { text, .. } => format!("E:{text}"),
            })
            .collect();
        assert_eq!(shapes, vec!["L:a ", "E:x", "L: b ", "E:f(\"}\")", "L: c"]);
    }

    #[test]
    fn int_parsing_promotes_oversized() {
        match parse_int_lexeme("42").unwrap() {
            IntParse::Small(42) => {}
            other => panic!("expected Small(42), got {:?}", discriminant_name(&other)),
        }
        match parse_int_lexeme("99999999999999999999999999").unwrap() {
            IntParse::Big(_) => {}
            _ => panic!("expected Big"),
        }
        match parse_int_lexeme("7n").unwrap() {
            IntParse::Big(b) => assert_eq!(b, num_bigint::BigInt::from(7)),
            _ => panic!("expected Big"),
        }
        match parse_int_lexeme("0xFF").unwrap() {
            IntParse::Small(255) => {}
            _ => panic!("expected Small(255)"),
        }
    }

    fn discriminant_name(p: &IntParse) -> &'static str {
        match p {
            IntParse::Small(_) => "Small",
            IntParse::Big(_) => "Big",
        }
    }

    #[test]
    fn rational_parsing() {
        let r = parse_rational_lexeme("1.5r").unwrap();
        assert_eq!(r, BigRational::new(3.into(), 2.into()));
        let r = parse_rational_lexeme("3r").unwrap();
        assert_eq!(r, BigRational::from_integer(3.into()));
    }

    #[test]
    fn bytes_decoding() {
        assert_eq!(decode_bytes(BytesBase::Hex, "ff00").unwrap(), vec![0xff, 0x00]);
        assert_eq!(decode_bytes(BytesBase::Binary, "00000001").unwrap(), vec![1]);
        assert_eq!(decode_bytes(BytesBase::Utf8, "ab").unwrap(), b"ab".to_vec());
        assert!(decode_bytes(BytesBase::Hex, "f").is_err());
    }

    #[test]
    fn bits_decoding() {
        let (data, len) = decode_bits(BitsBase::Binary, "1010").unwrap();
        assert_eq!(len, 4);
        assert_eq!(data, vec![0b1010_0000]);
        let (data, len) = decode_bits(BitsBase::Hex, "f").unwrap();
        assert_eq!(len, 4);
        assert_eq!(data, vec![0b1111_0000]);
        let (_, len) = decode_bits(BitsBase::Octal, "17").unwrap();
        assert_eq!(len, 6);
    }

    #[test]
    fn char_decoding() {
        assert_eq!(decode_char("'a'").unwrap(), 'a');
        assert_eq!(decode_char(r"'\n'").unwrap(), '\n');
        assert!(decode_char("'ab'").is_err());
    }
}
