// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Regular expression support, wrapped behind the engine's black-box
//! contract: `compile(pattern, flags) -> bytecode` and
//! `exec(bytecode, text, start) -> matches` over UTF-16 with the
//! `g i m s u y d` flag set. The backend is the `regex` crate; offsets are
//! translated between UTF-16 code units and UTF-8 bytes at the boundary.

use regex::Regex;

use crate::string::utf16_to_utf8;
use crate::value::Value;

pub const FLAG_GLOBAL: u8 = 1 << 0;
pub const FLAG_IGNORE_CASE: u8 = 1 << 1;
pub const FLAG_MULTILINE: u8 = 1 << 2;
pub const FLAG_DOT_ALL: u8 = 1 << 3;
pub const FLAG_UNICODE: u8 = 1 << 4;
pub const FLAG_STICKY: u8 = 1 << 5;
pub const FLAG_INDICES: u8 = 1 << 6;

/// Parse a JS flag string; duplicate or unknown flags are an error.
pub fn parse_flags(flags: &[u16]) -> Result<u8, String> {
    let mut bits = 0u8;
    for &unit in flags {
        let bit = match unit as u8 as char {
            'g' => FLAG_GLOBAL,
            'i' => FLAG_IGNORE_CASE,
            'm' => FLAG_MULTILINE,
            's' => FLAG_DOT_ALL,
            'u' => FLAG_UNICODE,
            'y' => FLAG_STICKY,
            'd' => FLAG_INDICES,
            other => {
                return Err(format!("invalid regular expression flag '{other}'"));
            }
        };
        if bits & bit != 0 {
            return Err("duplicate regular expression flag".to_string());
        }
        bits |= bit;
    }
    Ok(bits)
}

pub fn flags_to_string(bits: u8) -> String {
    let mut out = String::new();
    for (bit, ch) in [
        (FLAG_INDICES, 'd'),
        (FLAG_GLOBAL, 'g'),
        (FLAG_IGNORE_CASE, 'i'),
        (FLAG_MULTILINE, 'm'),
        (FLAG_DOT_ALL, 's'),
        (FLAG_UNICODE, 'u'),
        (FLAG_STICKY, 'y'),
    ] {
        if bits & bit != 0 {
            out.push(ch);
        }
    }
    out
}

/// Compiled pattern; opaque to the rest of the engine.
#[derive(Debug)]
pub struct ReBytecode {
    regex: Regex,
    pub flag_bits: u8,
}

/// Capture spans in UTF-16 code-unit offsets. Group 0 is the whole match.
#[derive(Debug)]
pub struct ReMatch {
    pub groups: Vec<Option<(u32, u32)>>,
    pub group_names: Vec<Option<String>>,
}

pub fn re_compile(pattern: &[u16], flag_bits: u8) -> Result<ReBytecode, String> {
    let mut translated = String::new();
    if flag_bits & FLAG_IGNORE_CASE != 0 {
        translated.push_str("(?i)");
    }
    if flag_bits & FLAG_MULTILINE != 0 {
        translated.push_str("(?m)");
    }
    if flag_bits & FLAG_DOT_ALL != 0 {
        translated.push_str("(?s)");
    }
    translated.push_str(&utf16_to_utf8(pattern));
    let regex = Regex::new(&translated).map_err(|e| e.to_string())?;
    Ok(ReBytecode { regex, flag_bits })
}

pub fn re_exec(
    bytecode: &ReBytecode,
    text: &[u16],
    start: u32,
) -> Option<ReMatch> {
    let haystack = utf16_to_utf8(text);
    let offsets = OffsetMap::new(&haystack);
    let byte_start = offsets.utf16_to_byte(start)?;

    let captures = bytecode.regex.captures_at(&haystack, byte_start)?;
    if bytecode.flag_bits & FLAG_STICKY != 0 {
        // Sticky matching must anchor exactly at `start`.
        let whole = captures.get(0).unwrap();
        if whole.start() != byte_start {
            return None;
        }
    }
    let groups = captures
        .iter()
        .map(|m| {
            m.map(|m| {
                (
                    offsets.byte_to_utf16(m.start()),
                    offsets.byte_to_utf16(m.end()),
                )
            })
        })
        .collect();
    let group_names = bytecode
        .regex
        .capture_names()
        .map(|name| name.map(str::to_string))
        .collect();
    Some(ReMatch { groups, group_names })
}

/// Engine-side regexp object state: the source text, the parsed flags, and
/// the compiled pattern. `lastIndex` is an ordinary own property.
#[derive(Debug)]
pub struct RegExpData {
    pub source: Value,
    pub compiled: ReBytecode,
}

/// UTF-8 byte offset <-> UTF-16 code-unit offset translation for one
/// haystack.
struct OffsetMap {
    // (byte_offset, utf16_offset) at every char boundary, in order.
    boundaries: Vec<(u32, u32)>,
}

impl OffsetMap {
    fn new(text: &str) -> Self {
        let mut boundaries = Vec::with_capacity(text.len() + 1);
        let mut utf16 = 0u32;
        for (byte, ch) in text.char_indices() {
            boundaries.push((byte as u32, utf16));
            utf16 += ch.len_utf16() as u32;
        }
        boundaries.push((text.len() as u32, utf16));
        Self { boundaries }
    }

    fn utf16_to_byte(&self, offset: u32) -> Option<usize> {
        self.boundaries
            .iter()
            .find(|&&(_, u)| u >= offset)
            .map(|&(b, _)| b as usize)
    }

    fn byte_to_utf16(&self, offset: usize) -> u32 {
        match self
            .boundaries
            .binary_search_by_key(&(offset as u32), |&(b, _)| b)
        {
            Ok(i) => self.boundaries[i].1,
            Err(i) => self.boundaries[i.saturating_sub(1)].1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string::utf16_of;

    #[test]
    fn flag_round_trip() {
        let bits = parse_flags(&utf16_of("gi")).unwrap();
        assert_eq!(bits, FLAG_GLOBAL | FLAG_IGNORE_CASE);
        assert_eq!(flags_to_string(bits), "gi");
        assert!(parse_flags(&utf16_of("gg")).is_err());
        assert!(parse_flags(&utf16_of("x")).is_err());
    }

    #[test]
    fn exec_reports_utf16_offsets() {
        let bytecode = re_compile(&utf16_of("b+"), 0).unwrap();
        let text = utf16_of("☃abbbc");
        let found = re_exec(&bytecode, &text, 0).unwrap();
        assert_eq!(found.groups[0], Some((2, 5)));
    }

    #[test]
    fn sticky_must_match_at_start() {
        let bytecode = re_compile(&utf16_of("b"), FLAG_STICKY).unwrap();
        let text = utf16_of("ab");
        assert!(re_exec(&bytecode, &text, 0).is_none());
        assert!(re_exec(&bytecode, &text, 1).is_some());
    }

    #[test]
    fn case_insensitive_flag_applies() {
        let bytecode =
            re_compile(&utf16_of("abc"), FLAG_IGNORE_CASE).unwrap();
        let found = re_exec(&bytecode, &utf16_of("xABCy"), 0).unwrap();
        assert_eq!(found.groups[0], Some((1, 4)));
    }
}
