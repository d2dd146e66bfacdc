//! The textual stanza format used by cset printing/parsing (§4.2, §6), roster+marking
//! serialization, and roster deltas (§4.6). Grounded in the same tokenizer/stanza/
//! printer/parser split as the original `basic_io` format this spec's textual formats
//! are modelled on.
//!
//! Everything here works over raw bytes rather than `str`: §4.7 guarantees any byte
//! sequence 0x00-0xFF survives a round trip through STRING encoding, which a `String`/
//! `char`-based implementation cannot make good on (bytes ≥ 0x80 re-encode as multi-byte
//! UTF-8 once pushed through `char`). `original_source/basic_io.cc`'s `escape` operates
//! on `std::string` as a byte buffer for the same reason.

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Symbol(String),
    String(Vec<u8>),
    Hex(Vec<u8>),
    None,
}

/// splits a stanza stream into tokens: bare identifiers (`Symbol`), double-quoted,
/// backslash-escaped byte strings (`String`), square-bracketed fixed-width hex
/// (`Hex`), and end-of-input (`None`).
#[derive(Clone)]
pub struct Tokenizer<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { bytes: input, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b) if b == b' ' || b == b'\n' || b == b'\t' || b == b'\r')
        {
            self.pos += 1;
        }
    }

    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_ws();
        match self.peek() {
            None => Ok(Token::None),
            Some(b'"') => self.read_string(),
            Some(b'[') => self.read_hex(),
            Some(b) if is_symbol_start(b) => Ok(Token::Symbol(self.read_symbol())),
            Some(_) =>
                Err(CoreError::Decode { pos: self.pos, expected: "symbol, string or hex token" }
                    .into()),
        }
    }

    fn read_symbol(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if is_symbol_char(b)) {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }

    fn read_string(&mut self) -> Result<Token> {
        let start = self.pos;
        self.pos += 1; // opening quote
        let mut out = Vec::new();
        loop {
            match self.peek() {
                None =>
                    return Err(CoreError::Decode {
                        pos: start,
                        expected: "closing `\"` for string token",
                    }
                    .into()),
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(Token::String(out));
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(b @ (b'\\' | b'"')) => {
                            out.push(b);
                            self.pos += 1;
                        }
                        _ =>
                            return Err(CoreError::Decode {
                                pos: self.pos,
                                expected: "`\\\\` or `\\\"` escape",
                            }
                            .into()),
                    }
                }
                Some(b) => {
                    out.push(b);
                    self.pos += 1;
                }
            }
        }
    }

    fn read_hex(&mut self) -> Result<Token> {
        let start = self.pos;
        self.pos += 1; // opening bracket
        let hex_start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_hexdigit()) {
            self.pos += 1;
        }
        let hex_str = std::str::from_utf8(&self.bytes[hex_start..self.pos]).unwrap();
        if self.peek() != Some(b']') {
            return Err(CoreError::Decode { pos: start, expected: "closing `]` for hex token" }
                .into());
        }
        self.pos += 1;
        let bytes = hex::decode(hex_str)
            .map_err(|_| CoreError::Decode { pos: hex_start, expected: "hex digits" })?;
        Ok(Token::Hex(bytes))
    }
}

fn is_symbol_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_symbol_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// one `key value` pair as it will be printed on a line within a stanza. `value` is
/// already-escaped bytes, ready to be written verbatim.
pub struct StanzaLine {
    pub key: &'static str,
    pub value: Vec<u8>,
}

/// a stanza: an ordered list of `key value` lines, printed with keys right-padded to
/// a common width and separated from the next stanza by a blank line.
#[derive(Default)]
pub struct Stanza {
    lines: Vec<StanzaLine>,
}

impl Stanza {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_symbol(&mut self, key: &'static str, value: impl std::fmt::Display) -> &mut Self {
        self.lines.push(StanzaLine { key, value: value.to_string().into_bytes() });
        self
    }

    pub fn push_str(&mut self, key: &'static str, value: &[u8]) -> &mut Self {
        self.lines.push(StanzaLine { key, value: quote_bytes(value) });
        self
    }

    pub fn push_hex(&mut self, key: &'static str, value: &[u8]) -> &mut Self {
        self.lines.push(StanzaLine { key, value: format!("[{}]", hex::encode(value)).into_bytes() });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// escapes `\` and `"` and wraps in double quotes; guarantees binary transparency for
/// any byte sequence 0x00-0xFF by copying every other byte through untouched instead of
/// routing it through `char`.
pub fn quote_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 2);
    out.push(b'"');
    for &b in bytes {
        match b {
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'"' => out.extend_from_slice(b"\\\""),
            _ => out.push(b),
        }
    }
    out.push(b'"');
    out
}

/// prints a sequence of stanzas, each with its own key-width padding, separated by
/// blank lines.
pub fn print_stanzas(stanzas: &[Stanza]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, stanza) in stanzas.iter().enumerate() {
        if i > 0 {
            out.push(b'\n');
        }
        let width = stanza.lines.iter().map(|l| l.key.len()).max().unwrap_or(0);
        for line in &stanza.lines {
            out.extend_from_slice(line.key.as_bytes());
            for _ in line.key.len()..width {
                out.push(b' ');
            }
            out.push(b' ');
            out.extend_from_slice(&line.value);
            out.push(b'\n');
        }
    }
    out
}
