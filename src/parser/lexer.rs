//! On-demand lexing over chunked input.
//!
//! The lexer owns no text. The host hands it a [`TextSource`] that can
//! `seek` and `read` chunks of bytes; the lexer decodes one codepoint of
//! lookahead at a time and exposes the four callbacks a compiled lex DFA
//! drives: [`start`](Lexer::start), [`start_token`](Lexer::start_token),
//! [`advance`](Lexer::advance) and [`accept`](Lexer::accept).
//!
//! Padding falls out of the callback protocol: everything consumed
//! between the previous token's end and `start_token` becomes the next
//! token's padding.

use crate::base::Length;

use super::language::{LexStateId, Symbol, SymbolMetadata, SYM_ERROR};
use super::subtree::Subtree;

/// How the input bytes encode text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEncoding {
    Utf8,
    Utf16,
}

/// Byte-level access to the source text, provided by the host
pub trait TextSource {
    /// Reposition the source. The next `read` must return bytes starting
    /// at this offset.
    fn seek(&mut self, char_index: usize, byte_index: usize);

    /// The next chunk of bytes. An empty slice signals end of input.
    fn read(&mut self) -> &[u8];
}

/// A text source plus its encoding
pub struct Input {
    pub source: Box<dyn TextSource>,
    pub encoding: InputEncoding,
}

impl Input {
    pub fn new(source: Box<dyn TextSource>, encoding: InputEncoding) -> Input {
        Input { source, encoding }
    }

    /// An in-memory UTF-8 input
    pub fn from_str(text: &str) -> Input {
        Input::new(
            Box::new(SliceSource::new(text.as_bytes().to_vec(), 1024)),
            InputEncoding::Utf8,
        )
    }

    /// An in-memory UTF-8 input read in chunks of `chunk_size` bytes
    pub fn from_str_chunked(text: &str, chunk_size: usize) -> Input {
        Input::new(
            Box::new(SliceSource::new(text.as_bytes().to_vec(), chunk_size)),
            InputEncoding::Utf8,
        )
    }

    /// An in-memory UTF-16 input (native-endian code units)
    pub fn from_utf16(units: &[u16]) -> Input {
        let mut bytes = Vec::with_capacity(units.len() * 2);
        for unit in units {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        Input::new(Box::new(SliceSource::new(bytes, 1024)), InputEncoding::Utf16)
    }
}

/// In-memory [`TextSource`] over a byte buffer
pub struct SliceSource {
    bytes: Vec<u8>,
    offset: usize,
    chunk_size: usize,
}

impl SliceSource {
    pub fn new(bytes: Vec<u8>, chunk_size: usize) -> SliceSource {
        SliceSource {
            bytes,
            offset: 0,
            chunk_size: chunk_size.max(1),
        }
    }
}

impl TextSource for SliceSource {
    fn seek(&mut self, _char_index: usize, byte_index: usize) {
        self.offset = byte_index.min(self.bytes.len());
    }

    fn read(&mut self) -> &[u8] {
        let start = self.offset;
        let end = (start + self.chunk_size).min(self.bytes.len());
        self.offset = end;
        &self.bytes[start..end]
    }
}

/// Which side of the runtime a debug message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugKind {
    Lex,
    Parse,
}

/// Host-supplied debug sink
pub type DebugFn = Box<dyn FnMut(DebugKind, &str)>;

/// One decoded codepoint, or the reason there isn't one
enum Decoded {
    Char(char, usize),
    Invalid(usize),
    NeedMore,
}

fn decode_utf8(bytes: &[u8]) -> Decoded {
    let width = match bytes[0] {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => return Decoded::Invalid(1),
    };
    if bytes.len() < width {
        return Decoded::NeedMore;
    }
    match std::str::from_utf8(&bytes[..width]) {
        Ok(text) => match text.chars().next() {
            Some(c) => Decoded::Char(c, width),
            None => Decoded::Invalid(1),
        },
        Err(_) => Decoded::Invalid(1),
    }
}

fn decode_utf16(bytes: &[u8]) -> Decoded {
    if bytes.len() < 2 {
        return Decoded::NeedMore;
    }
    let unit = u16::from_le_bytes([bytes[0], bytes[1]]);
    if (0xD800..0xDC00).contains(&unit) {
        // High surrogate: needs its partner
        if bytes.len() < 4 {
            return Decoded::NeedMore;
        }
        let low = u16::from_le_bytes([bytes[2], bytes[3]]);
        if (0xDC00..0xE000).contains(&low) {
            let value =
                0x10000 + ((u32::from(unit) - 0xD800) << 10) + (u32::from(low) - 0xDC00);
            match char::from_u32(value) {
                Some(c) => Decoded::Char(c, 4),
                None => Decoded::Invalid(2),
            }
        } else {
            Decoded::Invalid(2)
        }
    } else if (0xDC00..0xE000).contains(&unit) {
        // Unpaired low surrogate
        Decoded::Invalid(2)
    } else {
        match char::from_u32(u32::from(unit)) {
            Some(c) => Decoded::Char(c, 2),
            None => Decoded::Invalid(2),
        }
    }
}

macro_rules! lex_log {
    ($self:expr, $($arg:tt)*) => {
        if $self.debug_enabled() {
            let message = format!($($arg)*);
            $self.emit_debug(DebugKind::Lex, &message);
        }
    };
}

/// The lexer state: a position in the input, one buffered chunk and one
/// decoded codepoint of lookahead.
pub struct Lexer {
    input: Option<Input>,
    encoding: InputEncoding,
    debug: Option<DebugFn>,
    current_position: Length,
    token_start_position: Length,
    token_end_position: Length,
    chunk: Vec<u8>,
    chunk_start: usize,
    at_end: bool,
    lookahead: Option<char>,
    lookahead_size: usize,
    starting_state: LexStateId,
}

impl Lexer {
    pub(crate) fn new() -> Lexer {
        Lexer {
            input: None,
            encoding: InputEncoding::Utf8,
            debug: None,
            current_position: Length::ZERO,
            token_start_position: Length::ZERO,
            token_end_position: Length::ZERO,
            chunk: Vec::new(),
            chunk_start: 0,
            at_end: false,
            lookahead: None,
            lookahead_size: 0,
            starting_state: 0,
        }
    }

    pub(crate) fn set_input(&mut self, input: Input) {
        self.encoding = input.encoding;
        self.input = Some(input);
        self.hard_reset(Length::ZERO);
    }

    pub(crate) fn set_debugger(&mut self, debug: Option<DebugFn>) {
        self.debug = debug;
    }

    pub(crate) fn debug_enabled(&self) -> bool {
        self.debug.is_some() || tracing::enabled!(tracing::Level::TRACE)
    }

    pub(crate) fn emit_debug(&mut self, kind: DebugKind, message: &str) {
        match kind {
            DebugKind::Lex => tracing::trace!(target: "coppice::lex", "{message}"),
            DebugKind::Parse => tracing::trace!(target: "coppice::parse", "{message}"),
        }
        if let Some(callback) = &mut self.debug {
            callback(kind, message);
        }
    }

    /// Reposition the lexer. Keeps the buffered chunk when the position
    /// is unchanged, so a lex directly after the previous token stays
    /// warm.
    pub(crate) fn reset(&mut self, position: Length) {
        if position != self.current_position {
            self.hard_reset(position);
        }
    }

    fn hard_reset(&mut self, position: Length) {
        self.current_position = position;
        self.token_start_position = position;
        self.token_end_position = position;
        self.chunk.clear();
        self.chunk_start = 0;
        self.at_end = false;
        self.lookahead = None;
        self.lookahead_size = 0;
    }

    pub(crate) fn current_position(&self) -> Length {
        self.current_position
    }

    fn fetch_chunk(&mut self) {
        let Some(input) = &mut self.input else {
            self.at_end = true;
            self.chunk.clear();
            return;
        };
        if self.chunk.is_empty()
            || self.current_position.bytes != self.chunk_start + self.chunk.len()
        {
            input
                .source
                .seek(self.current_position.chars, self.current_position.bytes);
        }
        self.chunk_start = self.current_position.bytes;
        let bytes = input.source.read();
        self.chunk.clear();
        self.chunk.extend_from_slice(bytes);
        self.at_end = self.chunk.is_empty();
    }

    /// Pull more bytes onto the end of the current chunk. Used when a
    /// codepoint straddles a chunk boundary.
    fn extend_chunk(&mut self) {
        let Some(input) = &mut self.input else {
            self.at_end = true;
            return;
        };
        let bytes = input.source.read();
        if bytes.is_empty() {
            self.at_end = true;
        } else {
            self.chunk.extend_from_slice(bytes);
        }
    }

    fn fetch_lookahead(&mut self) {
        loop {
            let offset = (self.current_position.bytes - self.chunk_start).min(self.chunk.len());
            let rest_len = self.chunk.len() - offset;
            if rest_len == 0 {
                if self.at_end {
                    self.lookahead = None;
                    self.lookahead_size = 0;
                    return;
                }
                self.fetch_chunk();
                continue;
            }
            let rest = &self.chunk[offset..];
            let decoded = match self.encoding {
                InputEncoding::Utf8 => decode_utf8(rest),
                InputEncoding::Utf16 => decode_utf16(rest),
            };
            match decoded {
                Decoded::Char(c, width) => {
                    self.lookahead = Some(c);
                    self.lookahead_size = width;
                    return;
                }
                Decoded::Invalid(width) => {
                    // One error codepoint per undecodable unit
                    self.lookahead = Some(char::REPLACEMENT_CHARACTER);
                    self.lookahead_size = width.min(rest_len).max(1);
                    return;
                }
                Decoded::NeedMore => {
                    if self.at_end {
                        // Truncated sequence at end of input
                        self.lookahead = Some(char::REPLACEMENT_CHARACTER);
                        self.lookahead_size = rest_len;
                        return;
                    }
                    self.extend_chunk();
                }
            }
        }
    }

    // =========================================================================
    // DFA callbacks
    // =========================================================================

    /// Prime the lexer to scan from the current position in `lex_state`
    pub fn start(&mut self, lex_state: LexStateId) {
        lex_log!(
            self,
            "start_lex state:{} pos:{}",
            lex_state,
            self.current_position.chars
        );
        self.starting_state = lex_state;
        if self.chunk.is_empty() && !self.at_end {
            self.fetch_chunk();
        }
        if self.lookahead_size == 0 {
            self.fetch_lookahead();
        }
    }

    /// Mark the start of the token the DFA is about to match. Everything
    /// consumed since the previous token becomes the new token's padding.
    pub fn start_token(&mut self) {
        lex_log!(
            self,
            "start_token chars:{} rows:{} columns:{}",
            self.current_position.chars,
            self.current_position.rows,
            self.current_position.columns
        );
        self.token_start_position = self.current_position;
    }

    /// The decoded codepoint under the cursor, or `None` at end of input
    #[inline]
    pub fn lookahead(&self) -> Option<char> {
        self.lookahead
    }

    /// Consume the lookahead codepoint. Returns false at end of input.
    pub fn advance(&mut self, to_state: LexStateId) -> bool {
        lex_log!(self, "advance state:{}", to_state);

        let Some(c) = self.lookahead else {
            return false;
        };
        self.current_position.bytes += self.lookahead_size;
        self.current_position.chars += 1;
        if c == '\n' {
            self.current_position.rows += 1;
            self.current_position.columns = 0;
        } else {
            self.current_position.columns += 1;
        }

        if self.current_position.bytes >= self.chunk_start + self.chunk.len() && !self.at_end {
            self.fetch_chunk();
        }
        self.fetch_lookahead();
        true
    }

    /// Produce a leaf for the matched token: extent from `start_token`
    /// to the current position, padding from the previous token's end.
    /// A `fragile` accept records the starting lex state on the leaf so
    /// reuse is limited to that state; otherwise the leaf is marked
    /// state independent.
    pub fn accept(&mut self, symbol: Symbol, metadata: SymbolMetadata, fragile: bool) -> Subtree {
        let lookahead_char = self.lookahead;
        if symbol == SYM_ERROR
            && self.current_position == self.token_start_position
            && self.lookahead.is_some()
        {
            // An error token always spans at least one codepoint
            self.advance(self.starting_state);
        }

        let size = self.current_position - self.token_start_position;
        let padding = self.token_start_position - self.token_end_position;
        self.token_end_position = self.current_position;

        let mut result = if symbol == SYM_ERROR {
            lex_log!(self, "error_char");
            Subtree::error_leaf(size, padding, lookahead_char)
        } else {
            lex_log!(self, "accept_token sym:{}", symbol);
            Subtree::leaf(symbol, padding, size, metadata)
        };
        if fragile {
            result.make_mut().lex_state = Some(self.starting_state);
        }
        result
    }
}
