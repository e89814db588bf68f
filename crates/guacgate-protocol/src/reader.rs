// Streaming instruction reader.
//
// Accumulates socket chunks in a carry-over buffer and yields each completed
// instruction as a raw `Bytes` span (terminator included). The walk is driven
// by the declared element lengths with a resume cursor, so no byte is
// examined twice and a `;` inside an element value is never mistaken for a
// terminator. Amortized cost is O(total bytes received).

use bytes::{Bytes, BytesMut};

use crate::{ParseError, ARG_SEP, ELEM_SEP, INST_TERM};

/// Maximum size of a single instruction. Bounds buffer growth when a peer
/// misbehaves.
pub const MAX_INSTRUCTION_SIZE: usize = 64 * 1024;

// Longest accepted decimal length prefix ("99999999" is already far beyond
// MAX_INSTRUCTION_SIZE).
const MAX_LENGTH_DIGITS: usize = 8;

#[derive(Debug, Clone, Copy)]
enum Cursor {
    /// At the start of an element's decimal length prefix.
    Length,
    /// Inside an element value, `remaining` bytes still unconsumed.
    Value { remaining: usize },
    /// Expecting `,` (next element) or `;` (end of instruction).
    Terminator,
}

/// Incremental reader over a byte stream of Guacamole instructions.
///
/// The buffer always begins at the first byte of the instruction currently
/// being assembled; completed instructions are split off zero-copy.
#[derive(Debug)]
pub struct InstructionReader {
    buf: BytesMut,
    pos: usize,
    cursor: Cursor,
    max_instruction: usize,
}

impl InstructionReader {
    pub fn new() -> Self {
        Self::with_max_instruction_size(MAX_INSTRUCTION_SIZE)
    }

    pub fn with_max_instruction_size(max_instruction: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            pos: 0,
            cursor: Cursor::Length,
            max_instruction,
        }
    }

    /// Append a chunk received from the socket.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Number of carried-over bytes not yet part of a completed instruction.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Advance the walk and return the next completed instruction, or `None`
    /// when the buffered data ends mid-instruction.
    pub fn next_instruction(&mut self) -> Result<Option<Bytes>, ParseError> {
        loop {
            if self.pos > self.max_instruction {
                return Err(ParseError::TooLarge(self.max_instruction));
            }
            match self.cursor {
                Cursor::Length => {
                    let region = &self.buf[self.pos..];
                    match region.iter().position(|&b| b == ELEM_SEP) {
                        Some(rel) => {
                            let len = parse_length(&region[..rel])?;
                            if len > self.max_instruction {
                                return Err(ParseError::TooLarge(self.max_instruction));
                            }
                            self.pos += rel + 1;
                            self.cursor = Cursor::Value { remaining: len };
                        }
                        None => {
                            // Not yet delimited; what is there must still look
                            // like a decimal prefix.
                            if region.len() > MAX_LENGTH_DIGITS
                                || region.iter().any(|b| !b.is_ascii_digit())
                            {
                                return Err(ParseError::InvalidLength(
                                    String::from_utf8_lossy(region).into_owned(),
                                ));
                            }
                            return Ok(None);
                        }
                    }
                }
                Cursor::Value { remaining } => {
                    let available = self.buf.len() - self.pos;
                    if available < remaining {
                        self.pos = self.buf.len();
                        self.cursor = Cursor::Value {
                            remaining: remaining - available,
                        };
                        return Ok(None);
                    }
                    self.pos += remaining;
                    self.cursor = Cursor::Terminator;
                }
                Cursor::Terminator => {
                    if self.pos >= self.buf.len() {
                        return Ok(None);
                    }
                    match self.buf[self.pos] {
                        ARG_SEP => {
                            self.pos += 1;
                            self.cursor = Cursor::Length;
                        }
                        INST_TERM => {
                            let raw = self.buf.split_to(self.pos + 1).freeze();
                            self.pos = 0;
                            self.cursor = Cursor::Length;
                            return Ok(Some(raw));
                        }
                        other => {
                            return Err(ParseError::InvalidFormat(format!(
                                "expected ',' or ';' after element, found '{}'",
                                other as char
                            )));
                        }
                    }
                }
            }
        }
    }
}

impl Default for InstructionReader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_length(slice: &[u8]) -> Result<usize, ParseError> {
    if slice.is_empty() || slice.len() > MAX_LENGTH_DIGITS {
        return Err(ParseError::InvalidLength(
            String::from_utf8_lossy(slice).into_owned(),
        ));
    }
    let mut result = 0usize;
    for &b in slice {
        if !b.is_ascii_digit() {
            return Err(ParseError::InvalidLength(
                String::from_utf8_lossy(slice).into_owned(),
            ));
        }
        result = result * 10 + (b - b'0') as usize;
    }
    Ok(result)
}
