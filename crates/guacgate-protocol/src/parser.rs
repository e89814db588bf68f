// Parsing of single complete instructions.
//
// Operates on byte slices; lengths in the wire format are UTF-8 byte counts,
// so all cursor arithmetic here is plain byte offsets.

use std::str;

use crate::{Instruction, ARG_SEP, ELEM_SEP, INST_TERM};

/// Framing violation while decoding instruction bytes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid instruction format: {0}")]
    InvalidFormat(String),

    #[error("element length not a decimal integer: {0}")]
    InvalidLength(String),

    #[error("instruction exceeds maximum size of {0} bytes")]
    TooLarge(usize),

    #[error("invalid UTF-8 in instruction element")]
    InvalidUtf8,
}

// Lengths above this are rejected outright; protects the decimal walk from
// absurd prefixes like "99999999999999.".
const LENGTH_CEILING: usize = 100_000_000;

fn parse_length(slice: &[u8]) -> Result<usize, ParseError> {
    if slice.is_empty() {
        return Err(ParseError::InvalidLength("empty".to_string()));
    }
    let mut result = 0usize;
    for &b in slice {
        if !b.is_ascii_digit() {
            return Err(ParseError::InvalidLength(
                String::from_utf8_lossy(slice).into_owned(),
            ));
        }
        result = result * 10 + (b - b'0') as usize;
        if result > LENGTH_CEILING {
            return Err(ParseError::InvalidLength(
                String::from_utf8_lossy(slice).into_owned(),
            ));
        }
    }
    Ok(result)
}

// Reads one `<len>.<value>` element starting at `pos`. Returns the value
// span and the offset of the byte following it.
fn parse_element(raw: &[u8], pos: usize) -> Result<(&[u8], usize), ParseError> {
    let length_end = raw[pos..]
        .iter()
        .position(|&b| b == ELEM_SEP)
        .ok_or_else(|| ParseError::InvalidFormat("missing length delimiter".to_string()))?;
    let len = parse_length(&raw[pos..pos + length_end])?;
    let value_start = pos + length_end + 1;
    if value_start + len > raw.len() {
        return Err(ParseError::InvalidFormat(
            "element length exceeds instruction".to_string(),
        ));
    }
    Ok((&raw[value_start..value_start + len], value_start + len))
}

/// Parse one complete raw instruction (including the trailing `;`) into an
/// owned [`Instruction`].
pub fn parse_instruction(raw: &[u8]) -> Result<Instruction, ParseError> {
    if raw.last() != Some(&INST_TERM) {
        return Err(ParseError::InvalidFormat(
            "missing instruction terminator".to_string(),
        ));
    }
    let content = &raw[..raw.len() - 1];

    let (opcode_bytes, mut pos) = parse_element(content, 0)?;
    let opcode = str::from_utf8(opcode_bytes)
        .map_err(|_| ParseError::InvalidUtf8)?
        .to_string();

    let mut args = Vec::new();
    while pos < content.len() {
        if content[pos] != ARG_SEP {
            return Err(ParseError::InvalidFormat(format!(
                "expected ',' at offset {}",
                pos
            )));
        }
        let (arg_bytes, next) = parse_element(content, pos + 1)?;
        args.push(
            str::from_utf8(arg_bytes)
                .map_err(|_| ParseError::InvalidUtf8)?
                .to_string(),
        );
        pos = next;
    }

    Ok(Instruction::new(opcode, args))
}

/// Zero-copy peek at a raw instruction's opcode.
///
/// Used on the relay hot path to detect control opcodes without allocating.
pub fn instruction_opcode(raw: &[u8]) -> Result<&str, ParseError> {
    let (opcode_bytes, _) = parse_element(raw, 0)?;
    str::from_utf8(opcode_bytes).map_err(|_| ParseError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_instruction() {
        let instr = parse_instruction(b"3.key,5.65507,1.1;").unwrap();
        assert_eq!(instr.opcode, "key");
        assert_eq!(instr.args, vec!["65507", "1"]);
    }

    #[test]
    fn test_parse_no_args() {
        let instr = parse_instruction(b"4.sync;").unwrap();
        assert_eq!(instr.opcode, "sync");
        assert!(instr.args.is_empty());
    }

    #[test]
    fn test_parse_empty_element() {
        let instr = parse_instruction(b"7.connect,1.h,0.;").unwrap();
        assert_eq!(instr.args, vec!["h", ""]);
    }

    #[test]
    fn test_parse_element_containing_semicolon() {
        // Lengths disambiguate; a ';' inside a value is data, not a terminator.
        let instr = parse_instruction(b"9.clipboard,3.a;b;").unwrap();
        assert_eq!(instr.args, vec!["a;b"]);
    }

    #[test]
    fn test_parse_missing_terminator() {
        assert!(parse_instruction(b"3.key,5.65507,1.1").is_err());
    }

    #[test]
    fn test_parse_bad_length() {
        let err = parse_instruction(b"x.key;").unwrap_err();
        assert!(matches!(err, ParseError::InvalidLength(_)));
    }

    #[test]
    fn test_parse_length_overruns_instruction() {
        let err = parse_instruction(b"9.key;").unwrap_err();
        assert!(matches!(err, ParseError::InvalidFormat(_)));
    }

    #[test]
    fn test_opcode_peek() {
        assert_eq!(instruction_opcode(b"10.disconnect;").unwrap(), "disconnect");
        assert_eq!(instruction_opcode(b"5.mouse,1.0,2.10;").unwrap(), "mouse");
    }
}
