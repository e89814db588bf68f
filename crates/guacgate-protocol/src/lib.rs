// guacgate-protocol: Guacamole protocol instruction codec
//
// Implements the length-prefixed text instruction format spoken by guacd:
//
//   <len>.<opcode>,<len>.<arg1>,<len>.<arg2>;
//
// Element lengths are UTF-8 byte counts, matching the reference daemon.

mod parser;
mod reader;

pub use parser::{instruction_opcode, parse_instruction, ParseError};
pub use reader::{InstructionReader, MAX_INSTRUCTION_SIZE};

use bytes::{BufMut, Bytes, BytesMut};

// Wire delimiters
pub const INST_TERM: u8 = b';';
pub const ARG_SEP: u8 = b',';
pub const ELEM_SEP: u8 = b'.';

/// A fully parsed Guacamole instruction with owned elements.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: String,
    pub args: Vec<String>,
}

impl Instruction {
    pub fn new(opcode: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            opcode: opcode.into(),
            args,
        }
    }

    /// Encode into wire format.
    ///
    /// Lengths are byte counts of the UTF-8 encoding of each element.
    pub fn encode(&self) -> Bytes {
        let estimated = self.opcode.len()
            + self.args.iter().map(|a| a.len() + 8).sum::<usize>()
            + 8;
        let mut buffer = BytesMut::with_capacity(estimated);
        buffer.put_slice(self.opcode.len().to_string().as_bytes());
        buffer.put_u8(ELEM_SEP);
        buffer.put_slice(self.opcode.as_bytes());
        for arg in &self.args {
            buffer.put_u8(ARG_SEP);
            buffer.put_slice(arg.len().to_string().as_bytes());
            buffer.put_u8(ELEM_SEP);
            buffer.put_slice(arg.as_bytes());
        }
        buffer.put_u8(INST_TERM);
        buffer.freeze()
    }
}

/// Format an instruction directly from string slices.
///
/// Convenience for call sites that do not hold an [`Instruction`].
pub fn format_instruction(opcode: &str, args: &[&str]) -> String {
    let mut result = String::new();
    result.push_str(&opcode.len().to_string());
    result.push('.');
    result.push_str(opcode);
    for arg in args {
        result.push(',');
        result.push_str(&arg.len().to_string());
        result.push('.');
        result.push_str(arg);
    }
    result.push(';');
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_instruction() {
        let instr = format_instruction("key", &["65507", "1"]);
        assert_eq!(instr, "3.key,5.65507,1.1;");
    }

    #[test]
    fn test_format_instruction_empty_args() {
        let instr = format_instruction("sync", &[]);
        assert_eq!(instr, "4.sync;");
    }

    #[test]
    fn test_encode_matches_format() {
        let instr = Instruction::new("select", vec!["rdp".to_string()]);
        assert_eq!(&instr.encode()[..], b"6.select,3.rdp;");
    }

    #[test]
    fn test_encode_empty_element() {
        let instr = Instruction::new("connect", vec!["h".to_string(), String::new()]);
        assert_eq!(&instr.encode()[..], b"7.connect,1.h,0.;");
    }

    #[test]
    fn test_lengths_are_utf8_byte_counts() {
        // "é" is two bytes in UTF-8
        let instr = format_instruction("clipboard", &["é"]);
        assert_eq!(instr, "9.clipboard,2.é;");
    }
}
