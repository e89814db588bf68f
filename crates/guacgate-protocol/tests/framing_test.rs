// Framing properties of the instruction codec.

use bytes::Bytes;
use guacgate_protocol::{
    format_instruction, instruction_opcode, parse_instruction, Instruction, InstructionReader,
};

fn feed(reader: &mut InstructionReader, chunk: &[u8]) -> Vec<Bytes> {
    reader.push(chunk);
    let mut out = Vec::new();
    while let Some(raw) = reader.next_instruction().expect("valid stream") {
        out.push(raw);
    }
    out
}

#[test]
fn chunked_framing_scenario() {
    // "5.hello,5.world;" split as "5.hel" / "lo,5.wo" / "rld;"
    let mut reader = InstructionReader::new();
    assert!(feed(&mut reader, b"5.hel").is_empty());
    assert!(feed(&mut reader, b"lo,5.wo").is_empty());
    let out = feed(&mut reader, b"rld;");
    assert_eq!(out.len(), 1);
    let instr = parse_instruction(&out[0]).unwrap();
    assert_eq!(instr.opcode, "hello");
    assert_eq!(instr.args, vec!["world"]);
}

#[test]
fn round_trip_every_two_chunk_split() {
    let instructions = vec![
        Instruction::new("mouse", vec!["0".into(), "10".into(), "20".into(), "1".into()]),
        Instruction::new("clipboard", vec!["héllo".into(), "日本語".into()]),
        Instruction::new("sync", vec![]),
        Instruction::new("blob", vec!["1".into(), String::new()]),
    ];
    let mut wire = Vec::new();
    for instr in &instructions {
        wire.extend_from_slice(&instr.encode());
    }

    for split in 0..=wire.len() {
        let mut reader = InstructionReader::new();
        let mut out = feed(&mut reader, &wire[..split]);
        out.extend(feed(&mut reader, &wire[split..]));

        let decoded: Vec<Instruction> = out
            .iter()
            .map(|raw| parse_instruction(raw).unwrap())
            .collect();
        assert_eq!(decoded, instructions, "split at byte {}", split);
        assert_eq!(reader.pending(), 0);
    }
}

#[test]
fn round_trip_byte_at_a_time() {
    let wire = format_instruction("key", &["65507", "1"]);
    let mut reader = InstructionReader::new();
    let mut out = Vec::new();
    for b in wire.as_bytes() {
        out.extend(feed(&mut reader, &[*b]));
    }
    assert_eq!(out.len(), 1);
    assert_eq!(&out[0][..], wire.as_bytes());
}

#[test]
fn writer_length_formula() {
    // length(writer([s])) == len(decimal(bytes(s))) + 1 + bytes(s) + 1
    for s in ["a", "hello", "héllo", "日本語", ""] {
        let wire = format_instruction(s, &[]);
        let expected = s.len().to_string().len() + 1 + s.len() + 1;
        assert_eq!(wire.len(), expected, "element {:?}", s);
    }
}

#[test]
fn reader_loses_no_bytes() {
    // Concatenation of emitted instructions equals the input prefix up to the
    // last terminator.
    let wire = b"3.key,1.1;4.sync;5.mouse,1.0;7.partial".to_vec();
    let mut reader = InstructionReader::new();
    let out = feed(&mut reader, &wire);

    let emitted: Vec<u8> = out.iter().flat_map(|b| b.iter().copied()).collect();
    let last_semi = wire.iter().rposition(|&b| b == b';').unwrap();
    assert_eq!(emitted, wire[..=last_semi]);
    assert_eq!(reader.pending(), wire.len() - last_semi - 1);
}

#[test]
fn opcode_peek_on_emitted_span() {
    let mut reader = InstructionReader::new();
    let out = feed(&mut reader, b"10.disconnect;");
    assert_eq!(instruction_opcode(&out[0]).unwrap(), "disconnect");
}
