// Handshake driver tests against a scripted guacd over an in-memory duplex.

use std::collections::HashMap;
use std::time::Duration;

use guacgate::config::DefaultSize;
use guacgate::{guacd, GatewayError};
use guacgate_protocol::{parse_instruction, Instruction, InstructionReader};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

const TIMEOUT: Duration = Duration::from_secs(5);

async fn read_instruction(side: &mut DuplexStream, reader: &mut InstructionReader) -> Instruction {
    loop {
        if let Some(raw) = reader.next_instruction().unwrap() {
            return parse_instruction(&raw).unwrap();
        }
        let mut chunk = [0u8; 1024];
        let n = side.read(&mut chunk).await.unwrap();
        assert!(n > 0, "gateway closed during scripted handshake");
        reader.push(&chunk[..n]);
    }
}

fn merged(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn connect_arguments_align_with_announced_names() {
    let (mut gateway_side, mut guacd_side) = duplex(4096);

    let script = tokio::spawn(async move {
        let mut reader = InstructionReader::new();

        let select = read_instruction(&mut guacd_side, &mut reader).await;
        assert_eq!(select.opcode, "select");
        assert_eq!(select.args, vec!["rdp"]);

        guacd_side
            .write_all(b"4.args,13.VERSION_1_3_0,8.hostname,4.port,8.password;")
            .await
            .unwrap();

        let size = read_instruction(&mut guacd_side, &mut reader).await;
        assert_eq!(size.opcode, "size");
        assert_eq!(size.args, vec!["1024", "768", "96"]);
        for expected in ["audio", "video", "image"] {
            let instr = read_instruction(&mut guacd_side, &mut reader).await;
            assert_eq!(instr.opcode, expected);
            assert!(instr.args.is_empty());
        }

        let connect = read_instruction(&mut guacd_side, &mut reader).await;
        // Positional alignment: version echoed, then hostname, port, and an
        // empty element for the absent password
        assert_eq!(
            connect.encode(),
            Instruction::new(
                "connect",
                vec![
                    "VERSION_1_3_0".to_string(),
                    "h".to_string(),
                    "3389".to_string(),
                    String::new(),
                ],
            )
            .encode()
        );

        guacd_side.write_all(b"5.ready,4.$abc;").await.unwrap();
        guacd_side
    });

    let arguments = merged(&[("hostname", "h"), ("port", "3389")]);
    let outcome = guacd::handshake(
        &mut gateway_side,
        "rdp",
        &arguments,
        DefaultSize::default(),
        TIMEOUT,
    )
    .await
    .unwrap();

    assert_eq!(outcome.guacd_session_id, "$abc");
    assert_eq!(&outcome.ready[..], b"5.ready,4.$abc;");
    script.await.unwrap();
}

#[tokio::test]
async fn hyphenated_parameter_names_match_descriptor_keys() {
    let (mut gateway_side, mut guacd_side) = duplex(4096);

    let script = tokio::spawn(async move {
        let mut reader = InstructionReader::new();
        read_instruction(&mut guacd_side, &mut reader).await; // select
        guacd_side
            .write_all(b"4.args,13.VERSION_1_3_0,11.ignore-cert;")
            .await
            .unwrap();
        for _ in 0..4 {
            read_instruction(&mut guacd_side, &mut reader).await;
        }
        let connect = read_instruction(&mut guacd_side, &mut reader).await;
        assert_eq!(connect.args[1], "true");
        guacd_side.write_all(b"5.ready,4.$abc;").await.unwrap();
        guacd_side
    });

    let arguments = merged(&[("ignorecert", "true")]);
    guacd::handshake(
        &mut gateway_side,
        "rdp",
        &arguments,
        DefaultSize::default(),
        TIMEOUT,
    )
    .await
    .unwrap();
    script.await.unwrap();
}

#[tokio::test]
async fn size_uses_descriptor_geometry_over_defaults() {
    let (mut gateway_side, mut guacd_side) = duplex(4096);

    let script = tokio::spawn(async move {
        let mut reader = InstructionReader::new();
        read_instruction(&mut guacd_side, &mut reader).await; // select
        guacd_side
            .write_all(b"4.args,13.VERSION_1_3_0,8.hostname;")
            .await
            .unwrap();
        let size = read_instruction(&mut guacd_side, &mut reader).await;
        assert_eq!(size.args, vec!["1920", "1080", "120"]);
        for _ in 0..3 {
            read_instruction(&mut guacd_side, &mut reader).await;
        }
        read_instruction(&mut guacd_side, &mut reader).await; // connect
        guacd_side.write_all(b"5.ready,4.$abc;").await.unwrap();
        guacd_side
    });

    let arguments = merged(&[
        ("hostname", "h"),
        ("width", "1920"),
        ("height", "1080"),
        ("dpi", "120"),
    ]);
    guacd::handshake(
        &mut gateway_side,
        "rdp",
        &arguments,
        DefaultSize::default(),
        TIMEOUT,
    )
    .await
    .unwrap();
    script.await.unwrap();
}

#[tokio::test]
async fn guacd_error_instruction_aborts_handshake() {
    let (mut gateway_side, mut guacd_side) = duplex(4096);

    tokio::spawn(async move {
        let mut reader = InstructionReader::new();
        read_instruction(&mut guacd_side, &mut reader).await; // select
        guacd_side
            .write_all(b"5.error,11.unsupported,3.256;")
            .await
            .unwrap();
        // Keep the socket open so the failure comes from the instruction
        tokio::time::sleep(Duration::from_secs(1)).await;
    });

    let err = guacd::handshake(
        &mut gateway_side,
        "rdp",
        &HashMap::new(),
        DefaultSize::default(),
        TIMEOUT,
    )
    .await
    .unwrap_err();

    match err {
        GatewayError::Handshake(detail) => assert!(detail.contains("unsupported")),
        other => panic!("expected Handshake error, got {:?}", other.to_string()),
    }
}

#[tokio::test]
async fn silent_guacd_times_out() {
    let (mut gateway_side, _guacd_side) = duplex(4096);

    let err = guacd::handshake(
        &mut gateway_side,
        "rdp",
        &HashMap::new(),
        DefaultSize::default(),
        Duration::from_millis(100),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, GatewayError::Handshake(detail) if detail.contains("timed out")));
}

#[tokio::test]
async fn bytes_after_ready_are_carried_into_the_relay() {
    let (mut gateway_side, mut guacd_side) = duplex(4096);

    let script = tokio::spawn(async move {
        let mut reader = InstructionReader::new();
        read_instruction(&mut guacd_side, &mut reader).await; // select
        guacd_side
            .write_all(b"4.args,13.VERSION_1_3_0,8.hostname;")
            .await
            .unwrap();
        for _ in 0..5 {
            read_instruction(&mut guacd_side, &mut reader).await;
        }
        // ready and the first frame of the session in one burst
        guacd_side
            .write_all(b"5.ready,4.$abc;4.sync,10.1234567890;")
            .await
            .unwrap();
        guacd_side
    });

    let mut outcome = guacd::handshake(
        &mut gateway_side,
        "rdp",
        &merged(&[("hostname", "h")]),
        DefaultSize::default(),
        TIMEOUT,
    )
    .await
    .unwrap();

    let carried = outcome.reader.next_instruction().unwrap().unwrap();
    assert_eq!(&carried[..], b"4.sync,10.1234567890;");
    script.await.unwrap();
}
