//! guacd connection and client-side handshake.
//!
//! Protocol flow (gateway acts as the guacd client):
//!   1. Gateway -> guacd: select,<protocol>;
//!   2. guacd -> Gateway: args,<version>,<arg1>,<arg2>,...;
//!   3. Gateway -> guacd: size,<width>,<height>,<dpi>;
//!      audio,<mime...>; video,<mime...>; image,<mime...>;
//!   4. Gateway -> guacd: connect,<version>,<val1>,<val2>,...;
//!   5. guacd -> Gateway: ready,<session-id>;
//!
//! The connect values in step 4 are positional: one element per parameter
//! name announced in step 2, empty where the merged argument map has no
//! value for that name.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use guacgate_protocol::{parse_instruction, Instruction, InstructionReader};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::{DefaultSize, GuacdConfig};
use crate::error::{GatewayError, Result};

/// Protocol version announced in `connect` when guacd's `args` carries none.
pub const PROTOCOL_VERSION: &str = "VERSION_1_5_0";

/// Open the TCP connection to guacd.
pub async fn connect(config: &GuacdConfig) -> Result<TcpStream> {
    let addr = resolve_endpoint(&config.hostname, config.port).await?;
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| GatewayError::Handshake(format!("connect to guacd {} failed: {}", addr, e)))?;
    // Interactive traffic; never batch small writes
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Resolve the guacd endpoint: IP literals are used as-is, hostnames resolve
/// to their first IPv4 address.
async fn resolve_endpoint(hostname: &str, port: u16) -> Result<SocketAddr> {
    if let Ok(ip) = hostname.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    let mut addrs = tokio::net::lookup_host((hostname, port))
        .await
        .map_err(|e| GatewayError::Handshake(format!("resolving '{}' failed: {}", hostname, e)))?;
    addrs
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| GatewayError::Handshake(format!("no IPv4 address for '{}'", hostname)))
}

/// Result of a completed handshake.
#[derive(Debug)]
pub struct HandshakeOutcome {
    /// Session identifier issued by guacd
    pub guacd_session_id: String,
    /// The raw `ready` instruction, forwarded verbatim to the client
    pub ready: Bytes,
    /// Carry-over reader; bytes guacd sent after `ready` are already in here
    /// and become the first bytes of the relay
    pub reader: InstructionReader,
}

/// Drive the full handshake under the configured timeout.
pub async fn handshake<S>(
    stream: &mut S,
    protocol: &str,
    arguments: &HashMap<String, String>,
    default_size: DefaultSize,
    timeout: Duration,
) -> Result<HandshakeOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    tokio::time::timeout(
        timeout,
        drive_handshake(stream, protocol, arguments, default_size),
    )
    .await
    .map_err(|_| GatewayError::Handshake("handshake timed out".to_string()))?
}

async fn drive_handshake<S>(
    stream: &mut S,
    protocol: &str,
    arguments: &HashMap<String, String>,
    default_size: DefaultSize,
) -> Result<HandshakeOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut reader = InstructionReader::new();

    send(stream, &Instruction::new("select", vec![protocol.to_string()])).await?;

    let (args, _) = read_expected(stream, &mut reader, "args").await?;
    debug!("guacd announced {} parameter names", args.args.len().saturating_sub(1));

    // The first args element is the protocol version, echoed back as the
    // first connect element
    let version = args.args.first().cloned().unwrap_or_else(|| {
        warn!("'args' carried no protocol version, assuming {}", PROTOCOL_VERSION);
        PROTOCOL_VERSION.to_string()
    });
    if version != PROTOCOL_VERSION {
        debug!("guacd protocol version {} (gateway speaks {})", version, PROTOCOL_VERSION);
    }

    let lookup = |key: &str, fallback: String| -> String {
        arguments.get(key).cloned().unwrap_or(fallback)
    };
    let size = Instruction::new(
        "size",
        vec![
            lookup("width", default_size.width.to_string()),
            lookup("height", default_size.height.to_string()),
            lookup("dpi", default_size.dpi.to_string()),
        ],
    );
    send(stream, &size).await?;
    send(stream, &Instruction::new("audio", mimetypes(arguments.get("audio")))).await?;
    send(stream, &Instruction::new("video", mimetypes(arguments.get("video")))).await?;
    send(stream, &Instruction::new("image", mimetypes(arguments.get("image")))).await?;

    // Pre-normalize keys once; guacd parameter names arrive hyphenated while
    // descriptor keys may not be
    let normalized: HashMap<String, &String> = arguments
        .iter()
        .map(|(key, value)| (normalize_key(key), value))
        .collect();

    let mut connect_args = Vec::with_capacity(args.args.len());
    connect_args.push(version);
    for name in args.args.iter().skip(1) {
        let value = normalized
            .get(&normalize_key(name))
            .map(|v| (*v).clone())
            .unwrap_or_default();
        connect_args.push(value);
    }
    send(stream, &Instruction::new("connect", connect_args)).await?;

    let (ready, raw_ready) = read_expected(stream, &mut reader, "ready").await?;
    let guacd_session_id = ready
        .args
        .first()
        .cloned()
        .ok_or_else(|| GatewayError::Handshake("'ready' carried no session id".to_string()))?;
    debug!("handshake complete, guacd session {}", guacd_session_id);

    Ok(HandshakeOutcome {
        guacd_session_id,
        ready: raw_ready,
        reader,
    })
}

fn normalize_key(key: &str) -> String {
    key.replace(['-', '_'], "").to_ascii_lowercase()
}

fn mimetypes(value: Option<&String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

async fn send<S>(stream: &mut S, instruction: &Instruction) -> Result<()>
where
    S: AsyncWrite + Unpin + Send,
{
    stream
        .write_all(&instruction.encode())
        .await
        .map_err(|e| GatewayError::Handshake(format!("write to guacd failed: {}", e)))?;
    stream
        .flush()
        .await
        .map_err(|e| GatewayError::Handshake(format!("flush to guacd failed: {}", e)))?;
    Ok(())
}

// Reads instructions until one with the expected opcode arrives. A guacd
// `error` instruction, an unexpected opcode, a framing violation, or EOF all
// abort the handshake.
async fn read_expected<S>(
    stream: &mut S,
    reader: &mut InstructionReader,
    expected: &str,
) -> Result<(Instruction, Bytes)>
where
    S: AsyncRead + Unpin + Send,
{
    let mut chunk = [0u8; 4096];
    loop {
        while let Some(raw) = reader
            .next_instruction()
            .map_err(|e| GatewayError::Handshake(format!("framing error from guacd: {}", e)))?
        {
            let instruction = parse_instruction(&raw)
                .map_err(|e| GatewayError::Handshake(format!("framing error from guacd: {}", e)))?;
            if instruction.opcode == "error" {
                let message = instruction.args.first().map(String::as_str).unwrap_or("");
                let status = instruction.args.get(1).map(String::as_str).unwrap_or("");
                return Err(GatewayError::Handshake(format!(
                    "guacd error while waiting for '{}': {} (status {})",
                    expected, message, status
                )));
            }
            if instruction.opcode != expected {
                return Err(GatewayError::Handshake(format!(
                    "expected '{}' from guacd, got '{}'",
                    expected, instruction.opcode
                )));
            }
            return Ok((instruction, raw));
        }

        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| GatewayError::Handshake(format!("read from guacd failed: {}", e)))?;
        if n == 0 {
            return Err(GatewayError::Handshake(format!(
                "guacd closed the connection while '{}' was expected",
                expected
            )));
        }
        reader.push(&chunk[..n]);
    }
}
