//! Bidirectional relay between a client connection and guacd.
//!
//! Two pipelines run concurrently:
//! - uplink: client text frames -> codec reader -> raw instruction bytes to
//!   guacd; a client `disconnect` is forwarded, then the session closes.
//! - downlink: guacd bytes -> codec reader -> one text frame per instruction
//!   to the client.
//!
//! Either pipeline ends on EOF, socket error, framing violation, inactivity,
//! or process shutdown. The first to end records the close reason under a
//! one-shot guard and wakes the other; teardown then happens exactly once in
//! the session driver.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use guacgate_protocol::{instruction_opcode, InstructionReader};
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, Notify};
use tokio::time::{timeout_at, Instant};

use crate::error::{GatewayError, Result};
use crate::server::transport::{ClientSink, ClientSource};

/// Session lifecycle phase. Transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[repr(u8)]
pub enum Phase {
    Handshaking = 0,
    Relaying = 1,
    Closing = 2,
    Closed = 3,
}

impl Phase {
    fn from_u8(value: u8) -> Phase {
        match value {
            0 => Phase::Handshaking,
            1 => Phase::Relaying,
            2 => Phase::Closing,
            _ => Phase::Closed,
        }
    }
}

/// State shared between a session's two pipelines and its driver.
pub struct SessionState {
    id: u64,
    phase: AtomicU8,
    started: Instant,
    /// Milliseconds since `started` of the last successful non-empty I/O in
    /// either direction
    last_activity_ms: AtomicU64,
    closing: AtomicBool,
    close_notify: Notify,
    close_reason: Mutex<Option<GatewayError>>,
}

impl SessionState {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            phase: AtomicU8::new(Phase::Handshaking as u8),
            started: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            closing: AtomicBool::new(false),
            close_notify: Notify::new(),
            close_reason: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Move the phase forward. Backward transitions are ignored.
    pub fn advance(&self, target: Phase) {
        let mut current = self.phase.load(Ordering::Acquire);
        while current < target as u8 {
            match self.phase.compare_exchange_weak(
                current,
                target as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn reached_relaying(&self) -> bool {
        self.phase.load(Ordering::Acquire) >= Phase::Relaying as u8
    }

    /// Record successful I/O now.
    pub fn touch(&self) {
        self.last_activity_ms
            .store(self.started.elapsed().as_millis() as u64, Ordering::Release);
    }

    /// Instant at which the session becomes idle-expired, as of now.
    pub fn idle_deadline(&self, max_inactivity: Duration) -> Instant {
        self.started
            + Duration::from_millis(self.last_activity_ms.load(Ordering::Acquire))
            + max_inactivity
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// One-shot close guard. The first caller stores the reason, moves the
    /// phase to `Closing`, and wakes the peer pipeline; later calls are
    /// no-ops.
    pub fn begin_close(&self, reason: GatewayError) -> bool {
        if self.closing.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.close_reason.lock().expect("close_reason poisoned") = Some(reason);
        self.advance(Phase::Closing);
        self.close_notify.notify_waiters();
        true
    }

    /// Resolves once `begin_close` has fired.
    pub async fn close_observed(&self) {
        let notified = self.close_notify.notified();
        tokio::pin!(notified);
        // Register with the Notify before reading the flag; a notify_waiters
        // between the read and a first poll would otherwise be lost
        notified.as_mut().enable();
        if self.is_closing() {
            return;
        }
        notified.await;
    }

    /// The reason recorded by the winning `begin_close` call.
    pub fn take_reason(&self) -> Option<GatewayError> {
        self.close_reason.lock().expect("close_reason poisoned").take()
    }
}

/// Run both pipelines to completion.
///
/// Returns the client sink for the teardown close frame; `None` only if the
/// downlink task panicked.
pub async fn run<Src, Snk, D>(
    state: Arc<SessionState>,
    source: Src,
    sink: Snk,
    daemon: D,
    daemon_reader: InstructionReader,
    max_inactivity: Duration,
    shutdown: &broadcast::Sender<()>,
) -> Option<Snk>
where
    Src: ClientSource + 'static,
    Snk: ClientSink + 'static,
    D: AsyncRead + AsyncWrite + Send + 'static,
{
    let (daemon_read, daemon_write) = split(daemon);

    let uplink = tokio::spawn(client_to_daemon(
        Arc::clone(&state),
        source,
        daemon_write,
        max_inactivity,
        shutdown.subscribe(),
    ));
    let downlink = tokio::spawn(daemon_to_client(
        Arc::clone(&state),
        daemon_read,
        daemon_reader,
        sink,
        max_inactivity,
        shutdown.subscribe(),
    ));

    if let Err(e) = uplink.await {
        error!("session {}: uplink task failed: {}", state.id(), e);
        state.begin_close(GatewayError::Internal(format!("uplink task failed: {}", e)));
    }
    match downlink.await {
        Ok(sink) => Some(sink),
        Err(e) => {
            error!("session {}: downlink task failed: {}", state.id(), e);
            state.begin_close(GatewayError::Internal(format!("downlink task failed: {}", e)));
            None
        }
    }
}

async fn client_to_daemon<Src, W>(
    state: Arc<SessionState>,
    mut source: Src,
    mut daemon: W,
    max_inactivity: Duration,
    mut shutdown: broadcast::Receiver<()>,
) where
    Src: ClientSource,
    W: AsyncWrite + Unpin + Send,
{
    let mut reader = InstructionReader::new();
    let end = loop {
        let deadline = state.idle_deadline(max_inactivity);
        let received = tokio::select! {
            biased;
            _ = state.close_observed() => return,
            _ = shutdown.recv() => break GatewayError::Cancelled,
            received = timeout_at(deadline, source.receive_text()) => received,
        };
        let text = match received {
            // Deadline fired; the downlink may have advanced last_activity in
            // the meantime, so only a still-expired deadline counts
            Err(_) => {
                if Instant::now() >= state.idle_deadline(max_inactivity) {
                    break GatewayError::Timeout;
                }
                continue;
            }
            Ok(Ok(Some(text))) => text,
            Ok(Ok(None)) => break GatewayError::PeerClosed,
            Ok(Err(e)) => break e,
        };

        if text.is_empty() {
            continue;
        }
        state.touch();
        reader.push(text.as_bytes());
        match forward_to_daemon(&state, &mut reader, &mut daemon).await {
            Ok(false) => {}
            Ok(true) => {
                debug!("session {}: client requested disconnect", state.id());
                break GatewayError::PeerClosed;
            }
            Err(e) => break e,
        }
    };
    state.begin_close(end);
}

// Drains completed instructions to guacd. Returns true once a client
// `disconnect` has been forwarded.
async fn forward_to_daemon<W>(
    state: &SessionState,
    reader: &mut InstructionReader,
    daemon: &mut W,
) -> Result<bool>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut wrote = false;
    while let Some(raw) = reader.next_instruction()? {
        if state.is_closing() {
            return Ok(false);
        }
        let disconnect = instruction_opcode(&raw)? == "disconnect";
        daemon
            .write_all(&raw)
            .await
            .map_err(|_| GatewayError::PeerClosed)?;
        trace!("session {}: uplink {} bytes", state.id(), raw.len());
        wrote = true;
        if disconnect {
            daemon.flush().await.map_err(|_| GatewayError::PeerClosed)?;
            return Ok(true);
        }
    }
    if wrote {
        daemon
            .flush()
            .await
            .map_err(|_| GatewayError::PeerClosed)?;
    }
    Ok(false)
}

async fn daemon_to_client<R, Snk>(
    state: Arc<SessionState>,
    mut daemon: R,
    mut reader: InstructionReader,
    mut sink: Snk,
    max_inactivity: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> Snk
where
    R: AsyncRead + Unpin + Send,
    Snk: ClientSink,
{
    // The handshake may have over-read past `ready`; deliver that first
    if let Err(e) = forward_to_client(&state, &mut reader, &mut sink).await {
        state.begin_close(e);
        return sink;
    }

    let mut chunk = vec![0u8; 8192];
    let end = loop {
        let deadline = state.idle_deadline(max_inactivity);
        let read = tokio::select! {
            biased;
            _ = state.close_observed() => return sink,
            _ = shutdown.recv() => break GatewayError::Cancelled,
            read = timeout_at(deadline, daemon.read(&mut chunk)) => read,
        };
        let n = match read {
            Err(_) => {
                if Instant::now() >= state.idle_deadline(max_inactivity) {
                    break GatewayError::Timeout;
                }
                continue;
            }
            Ok(Ok(0)) => break GatewayError::PeerClosed,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                debug!("session {}: guacd read error: {}", state.id(), e);
                break GatewayError::PeerClosed;
            }
        };

        state.touch();
        reader.push(&chunk[..n]);
        trace!("session {}: downlink {} bytes", state.id(), n);
        if let Err(e) = forward_to_client(&state, &mut reader, &mut sink).await {
            break e;
        }
    };
    state.begin_close(end);
    sink
}

async fn forward_to_client<Snk>(
    state: &SessionState,
    reader: &mut InstructionReader,
    sink: &mut Snk,
) -> Result<()>
where
    Snk: ClientSink,
{
    while let Some(raw) = reader.next_instruction()? {
        if state.is_closing() {
            return Ok(());
        }
        let text = String::from_utf8(raw.to_vec())
            .map_err(|_| GatewayError::Framing("non-UTF-8 instruction from guacd".to_string()))?;
        sink.send_text(text).await?;
    }
    Ok(())
}
