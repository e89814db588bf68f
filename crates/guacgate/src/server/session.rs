//! Per-session orchestration.
//!
//! A worker drives one accepted connection through its whole life: decrypt
//! the token, merge arguments, connect and handshake with guacd, relay, then
//! tear down exactly once. The returned flag is the intake completion value:
//! true iff the session reached the relaying phase.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::args;
use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::guacd::{self, HandshakeOutcome};
use crate::server::transport::{ClientSink, ClientSource};
use crate::server::tunnel::{self, Phase, SessionState};
use crate::token;

pub async fn drive<Src, Snk>(
    id: u64,
    config: Arc<Config>,
    source: Src,
    mut sink: Snk,
    query: HashMap<String, String>,
    shutdown: broadcast::Sender<()>,
) -> bool
where
    Src: ClientSource + 'static,
    Snk: ClientSink + 'static,
{
    let state = Arc::new(SessionState::new(id));

    let mut shutdown_rx = shutdown.subscribe();
    let setup = tokio::select! {
        biased;
        _ = shutdown_rx.recv() => Err(GatewayError::Cancelled),
        setup = establish(&config, &query) => setup,
    };

    let (daemon, outcome) = match setup {
        Ok(established) => established,
        Err(e) => {
            warn!("session {}: setup failed: {}", id, e);
            let _ = sink.close(e.ws_close_code(), "connection failed").await;
            return false;
        }
    };

    // Forward guacd's ready instruction verbatim, then enter the relay
    let ready_text = match String::from_utf8(outcome.ready.to_vec()) {
        Ok(text) => text,
        Err(_) => {
            warn!("session {}: non-UTF-8 ready instruction", id);
            let _ = sink
                .close(GatewayError::Handshake(String::new()).ws_close_code(), "handshake failed")
                .await;
            return false;
        }
    };
    if let Err(e) = sink.send_text(ready_text).await {
        warn!("session {}: client went away before ready: {}", id, e);
        return false;
    }

    state.advance(Phase::Relaying);
    state.touch();
    info!(
        "session {}: relaying (guacd session {})",
        id, outcome.guacd_session_id
    );

    let sink = tunnel::run(
        Arc::clone(&state),
        source,
        sink,
        daemon,
        outcome.reader,
        config.max_inactivity(),
        &shutdown,
    )
    .await;

    let reason = state
        .take_reason()
        .unwrap_or_else(|| GatewayError::Internal("tunnel ended without a reason".to_string()));
    match &reason {
        GatewayError::PeerClosed => debug!("session {}: closed ({})", id, reason),
        GatewayError::Timeout | GatewayError::Cancelled => {
            info!("session {}: closed ({})", id, reason)
        }
        other => warn!("session {}: closed ({})", id, other),
    }

    if let Some(mut sink) = sink {
        let _ = sink.close(reason.ws_close_code(), &reason.to_string()).await;
    }
    state.advance(Phase::Closed);
    state.reached_relaying()
}

// Everything that must succeed before the session can relay. Failing here
// leaves the client socket as the only resource to release.
async fn establish(
    config: &Config,
    query: &HashMap<String, String>,
) -> Result<(TcpStream, HandshakeOutcome)> {
    let token = query
        .get("token")
        .ok_or_else(|| GatewayError::BadToken("missing 'token' query parameter".to_string()))?;
    let descriptor = token::decrypt(&config.password, token)?;
    let arguments = args::merge_arguments(&config.client, &descriptor, query)?;

    let mut daemon = guacd::connect(&config.guacd).await?;
    let outcome = guacd::handshake(
        &mut daemon,
        &descriptor.protocol,
        &arguments,
        config.client.default_size,
        config.handshake_timeout(),
    )
    .await?;
    Ok((daemon, outcome))
}
