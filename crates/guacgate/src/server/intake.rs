//! Pending-session intake queue.
//!
//! Upgraded connections enter a bounded queue; a fixed pool of workers
//! dequeues and drives one session each. The queue bound is the backpressure
//! surface: when it is full the connection is refused with an internal-error
//! close and its completion resolves false.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{broadcast, oneshot, Mutex};

use crate::config::Config;
use crate::error::close_code;
use crate::server::session;
use crate::server::transport::{ClientSink, ClientSource};

/// One accepted connection waiting for a worker.
struct PendingConnection<Src, Snk> {
    id: u64,
    source: Src,
    sink: Snk,
    query: HashMap<String, String>,
    completion: oneshot::Sender<bool>,
}

/// Intake counters, logged at shutdown.
#[derive(Debug, Default)]
pub struct IntakeStats {
    /// Sessions accepted into the queue
    pub accepted: AtomicU64,
    /// Sessions currently being driven by a worker
    pub active: AtomicU64,
    /// Sessions refused because the queue was full or closed
    pub rejected: AtomicU64,
}

pub struct Intake<Src, Snk> {
    tx: mpsc::Sender<PendingConnection<Src, Snk>>,
    next_id: AtomicU64,
    stats: Arc<IntakeStats>,
}

impl<Src, Snk> Intake<Src, Snk>
where
    Src: ClientSource + 'static,
    Snk: ClientSink + 'static,
{
    /// Create the queue and spawn the worker pool.
    pub fn start(config: Arc<Config>, shutdown: broadcast::Sender<()>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.websocket.intake_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let stats = Arc::new(IntakeStats::default());

        for worker in 0..config.websocket.workers {
            tokio::spawn(worker_loop(
                worker,
                Arc::clone(&rx),
                Arc::clone(&config),
                shutdown.clone(),
                Arc::clone(&stats),
            ));
        }

        Arc::new(Self {
            tx,
            next_id: AtomicU64::new(0),
            stats,
        })
    }

    /// Hand an upgraded connection to the worker pool.
    ///
    /// Assigns the session id and returns it with the completion receiver.
    /// The completion resolves exactly once: true iff the session reached the
    /// relaying phase. On enqueue failure the socket is closed with an
    /// internal-error status and the completion resolves false immediately.
    pub fn enqueue(
        &self,
        source: Src,
        sink: Snk,
        query: HashMap<String, String>,
    ) -> (u64, oneshot::Receiver<bool>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (completion_tx, completion_rx) = oneshot::channel();
        let pending = PendingConnection {
            id,
            source,
            sink,
            query,
            completion: completion_tx,
        };

        match self.tx.try_send(pending) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                debug!("session {}: queued", id);
            }
            Err(TrySendError::Full(refused) | TrySendError::Closed(refused)) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                warn!("session {}: intake refused (queue unavailable)", id);
                tokio::spawn(async move {
                    let mut sink = refused.sink;
                    let _ = sink
                        .close(close_code::INTERNAL_ERROR, "gateway at capacity")
                        .await;
                    let _ = refused.completion.send(false);
                });
            }
        }
        (id, completion_rx)
    }

    pub fn stats(&self) -> Arc<IntakeStats> {
        Arc::clone(&self.stats)
    }
}

async fn worker_loop<Src, Snk>(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<PendingConnection<Src, Snk>>>>,
    config: Arc<Config>,
    shutdown: broadcast::Sender<()>,
    stats: Arc<IntakeStats>,
) where
    Src: ClientSource + 'static,
    Snk: ClientSink + 'static,
{
    let mut shutdown_rx = shutdown.subscribe();
    loop {
        // Hold the receiver lock only while waiting for the next item
        let pending = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => None,
                pending = rx.recv() => pending,
            }
        };
        let Some(pending) = pending else {
            debug!("worker {}: stopping", worker);
            return;
        };

        stats.active.fetch_add(1, Ordering::Relaxed);
        let success = session::drive(
            pending.id,
            Arc::clone(&config),
            pending.source,
            pending.sink,
            pending.query,
            shutdown.clone(),
        )
        .await;
        let _ = pending.completion.send(success);
        stats.active.fetch_sub(1, Ordering::Relaxed);
    }
}
