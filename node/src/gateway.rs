//! # RPC Gateway
//!
//! Local clients talk to the daemon over TCP, one JSON request per line and
//! one JSON response per line:
//!
//! ```text
//! → {"id":1,"method":"getinfo","params":[]}
//! ← {"id":1,"result":{"height":1723311,...}}
//! ```
//!
//! Each connection gets its own task for reading and writing lines, but
//! commands from every connection funnel through a single queue into one
//! execution task. Commands therefore run one at a time, in arrival order,
//! and concurrent clients see exactly what they would have seen had they
//! taken turns.
//!
//! `stop` is acknowledged, then cancels the shutdown token: the accept loop
//! ends, open connections close, and queued commands are answered with a
//! cancellation error.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nspv_protocol::rpc::{self, RpcCommand, RpcError, RpcRequest, RpcResponse};
use nspv_protocol::NspvClient;

use crate::metrics::SharedMetrics;

/// Longest accepted request line. Fits a hex-encoded maximum-size packet.
pub const MAX_LINE: usize = 2 * nspv_protocol::config::MAX_PACKET_SIZE + 1024;

const QUEUE_DEPTH: usize = 256;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Lines(#[from] LinesCodecError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// An open gateway connection.
#[derive(Debug, Clone)]
pub struct Connection {
    pub peer: SocketAddr,
    pub opened: Instant,
    cancel: CancellationToken,
}

impl Connection {
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Open connections by id.
pub type Connections = Arc<DashMap<u64, Connection>>;

struct Job {
    cmd: RpcCommand,
    reply: oneshot::Sender<Result<Value, RpcError>>,
}

pub struct Gateway {
    listener: TcpListener,
    client: Arc<NspvClient>,
    metrics: SharedMetrics,
    stop: CancellationToken,
    connections: Connections,
    next_id: AtomicU64,
}

impl Gateway {
    pub async fn bind(
        addr: SocketAddr,
        client: Arc<NspvClient>,
        metrics: SharedMetrics,
        stop: CancellationToken,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            client,
            metrics,
            stop,
            connections: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn connections(&self) -> Connections {
        self.connections.clone()
    }

    /// Accepts clients until the stop token fires, then drains.
    pub async fn serve(self) {
        let (jobs, queue) = mpsc::channel(QUEUE_DEPTH);
        let executor = tokio::spawn(execute_loop(
            self.client.clone(),
            self.metrics.clone(),
            self.stop.clone(),
            queue,
        ));
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "rpc gateway listening");
        }

        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                r = self.listener.accept() => r,
            };
            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            self.spawn_connection(stream, peer, jobs.clone());
        }

        drop(jobs);
        for conn in self.connections.iter() {
            conn.close();
        }
        if let Err(e) = executor.await {
            warn!(error = %e, "rpc executor ended abnormally");
        }
        info!("rpc gateway stopped");
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, jobs: mpsc::Sender<Job>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.stop.child_token();
        self.connections.insert(
            id,
            Connection {
                peer,
                opened: Instant::now(),
                cancel: cancel.clone(),
            },
        );
        self.metrics.rpc_clients.set(self.connections.len() as i64);
        debug!(conn = id, %peer, "rpc client connected");

        let connections = self.connections.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, jobs, cancel).await {
                debug!(conn = id, error = %e, "rpc connection error");
            }
            connections.remove(&id);
            metrics.rpc_clients.set(connections.len() as i64);
            debug!(conn = id, "rpc client disconnected");
        });
    }
}

async fn serve_connection(
    stream: TcpStream,
    jobs: mpsc::Sender<Job>,
    cancel: CancellationToken,
) -> Result<(), GatewayError> {
    let (read_half, write_half) = stream.into_split();
    let mut lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE));
    let mut out = FramedWrite::new(write_half, LinesCodec::new());

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = lines.next() => next,
        };
        let response = match next {
            None => break,
            Some(Ok(line)) if line.trim().is_empty() => continue,
            Some(Ok(line)) => respond(&line, &jobs).await,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => RpcResponse::error(
                Value::Null,
                RpcError::invalid_request(format!("request line exceeds {} bytes", MAX_LINE)),
            ),
            Some(Err(e)) => return Err(e.into()),
        };
        out.send(serde_json::to_string(&response)?).await?;
    }
    Ok(())
}

async fn respond(line: &str, jobs: &mpsc::Sender<Job>) -> RpcResponse {
    let request = match RpcRequest::from_line(line) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let cmd = match RpcCommand::parse(&request.method, request.params) {
        Ok(c) => c,
        Err(e) => return RpcResponse::error(request.id, e),
    };

    let (reply, rx) = oneshot::channel();
    if jobs.send(Job { cmd, reply }).await.is_err() {
        return RpcResponse::error(request.id, RpcError::cancelled());
    }
    let outcome = rx.await.unwrap_or_else(|_| Err(RpcError::cancelled()));
    RpcResponse::from_outcome(request.id, outcome)
}

/// Runs queued commands one at a time.
async fn execute_loop(
    client: Arc<NspvClient>,
    metrics: SharedMetrics,
    stop: CancellationToken,
    mut queue: mpsc::Receiver<Job>,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            job = queue.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let method = job.cmd.method();
        let started = Instant::now();
        let outcome = rpc::execute(&client, job.cmd).await;
        metrics
            .rpc_latency_seconds
            .observe(started.elapsed().as_secs_f64());
        metrics
            .rpc_commands_total
            .with_label_values(&[method.name()])
            .inc();
        if let Err(e) = &outcome {
            metrics
                .rpc_errors_total
                .with_label_values(&[method.name()])
                .inc();
            match e.code {
                RpcError::TIMEOUT => metrics.dispatch_timeouts_total.inc(),
                RpcError::NO_PEERS | RpcError::CANCELLED => metrics.dispatch_failures_total.inc(),
                _ => {}
            }
            debug!(%method, error = %e, "rpc command failed");
        }

        let stopping = matches!(method, rpc::RpcMethod::Stop) && outcome.is_ok();
        // the caller may have hung up; nothing to do then
        let _ = job.reply.send(outcome);
        if stopping {
            info!("stop requested over rpc");
            stop.cancel();
            break;
        }
    }

    // answer whatever is still queued
    queue.close();
    while let Some(job) = queue.recv().await {
        let _ = job.reply.send(Err(RpcError::cancelled()));
    }
}
