//! # TCP Peer Link
//!
//! Full nodes speak the chain's P2P protocol, so NSPV payloads travel inside
//! its envelope:
//!
//! ```text
//! magic (4) | command (12, NUL padded) | length (4, LE) | checksum (4) | payload
//! ```
//!
//! The checksum is the first four bytes of SHA-256d over the payload.
//!
//! A connection starts with the version handshake: we send `version`, the
//! node answers with its own `version` (which carries the service bits we
//! need) and a `verack`, and we ack back. After that NSPV requests go out as
//! `getnSPV` and answers come back as `nSPV`, straight into the response
//! handler. `ping` gets a `pong`; everything else is ignored.
//!
//! Each link runs a reader task and a writer task. Either one ending closes
//! the link, and [`PeerLink::is_connected`] turns false so the next
//! maintenance tick prunes it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nspv_protocol::config::{ChainParams, MAX_PACKET_SIZE};
use nspv_protocol::crypto::double_sha256;
use nspv_protocol::network::{PeerError, PeerId, PeerLink, PeerSet, ResponseHandler};

pub const HEADER_LEN: usize = 24;
const COMMAND_LEN: usize = 12;
const OUTBOX_DEPTH: usize = 64;
const USER_AGENT: &[u8] = b"/nspv-rs:0.1.0/";

pub const CMD_VERSION: &str = "version";
pub const CMD_VERACK: &str = "verack";
pub const CMD_PING: &str = "ping";
pub const CMD_PONG: &str = "pong";
pub const CMD_GETNSPV: &str = "getnSPV";
pub const CMD_NSPV: &str = "nSPV";

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("wrong network magic {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("command {0:?} does not fit the envelope")]
    CommandTooLong(String),

    #[error("command field is not NUL-padded ascii")]
    BadCommand,

    #[error("payload of {size} bytes exceeds {max}")]
    TooLarge { size: usize, max: usize },

    #[error("payload checksum mismatch")]
    Checksum,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("connecting to {addr} timed out")]
    Timeout { addr: SocketAddr },

    #[error("handshake with {addr} failed: {reason}")]
    Handshake { addr: SocketAddr, reason: String },

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One P2P message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub command: String,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(command: &str, payload: Vec<u8>) -> Self {
        Self {
            command: command.to_string(),
            payload,
        }
    }

    pub fn encode(&self, magic: [u8; 4]) -> Result<Vec<u8>, EnvelopeError> {
        let cmd = self.command.as_bytes();
        if cmd.len() > COMMAND_LEN || !self.command.is_ascii() {
            return Err(EnvelopeError::CommandTooLong(self.command.clone()));
        }
        if self.payload.len() > MAX_PACKET_SIZE {
            return Err(EnvelopeError::TooLarge {
                size: self.payload.len(),
                max: MAX_PACKET_SIZE,
            });
        }
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_slice(&magic);
        buf.put_slice(cmd);
        buf.put_bytes(0, COMMAND_LEN - cmd.len());
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&checksum(&self.payload));
        buf.put_slice(&self.payload);
        Ok(buf.to_vec())
    }
}

pub fn checksum(payload: &[u8]) -> [u8; 4] {
    let h = double_sha256(payload);
    let mut out = [0u8; 4];
    out.copy_from_slice(&h.as_bytes()[..4]);
    out
}

struct Header {
    command: String,
    len: usize,
    checksum: [u8; 4],
}

fn parse_header(raw: &[u8; HEADER_LEN], magic: [u8; 4]) -> Result<Header, EnvelopeError> {
    let mut buf = &raw[..];
    let mut got = [0u8; 4];
    buf.copy_to_slice(&mut got);
    if got != magic {
        return Err(EnvelopeError::BadMagic(got));
    }

    let mut cmd = [0u8; COMMAND_LEN];
    buf.copy_to_slice(&mut cmd);
    let end = cmd.iter().position(|b| *b == 0).unwrap_or(COMMAND_LEN);
    if cmd[end..].iter().any(|b| *b != 0) || !cmd[..end].iter().all(u8::is_ascii_graphic) {
        return Err(EnvelopeError::BadCommand);
    }
    let command = String::from_utf8_lossy(&cmd[..end]).into_owned();

    let len = buf.get_u32_le() as usize;
    if len > MAX_PACKET_SIZE {
        return Err(EnvelopeError::TooLarge {
            size: len,
            max: MAX_PACKET_SIZE,
        });
    }
    let mut sum = [0u8; 4];
    buf.copy_to_slice(&mut sum);
    Ok(Header {
        command,
        len,
        checksum: sum,
    })
}

/// Reads one envelope, checking magic, size and checksum.
pub async fn read_envelope<R: AsyncRead + Unpin>(
    reader: &mut R,
    magic: [u8; 4],
) -> Result<Envelope, EnvelopeError> {
    let mut raw = [0u8; HEADER_LEN];
    reader.read_exact(&mut raw).await?;
    let header = parse_header(&raw, magic)?;

    let mut payload = vec![0u8; header.len];
    reader.read_exact(&mut payload).await?;
    if checksum(&payload) != header.checksum {
        return Err(EnvelopeError::Checksum);
    }
    Ok(Envelope {
        command: header.command,
        payload,
    })
}

async fn write_envelope<W: AsyncWrite + Unpin>(
    writer: &mut W,
    magic: [u8; 4],
    env: &Envelope,
) -> Result<(), EnvelopeError> {
    writer.write_all(&env.encode(magic)?).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Version handshake
// ---------------------------------------------------------------------------

fn put_net_addr(buf: &mut BytesMut) {
    buf.put_u64_le(0);
    buf.put_bytes(0, 10);
    buf.put_slice(&[0xff, 0xff, 127, 0, 0, 1]);
    buf.put_u16(0);
}

/// Our `version` payload. We advertise no services of our own.
pub fn version_payload(params: &ChainParams, nonce: u64, timestamp: i64) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(86 + USER_AGENT.len());
    buf.put_i32_le(params.protocol_version);
    buf.put_u64_le(0);
    buf.put_i64_le(timestamp);
    put_net_addr(&mut buf);
    put_net_addr(&mut buf);
    buf.put_u64_le(nonce);
    buf.put_u8(USER_AGENT.len() as u8);
    buf.put_slice(USER_AGENT);
    buf.put_i32_le(0);
    buf.put_u8(0);
    buf.to_vec()
}

/// Protocol version and service bits from a peer's `version`.
pub fn parse_version(payload: &[u8]) -> Option<(i32, u64)> {
    let mut buf = payload;
    if buf.remaining() < 12 {
        return None;
    }
    let version = buf.get_i32_le();
    let services = buf.get_u64_le();
    Some((version, services))
}

/// Runs the handshake. Returns the peer's service bits.
pub async fn handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    params: &ChainParams,
    addr: SocketAddr,
) -> Result<u64, ConnectError> {
    let magic = params.magic;
    let ours = version_payload(params, rand::random(), chrono::Utc::now().timestamp());
    write_envelope(stream, magic, &Envelope::new(CMD_VERSION, ours)).await?;

    let mut services = None;
    let mut acked = false;
    while services.is_none() || !acked {
        let env = read_envelope(stream, magic).await?;
        match env.command.as_str() {
            CMD_VERSION => {
                let (version, bits) =
                    parse_version(&env.payload).ok_or_else(|| ConnectError::Handshake {
                        addr,
                        reason: "short version message".into(),
                    })?;
                debug!(%addr, version, services = format_args!("{:#x}", bits), "peer version");
                services = Some(bits);
                write_envelope(stream, magic, &Envelope::new(CMD_VERACK, Vec::new())).await?;
            }
            CMD_VERACK => acked = true,
            CMD_PING => {
                write_envelope(stream, magic, &Envelope::new(CMD_PONG, env.payload)).await?;
            }
            other => debug!(%addr, command = other, "ignoring message during handshake"),
        }
    }
    Ok(services.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

/// A handshaken TCP connection to a full node.
pub struct TcpPeer {
    id: PeerId,
    addr: SocketAddr,
    services: u64,
    outbox: mpsc::Sender<Envelope>,
    closed: CancellationToken,
}

impl TcpPeer {
    pub fn close(&self) {
        self.closed.cancel();
    }
}

#[async_trait]
impl PeerLink for TcpPeer {
    fn id(&self) -> PeerId {
        self.id
    }

    fn addr(&self) -> String {
        self.addr.to_string()
    }

    fn services(&self) -> u64 {
        self.services
    }

    fn is_connected(&self) -> bool {
        !self.closed.is_cancelled()
    }

    async fn send(&self, payload: Vec<u8>) -> Result<(), PeerError> {
        if self.closed.is_cancelled() {
            return Err(PeerError::Disconnected(self.id));
        }
        self.outbox
            .send(Envelope::new(CMD_GETNSPV, payload))
            .await
            .map_err(|_| PeerError::Disconnected(self.id))
    }
}

/// Opens handshaken links that feed the response handler.
pub struct Connector {
    params: ChainParams,
    handler: ResponseHandler,
    stop: CancellationToken,
    timeout: Duration,
    next_id: AtomicU64,
}

impl Connector {
    pub fn new(
        params: ChainParams,
        handler: ResponseHandler,
        stop: CancellationToken,
        timeout: Duration,
    ) -> Self {
        Self {
            params,
            handler,
            stop,
            timeout,
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn connect(&self, addr: SocketAddr) -> Result<Arc<TcpPeer>, ConnectError> {
        let attempt = async {
            let mut stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            let services = handshake(&mut stream, &self.params, addr).await?;
            Ok::<_, ConnectError>((stream, services))
        };
        let (stream, services) = tokio::time::timeout(self.timeout, attempt)
            .await
            .map_err(|_| ConnectError::Timeout { addr })??;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbox, rx) = mpsc::channel(OUTBOX_DEPTH);
        let closed = self.stop.child_token();
        let (read_half, write_half) = stream.into_split();

        tokio::spawn(write_loop(
            write_half,
            rx,
            self.params.magic,
            closed.clone(),
            id,
        ));
        tokio::spawn(read_loop(
            read_half,
            outbox.clone(),
            self.handler.clone(),
            self.params.magic,
            closed.clone(),
            id,
        ));

        info!(peer = id, %addr, services = format_args!("{:#x}", services), "peer connected");
        Ok(Arc::new(TcpPeer {
            id,
            addr,
            services,
            outbox,
            closed,
        }))
    }
}

/// Keeps one link open to each target while the peer set has room, retrying
/// every `retry` until `stop` fires. Targets are `host:port` and are resolved
/// on every attempt.
pub async fn keep_connected(
    connector: Arc<Connector>,
    peers: Arc<PeerSet>,
    targets: Vec<String>,
    retry: Duration,
    stop: CancellationToken,
) {
    let mut links: HashMap<String, PeerId> = HashMap::new();
    let mut ticker = tokio::time::interval(retry);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }
        for target in &targets {
            let live = links
                .get(target)
                .and_then(|id| peers.get(*id))
                .is_some_and(|p| p.is_connected());
            if live || peers.len() >= peers.max_peers() {
                continue;
            }
            match dial(&connector, target).await {
                Ok(peer) => {
                    let id = peer.id();
                    if peers.insert(peer.clone()) {
                        links.insert(target.clone(), id);
                    } else {
                        peer.close();
                    }
                }
                Err(e) => warn!(peer = %target, error = %e, "peer connect failed"),
            }
        }
    }
}

async fn dial(connector: &Connector, target: &str) -> Result<Arc<TcpPeer>, ConnectError> {
    let mut last = None;
    for addr in tokio::net::lookup_host(target).await? {
        match connector.connect(addr).await {
            Ok(peer) => return Ok(peer),
            Err(e) => last = Some(e),
        }
    }
    Err(last.unwrap_or_else(|| {
        ConnectError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} resolved to no addresses", target),
        ))
    }))
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut rx: mpsc::Receiver<Envelope>,
    magic: [u8; 4],
    closed: CancellationToken,
    id: PeerId,
) {
    loop {
        let env = tokio::select! {
            _ = closed.cancelled() => break,
            env = rx.recv() => match env {
                Some(env) => env,
                None => break,
            },
        };
        if let Err(e) = write_envelope(&mut writer, magic, &env).await {
            warn!(peer = id, error = %e, "peer write failed");
            break;
        }
    }
    closed.cancel();
    let _ = writer.shutdown().await;
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    outbox: mpsc::Sender<Envelope>,
    handler: ResponseHandler,
    magic: [u8; 4],
    closed: CancellationToken,
    id: PeerId,
) {
    loop {
        let env = tokio::select! {
            _ = closed.cancelled() => break,
            r = read_envelope(&mut reader, magic) => match r {
                Ok(env) => env,
                Err(e) => {
                    debug!(peer = id, error = %e, "peer read ended");
                    break;
                }
            },
        };
        match env.command.as_str() {
            CMD_NSPV => {
                handler.handle(id, &env.payload);
            }
            CMD_PING => {
                if outbox.send(Envelope::new(CMD_PONG, env.payload)).await.is_err() {
                    break;
                }
            }
            other => debug!(peer = id, command = other, len = env.payload.len(), "ignored"),
        }
    }
    closed.cancel();
    info!(peer = id, "peer disconnected");
}
