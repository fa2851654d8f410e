//! # Peers
//!
//! The client never touches sockets. A full node is anything implementing
//! [`PeerLink`]: it has an id, advertises service bits, and can be handed an
//! encoded NSPV request. Inbound responses travel the other way, through
//! [`crate::network::ResponseHandler::handle`], and are not this trait's
//! concern.
//!
//! [`PeerSet`] is the owned registry of live links. It also remembers the
//! last peer that answered, so the dispatcher can try it first next time.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::NODE_NSPV;

/// Process-unique peer identifier, assigned by the transport.
pub type PeerId = u64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerError {
    #[error("peer {0} is disconnected")]
    Disconnected(PeerId),

    #[error("send to peer {peer} failed: {reason}")]
    Send { peer: PeerId, reason: String },
}

/// A connected full node.
#[async_trait]
pub trait PeerLink: Send + Sync {
    fn id(&self) -> PeerId;

    /// Remote address, for logs.
    fn addr(&self) -> String;

    /// Service bits from the peer's handshake.
    fn services(&self) -> u64;

    fn is_connected(&self) -> bool;

    /// Queues one encoded NSPV message (kind byte plus body) for the peer.
    async fn send(&self, payload: Vec<u8>) -> Result<(), PeerError>;

    /// Whether the peer answers NSPV requests.
    fn serves_nspv(&self) -> bool {
        self.services() & NODE_NSPV != 0
    }
}

impl fmt::Debug for dyn PeerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLink")
            .field("id", &self.id())
            .field("addr", &self.addr())
            .field("services", &format_args!("{:#x}", self.services()))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Peer Set
// ---------------------------------------------------------------------------

/// Live peers in connection order.
pub struct PeerSet {
    peers: RwLock<Vec<Arc<dyn PeerLink>>>,
    preferred: RwLock<Option<PeerId>>,
    max_peers: usize,
}

impl PeerSet {
    pub fn new(max_peers: usize) -> Self {
        Self {
            peers: RwLock::new(Vec::new()),
            preferred: RwLock::new(None),
            max_peers,
        }
    }

    pub fn max_peers(&self) -> usize {
        self.max_peers
    }

    /// Adds a peer. Returns false if the set is full or the id is taken.
    pub fn insert(&self, peer: Arc<dyn PeerLink>) -> bool {
        let mut peers = self.peers.write();
        if peers.len() >= self.max_peers || peers.iter().any(|p| p.id() == peer.id()) {
            return false;
        }
        info!(
            peer = peer.id(),
            addr = %peer.addr(),
            nspv = peer.serves_nspv(),
            "peer added"
        );
        peers.push(peer);
        true
    }

    pub fn remove(&self, id: PeerId) -> Option<Arc<dyn PeerLink>> {
        let mut peers = self.peers.write();
        let pos = peers.iter().position(|p| p.id() == id)?;
        let mut preferred = self.preferred.write();
        if *preferred == Some(id) {
            *preferred = None;
        }
        debug!(peer = id, "peer removed");
        Some(peers.remove(pos))
    }

    pub fn get(&self, id: PeerId) -> Option<Arc<dyn PeerLink>> {
        self.peers.read().iter().find(|p| p.id() == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    pub fn connected(&self) -> Vec<Arc<dyn PeerLink>> {
        self.peers
            .read()
            .iter()
            .filter(|p| p.is_connected())
            .cloned()
            .collect()
    }

    /// Connected NSPV peers, the preferred one first, then connection order.
    pub fn nspv_candidates(&self) -> Vec<Arc<dyn PeerLink>> {
        let preferred = *self.preferred.read();
        let mut out: Vec<_> = self
            .connected()
            .into_iter()
            .filter(|p| p.serves_nspv())
            .collect();
        if let Some(id) = preferred {
            if let Some(pos) = out.iter().position(|p| p.id() == id) {
                let p = out.remove(pos);
                out.insert(0, p);
            }
        }
        out
    }

    pub fn preferred(&self) -> Option<PeerId> {
        *self.preferred.read()
    }

    pub fn set_preferred(&self, id: PeerId) {
        *self.preferred.write() = Some(id);
    }

    /// Drops peers whose links have gone down. Returns how many went.
    pub fn prune(&self) -> usize {
        let mut peers = self.peers.write();
        let before = peers.len();
        peers.retain(|p| p.is_connected());
        let gone = before - peers.len();
        if gone > 0 {
            let mut preferred = self.preferred.write();
            if let Some(id) = *preferred {
                if !peers.iter().any(|p| p.id() == id) {
                    *preferred = None;
                }
            }
            debug!(gone, "pruned disconnected peers");
        }
        gone
    }
}

impl Default for PeerSet {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_PEERS)
    }
}
