//! # Response Cache
//!
//! One slot per message kind, each a `tokio::sync::watch` channel. The
//! response handler is the only writer; dispatchers subscribe and wake the
//! moment a new response lands. Every store bumps the slot's generation, so a
//! waiter can tell "a response arrived after I sent" from "a response was
//! already sitting there".
//!
//! Readers always see a whole [`Slot`]: the watch channel swaps values under
//! its own lock, so there are no partial reads.
//!
//! Besides the slots the cache keeps the latest chain info (with the time it
//! arrived, for the maintenance refresh) and per-peer counters.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::message::{ChainInfo, MessageKind, NspvResponse};
use crate::network::peer::PeerId;

/// Contents of one per-kind slot.
#[derive(Debug, Clone, Default)]
pub struct Slot {
    /// Number of responses stored so far.
    pub generation: u64,
    /// Who sent the current response.
    pub peer: Option<PeerId>,
    pub response: Option<Arc<NspvResponse>>,
}

/// Per-peer response accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PeerStats {
    pub responses: u64,
    pub dropped: u64,
    #[serde(skip)]
    pub last_info: Option<Instant>,
}

pub struct ResponseCache {
    slots: [watch::Sender<Slot>; MessageKind::COUNT],
    info: RwLock<Option<(Instant, ChainInfo)>>,
    stats: DashMap<PeerId, PeerStats>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| watch::channel(Slot::default()).0),
            info: RwLock::new(None),
            stats: DashMap::new(),
        }
    }

    /// Subscribes to a kind's slot. The returned receiver has already seen
    /// the current value.
    pub fn subscribe(&self, kind: MessageKind) -> watch::Receiver<Slot> {
        self.slots[kind.index()].subscribe()
    }

    /// Current contents of a kind's slot.
    pub fn latest(&self, kind: MessageKind) -> Slot {
        self.slots[kind.index()].borrow().clone()
    }

    /// Replaces the slot owned by the response's kind and wakes its waiters.
    pub fn store(&self, peer: PeerId, response: NspvResponse) {
        let kind = response.kind();
        if let NspvResponse::Info(info) = &response {
            let now = Instant::now();
            *self.info.write() = Some((now, info.clone()));
            self.stats.entry(peer).or_default().last_info = Some(now);
        }
        self.stats.entry(peer).or_default().responses += 1;

        let response = Arc::new(response);
        self.slots[kind.index()].send_modify(|slot| {
            slot.generation += 1;
            slot.peer = Some(peer);
            slot.response = Some(response);
        });
    }

    /// Counts a message from `peer` that was dropped.
    pub fn record_dropped(&self, peer: PeerId) {
        self.stats.entry(peer).or_default().dropped += 1;
    }

    /// Latest chain info from any peer.
    pub fn chain_info(&self) -> Option<ChainInfo> {
        self.info.read().as_ref().map(|(_, info)| info.clone())
    }

    /// When any peer last delivered chain info.
    pub fn last_info_at(&self) -> Option<Instant> {
        self.info.read().as_ref().map(|(at, _)| *at)
    }

    pub fn peer_stats(&self, peer: PeerId) -> PeerStats {
        self.stats.get(&peer).map(|s| *s).unwrap_or_default()
    }

    pub fn forget_peer(&self, peer: PeerId) {
        self.stats.remove(&peer);
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}
