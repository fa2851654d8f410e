//! # Maintenance Task
//!
//! A once-a-second housekeeping loop. Each tick it:
//!
//! 1. drops peers whose link has gone away,
//! 2. asks every NSPV peer that has not sent chain info lately for a fresh
//!    INFO (fire and forget; the answer lands in the cache through the normal
//!    handler path),
//! 3. scrubs an expired login.
//!
//! The task never waits on a response, so a stalled peer cannot hold up the
//! session expiry.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MaintenanceConfig;
use crate::message::{InfoRequest, NspvRequest};
use crate::network::cache::ResponseCache;
use crate::network::peer::{PeerId, PeerSet};
use crate::session::{Session, SessionError};

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub pruned: usize,
    pub refreshed: usize,
    pub expired: bool,
}

pub struct Maintenance {
    peers: Arc<PeerSet>,
    cache: Arc<ResponseCache>,
    session: Arc<Session>,
    config: MaintenanceConfig,
    /// Last time this task asked each peer for INFO.
    asked: DashMap<PeerId, Instant>,
}

impl Maintenance {
    pub fn new(
        peers: Arc<PeerSet>,
        cache: Arc<ResponseCache>,
        session: Arc<Session>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            peers,
            cache,
            session,
            config,
            asked: DashMap::new(),
        }
    }

    /// Runs one housekeeping pass. Refresh sends still in flight when `stop`
    /// fires are abandoned; expiry is enforced either way.
    pub async fn tick(&self, stop: &CancellationToken) -> TickReport {
        let mut report = TickReport {
            pruned: self.peers.prune(),
            ..Default::default()
        };
        self.asked.retain(|id, _| self.peers.get(*id).is_some());

        let now = Instant::now();
        for peer in self.peers.nspv_candidates() {
            let id = peer.id();
            let heard = self.cache.peer_stats(id).last_info;
            let asked = self.asked.get(&id).map(|at| *at);
            let fresh = heard
                .into_iter()
                .chain(asked)
                .max()
                .is_some_and(|last| now.duration_since(last) < self.config.info_refresh);
            if fresh {
                continue;
            }

            let bytes = match NspvRequest::Info(InfoRequest { hdr_height: 0 }).encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "could not encode info request");
                    break;
                }
            };
            self.asked.insert(id, now);
            let sent = tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    debug!(peer = id, "info refresh abandoned");
                    break;
                }
                sent = peer.send(bytes) => sent,
            };
            match sent {
                Ok(()) => {
                    debug!(peer = id, "info refresh sent");
                    report.refreshed += 1;
                }
                Err(e) => warn!(peer = id, error = %e, "info refresh failed"),
            }
        }

        if let Err(SessionError::Expired) = self.session.enforce_expiry() {
            report.expired = true;
        }
        report
    }

    /// Ticks until `stop` is cancelled.
    pub async fn run(&self, stop: CancellationToken) {
        let mut ticker = interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_ms = self.config.tick.as_millis() as u64, "maintenance started");

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.tick(&stop).await;
                    if report != TickReport::default() {
                        debug!(?report, "maintenance tick");
                    }
                }
            }
        }
        info!("maintenance stopped");
    }
}
