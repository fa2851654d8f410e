//! # Request Dispatcher
//!
//! Sends one NSPV request and waits for the response that answers it.
//!
//! ```text
//! caller ── request() ──> lock(kind) ──> subscribe(slot) ──> peer.send()
//!                                                               │
//!        <── response ── match? <── slot changed <── handler ───┘
//! ```
//!
//! ## Design Decisions
//!
//! - **Subscribe before send.** The slot receiver is taken before the bytes
//!   go out, so a fast peer cannot answer in the gap and be missed.
//! - **Notification, not polling.** Waiters sleep on the watch channel and
//!   wake exactly when the handler stores a response. The budget per peer is
//!   still `poll_iters × poll_interval` (5 s by default) so timing matches
//!   nodes that expect the classic poll loop.
//! - **Correlation.** A response must be newer than the send *and* answer
//!   this request (same address, height or txid). A late answer to an older
//!   request of the same kind does not count.
//! - **One caller per kind.** Each kind has a `tokio::sync::Mutex`; a second
//!   caller of the same kind queues behind the first. Different kinds run
//!   side by side.
//! - **Bounded retries.** With [`PeerSelector::Any`] every candidate is tried
//!   at most once per request. A peer that fails to send or stays silent is
//!   skipped for the rest of that request.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::EncodeError;
use crate::config::DispatchConfig;
use crate::message::{MessageKind, NspvRequest, NspvResponse};
use crate::network::cache::{ResponseCache, Slot};
use crate::network::peer::{PeerId, PeerLink, PeerSet};

/// Which peers a request may go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerSelector {
    /// Any connected NSPV peer, preferred peer first.
    Any,
    /// Exactly this peer.
    Peer(PeerId),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// At least one peer accepted the request but none answered in time.
    #[error("no {kind} response within budget")]
    Timeout { kind: MessageKind },

    #[error("no connected NSPV peers")]
    NoPeersAvailable,

    #[error("request cancelled")]
    Cancelled,

    #[error("request could not be encoded: {0}")]
    Encode(#[from] EncodeError),
}

enum WaitOutcome {
    Answered(PeerId, Arc<NspvResponse>),
    TimedOut,
    Cancelled,
}

/// A response and the peer it came from.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub peer: PeerId,
    pub response: Arc<NspvResponse>,
}

pub struct Dispatcher {
    peers: Arc<PeerSet>,
    cache: Arc<ResponseCache>,
    locks: [Mutex<()>; MessageKind::COUNT],
    config: DispatchConfig,
    stop: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        peers: Arc<PeerSet>,
        cache: Arc<ResponseCache>,
        config: DispatchConfig,
        stop: CancellationToken,
    ) -> Self {
        Self {
            peers,
            cache,
            locks: std::array::from_fn(|_| Mutex::new(())),
            config,
            stop,
        }
    }

    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    fn candidates(&self, selector: PeerSelector) -> Vec<Arc<dyn PeerLink>> {
        match selector {
            PeerSelector::Any => self.peers.nspv_candidates(),
            PeerSelector::Peer(id) => self
                .peers
                .get(id)
                .filter(|p| p.is_connected() && p.serves_nspv())
                .into_iter()
                .collect(),
        }
    }

    /// Sends `request` and returns the first response that answers it.
    pub async fn request(
        &self,
        request: &NspvRequest,
        selector: PeerSelector,
    ) -> Result<Dispatched, DispatchError> {
        let kind = request.kind();
        let bytes = request.encode()?;

        let _turn = tokio::select! {
            biased;
            _ = self.stop.cancelled() => return Err(DispatchError::Cancelled),
            guard = self.locks[kind.index()].lock() => guard,
        };

        let candidates = self.candidates(selector);
        if candidates.is_empty() {
            debug!(%kind, ?selector, "no candidate peers");
            return Err(DispatchError::NoPeersAvailable);
        }

        let mut timed_out = false;
        for peer in candidates {
            if self.stop.is_cancelled() {
                return Err(DispatchError::Cancelled);
            }

            let mut rx = self.cache.subscribe(kind);
            let baseline = rx.borrow_and_update().generation;

            if let Err(e) = peer.send(bytes.clone()).await {
                warn!(peer = peer.id(), %kind, error = %e, "send failed, trying next peer");
                continue;
            }
            debug!(peer = peer.id(), %kind, len = bytes.len(), "request sent");

            match self.wait(&mut rx, baseline, request, peer.id()).await {
                WaitOutcome::Answered(from, response) => {
                    self.peers.set_preferred(from);
                    return Ok(Dispatched {
                        peer: from,
                        response,
                    });
                }
                WaitOutcome::TimedOut => {
                    timed_out = true;
                    info!(peer = peer.id(), %kind, "peer did not answer in time");
                }
                WaitOutcome::Cancelled => return Err(DispatchError::Cancelled),
            }
        }

        if timed_out {
            Err(DispatchError::Timeout { kind })
        } else {
            Err(DispatchError::NoPeersAvailable)
        }
    }

    async fn wait(
        &self,
        rx: &mut watch::Receiver<Slot>,
        baseline: u64,
        request: &NspvRequest,
        sent_to: PeerId,
    ) -> WaitOutcome {
        let deadline = Instant::now() + self.config.per_peer_budget();

        let answered = async {
            loop {
                if rx.changed().await.is_err() {
                    // cache dropped; nothing more will arrive
                    std::future::pending::<()>().await;
                }
                let slot = rx.borrow_and_update().clone();
                if slot.generation <= baseline {
                    continue;
                }
                if let Some(resp) = slot.response {
                    if request.matches(&resp) {
                        return (slot.peer.unwrap_or(sent_to), resp);
                    }
                    debug!(kind = %request.kind(), "ignoring uncorrelated response");
                }
            }
        };

        tokio::select! {
            biased;
            _ = self.stop.cancelled() => WaitOutcome::Cancelled,
            r = timeout_at(deadline, answered) => match r {
                Ok((from, resp)) => WaitOutcome::Answered(from, resp),
                Err(_) => WaitOutcome::TimedOut,
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::config::NODE_NSPV;
    use crate::message::{NotarizationWindow, NtzsRequest};
    use crate::network::handler::ResponseHandler;
    use crate::network::peer::PeerError;

    /// How a mock peer reacts to a request.
    #[derive(Clone, Copy)]
    pub(crate) enum Behaviour {
        Silent,
        FailSend,
        Answer { delay: Duration },
    }

    /// A peer that answers NTZS requests with a window for the queried
    /// height, through the real response handler.
    pub(crate) struct MockPeer {
        pub id: PeerId,
        pub behaviour: Behaviour,
        pub handler: ResponseHandler,
        pub sent: AtomicUsize,
        pub up: AtomicBool,
    }

    impl MockPeer {
        pub fn new(id: PeerId, behaviour: Behaviour, handler: ResponseHandler) -> Arc<Self> {
            Arc::new(Self {
                id,
                behaviour,
                handler,
                sent: AtomicUsize::new(0),
                up: AtomicBool::new(true),
            })
        }
    }

    #[async_trait]
    impl PeerLink for MockPeer {
        fn id(&self) -> PeerId {
            self.id
        }
        fn addr(&self) -> String {
            format!("mock-{}", self.id)
        }
        fn services(&self) -> u64 {
            NODE_NSPV
        }
        fn is_connected(&self) -> bool {
            self.up.load(Ordering::SeqCst)
        }
        async fn send(&self, payload: Vec<u8>) -> Result<(), PeerError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            let delay = match self.behaviour {
                Behaviour::Silent => return Ok(()),
                Behaviour::FailSend => {
                    return Err(PeerError::Send {
                        peer: self.id,
                        reason: "broken pipe".into(),
                    })
                }
                Behaviour::Answer { delay } => delay,
            };
            let height = match NspvRequest::decode(&payload) {
                Ok(NspvRequest::Ntzs(q)) => q.height,
                _ => return Ok(()),
            };
            let reply = NspvResponse::Ntzs(NotarizationWindow {
                req_height: height,
                ..Default::default()
            })
            .encode()
            .unwrap();
            let handler = self.handler.clone();
            let id = self.id;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                handler.handle(id, &reply);
            });
            Ok(())
        }
    }

    struct Rig {
        dispatcher: Arc<Dispatcher>,
        handler: ResponseHandler,
        stop: CancellationToken,
    }

    fn rig() -> Rig {
        let peers = Arc::new(PeerSet::new(16));
        let cache = Arc::new(ResponseCache::new());
        let stop = CancellationToken::new();
        let dispatcher = Arc::new(Dispatcher::new(
            peers,
            cache.clone(),
            DispatchConfig::default(),
            stop.clone(),
        ));
        Rig {
            dispatcher,
            handler: ResponseHandler::new(cache),
            stop,
        }
    }

    impl Rig {
        fn add(&self, id: PeerId, behaviour: Behaviour) -> Arc<MockPeer> {
            let peer = MockPeer::new(id, behaviour, self.handler.clone());
            assert!(self.dispatcher.peers().insert(peer.clone()));
            peer
        }
    }

    fn ntzs(height: i32) -> NspvRequest {
        NspvRequest::Ntzs(NtzsRequest { height })
    }

    const BUDGET: Duration = Duration::from_secs(5);

    // -- 1. success paths ----------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn answer_from_first_peer() {
        let rig = rig();
        rig.add(1, Behaviour::Answer {
            delay: Duration::from_millis(120),
        });

        let start = Instant::now();
        let got = rig.dispatcher.request(&ntzs(500), PeerSelector::Any).await.unwrap();
        assert_eq!(got.peer, 1);
        assert!(matches!(&*got.response, NspvResponse::Ntzs(w) if w.req_height == 500));
        assert_eq!(start.elapsed(), Duration::from_millis(120));
        assert_eq!(rig.dispatcher.peers().preferred(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn last_of_n_peers_answers_within_overall_budget() {
        let rig = rig();
        let n = 4u64;
        let silent: Vec<_> = (1..n).map(|id| rig.add(id, Behaviour::Silent)).collect();
        rig.add(n, Behaviour::Answer {
            delay: Duration::from_millis(10),
        });

        let start = Instant::now();
        let got = rig.dispatcher.request(&ntzs(7), PeerSelector::Any).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(got.peer, n);
        assert_eq!(elapsed, BUDGET * (n as u32 - 1) + Duration::from_millis(10));
        assert!(elapsed < BUDGET * n as u32);
        for p in silent {
            assert_eq!(p.sent.load(Ordering::SeqCst), 1, "each peer tried once");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn preferred_peer_is_tried_first() {
        let rig = rig();
        let a = rig.add(1, Behaviour::Answer {
            delay: Duration::from_millis(1),
        });
        let b = rig.add(2, Behaviour::Answer {
            delay: Duration::from_millis(1),
        });
        rig.dispatcher.peers().set_preferred(2);

        let got = rig.dispatcher.request(&ntzs(1), PeerSelector::Any).await.unwrap();
        assert_eq!(got.peer, 2);
        assert_eq!(a.sent.load(Ordering::SeqCst), 0);
        assert_eq!(b.sent.load(Ordering::SeqCst), 1);
    }

    // -- 2. failure paths ----------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out_after_exact_budget() {
        let rig = rig();
        rig.add(1, Behaviour::Silent);

        let start = Instant::now();
        let err = rig.dispatcher.request(&ntzs(3), PeerSelector::Any).await.unwrap_err();
        assert_eq!(err, DispatchError::Timeout {
            kind: MessageKind::Ntzs
        });
        assert_eq!(start.elapsed(), BUDGET);
    }

    #[tokio::test(start_paused = true)]
    async fn all_silent_peers_exhaust_their_budgets() {
        let rig = rig();
        rig.add(1, Behaviour::Silent);
        rig.add(2, Behaviour::Silent);

        let start = Instant::now();
        let err = rig.dispatcher.request(&ntzs(3), PeerSelector::Any).await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { .. }));
        assert_eq!(start.elapsed(), BUDGET * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn no_peers_fails_immediately() {
        let rig = rig();
        let start = Instant::now();
        assert_eq!(
            rig.dispatcher.request(&ntzs(3), PeerSelector::Any).await.unwrap_err(),
            DispatchError::NoPeersAvailable
        );
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn send_failures_only_means_no_peers() {
        let rig = rig();
        rig.add(1, Behaviour::FailSend);
        rig.add(2, Behaviour::FailSend);
        assert_eq!(
            rig.dispatcher.request(&ntzs(3), PeerSelector::Any).await.unwrap_err(),
            DispatchError::NoPeersAvailable
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_falls_through_to_next_peer() {
        let rig = rig();
        rig.add(1, Behaviour::FailSend);
        rig.add(2, Behaviour::Answer {
            delay: Duration::from_millis(5),
        });
        let got = rig.dispatcher.request(&ntzs(3), PeerSelector::Any).await.unwrap();
        assert_eq!(got.peer, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn specific_peer_is_not_retried_elsewhere() {
        let rig = rig();
        let silent = rig.add(1, Behaviour::Silent);
        let good = rig.add(2, Behaviour::Answer {
            delay: Duration::from_millis(1),
        });
        let err = rig
            .dispatcher
            .request(&ntzs(3), PeerSelector::Peer(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { .. }));
        assert_eq!(silent.sent.load(Ordering::SeqCst), 1);
        assert_eq!(good.sent.load(Ordering::SeqCst), 0);

        assert_eq!(
            rig.dispatcher
                .request(&ntzs(3), PeerSelector::Peer(99))
                .await
                .unwrap_err(),
            DispatchError::NoPeersAvailable
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_peers_are_not_candidates() {
        let rig = rig();
        let p = rig.add(1, Behaviour::Answer {
            delay: Duration::from_millis(1),
        });
        p.up.store(false, Ordering::SeqCst);
        assert_eq!(
            rig.dispatcher.request(&ntzs(3), PeerSelector::Any).await.unwrap_err(),
            DispatchError::NoPeersAvailable
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_token_cancels_a_waiting_request() {
        let rig = rig();
        rig.add(1, Behaviour::Silent);
        let stop = rig.stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            stop.cancel();
        });

        let start = Instant::now();
        assert_eq!(
            rig.dispatcher.request(&ntzs(3), PeerSelector::Any).await.unwrap_err(),
            DispatchError::Cancelled
        );
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    // -- 3. correlation and serialization ------------------------------------

    #[tokio::test(start_paused = true)]
    async fn stale_response_of_same_kind_is_ignored() {
        let rig = rig();
        rig.add(1, Behaviour::Silent);

        let handler = rig.handler.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let stale = NspvResponse::Ntzs(NotarizationWindow {
                req_height: 1,
                ..Default::default()
            });
            handler.handle(1, &stale.encode().unwrap());
        });

        let err = rig.dispatcher.request(&ntzs(2), PeerSelector::Any).await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn same_kind_callers_are_serialized() {
        let rig = rig();
        rig.add(1, Behaviour::Answer {
            delay: Duration::from_millis(100),
        });

        let start = Instant::now();
        let d1 = rig.dispatcher.clone();
        let d2 = rig.dispatcher.clone();
        let (a, b) = tokio::join!(
            async move { d1.request(&ntzs(10), PeerSelector::Any).await },
            async move { d2.request(&ntzs(20), PeerSelector::Any).await },
        );
        let heights: Vec<i32> = [a.unwrap(), b.unwrap()]
            .iter()
            .map(|d| match &*d.response {
                NspvResponse::Ntzs(w) => w.req_height,
                other => panic!("unexpected {:?}", other.kind()),
            })
            .collect();
        assert_eq!(heights, vec![10, 20]);
        // one after the other, not overlapped
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }
}
