//! End-to-end tests for the NSPV client.
//!
//! A scripted full node serves a small chain (heights 200..=220, notarized
//! at 200, 210 and 220) through the real response handler, and the client
//! is driven only through the public API: queries, verification against
//! notarization bridges, peer failover, login expiry under maintenance,
//! and concurrent callers sharing one dispatcher.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use nspv_protocol::codec::{Address, Encode};
use nspv_protocol::config::{
    ChainParams, DispatchConfig, MaintenanceConfig, EQUIHASH_SOLUTION_LEN, NODE_NSPV, SATOSHIDEN,
};
use nspv_protocol::crypto::{double_sha256, merkle_root, Bits256};
use nspv_protocol::message::{
    BridgeProof, BroadcastResult, ChainInfo, EquiHeader, MempoolQuery, MempoolRequest,
    MempoolResult, Notarization, NotarizationWindow, NspvRequest, NspvResponse, SpentInfo,
    TxProof, TxRef, TxRefSet, Utxo, UtxoSet,
};
use nspv_protocol::network::{
    DispatchError, Dispatcher, Maintenance, PeerError, PeerId, PeerLink, PeerSet, ResponseCache,
    ResponseHandler,
};
use nspv_protocol::proof::{MerkleBranch, ProofError};
use nspv_protocol::session::{KeyMaterial, Session, SessionError};
use nspv_protocol::storage::HeaderStore;
use nspv_protocol::{ClientError, NspvClient, TrustAnchor};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const LOW: i32 = 200;
const TIP: i32 = 220;
const NOTARIZED: [i32; 3] = [200, 210, 220];
const TXS_PER_BLOCK: usize = 4;

fn raw_tx(height: i32, i: usize) -> Vec<u8> {
    format!("block {} tx {}", height, i).into_bytes()
}

struct Chain {
    headers: BTreeMap<i32, EquiHeader>,
    blocks: BTreeMap<i32, Vec<Vec<u8>>>,
    ntzs: Vec<(Notarization, Vec<u8>)>,
}

impl Chain {
    fn new() -> Self {
        let mut headers = BTreeMap::new();
        let mut blocks = BTreeMap::new();
        let mut prev = double_sha256(b"genesis side");
        for h in LOW..=TIP {
            let txs: Vec<Vec<u8>> = (0..TXS_PER_BLOCK).map(|i| raw_tx(h, i)).collect();
            let ids: Vec<Bits256> = txs.iter().map(|t| double_sha256(t)).collect();
            let header = EquiHeader {
                version: 4,
                prev_hash: prev,
                merkle_root: merkle_root(&ids),
                time: 1_650_000_000 + h as u32 * 60,
                bits: 0x1d00_ffff,
                solution: Box::new([(h % 251) as u8; EQUIHASH_SOLUTION_LEN]),
                ..Default::default()
            };
            prev = header.hash();
            headers.insert(h, header);
            blocks.insert(h, txs);
        }
        let ntzs = NOTARIZED
            .iter()
            .map(|&h| {
                let raw = format!("ntz tx for {}", h).into_bytes();
                let n = Notarization {
                    blockhash: headers[&h].hash(),
                    txid: double_sha256(&raw),
                    othertxid: double_sha256(format!("btc side {}", h).as_bytes()),
                    height: h,
                    txid_height: h + 1,
                };
                (n, raw)
            })
            .collect();
        Self {
            headers,
            blocks,
            ntzs,
        }
    }

    fn txid(&self, height: i32, i: usize) -> Bits256 {
        double_sha256(&self.blocks[&height][i])
    }

    fn proof_for(&self, txid: Bits256, vout: i32) -> TxProof {
        let found = self.blocks.iter().find_map(|(h, txs)| {
            txs.iter()
                .position(|t| double_sha256(t) == txid)
                .map(|i| (*h, i))
        });
        let Some((height, i)) = found else {
            return TxProof {
                txid,
                vout,
                ..Default::default()
            };
        };
        let ids: Vec<Bits256> = self.blocks[&height].iter().map(|t| double_sha256(t)).collect();
        TxProof {
            txid,
            unspent_value: 5 * SATOSHIDEN,
            height,
            vout,
            tx: self.blocks[&height][i].clone(),
            proof: MerkleBranch::build(&ids, i).unwrap().encode().unwrap(),
        }
    }

    fn window(&self, height: i32) -> NotarizationWindow {
        let notarized: Vec<Notarization> = self.ntzs.iter().map(|(n, _)| *n).collect();
        NotarizationWindow {
            prev: notarized
                .iter()
                .rev()
                .find(|n| n.height < height)
                .copied()
                .unwrap_or_default(),
            next: notarized
                .iter()
                .find(|n| n.height >= height)
                .copied()
                .unwrap_or_default(),
            req_height: height,
        }
    }

    fn bridge(&self, prev_txid: Bits256, next_txid: Bits256) -> BridgeProof {
        let find = |txid| self.ntzs.iter().find(|(n, _)| n.txid == txid).cloned();
        let (Some((prev, prev_tx)), Some((next, next_tx))) = (find(prev_txid), find(next_txid))
        else {
            return BridgeProof::default();
        };
        BridgeProof {
            prev_height: prev.height,
            next_height: next.height,
            prev_txid,
            next_txid,
            prev_txid_height: prev.txid_height,
            next_txid_height: next.txid_height,
            headers: self
                .headers
                .range(prev.height + 1..=next.height)
                .map(|(_, h)| h.clone())
                .collect(),
            prev_ntz_tx: prev_tx,
            next_ntz_tx: next_tx,
        }
    }

    fn utxos(&self) -> Vec<Utxo> {
        [4, 9, 2, 6]
            .iter()
            .enumerate()
            .map(|(i, &coins)| Utxo {
                txid: self.txid(LOW + 1 + i as i32, 1),
                satoshis: coins * SATOSHIDEN,
                extradata: 0,
                vout: 1,
                height: LOW + 1 + i as i32,
            })
            .collect()
    }

    fn answer(&self, request: &NspvRequest) -> NspvResponse {
        match request {
            NspvRequest::Info(q) => {
                let hdr_height = if q.hdr_height == 0 { TIP } else { q.hdr_height };
                NspvResponse::Info(ChainInfo {
                    notarization: self.ntzs.last().map(|(n, _)| *n).unwrap_or_default(),
                    blockhash: self.headers[&TIP].hash(),
                    height: TIP,
                    hdr_height,
                    header: self.headers.get(&hdr_height).cloned().unwrap_or_default(),
                })
            }
            NspvRequest::Utxos(q) => {
                let utxos = self.utxos();
                NspvResponse::Utxos(UtxoSet {
                    address: q.address.clone(),
                    total: utxos.iter().map(|u| u.satoshis).sum(),
                    interest: 0,
                    node_height: TIP,
                    skip_count: q.skip_count,
                    cc_flag: q.cc_flag,
                    utxos,
                })
            }
            NspvRequest::Txids(q) => NspvResponse::Txids(TxRefSet {
                address: q.address.clone(),
                node_height: TIP,
                skip_count: q.skip_count,
                cc_flag: q.cc_flag,
                txids: self
                    .utxos()
                    .iter()
                    .map(|u| TxRef {
                        txid: u.txid,
                        satoshis: u.satoshis,
                        vout: u.vout,
                        height: u.height,
                    })
                    .collect(),
            }),
            NspvRequest::Ntzs(q) => NspvResponse::Ntzs(self.window(q.height)),
            NspvRequest::NtzsProof(q) => NspvResponse::NtzsProof(self.bridge(q.prev_txid, q.next_txid)),
            NspvRequest::TxProof(q) => NspvResponse::TxProof(self.proof_for(q.txid, q.vout)),
            NspvRequest::SpentInfo(q) => NspvResponse::SpentInfo(SpentInfo {
                txid: q.txid,
                vout: q.vout,
                spent_vin: 0,
                spent: TxProof::default(),
            }),
            NspvRequest::Broadcast(q) => NspvResponse::Broadcast(BroadcastResult {
                txid: q.txid,
                retcode: if q.tx.starts_with(b"bad") { -2 } else { 1 },
            }),
            NspvRequest::Mempool(q) => NspvResponse::Mempool(MempoolResult {
                query: q.query,
                address: q.address.clone(),
                txid: q.txid,
                vout: q.vout,
                node_height: TIP,
                txids: vec![double_sha256(b"pending")],
                ..Default::default()
            }),
        }
    }
}

/// A full node that answers through the real response handler.
struct Node {
    id: PeerId,
    chain: Arc<Chain>,
    handler: ResponseHandler,
    silent: AtomicBool,
    forge_bridge: AtomicBool,
    requests: AtomicUsize,
}

impl Node {
    fn new(id: PeerId, chain: Arc<Chain>, cache: &Arc<ResponseCache>) -> Arc<Self> {
        Arc::new(Self {
            id,
            chain,
            handler: ResponseHandler::new(cache.clone()),
            silent: AtomicBool::new(false),
            forge_bridge: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl PeerLink for Node {
    fn id(&self) -> PeerId {
        self.id
    }

    fn addr(&self) -> String {
        format!("node-{}", self.id)
    }

    fn services(&self) -> u64 {
        NODE_NSPV
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn send(&self, payload: Vec<u8>) -> Result<(), PeerError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.silent.load(Ordering::SeqCst) {
            return Ok(());
        }
        let request = NspvRequest::decode(&payload).map_err(|e| PeerError::Send {
            peer: self.id,
            reason: e.to_string(),
        })?;
        let mut response = self.chain.answer(&request);
        if let NspvResponse::NtzsProof(bridge) = &mut response {
            if self.forge_bridge.load(Ordering::SeqCst) {
                if let Some(h) = bridge.headers.get_mut(2) {
                    h.merkle_root = double_sha256(b"forged");
                }
            }
        }
        let bytes = response.encode().unwrap();
        let (handler, id) = (self.handler.clone(), self.id);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handler.handle(id, &bytes);
        });
        Ok(())
    }
}

struct Harness {
    client: Arc<NspvClient>,
    chain: Arc<Chain>,
    nodes: Vec<Arc<Node>>,
    peers: Arc<PeerSet>,
    cache: Arc<ResponseCache>,
    session: Arc<Session>,
    stop: CancellationToken,
}

fn fast_dispatch() -> DispatchConfig {
    DispatchConfig {
        poll_iters: 10,
        poll_interval: Duration::from_millis(20),
    }
}

fn harness_with(node_count: usize, store: HeaderStore, session: Session) -> Harness {
    let chain = Arc::new(Chain::new());
    let cache = Arc::new(ResponseCache::new());
    let peers = Arc::new(PeerSet::new(8));
    let nodes: Vec<Arc<Node>> = (1..=node_count as PeerId)
        .map(|id| Node::new(id, chain.clone(), &cache))
        .collect();
    for node in &nodes {
        assert!(peers.insert(node.clone()));
    }
    let stop = CancellationToken::new();
    let session = Arc::new(session);
    let dispatcher = Arc::new(Dispatcher::new(
        peers.clone(),
        cache.clone(),
        fast_dispatch(),
        stop.clone(),
    ));
    let client = Arc::new(NspvClient::new(
        dispatcher,
        session.clone(),
        store,
        ChainParams::regtest(),
    ));
    Harness {
        client,
        chain,
        nodes,
        peers,
        cache,
        session,
        stop,
    }
}

fn harness(node_count: usize) -> Harness {
    harness_with(node_count, HeaderStore::temporary().unwrap(), Session::new())
}

fn wallet() -> Address {
    Address::new("RXL3YXG2ceaB6C5hfJcN4fvmLH2C34knhA").unwrap()
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chain_info_and_address_queries() {
    let h = harness(1);
    let info = h.client.getinfo(0).await.unwrap();
    assert_eq!(info.height, TIP);
    assert_eq!(info.notarization.height, 220);
    assert_eq!(h.cache.chain_info().unwrap().height, TIP);

    let utxos = h.client.listunspent(Some(wallet()), false, 0).await.unwrap();
    assert_eq!(utxos.utxos.len(), 4);
    assert_eq!(utxos.total, 21 * SATOSHIDEN);

    let history = h.client.listtransactions(Some(wallet()), false, 0).await.unwrap();
    assert_eq!(history.txids.len(), 4);

    // no address and nobody logged in
    assert!(matches!(
        h.client.listunspent(None, false, 0).await,
        Err(ClientError::Session(SessionError::LoggedOut))
    ));
}

#[tokio::test]
async fn mempool_and_broadcast_are_relayed() {
    let h = harness(1);
    let pending = h
        .client
        .mempool(MempoolRequest {
            query: MempoolQuery::Address,
            address: wallet(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(pending.txids, vec![double_sha256(b"pending")]);
    assert_eq!(pending.address, wallet());

    let ok = h.client.broadcast(b"good tx".to_vec()).await.unwrap();
    assert!(ok.accepted());
    assert_eq!(ok.txid, double_sha256(b"good tx"));

    let rejected = h.client.broadcast(b"bad tx".to_vec()).await.unwrap();
    assert!(!rejected.accepted());
}

#[tokio::test]
async fn inputs_are_selected_for_the_logged_in_wallet() {
    let h = harness(1);
    h.client
        .login(KeyMaterial::from("wif".to_string()), wallet())
        .unwrap();

    let picked = h.client.selectinputs(5 * SATOSHIDEN).await.unwrap();
    assert_eq!(picked.used.len(), 1);
    assert_eq!(picked.total, 6 * SATOSHIDEN);
    assert_eq!(picked.change(), SATOSHIDEN);

    assert!(h.client.logout());
    assert!(matches!(
        h.client.selectinputs(SATOSHIDEN).await,
        Err(ClientError::Session(_))
    ));
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn verified_headers_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("headers");

    let (first, lower, upper) = {
        let h = harness_with(1, HeaderStore::open(&path).unwrap(), Session::new());
        let txid = h.chain.txid(205, 2);
        let v = h.client.verifytx(txid, 0, 205).await.unwrap();
        assert_eq!(v.anchor, TrustAnchor::Bridge { lower: 200, upper: 210 });
        assert_eq!(v.blockhash, h.chain.headers[&205].hash());
        assert_eq!(h.client.headers().len(), 10);
        h.client.headers().flush().unwrap();
        (v, 200, 210)
    };

    let h = harness_with(1, HeaderStore::open(&path).unwrap(), Session::new());
    assert_eq!(h.client.headers().tip().unwrap(), Some(upper));

    let txid = h.chain.txid(207, 0);
    let v = h.client.verifytx(txid, 0, 207).await.unwrap();
    assert_eq!(v.anchor, TrustAnchor::Stored);
    // only the tx proof went out
    assert_eq!(h.nodes[0].requests.load(Ordering::SeqCst), 1);
    assert!(v.height > lower && v.height <= upper);
    assert_eq!(first.height, 205);
}

#[tokio::test]
async fn notarized_block_needs_no_bridge() {
    let h = harness(1);
    let txid = h.chain.txid(210, 3);
    let v = h.client.verifytx(txid, 0, 210).await.unwrap();
    assert_eq!(v.anchor, TrustAnchor::Notarized { height: 210 });
    assert_eq!(h.client.headers().len(), 1);
}

#[tokio::test]
async fn forged_bridge_is_rejected_and_nothing_is_stored() {
    let h = harness(1);
    h.nodes[0].forge_bridge.store(true, Ordering::SeqCst);

    let txid = h.chain.txid(215, 1);
    let err = h.client.verifytx(txid, 0, 215).await.unwrap_err();
    assert!(
        matches!(err, ClientError::Proof(ProofError::ChainBroken(_))),
        "{err}"
    );
    assert!(h.client.headers().is_empty());

    h.nodes[0].forge_bridge.store(false, Ordering::SeqCst);
    let v = h.client.verifytx(txid, 0, 215).await.unwrap();
    assert_eq!(v.anchor, TrustAnchor::Bridge { lower: 210, upper: 220 });
}

#[tokio::test]
async fn unknown_transaction_is_malformed() {
    let h = harness(1);
    let err = h
        .client
        .verifytx(double_sha256(b"never mined"), 0, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Proof(ProofError::Malformed(_))));
}

// ---------------------------------------------------------------------------
// Peers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn silent_peer_fails_over_to_the_next() {
    let h = harness(2);
    h.nodes[0].silent.store(true, Ordering::SeqCst);

    let info = h.client.getinfo(0).await.unwrap();
    assert_eq!(info.height, TIP);
    assert_eq!(h.nodes[0].requests.load(Ordering::SeqCst), 1);
    assert_eq!(h.peers.preferred(), Some(2));
    assert_eq!(h.cache.peer_stats(2).responses, 1);

    // the answering peer is asked first from now on
    h.client.getinfo(0).await.unwrap();
    assert_eq!(h.nodes[0].requests.load(Ordering::SeqCst), 1);
    assert_eq!(h.nodes[1].requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn every_peer_silent_is_a_timeout() {
    let h = harness(2);
    for node in &h.nodes {
        node.silent.store(true, Ordering::SeqCst);
    }
    let err = h.client.getinfo(0).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Dispatch(DispatchError::Timeout { .. })
    ));
}

#[tokio::test]
async fn shutdown_cancels_waiting_requests() {
    let h = harness(1);
    h.nodes[0].silent.store(true, Ordering::SeqCst);
    let client = h.client.clone();
    let pending = tokio::spawn(async move { client.getinfo(0).await });
    tokio::time::sleep(Duration::from_millis(30)).await;
    h.stop.cancel();
    assert!(matches!(
        pending.await.unwrap(),
        Err(ClientError::Dispatch(DispatchError::Cancelled))
    ));
}

// ---------------------------------------------------------------------------
// Session lifetime
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn maintenance_logs_out_an_idle_wallet() {
    let h = harness_with(
        1,
        HeaderStore::temporary().unwrap(),
        Session::with_ttl(Duration::from_secs(10)),
    );
    let maintenance = Maintenance::new(
        h.peers.clone(),
        h.cache.clone(),
        h.session.clone(),
        MaintenanceConfig::default(),
    );
    let stop = h.stop.clone();
    let task = tokio::spawn(async move { maintenance.run(stop).await });

    h.client
        .login(KeyMaterial::from("wif".to_string()), wallet())
        .unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(h.session.status().is_some());

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(h.session.status().is_none());
    assert!(matches!(
        h.client.listunspent(None, false, 0).await,
        Err(ClientError::Session(_))
    ));

    // maintenance also kept chain info fresh
    assert!(h.cache.chain_info().is_some());

    h.stop.cancel();
    task.await.unwrap();
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_callers_get_sequential_answers() {
    let h = harness(2);
    let heights: Vec<i32> = (201..=219).filter(|h| !NOTARIZED.contains(h)).collect();

    let concurrent = futures::future::join_all(heights.iter().map(|&height| {
        let client = h.client.clone();
        let txid = h.chain.txid(height, height as usize % TXS_PER_BLOCK);
        async move { client.verifytx(txid, 0, height).await }
    }))
    .await;

    let sequential = {
        let fresh = harness(1);
        let mut out = Vec::new();
        for &height in &heights {
            let txid = fresh.chain.txid(height, height as usize % TXS_PER_BLOCK);
            out.push(fresh.client.verifytx(txid, 0, height).await.unwrap());
        }
        out
    };

    for (got, want) in concurrent.into_iter().zip(sequential) {
        let got = got.unwrap();
        assert_eq!(got.txid, want.txid);
        assert_eq!(got.height, want.height);
        assert_eq!(got.blockhash, want.blockhash);
    }
    assert_eq!(h.client.headers().len(), 20);
}
