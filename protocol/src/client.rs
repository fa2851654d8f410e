//! # Client Facade
//!
//! [`NspvClient`] is the whole client state in one value: the dispatcher
//! (and through it the peer set and response cache), the login session, the
//! store of proven headers, and the chain parameters. Every gateway command
//! is one async method here. Nothing lives in globals.
//!
//! Methods that only relay a query return the peer's answer as is. The
//! exception is [`NspvClient::verifytx`], which does not believe the peer:
//! it fetches the inclusion proof, the notarization window and, when needed,
//! the header bridge, and only returns once all of them check out.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::codec::Address;
use crate::coins::{select_inputs, CoinSelection, CoinSelectionError};
use crate::config::{ChainParams, MAX_VINS};
use crate::crypto::Bits256;
use crate::message::{
    AddressRequest, BridgeProof, BroadcastRequest, BroadcastResult, ChainInfo, InfoRequest,
    MempoolRequest, MempoolResult, MessageKind, NotarizationWindow, NspvRequest, NspvResponse,
    NtzsProofRequest, NtzsRequest, SpentInfo, SpentInfoRequest, TxProof, TxProofRequest,
    TxRefSet, UtxoSet,
};
use crate::network::{DispatchError, Dispatcher, PeerSelector, ResponseCache};
use crate::proof::{check_window, verify_inclusion, verify_tx_proof, ProofError};
use crate::session::{KeyMaterial, LoginStatus, Session, SessionError};
use crate::storage::{HeaderStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Proof(#[from] ProofError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    CoinSelection(#[from] CoinSelectionError),

    #[error("header store: {0}")]
    Store(#[from] StoreError),

    #[error("expected a {expected} response, got {got}")]
    UnexpectedResponse {
        expected: MessageKind,
        got: MessageKind,
    },

    #[error("invalid parameters: {0}")]
    InvalidParams(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Where a verified transaction's header got its trust from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TrustAnchor {
    /// A header proven earlier and kept in the store.
    Stored,
    /// The block is itself notarized.
    Notarized { height: i32 },
    /// A header bridge between two notarizations.
    Bridge { lower: i32, upper: i32 },
}

/// A transaction whose inclusion has been proven.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedTx {
    pub txid: Bits256,
    pub vout: i32,
    pub height: i32,
    pub blockhash: Bits256,
    pub unspent_value: i64,
    pub anchor: TrustAnchor,
}

/// Pulls the expected variant out of a response.
macro_rules! expect_response {
    ($resp:expr, $variant:ident) => {
        match &*$resp {
            NspvResponse::$variant(v) => Ok(v.clone()),
            other => Err(ClientError::UnexpectedResponse {
                expected: MessageKind::$variant,
                got: other.kind(),
            }),
        }
    };
}

pub struct NspvClient {
    dispatcher: Arc<Dispatcher>,
    session: Arc<Session>,
    headers: HeaderStore,
    params: ChainParams,
}

impl NspvClient {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        session: Arc<Session>,
        headers: HeaderStore,
        params: ChainParams,
    ) -> Self {
        Self {
            dispatcher,
            session,
            headers,
            params,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        self.dispatcher.cache()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn headers(&self) -> &HeaderStore {
        &self.headers
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    async fn ask(&self, request: NspvRequest) -> ClientResult<Arc<NspvResponse>> {
        let dispatched = self.dispatcher.request(&request, PeerSelector::Any).await?;
        Ok(dispatched.response)
    }

    /// Explicit address, or the logged-in one.
    fn resolve_address(&self, address: Option<Address>) -> ClientResult<Address> {
        match address {
            Some(a) if !a.is_empty() => Ok(a),
            _ => Ok(self.session.address()?),
        }
    }

    // -- Queries --------------------------------------------------------------

    /// Chain info, with the header at `hdr_height` (0 for the tip).
    pub async fn getinfo(&self, hdr_height: i32) -> ClientResult<ChainInfo> {
        if hdr_height < 0 {
            return Err(ClientError::InvalidParams(format!(
                "negative header height {}",
                hdr_height
            )));
        }
        let resp = self.ask(NspvRequest::Info(InfoRequest { hdr_height })).await?;
        expect_response!(resp, Info)
    }

    pub async fn listunspent(
        &self,
        address: Option<Address>,
        cc_flag: bool,
        skip_count: i32,
    ) -> ClientResult<UtxoSet> {
        let address = self.resolve_address(address)?;
        let resp = self
            .ask(NspvRequest::Utxos(AddressRequest {
                address,
                cc_flag,
                skip_count,
            }))
            .await?;
        expect_response!(resp, Utxos)
    }

    pub async fn listtransactions(
        &self,
        address: Option<Address>,
        cc_flag: bool,
        skip_count: i32,
    ) -> ClientResult<TxRefSet> {
        let address = self.resolve_address(address)?;
        let resp = self
            .ask(NspvRequest::Txids(AddressRequest {
                address,
                cc_flag,
                skip_count,
            }))
            .await?;
        expect_response!(resp, Txids)
    }

    pub async fn mempool(&self, request: MempoolRequest) -> ClientResult<MempoolResult> {
        let resp = self.ask(NspvRequest::Mempool(request)).await?;
        expect_response!(resp, Mempool)
    }

    /// The notarizations around `height`.
    pub async fn notarizations(&self, height: i32) -> ClientResult<NotarizationWindow> {
        let resp = self.ask(NspvRequest::Ntzs(NtzsRequest { height })).await?;
        expect_response!(resp, Ntzs)
    }

    /// Headers between two notarizations, by notarization txid.
    pub async fn hdrsproof(&self, prev_txid: Bits256, next_txid: Bits256) -> ClientResult<BridgeProof> {
        let resp = self
            .ask(NspvRequest::NtzsProof(NtzsProofRequest {
                prev_txid,
                next_txid,
            }))
            .await?;
        expect_response!(resp, NtzsProof)
    }

    pub async fn txproof(&self, txid: Bits256, vout: i32, height: i32) -> ClientResult<TxProof> {
        let resp = self
            .ask(NspvRequest::TxProof(TxProofRequest { txid, vout, height }))
            .await?;
        expect_response!(resp, TxProof)
    }

    pub async fn spentinfo(&self, txid: Bits256, vout: i32) -> ClientResult<SpentInfo> {
        let resp = self
            .ask(NspvRequest::SpentInfo(SpentInfoRequest { txid, vout }))
            .await?;
        expect_response!(resp, SpentInfo)
    }

    /// Relays a raw transaction. A rejection is a normal result with a
    /// non-positive retcode, not an error.
    pub async fn broadcast(&self, tx: Vec<u8>) -> ClientResult<BroadcastResult> {
        if tx.is_empty() {
            return Err(ClientError::InvalidParams("empty transaction".into()));
        }
        let request = BroadcastRequest::for_tx(tx);
        let txid = request.txid;
        let resp = self.ask(NspvRequest::Broadcast(request)).await?;
        let result: BroadcastResult = expect_response!(resp, Broadcast)?;
        info!(%txid, retcode = result.retcode, accepted = result.accepted(), "broadcast relayed");
        Ok(result)
    }

    // -- Session --------------------------------------------------------------

    pub fn login(&self, material: KeyMaterial, address: Address) -> ClientResult<LoginStatus> {
        if address.is_empty() {
            return Err(ClientError::InvalidParams("login needs an address".into()));
        }
        Ok(self.session.login(material, address)?)
    }

    pub fn logout(&self) -> bool {
        self.session.logout()
    }

    /// Picks inputs worth `target` from the logged-in address's UTXOs.
    pub async fn selectinputs(&self, target: i64) -> ClientResult<CoinSelection> {
        let address = self.session.address()?;
        let set = self.listunspent(Some(address), false, 0).await?;
        // the login may have lapsed while the query was out
        self.session.require()?;
        let selection = select_inputs(&set, target, MAX_VINS, self.params.accrues_interest)?;
        debug!(
            inputs = selection.used.len(),
            total = selection.total,
            target,
            "inputs selected"
        );
        Ok(selection)
    }

    // -- Verification ---------------------------------------------------------

    /// Proves that `txid` is in the chain, anchored to notarized blocks.
    pub async fn verifytx(&self, txid: Bits256, vout: i32, height: i32) -> ClientResult<VerifiedTx> {
        let proof = self.txproof(txid, vout, height).await?;
        if proof.tx.is_empty() {
            return Err(ProofError::Malformed(format!("peer has no proof for {}", txid)).into());
        }
        let h = proof.height;
        if h <= 0 {
            return Err(ProofError::NotYetNotarized { height: h }.into());
        }

        if let Some(header) = self.headers.get(h)? {
            verify_inclusion(&proof, &header)?;
            debug!(%txid, height = h, "verified against stored header");
            return Ok(verified_tx(&proof, header.hash(), TrustAnchor::Stored));
        }

        let window = self.notarizations(h).await?;
        check_window(&window)?;

        let (bridge, anchor) = if h == window.next.height || h == window.prev.height {
            let info = self.getinfo(h).await?;
            let bridge = verify_tx_proof(&proof, &window, None, Some(&info.header))?;
            self.headers.put_header(h, &info.header)?;
            (bridge, TrustAnchor::Notarized { height: h })
        } else {
            let bridge_proof = self.hdrsproof(window.prev.txid, window.next.txid).await?;
            let bridge = verify_tx_proof(&proof, &window, Some(&bridge_proof), None)?;
            self.headers.put_bridge(&bridge)?;
            let anchor = TrustAnchor::Bridge {
                lower: bridge.lower().height,
                upper: bridge.upper().height,
            };
            (bridge, anchor)
        };

        let blockhash = bridge.trusted_hash(h).unwrap_or_default();
        info!(%txid, height = h, ?anchor, "transaction verified");
        Ok(verified_tx(&proof, blockhash, anchor))
    }
}

fn verified_tx(proof: &TxProof, blockhash: Bits256, anchor: TrustAnchor) -> VerifiedTx {
    VerifiedTx {
        txid: proof.txid,
        vout: proof.vout,
        height: proof.height,
        blockhash,
        unspent_value: proof.unspent_value,
        anchor,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use crate::codec::Encode;
    use crate::config::{DispatchConfig, EQUIHASH_SOLUTION_LEN, NODE_NSPV, SATOSHIDEN};
    use crate::crypto::{double_sha256, merkle_root};
    use crate::message::{EquiHeader, Notarization, TxRef, Utxo};
    use crate::network::{PeerError, PeerId, PeerLink, PeerSet, ResponseHandler};
    use crate::proof::MerkleBranch;

    pub(crate) const NOTARIZED: [i32; 2] = [100, 110];
    pub(crate) const TIP: i32 = 112;

    pub(crate) fn tx_bytes(height: i32, i: usize) -> Vec<u8> {
        format!("raw tx {} at {}", i, height).into_bytes()
    }

    /// A small chain, 100..=112, notarized at 100 and 110.
    pub(crate) struct FakeChain {
        pub headers: BTreeMap<i32, EquiHeader>,
        pub txs: BTreeMap<i32, Vec<Vec<u8>>>,
        pub ntzs: Vec<(Notarization, Vec<u8>)>,
        pub utxos: Vec<Utxo>,
    }

    impl FakeChain {
        pub fn build() -> Self {
            let mut headers = BTreeMap::new();
            let mut txs = BTreeMap::new();
            let mut prev = double_sha256(b"block 99");
            for h in NOTARIZED[0]..=TIP {
                let block: Vec<Vec<u8>> = (0..3).map(|i| tx_bytes(h, i)).collect();
                let ids: Vec<Bits256> = block.iter().map(|t| double_sha256(t)).collect();
                let header = EquiHeader {
                    version: 4,
                    prev_hash: prev,
                    merkle_root: merkle_root(&ids),
                    time: 1_600_000_000 + h as u32 * 60,
                    bits: 0x200f_0f0f,
                    solution: Box::new([h as u8; EQUIHASH_SOLUTION_LEN]),
                    ..Default::default()
                };
                prev = header.hash();
                headers.insert(h, header);
                txs.insert(h, block);
            }
            let ntzs = NOTARIZED
                .iter()
                .map(|&h| {
                    let raw = format!("notarization of {}", h).into_bytes();
                    let ntz = Notarization {
                        blockhash: headers[&h].hash(),
                        txid: double_sha256(&raw),
                        othertxid: double_sha256(&h.to_le_bytes()),
                        height: h,
                        txid_height: h + 2,
                    };
                    (ntz, raw)
                })
                .collect();
            let utxos = [3, 1, 7, 2]
                .iter()
                .enumerate()
                .map(|(i, &coins)| Utxo {
                    txid: double_sha256(&tx_bytes(101 + i as i32, 0)),
                    satoshis: coins * SATOSHIDEN,
                    extradata: 0,
                    vout: 0,
                    height: 101 + i as i32,
                })
                .collect();
            Self {
                headers,
                txs,
                ntzs,
                utxos,
            }
        }

        pub fn txid(&self, height: i32, i: usize) -> Bits256 {
            double_sha256(&self.txs[&height][i])
        }

        fn locate(&self, txid: &Bits256) -> Option<(i32, usize)> {
            self.txs.iter().find_map(|(h, block)| {
                block
                    .iter()
                    .position(|t| double_sha256(t) == *txid)
                    .map(|i| (*h, i))
            })
        }

        fn tx_proof(&self, txid: Bits256, vout: i32) -> TxProof {
            let Some((height, i)) = self.locate(&txid) else {
                return TxProof {
                    txid,
                    vout,
                    ..Default::default()
                };
            };
            let block = &self.txs[&height];
            let ids: Vec<Bits256> = block.iter().map(|t| double_sha256(t)).collect();
            TxProof {
                txid,
                unspent_value: 1_000,
                height,
                vout,
                tx: block[i].clone(),
                proof: MerkleBranch::build(&ids, i).unwrap().encode().unwrap(),
            }
        }

        pub fn window(&self, height: i32) -> NotarizationWindow {
            let prev = self
                .ntzs
                .iter()
                .map(|(n, _)| *n)
                .filter(|n| n.height < height)
                .last()
                .unwrap_or_default();
            let next = self
                .ntzs
                .iter()
                .map(|(n, _)| *n)
                .find(|n| n.height >= height)
                .unwrap_or_default();
            NotarizationWindow {
                prev,
                next,
                req_height: height,
            }
        }

        fn bridge(&self, prev_txid: Bits256, next_txid: Bits256) -> BridgeProof {
            let find = |txid: Bits256| self.ntzs.iter().find(|(n, _)| n.txid == txid).cloned();
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

        pub fn answer(&self, request: &NspvRequest) -> NspvResponse {
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
                NspvRequest::Utxos(q) => NspvResponse::Utxos(UtxoSet {
                    address: q.address.clone(),
                    total: self.utxos.iter().map(|u| u.satoshis).sum(),
                    interest: 0,
                    node_height: TIP,
                    skip_count: q.skip_count,
                    cc_flag: q.cc_flag,
                    utxos: self.utxos.clone(),
                }),
                NspvRequest::Txids(q) => NspvResponse::Txids(TxRefSet {
                    address: q.address.clone(),
                    node_height: TIP,
                    skip_count: q.skip_count,
                    cc_flag: q.cc_flag,
                    txids: self
                        .utxos
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
                NspvRequest::NtzsProof(q) => {
                    NspvResponse::NtzsProof(self.bridge(q.prev_txid, q.next_txid))
                }
                NspvRequest::TxProof(q) => NspvResponse::TxProof(self.tx_proof(q.txid, q.vout)),
                NspvRequest::SpentInfo(q) => {
                    // output 0 of anything is spent by the first tx at 105
                    let spent = if q.vout == 0 {
                        self.tx_proof(self.txid(105, 0), 0)
                    } else {
                        TxProof::default()
                    };
                    NspvResponse::SpentInfo(SpentInfo {
                        txid: q.txid,
                        vout: q.vout,
                        spent_vin: 0,
                        spent,
                    })
                }
                NspvRequest::Broadcast(q) => NspvResponse::Broadcast(BroadcastResult {
                    txid: q.txid,
                    retcode: 1,
                }),
                NspvRequest::Mempool(q) => NspvResponse::Mempool(MempoolResult {
                    query: q.query,
                    address: q.address.clone(),
                    txid: q.txid,
                    node_height: TIP,
                    vout: q.vout,
                    txids: vec![double_sha256(b"waiting in mempool")],
                    ..Default::default()
                }),
            }
        }
    }

    /// A full node serving [`FakeChain`] through the real handler.
    pub(crate) struct FakePeer {
        pub id: PeerId,
        pub chain: Arc<FakeChain>,
        pub handler: ResponseHandler,
        pub delay: Duration,
        /// Corrupt one header in every bridge.
        pub tamper: AtomicBool,
        pub requests: AtomicUsize,
    }

    #[async_trait]
    impl PeerLink for FakePeer {
        fn id(&self) -> PeerId {
            self.id
        }
        fn addr(&self) -> String {
            format!("fake-{}", self.id)
        }
        fn services(&self) -> u64 {
            NODE_NSPV
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn send(&self, payload: Vec<u8>) -> Result<(), PeerError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            let request = NspvRequest::decode(&payload).map_err(|e| PeerError::Send {
                peer: self.id,
                reason: e.to_string(),
            })?;
            let mut response = self.chain.answer(&request);
            if let NspvResponse::NtzsProof(bridge) = &mut response {
                if self.tamper.load(Ordering::SeqCst) && bridge.headers.len() > 3 {
                    bridge.headers[3].time ^= 1;
                }
            }
            let bytes = response.encode().unwrap();
            let handler = self.handler.clone();
            let (id, delay) = (self.id, self.delay);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                handler.handle(id, &bytes);
            });
            Ok(())
        }
    }

    pub(crate) struct Rig {
        pub client: Arc<NspvClient>,
        pub chain: Arc<FakeChain>,
        pub peer: Arc<FakePeer>,
    }

    pub(crate) fn rig() -> Rig {
        let chain = Arc::new(FakeChain::build());
        let peers = Arc::new(PeerSet::new(4));
        let cache = Arc::new(ResponseCache::new());
        let peer = Arc::new(FakePeer {
            id: 1,
            chain: chain.clone(),
            handler: ResponseHandler::new(cache.clone()),
            delay: Duration::from_millis(20),
            tamper: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
        });
        peers.insert(peer.clone());
        let dispatcher = Arc::new(Dispatcher::new(
            peers,
            cache,
            DispatchConfig::default(),
            CancellationToken::new(),
        ));
        let client = NspvClient::new(
            dispatcher,
            Arc::new(Session::new()),
            HeaderStore::temporary().unwrap(),
            ChainParams::regtest(),
        );
        Rig {
            client: Arc::new(client),
            chain,
            peer,
        }
    }

    pub(crate) fn addr() -> Address {
        Address::new("RXL3YXG2ceaB6C5hfJcN4fvmLH2C34knhA").unwrap()
    }

    fn key() -> KeyMaterial {
        KeyMaterial::new(b"UvCxPhJa8fGZvcEM3VrvGU7KnQaF2ZJdAN1NrGrrCvyCkD6X7Ebw".to_vec())
    }

    #[tokio::test(start_paused = true)]
    async fn getinfo_reports_tip_and_fills_cache() {
        let rig = rig();
        let info = rig.client.getinfo(0).await.unwrap();
        assert_eq!(info.height, TIP);
        assert_eq!(info.hdr_height, TIP);
        assert_eq!(info.notarization.height, 110);
        assert_eq!(rig.client.cache().chain_info(), Some(info));

        let at_105 = rig.client.getinfo(105).await.unwrap();
        assert_eq!(at_105.header, rig.chain.headers[&105]);
        assert!(matches!(
            rig.client.getinfo(-1).await,
            Err(ClientError::InvalidParams(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn address_queries_fall_back_to_login() {
        let rig = rig();
        assert!(matches!(
            rig.client.listunspent(None, false, 0).await,
            Err(ClientError::Session(SessionError::LoggedOut))
        ));

        rig.client.login(key(), addr()).unwrap();
        let set = rig.client.listunspent(None, false, 0).await.unwrap();
        assert_eq!(set.address, addr());
        assert_eq!(set.utxos.len(), 4);
        let txs = rig.client.listtransactions(None, false, 0).await.unwrap();
        assert_eq!(txs.txids.len(), 4);

        tokio::time::advance(Duration::from_secs(777)).await;
        assert!(matches!(
            rig.client.listunspent(None, false, 0).await,
            Err(ClientError::Session(SessionError::LoggedOut))
        ));
        // an explicit address needs no login
        assert!(rig.client.listunspent(Some(addr()), false, 0).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn selectinputs_needs_a_live_login() {
        let rig = rig();
        assert!(matches!(
            rig.client.selectinputs(SATOSHIDEN).await,
            Err(ClientError::Session(SessionError::LoggedOut))
        ));

        rig.client.login(key(), addr()).unwrap();
        let sel = rig.client.selectinputs(5 * SATOSHIDEN).await.unwrap();
        assert_eq!(sel.used.len(), 1);
        assert_eq!(sel.total, 7 * SATOSHIDEN);

        let sel = rig.client.selectinputs(12 * SATOSHIDEN).await.unwrap();
        assert!(sel.total >= 12 * SATOSHIDEN);
        assert!(matches!(
            rig.client.selectinputs(14 * SATOSHIDEN).await,
            Err(ClientError::CoinSelection(CoinSelectionError::InsufficientFunds { .. }))
        ));

        assert!(rig.client.logout());
        assert!(matches!(
            rig.client.selectinputs(SATOSHIDEN).await,
            Err(ClientError::Session(SessionError::LoggedOut))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn verifytx_bridges_once_then_uses_the_store() {
        let rig = rig();
        let txid = rig.chain.txid(105, 2);

        let v = rig.client.verifytx(txid, 0, 105).await.unwrap();
        assert_eq!(v.height, 105);
        assert_eq!(v.blockhash, rig.chain.headers[&105].hash());
        assert_eq!(v.anchor, TrustAnchor::Bridge { lower: 100, upper: 110 });
        assert_eq!(rig.client.headers().len(), 10);

        let before = rig.peer.requests.load(Ordering::SeqCst);
        let again = rig.client.verifytx(rig.chain.txid(107, 0), 0, 107).await.unwrap();
        assert_eq!(again.anchor, TrustAnchor::Stored);
        // only the txproof went out
        assert_eq!(rig.peer.requests.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn verifytx_at_notarized_height_checks_the_header() {
        let rig = rig();
        let v = rig.client.verifytx(rig.chain.txid(110, 1), 0, 110).await.unwrap();
        assert_eq!(v.anchor, TrustAnchor::Notarized { height: 110 });
        assert_eq!(v.blockhash, rig.chain.ntzs[1].0.blockhash);
        assert!(rig.client.headers().contains(110).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn verifytx_failures_are_typed() {
        let rig = rig();

        let pending = rig.client.verifytx(rig.chain.txid(111, 0), 0, 111).await;
        assert!(matches!(
            pending,
            Err(ClientError::Proof(ProofError::NotYetNotarized { height: 111 }))
        ));

        let unknown = rig.client.verifytx(double_sha256(b"nope"), 0, 0).await;
        assert!(matches!(unknown, Err(ClientError::Proof(ProofError::Malformed(_)))));

        rig.peer.tamper.store(true, Ordering::SeqCst);
        let tampered = rig.client.verifytx(rig.chain.txid(103, 0), 0, 103).await;
        assert!(matches!(
            tampered,
            Err(ClientError::Proof(ProofError::ChainBroken(_)))
        ));
        assert!(rig.client.headers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn relayed_queries_return_peer_answers() {
        let rig = rig();
        let window = rig.client.notarizations(105).await.unwrap();
        assert_eq!((window.prev.height, window.next.height), (100, 110));

        let bridge = rig
            .client
            .hdrsproof(window.prev.txid, window.next.txid)
            .await
            .unwrap();
        assert_eq!(bridge.headers.len(), 10);

        let spent = rig.client.spentinfo(rig.chain.txid(101, 0), 0).await.unwrap();
        assert!(spent.is_spent());
        assert_eq!(spent.spent.height, 105);
        let unspent = rig.client.spentinfo(rig.chain.txid(101, 0), 1).await.unwrap();
        assert!(!unspent.is_spent());

        let result = rig.client.broadcast(vec![1, 2, 3]).await.unwrap();
        assert!(result.accepted());
        assert_eq!(result.txid, double_sha256(&[1, 2, 3]));
        assert!(matches!(
            rig.client.broadcast(Vec::new()).await,
            Err(ClientError::InvalidParams(_))
        ));

        let pool = rig.client.mempool(MempoolRequest::default()).await.unwrap();
        assert!(pool.is_hit());
    }

    #[tokio::test(start_paused = true)]
    async fn login_requires_an_address() {
        let rig = rig();
        assert!(matches!(
            rig.client.login(key(), Address::empty()),
            Err(ClientError::InvalidParams(_))
        ));
        let st = rig.client.login(key(), addr()).unwrap();
        assert_eq!(st.expires_in, 777);
    }
}
