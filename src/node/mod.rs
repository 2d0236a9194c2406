// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Wires every collaborator (storage, crypto, routing, the operation engine)
//! into one running node, and dispatches inbound streams the network-layer
//! host hands it by protocol id.

use crate::addressbook::{AddressBook, Mapping, NetworkAddress};
use crate::codec::{wire, PROTOCOL_GOSSIP, PROTOCOL_TSS_PARTY};
use crate::config::Config;
use crate::crypto::keys::{derive_storage_key, NodeKeypair};
use crate::crypto::peerstore::InMemoryPeerStore;
use crate::crypto::EncryptionLayer;
use crate::engine::{
    AllowAllValidator, MessageHandler, OperationEngine, SigningValidator, StartKeygen, StartResharing, StartSigning,
};
use crate::error::Result;
use crate::ids::{NodeId, OperationId};
use crate::routing::comm::{BoxedDuplex, Comm, PeerTransport};
use crate::routing::dedup::DuplicateTable;
use crate::routing::Router;
use crate::store::keystore::KeyStore;
use crate::store::opstore::{OperationRecord, OperationStore};
use crate::store::sled_store::SledKv;
use crate::store::Kv;
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

/// A running DKNet node: the operation engine plus everything it needs from
/// storage and the network to actually move bytes.
pub struct Node {
    config: Config,
    self_id: NodeId,
    self_peer_id: String,
    engine: Arc<OperationEngine>,
    router: Arc<Router>,
    address_book: Arc<AddressBook>,
    peerstore: Arc<InMemoryPeerStore>,
    dedup: Arc<DuplicateTable>,
}

impl Node {
    /// Builds every collaborator from `config` and wires them together. Opens
    /// (or creates) the sled stores and the address book under
    /// `config.data_dir`. Signing requests are authorized by
    /// [`AllowAllValidator`]; use [`Self::bootstrap_with_validator`] to wire
    /// in a real authorization service.
    pub async fn bootstrap(config: Config, self_id: NodeId, transport: Arc<dyn PeerTransport>) -> Result<Arc<Self>> {
        Self::bootstrap_with_validator(config, self_id, transport, Arc::new(AllowAllValidator)).await
    }

    /// As [`Self::bootstrap`], additionally wiring in the [`SigningValidator`]
    /// every signing request this node handles (as initiator or mirror) is
    /// authorized against before any TSS party is started.
    pub async fn bootstrap_with_validator(
        config: Config,
        self_id: NodeId,
        transport: Arc<dyn PeerTransport>,
        validator: Arc<dyn SigningValidator>,
    ) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&config.data_dir)?;
        std::fs::create_dir_all(&config.storage_dir)?;

        let keypair = NodeKeypair::load_or_generate(&config.p2p_key_path())?;
        let self_peer_id = hex::encode(keypair.public_key_bytes());

        let password = crate::config::storage_password(&config)?;
        let storage_key = derive_storage_key(&password);

        let peerstore = Arc::new(InMemoryPeerStore::new());
        let encryption = Arc::new(EncryptionLayer::new(
            keypair,
            peerstore.clone(),
            config.session_encryption_enabled,
            storage_key,
        ));

        let address_book = Arc::new(AddressBook::load_or_create(
            &config.address_book_path(),
            &self_id,
            Mapping {
                peer_id: self_peer_id.clone(),
                moniker: config.moniker.clone(),
                timestamp: Utc::now(),
            },
        )?);

        let key_kv: Arc<dyn Kv> = Arc::new(SledKv::open(&config.storage_dir.join("keys"))?);
        let op_kv: Arc<dyn Kv> = Arc::new(SledKv::open(&config.storage_dir.join("operations"))?);
        let key_store = Arc::new(KeyStore::new(key_kv));
        let op_store = Arc::new(OperationStore::new(op_kv));

        let comm = Arc::new(Comm::new(transport, config.decompression_cap_bytes));
        let dedup = Arc::new(DuplicateTable::new(config.dedup_window));
        let router = Arc::new(Router::new(self_id.clone(), comm, dedup.clone()));

        let engine = OperationEngine::with_validator(
            self_id.clone(),
            self_peer_id.clone(),
            storage_key,
            key_store,
            op_store,
            address_book.clone(),
            encryption,
            config.keygen_timeout,
            config.signing_timeout,
            config.resharing_timeout,
            validator,
        );
        engine.set_sender(Arc::downgrade(&router));

        let node = Arc::new(Self {
            config,
            self_id,
            self_peer_id,
            engine,
            router,
            address_book,
            peerstore,
            dedup,
        });
        node.clone().spawn_background_tasks();
        Ok(node)
    }

    fn spawn_background_tasks(self: Arc<Self>) {
        let gc_table = self.dedup.clone();
        let sweep_interval = self.config.dedup_sweep_interval;
        gc_table.spawn_gc(sweep_interval);

        let gossip_node = self.clone();
        let gossip_interval = self.config.address_book_gossip_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(gossip_interval);
            loop {
                ticker.tick().await;
                gossip_node.broadcast_address_book().await;
            }
        });
    }

    async fn broadcast_address_book(&self) {
        let snapshot = self.address_book.snapshot();
        let bytes = match serde_json::to_vec(&snapshot) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "failed to encode address book snapshot");
                return;
            }
        };
        self.router
            .broadcast_mapping(crate::ids::SessionId::generate(), bytes::Bytes::from(bytes))
            .await;
    }

    /// Registers a peer's long-term X25519 public key, learned by the
    /// network-layer host through whatever handshake it performs. Required
    /// before per-recipient encryption can be used with that peer.
    pub fn register_peer_key(&self, node_id: NodeId, public_key: [u8; 32]) {
        self.peerstore.insert(node_id, public_key);
    }

    /// This node's own long-term X25519 public key, hex-encoded. The
    /// network-layer host exchanges this during its handshake so peers can
    /// call [`Self::register_peer_key`] for each other.
    pub fn self_peer_id(&self) -> &str {
        &self.self_peer_id
    }

    /// Called by the network-layer host once for every inbound stream it
    /// accepts, dispatching frames by `protocol_id` until the stream closes.
    pub fn accept_inbound_stream(self: &Arc<Self>, peer: NodeId, protocol_id: String, stream: BoxedDuplex) {
        let max_frame_bytes = self.config.decompression_cap_bytes;
        let node = self.clone();
        tokio::spawn(async move {
            match protocol_id.as_str() {
                PROTOCOL_TSS_PARTY => {
                    let node = node.clone();
                    crate::codec::framing::read_loop(stream, max_frame_bytes, move |frame| {
                        let node = node.clone();
                        let peer = peer.clone();
                        async move {
                            match wire::decode(&frame, max_frame_bytes) {
                                Ok(msg) => node.engine.handle_message(msg, peer).await,
                                Err(e) => warn!(error = %e, "dropping malformed party-protocol frame"),
                            }
                        }
                    })
                    .await;
                }
                PROTOCOL_GOSSIP => {
                    let node = node.clone();
                    crate::codec::framing::read_loop(stream, max_frame_bytes, move |frame| {
                        let node = node.clone();
                        let peer = peer.clone();
                        async move {
                            match wire::decode_routed(&frame, max_frame_bytes) {
                                Ok(routed) => {
                                    if let Some(inner) = node.router.handle_routed_message(routed, peer.clone()).await {
                                        node.engine.handle_message(inner, peer).await;
                                    }
                                }
                                Err(e) => warn!(error = %e, "dropping malformed gossip frame"),
                            }
                        }
                    })
                    .await;
                }
                other => {
                    warn!(protocol_id = %other, "inbound stream for unknown protocol, closing");
                }
            }
        });
    }

    pub fn self_id(&self) -> &NodeId {
        &self.self_id
    }

    pub async fn start_keygen(&self, req: StartKeygen) -> Result<OperationRecord> {
        self.engine.start_keygen(req).await
    }

    pub async fn start_signing(&self, req: StartSigning) -> Result<OperationRecord> {
        self.engine.start_signing(req).await
    }

    pub async fn start_resharing(&self, req: StartResharing) -> Result<OperationRecord> {
        self.engine.start_resharing(req).await
    }

    pub async fn get_operation(&self, operation_id: &OperationId) -> Result<OperationRecord> {
        self.engine.get_operation(operation_id).await
    }

    pub async fn cancel_operation(&self, operation_id: &OperationId) -> Result<()> {
        self.engine.cancel_operation(operation_id).await
    }

    pub fn address_book(&self) -> &Arc<AddressBook> {
        &self.address_book
    }

    /// The `get_network_addresses` RPC: every node/peer mapping this node
    /// currently knows about.
    pub fn get_network_addresses(&self) -> Vec<NetworkAddress> {
        self.address_book.network_addresses()
    }
}

#[cfg(test)]
mod tests {
    //! End-to-end scenarios driving full [`Node`] instances over an
    //! in-process mesh of duplex pipes, exercising the real
    //! `Router`/`Comm`/`OperationEngine` wiring rather than any single module
    //! in isolation.

    use super::*;
    use crate::engine::{StartKeygen, StartResharing, StartSigning};
    use crate::ids::KeyId;
    use crate::store::opstore::{OperationResult, Status};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use tokio::io::{duplex, DuplexStream};

    const PROTOCOLS: [&str; 2] = [PROTOCOL_TSS_PARTY, PROTOCOL_GOSSIP];

    /// A [`PeerTransport`] backed by pre-wired in-memory duplex pipes, one per
    /// `(sender, receiver, protocol)` triple. `peers` governs both
    /// `is_connected` and `connected_peers`, so a test can model a partially
    /// connected mesh by omitting pairs from it while still wiring the
    /// underlying pipes (unused pipes are simply never opened).
    struct MeshTransport {
        peers: Vec<NodeId>,
        outbound: StdMutex<HashMap<(NodeId, String), DuplexStream>>,
    }

    #[async_trait]
    impl PeerTransport for MeshTransport {
        fn is_connected(&self, peer: &NodeId) -> bool {
            self.peers.contains(peer)
        }

        fn connected_peers(&self) -> Vec<NodeId> {
            self.peers.clone()
        }

        async fn open_stream(&self, peer: &NodeId, protocol_id: &str) -> Result<BoxedDuplex> {
            let mut outbound = self.outbound.lock().unwrap();
            let key = (peer.clone(), protocol_id.to_string());
            outbound
                .remove(&key)
                .map(|s| Box::new(s) as BoxedDuplex)
                .ok_or_else(|| crate::error::Error::TransportError(format!("no pipe wired to {} for {}", peer, protocol_id)))
        }
    }

    struct MeshOpts {
        monikers: Vec<&'static str>,
        /// `None` means fully connected. Otherwise, an adjacency list: who
        /// each moniker is directly connected to.
        adjacency: Option<HashMap<&'static str, Vec<&'static str>>>,
        keygen_timeout: Option<std::time::Duration>,
    }

    impl MeshOpts {
        fn fully_connected(monikers: Vec<&'static str>) -> Self {
            Self {
                monikers,
                adjacency: None,
                keygen_timeout: None,
            }
        }
    }

    /// Boots one [`Node`] per moniker, wires every pair's duplex pipes per
    /// `opts.adjacency`, exchanges long-term public keys the way a
    /// network-layer host's handshake would, and attaches every inbound pipe
    /// via `Node::accept_inbound_stream`. Returns the nodes and the temp dirs
    /// backing them (kept alive for the test's duration).
    async fn build_mesh(opts: MeshOpts) -> (HashMap<&'static str, Arc<Node>>, Vec<tempfile::TempDir>) {
        std::env::set_var("TSS_ENCRYPTION_PASSWORD", "integration-test-password");

        let ids: HashMap<&'static str, NodeId> =
            opts.monikers.iter().map(|m| (*m, NodeId::new(*m))).collect();

        let mut outboxes: HashMap<&'static str, HashMap<(NodeId, String), DuplexStream>> =
            opts.monikers.iter().map(|m| (*m, HashMap::new())).collect();
        let mut inboxes: HashMap<&'static str, Vec<(NodeId, String, DuplexStream)>> =
            opts.monikers.iter().map(|m| (*m, Vec::new())).collect();

        for &sender in &opts.monikers {
            for &receiver in &opts.monikers {
                if sender == receiver {
                    continue;
                }
                for protocol in PROTOCOLS {
                    let (tx_side, rx_side) = duplex(256 * 1024);
                    outboxes
                        .get_mut(sender)
                        .unwrap()
                        .insert((ids[receiver].clone(), protocol.to_string()), tx_side);
                    inboxes
                        .get_mut(receiver)
                        .unwrap()
                        .push((ids[sender].clone(), protocol.to_string(), rx_side));
                }
            }
        }

        let mut dirs = Vec::new();
        let mut nodes = HashMap::new();

        for &moniker in &opts.monikers {
            let dir = tempfile::tempdir().unwrap();
            let mut config = Config::default();
            config.moniker = moniker.to_string();
            config.data_dir = dir.path().to_path_buf();
            config.storage_dir = dir.path().join("storage");
            config.address_book_gossip_interval = std::time::Duration::from_millis(50);
            if let Some(t) = opts.keygen_timeout {
                config.keygen_timeout = t;
            }

            let peers: Vec<NodeId> = match &opts.adjacency {
                Some(adj) => adj[moniker].iter().map(|m| ids[m].clone()).collect(),
                None => opts
                    .monikers
                    .iter()
                    .filter(|m| **m != moniker)
                    .map(|m| ids[m].clone())
                    .collect(),
            };
            let transport = Arc::new(MeshTransport {
                peers,
                outbound: StdMutex::new(outboxes.remove(moniker).unwrap()),
            });

            let node = Node::bootstrap(config, ids[moniker].clone(), transport).await.unwrap();
            nodes.insert(moniker, node);
            dirs.push(dir);
        }

        for &a in &opts.monikers {
            for &b in &opts.monikers {
                if a == b {
                    continue;
                }
                let pubkey_hex = nodes[b].self_peer_id().to_string();
                let bytes = hex::decode(&pubkey_hex).unwrap();
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&bytes);
                nodes[a].register_peer_key(ids[b].clone(), arr);
            }
        }

        for &moniker in &opts.monikers {
            let node = nodes[moniker].clone();
            for (peer, protocol, stream) in inboxes.remove(moniker).unwrap() {
                node.accept_inbound_stream(peer, protocol, Box::new(stream));
            }
        }

        (nodes, dirs)
    }

    async fn wait_for_terminal(node: &Node, op_id: &OperationId, timeout: std::time::Duration) -> OperationRecord {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let record = node.get_operation(op_id).await.unwrap();
            if matches!(record.status, Status::Completed | Status::Failed | Status::Canceled) {
                return record;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("operation {} did not reach a terminal state in time (last: {:?})", op_id, record.status);
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }

    fn keygen_key_id(record: &OperationRecord) -> KeyId {
        match &record.result {
            Some(OperationResult::Keygen(r)) => r.key_id.clone(),
            other => panic!("expected a keygen result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn keygen_then_signing_produces_a_verifiable_signature() {
        let (nodes, _dirs) = build_mesh(MeshOpts::fully_connected(vec!["alice", "bob", "carol"])).await;
        let alice_id = nodes["alice"].self_id().clone();
        let bob_id = nodes["bob"].self_id().clone();
        let carol_id = nodes["carol"].self_id().clone();

        let started = nodes["alice"]
            .start_keygen(StartKeygen {
                operation_id: None,
                threshold: 1,
                participants: vec![alice_id.clone(), bob_id.clone(), carol_id.clone()],
            })
            .await
            .unwrap();

        let alice_record = wait_for_terminal(&nodes["alice"], &started.operation_id, std::time::Duration::from_secs(5)).await;
        let bob_record = wait_for_terminal(&nodes["bob"], &started.operation_id, std::time::Duration::from_secs(5)).await;
        let carol_record = wait_for_terminal(&nodes["carol"], &started.operation_id, std::time::Duration::from_secs(5)).await;
        assert_eq!(alice_record.status, Status::Completed);
        assert_eq!(bob_record.status, Status::Completed);
        assert_eq!(carol_record.status, Status::Completed);

        let key_id = keygen_key_id(&alice_record);
        assert_eq!(key_id, keygen_key_id(&bob_record));
        assert_eq!(key_id, keygen_key_id(&carol_record));

        let public_key_hex = match &alice_record.result {
            Some(OperationResult::Keygen(r)) => r.public_key_hex.clone(),
            _ => unreachable!(),
        };

        let message = b"transfer 10 dkn to carol".to_vec();
        let signed = nodes["bob"]
            .start_signing(StartSigning {
                operation_id: None,
                key_id: key_id.clone(),
                message: message.clone(),
                signers: vec![bob_id.clone(), carol_id.clone()],
            })
            .await
            .unwrap();

        let bob_sig = wait_for_terminal(&nodes["bob"], &signed.operation_id, std::time::Duration::from_secs(5)).await;
        let carol_sig = wait_for_terminal(&nodes["carol"], &signed.operation_id, std::time::Duration::from_secs(5)).await;
        assert_eq!(bob_sig.status, Status::Completed);
        assert_eq!(carol_sig.status, Status::Completed);

        let (signature_hex, r_hex, s_hex) = match &bob_sig.result {
            Some(OperationResult::Signing(r)) => (r.signature_hex.clone(), r.r_hex.clone(), r.s_hex.clone()),
            other => panic!("expected a signing result, got {:?}", other),
        };
        match &carol_sig.result {
            Some(OperationResult::Signing(r)) => {
                assert_eq!(r.r_hex, r_hex);
                assert_eq!(r.s_hex, s_hex);
            }
            other => panic!("expected a signing result, got {:?}", other),
        }

        verify_signature(&public_key_hex, &signature_hex, &message);
    }

    #[tokio::test]
    async fn keygen_start_is_idempotent_for_the_same_operation_id() {
        let (nodes, _dirs) = build_mesh(MeshOpts::fully_connected(vec!["alice", "bob"])).await;
        let alice_id = nodes["alice"].self_id().clone();
        let bob_id = nodes["bob"].self_id().clone();
        let op_id = OperationId::validate("fixed-keygen-op").unwrap();

        let first = nodes["alice"]
            .start_keygen(StartKeygen {
                operation_id: Some(op_id.clone()),
                threshold: 0,
                participants: vec![alice_id.clone(), bob_id.clone()],
            })
            .await
            .unwrap();
        let completed = wait_for_terminal(&nodes["alice"], &op_id, std::time::Duration::from_secs(5)).await;
        assert_eq!(completed.status, Status::Completed);
        assert_eq!(first.operation_id, op_id);

        let second = nodes["alice"]
            .start_keygen(StartKeygen {
                operation_id: Some(op_id.clone()),
                threshold: 0,
                participants: vec![alice_id, bob_id],
            })
            .await
            .unwrap();

        assert_eq!(second.operation_id, completed.operation_id);
        assert_eq!(second.status, Status::Completed);
        assert_eq!(keygen_key_id(&second), keygen_key_id(&completed));
        assert_eq!(second.created_at, completed.created_at);
    }

    #[tokio::test]
    async fn gossip_relay_completes_keygen_across_a_partitioned_mesh() {
        let mut adjacency = HashMap::new();
        adjacency.insert("alice", vec!["bob"]);
        adjacency.insert("bob", vec!["alice", "carol"]);
        adjacency.insert("carol", vec!["bob"]);

        let (nodes, _dirs) = build_mesh(MeshOpts {
            monikers: vec!["alice", "bob", "carol"],
            adjacency: Some(adjacency),
            keygen_timeout: None,
        })
        .await;

        let alice_id = nodes["alice"].self_id().clone();
        let bob_id = nodes["bob"].self_id().clone();
        let carol_id = nodes["carol"].self_id().clone();

        // alice and carol are not directly connected; alice's sync broadcast
        // and carol's outbound keygen round must both cross bob's gossip
        // relay.
        let started = nodes["alice"]
            .start_keygen(StartKeygen {
                operation_id: None,
                threshold: 1,
                participants: vec![alice_id, bob_id, carol_id],
            })
            .await
            .unwrap();

        let alice_record = wait_for_terminal(&nodes["alice"], &started.operation_id, std::time::Duration::from_secs(5)).await;
        let bob_record = wait_for_terminal(&nodes["bob"], &started.operation_id, std::time::Duration::from_secs(5)).await;
        let carol_record = wait_for_terminal(&nodes["carol"], &started.operation_id, std::time::Duration::from_secs(5)).await;
        assert_eq!(alice_record.status, Status::Completed);
        assert_eq!(bob_record.status, Status::Completed);
        assert_eq!(carol_record.status, Status::Completed);
        assert_eq!(keygen_key_id(&alice_record), keygen_key_id(&carol_record));
    }

    #[tokio::test]
    async fn resharing_moves_a_key_to_a_smaller_committee() {
        let (nodes, _dirs) = build_mesh(MeshOpts::fully_connected(vec!["alice", "bob", "carol"])).await;
        let alice_id = nodes["alice"].self_id().clone();
        let bob_id = nodes["bob"].self_id().clone();
        let carol_id = nodes["carol"].self_id().clone();

        let keygen = nodes["alice"]
            .start_keygen(StartKeygen {
                operation_id: None,
                threshold: 1,
                participants: vec![alice_id.clone(), bob_id.clone(), carol_id.clone()],
            })
            .await
            .unwrap();
        let keygen_record = wait_for_terminal(&nodes["alice"], &keygen.operation_id, std::time::Duration::from_secs(5)).await;
        let key_id = keygen_key_id(&keygen_record);
        let public_key_hex = match &keygen_record.result {
            Some(OperationResult::Keygen(r)) => r.public_key_hex.clone(),
            _ => unreachable!(),
        };
        // carol's mirror must also finish before resharing starts, since she
        // is part of the old committee the reshare will address.
        wait_for_terminal(&nodes["carol"], &keygen.operation_id, std::time::Duration::from_secs(5)).await;

        let reshare = nodes["alice"]
            .start_resharing(StartResharing {
                operation_id: None,
                key_id: key_id.clone(),
                new_threshold: 1,
                new_participants: vec![alice_id.clone(), bob_id.clone()],
            })
            .await
            .unwrap();

        let alice_reshared = wait_for_terminal(&nodes["alice"], &reshare.operation_id, std::time::Duration::from_secs(5)).await;
        let bob_reshared = wait_for_terminal(&nodes["bob"], &reshare.operation_id, std::time::Duration::from_secs(5)).await;
        let carol_reshared = wait_for_terminal(&nodes["carol"], &reshare.operation_id, std::time::Duration::from_secs(5)).await;
        assert_eq!(alice_reshared.status, Status::Completed);
        assert_eq!(bob_reshared.status, Status::Completed);
        assert_eq!(carol_reshared.status, Status::Completed);

        // The new 2-of-2 committee can still produce a signature under the
        // unchanged public key.
        let message = b"post-reshare payment".to_vec();
        let signed = nodes["alice"]
            .start_signing(StartSigning {
                operation_id: None,
                key_id,
                message: message.clone(),
                signers: vec![alice_id, bob_id],
            })
            .await
            .unwrap();
        let alice_sig = wait_for_terminal(&nodes["alice"], &signed.operation_id, std::time::Duration::from_secs(5)).await;
        assert_eq!(alice_sig.status, Status::Completed);
        let signature_hex = match &alice_sig.result {
            Some(OperationResult::Signing(r)) => r.signature_hex.clone(),
            other => panic!("expected a signing result, got {:?}", other),
        };
        verify_signature(&public_key_hex, &signature_hex, &message);
    }

    #[tokio::test]
    async fn keygen_with_an_unreachable_participant_times_out_and_cancels() {
        let (nodes, _dirs) = build_mesh(MeshOpts {
            monikers: vec!["alice"],
            adjacency: None,
            keygen_timeout: Some(std::time::Duration::from_millis(150)),
        })
        .await;
        let alice_id = nodes["alice"].self_id().clone();
        let ghost_id = NodeId::new("ghost-never-responds");

        let started = nodes["alice"]
            .start_keygen(StartKeygen {
                operation_id: None,
                threshold: 0,
                participants: vec![alice_id, ghost_id],
            })
            .await
            .unwrap();

        let record = wait_for_terminal(&nodes["alice"], &started.operation_id, std::time::Duration::from_secs(5)).await;
        assert_eq!(record.status, Status::Canceled);
        assert!(record.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn address_book_entries_propagate_via_periodic_gossip() {
        let (nodes, _dirs) = build_mesh(MeshOpts::fully_connected(vec!["alice", "bob", "carol"])).await;

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(3);
        loop {
            let bob_knows_alice = nodes["bob"].address_book().get(nodes["alice"].self_id()).is_some();
            let bob_knows_carol = nodes["bob"].address_book().get(nodes["carol"].self_id()).is_some();
            let carol_knows_alice = nodes["carol"].address_book().get(nodes["alice"].self_id()).is_some();
            if bob_knows_alice && bob_knows_carol && carol_knows_alice {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("address book entries did not propagate in time");
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let alice_mapping = nodes["bob"].address_book().get(nodes["alice"].self_id()).unwrap();
        assert_eq!(alice_mapping.peer_id, nodes["alice"].self_peer_id());
        assert_eq!(alice_mapping.moniker, "alice");
    }

    #[tokio::test]
    async fn get_network_addresses_reflects_gossiped_peers() {
        let (nodes, _dirs) = build_mesh(MeshOpts::fully_connected(vec!["alice", "bob", "carol"])).await;

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(3);
        loop {
            let addresses = nodes["bob"].get_network_addresses();
            let knows_everyone = addresses.len() == 3;
            if knows_everyone {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("get_network_addresses did not reflect the full mesh in time: {:?}", addresses);
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let addresses = nodes["bob"].get_network_addresses();
        let alice_row = addresses
            .iter()
            .find(|a| &a.node_id == nodes["alice"].self_id())
            .expect("alice should be present in bob's network addresses");
        assert_eq!(alice_row.peer_id, nodes["alice"].self_peer_id());
        assert_eq!(alice_row.moniker, "alice");
    }

    fn verify_signature(public_key_hex: &str, signature_hex: &str, message: &[u8]) {
        use k256::ecdsa::signature::hazmat::PrehashVerifier;
        use k256::ecdsa::{Signature, VerifyingKey};
        use k256::EncodedPoint;

        let pubkey_bytes = hex::decode(public_key_hex).unwrap();
        let point = EncodedPoint::from_bytes(&pubkey_bytes).unwrap();
        let verifying_key = VerifyingKey::from_encoded_point(&point).unwrap();
        let sig_bytes = hex::decode(signature_hex).unwrap();
        let signature = Signature::from_slice(&sig_bytes).unwrap();
        let digest = crate::tss::reference::sha256_digest(message);
        verifying_key.verify_prehash(&digest, &signature).unwrap();
    }
}
