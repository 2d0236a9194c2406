// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Lookup of a peer's long-term public key by `NodeId`, as maintained by the
//! network-layer collaborator (the libp2p host's peerstore in production).

use crate::ids::NodeId;
use dashmap::DashMap;

/// Interface exposed by the network-layer collaborator for fetching a peer's
/// X25519 public key out of its local peerstore.
pub trait PeerStore: Send + Sync {
    fn public_key(&self, node_id: &NodeId) -> Option<[u8; 32]>;
}

/// An in-memory peerstore, suitable for tests and as the default wiring when
/// peers exchange keys directly (e.g. via the address-book gossip payload).
#[derive(Default)]
pub struct InMemoryPeerStore {
    keys: DashMap<NodeId, [u8; 32]>,
}

impl InMemoryPeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, node_id: NodeId, public_key: [u8; 32]) {
        self.keys.insert(node_id, public_key);
    }
}

impl PeerStore for InMemoryPeerStore {
    fn public_key(&self, node_id: &NodeId) -> Option<[u8; 32]> {
        self.keys.get(node_id).map(|r| *r.value())
    }
}
