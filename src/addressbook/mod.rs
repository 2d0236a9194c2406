// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Persistent NodeID -> PeerID map, merged on receipt by a strict
//! timestamp-greater rule. Own mapping is always authoritative; file-backed
//! with atomic write-tmp-then-rename replace.

use crate::error::{Error, Result};
use crate::ids::NodeId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// One entry of the address book: a peer's libp2p identity, display moniker,
/// and the timestamp of the mapping it was last updated with.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    pub peer_id: String,
    pub moniker: String,
    pub timestamp: DateTime<Utc>,
}

/// The on-disk representation, gossiped verbatim as the `mapping` sync payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AddressBookSnapshot {
    pub version: u64,
    pub entries: Vec<(NodeId, Mapping)>,
}

/// One row of the `get_network_addresses` RPC response: a [`Mapping`]
/// flattened together with the [`NodeId`] it belongs to.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NetworkAddress {
    pub node_id: NodeId,
    pub peer_id: String,
    pub moniker: String,
    pub timestamp: DateTime<Utc>,
}

/// A concurrent, file-backed NodeID -> [`Mapping`] table.
pub struct AddressBook {
    path: PathBuf,
    entries: DashMap<NodeId, Mapping>,
    version: AtomicU64,
}

impl AddressBook {
    /// Loads `path` if it exists (validating every entry), creating the parent
    /// directory and an empty book otherwise. Upserts `self_id`'s own mapping
    /// with the current time, since the local node is always authoritative
    /// for its own entry.
    pub fn load_or_create(path: &Path, self_id: &NodeId, self_mapping: Mapping) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let (entries, version) = match std::fs::read(path) {
            Ok(bytes) => {
                let snapshot: AddressBookSnapshot = serde_json::from_slice(&bytes)?;
                let map = DashMap::new();
                for (node_id, mapping) in snapshot.entries {
                    validate_mapping(&mapping)?;
                    map.insert(node_id, mapping);
                }
                (map, snapshot.version)
            }
            Err(_) => (DashMap::new(), 0),
        };

        let book = Self {
            path: path.to_path_buf(),
            entries,
            version: AtomicU64::new(version),
        };
        book.entries.insert(self_id.clone(), self_mapping);
        book.persist()?;
        Ok(book)
    }

    /// Returns a defensive copy of the mapping for `node_id`, if known.
    pub fn get(&self, node_id: &NodeId) -> Option<Mapping> {
        self.entries.get(node_id).map(|r| r.value().clone())
    }

    /// Resolves `node_id` to the address the network-layer collaborator
    /// should dial, falling back to the NodeID string itself when no mapping
    /// is on file.
    pub fn resolve(&self, node_id: &NodeId) -> String {
        self.get(node_id)
            .map(|m| m.peer_id)
            .unwrap_or_else(|| node_id.as_str().to_string())
    }

    /// Upserts the local node's own mapping (always wins, bumping `version`
    /// if the (peer_id, moniker) pair changed) and persists.
    pub fn update_self(&self, node_id: &NodeId, mapping: Mapping) -> Result<()> {
        validate_mapping(&mapping)?;
        let changed = match self.entries.get(node_id) {
            Some(existing) => {
                existing.peer_id != mapping.peer_id || existing.moniker != mapping.moniker
            }
            None => true,
        };
        self.entries.insert(node_id.clone(), mapping);
        if changed {
            self.version.fetch_add(1, Ordering::SeqCst);
        }
        self.persist()
    }

    /// Merges a mapping received over gossip: accepted only if its timestamp
    /// is strictly newer than any mapping already on file for `node_id`.
    /// Returns `true` if the entry was updated.
    pub fn merge_received(&self, node_id: NodeId, mapping: Mapping) -> Result<bool> {
        validate_mapping(&mapping)?;
        let should_apply = match self.entries.get(&node_id) {
            Some(existing) => mapping.timestamp > existing.timestamp,
            None => true,
        };
        if !should_apply {
            return Ok(false);
        }
        let changed_identity = self
            .entries
            .get(&node_id)
            .map(|existing| existing.peer_id != mapping.peer_id || existing.moniker != mapping.moniker)
            .unwrap_or(true);
        self.entries.insert(node_id, mapping);
        if changed_identity {
            self.version.fetch_add(1, Ordering::SeqCst);
        }
        self.persist()?;
        Ok(true)
    }

    /// Merges a full snapshot (e.g. received during a bulk address-book sync),
    /// applying the same strict-timestamp-greater rule per entry.
    pub fn merge_snapshot(&self, snapshot: AddressBookSnapshot) -> Result<usize> {
        let mut applied = 0;
        for (node_id, mapping) in snapshot.entries {
            if self.merge_received(node_id, mapping)? {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Every known mapping, flattened to the `get_network_addresses` RPC
    /// response shape. Order is unspecified.
    pub fn network_addresses(&self) -> Vec<NetworkAddress> {
        self.entries
            .iter()
            .map(|r| NetworkAddress {
                node_id: r.key().clone(),
                peer_id: r.value().peer_id.clone(),
                moniker: r.value().moniker.clone(),
                timestamp: r.value().timestamp,
            })
            .collect()
    }

    /// A defensive-copy snapshot suitable for the periodic gossip broadcast.
    pub fn snapshot(&self) -> AddressBookSnapshot {
        AddressBookSnapshot {
            version: self.version.load(Ordering::SeqCst),
            entries: self
                .entries
                .iter()
                .map(|r| (r.key().clone(), r.value().clone()))
                .collect(),
        }
    }

    fn persist(&self) -> Result<()> {
        let snapshot = self.snapshot();
        let json = serde_json::to_vec_pretty(&snapshot)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn validate_mapping(mapping: &Mapping) -> Result<()> {
    if mapping.peer_id.trim().is_empty() {
        return Err(Error::InvalidArgument("address book entry has empty peer_id".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn mapping(peer_id: &str, moniker: &str, ts: DateTime<Utc>) -> Mapping {
        Mapping {
            peer_id: peer_id.to_string(),
            moniker: moniker.to_string(),
            timestamp: ts,
        }
    }

    #[test]
    fn own_mapping_is_upserted_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node_addresses.json");
        let book = AddressBook::load_or_create(
            &path,
            &NodeId::new("n1"),
            mapping("peer-n1", "alice", Utc::now()),
        )
        .unwrap();
        assert_eq!(book.get(&NodeId::new("n1")).unwrap().peer_id, "peer-n1");
        assert!(path.exists());
    }

    #[test]
    fn merge_accepts_strictly_newer_timestamp_and_rejects_older() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node_addresses.json");
        let book =
            AddressBook::load_or_create(&path, &NodeId::new("self"), mapping("self-peer", "me", Utc::now()))
                .unwrap();

        let t100 = Utc::now();
        let t90 = t100 - Duration::seconds(10);

        assert!(book
            .merge_received(NodeId::new("n2"), mapping("peer-n2", "bob", t100))
            .unwrap());
        assert!(!book
            .merge_received(NodeId::new("n2"), mapping("peer-n2-stale", "bob", t90))
            .unwrap());
        assert_eq!(book.get(&NodeId::new("n2")).unwrap().peer_id, "peer-n2");
    }

    #[test]
    fn merge_rejects_empty_peer_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node_addresses.json");
        let book =
            AddressBook::load_or_create(&path, &NodeId::new("self"), mapping("self-peer", "me", Utc::now()))
                .unwrap();
        let result = book.merge_received(NodeId::new("n2"), mapping("", "bob", Utc::now()));
        assert!(result.is_err());
    }

    #[test]
    fn network_addresses_flattens_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node_addresses.json");
        let book =
            AddressBook::load_or_create(&path, &NodeId::new("self"), mapping("self-peer", "me", Utc::now()))
                .unwrap();
        book.merge_received(NodeId::new("n2"), mapping("peer-n2", "bob", Utc::now()))
            .unwrap();

        let mut addresses = book.network_addresses();
        addresses.sort_by(|a, b| a.node_id.as_str().cmp(b.node_id.as_str()));

        assert_eq!(addresses.len(), 2);
        assert_eq!(addresses[0].node_id, NodeId::new("n2"));
        assert_eq!(addresses[0].peer_id, "peer-n2");
        assert_eq!(addresses[0].moniker, "bob");
        assert_eq!(addresses[1].node_id, NodeId::new("self"));
        assert_eq!(addresses[1].peer_id, "self-peer");
    }

    #[test]
    fn resolve_falls_back_to_node_id_string_when_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node_addresses.json");
        let book =
            AddressBook::load_or_create(&path, &NodeId::new("self"), mapping("self-peer", "me", Utc::now()))
                .unwrap();
        assert_eq!(book.resolve(&NodeId::new("ghost")), "ghost");
    }

    #[test]
    fn reload_from_disk_restores_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node_addresses.json");
        {
            let book = AddressBook::load_or_create(
                &path,
                &NodeId::new("self"),
                mapping("self-peer", "me", Utc::now()),
            )
            .unwrap();
            book.merge_received(NodeId::new("n2"), mapping("peer-n2", "bob", Utc::now()))
                .unwrap();
        }
        let reloaded = AddressBook::load_or_create(
            &path,
            &NodeId::new("self"),
            mapping("self-peer", "me", Utc::now()),
        )
        .unwrap();
        assert_eq!(reloaded.get(&NodeId::new("n2")).unwrap().peer_id, "peer-n2");
    }
}
