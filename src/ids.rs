// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Stable identifiers used throughout the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable string identifier for a cluster member. Equals the libp2p PeerId in the
/// reference deployment but is treated as an opaque logical name by the engine.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Caller-provided or generated identifier for an `Operation`. 1-128 ASCII bytes.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct OperationId(pub String);

impl OperationId {
    /// Generates a fresh UUIDv4-based id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Validates a caller-supplied token per the 1-128 ASCII byte rule.
    pub fn validate(raw: &str) -> Result<Self, InvalidOperationId> {
        if raw.is_empty() || raw.len() > 128 {
            return Err(InvalidOperationId::BadLength(raw.len()));
        }
        if !raw.is_ascii() {
            return Err(InvalidOperationId::NotAscii);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidOperationId {
    #[error("operation id length {0} out of bounds (1-128)")]
    BadLength(usize),
    #[error("operation id must be ASCII")]
    NotAscii,
}

/// Fresh-per-operation session identifier used to route wire messages to the
/// correct party instance. Never reused, even across retries of the same
/// `OperationId`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content-addressed identifier for a key share: the hex-encoded lower-160 bits of
/// Keccak-256 over the uncompressed public key (an Ethereum-style address).
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct KeyId(pub String);

impl KeyId {
    pub fn from_uncompressed_pubkey(pub_x: &[u8], pub_y: &[u8]) -> Self {
        use sha3::{Digest, Keccak256};
        let mut hasher = Keccak256::new();
        hasher.update(pub_x);
        hasher.update(pub_y);
        let digest = hasher.finalize();
        let tail = &digest[12..32];
        Self(format!("0x{}", hex::encode(tail)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The deterministic integer key `1_000_000 + index` assigned to a sorted
/// participant, used by the TSS library as a stable party index.
pub type PartyIndex = u32;

pub const PARTY_INDEX_BASE: PartyIndex = 1_000_000;

/// Sorts node ids lexicographically and assigns each the deterministic party
/// index `1_000_000 + position`.
pub fn assign_party_indices(mut participants: Vec<NodeId>) -> Vec<(NodeId, PartyIndex)> {
    participants.sort();
    participants
        .into_iter()
        .enumerate()
        .map(|(i, n)| (n, PARTY_INDEX_BASE + i as u32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn party_indices_are_stable_and_sorted() {
        let participants = vec![NodeId::new("n3"), NodeId::new("n1"), NodeId::new("n2")];
        let assigned = assign_party_indices(participants);
        assert_eq!(assigned[0].0, NodeId::new("n1"));
        assert_eq!(assigned[0].1, PARTY_INDEX_BASE);
        assert_eq!(assigned[1].0, NodeId::new("n2"));
        assert_eq!(assigned[1].1, PARTY_INDEX_BASE + 1);
        assert_eq!(assigned[2].0, NodeId::new("n3"));
        assert_eq!(assigned[2].1, PARTY_INDEX_BASE + 2);
    }

    #[test]
    fn operation_id_rejects_empty_and_oversized() {
        assert!(OperationId::validate("").is_err());
        let too_long = "a".repeat(129);
        assert!(OperationId::validate(&too_long).is_err());
        assert!(OperationId::validate("abc").is_ok());
    }

    #[test]
    fn key_id_is_stable_for_same_pubkey() {
        let x = [1u8; 32];
        let y = [2u8; 32];
        let a = KeyId::from_uncompressed_pubkey(&x, &y);
        let b = KeyId::from_uncompressed_pubkey(&x, &y);
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("0x"));
        assert_eq!(a.as_str().len(), 42);
    }
}
