// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Persisted terminal operation records, stored under `operation:<op_id>`.
//! The live in-memory `Operation` (see [`crate::engine::operation`]) carries
//! channels and a cancellation handle that cannot be serialized; on any
//! terminal transition it is converted to an [`OperationRecord`] and handed
//! to this store, then evicted from memory.

use super::Kv;
use crate::error::{Error, Result};
use crate::ids::{KeyId, NodeId, OperationId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Keygen,
    Signing,
    Resharing,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    InProgress,
    Completed,
    Failed,
    Canceled,
}

/// The original typed request, kept for persistence alongside the result.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "operation_type", rename_all = "snake_case")]
pub enum OperationRequest {
    Keygen {
        threshold: u16,
        participants: Vec<NodeId>,
    },
    Signing {
        key_id: KeyId,
        message: Vec<u8>,
        signers: Vec<NodeId>,
    },
    Resharing {
        key_id: KeyId,
        old_threshold: u16,
        new_threshold: u16,
        old_participants: Vec<NodeId>,
        new_participants: Vec<NodeId>,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeygenResult {
    pub public_key_hex: String,
    pub key_id: KeyId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigningResult {
    pub signature_hex: String,
    pub r_hex: String,
    pub s_hex: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResharingResult {
    pub key_id: KeyId,
    pub new_participants: Vec<NodeId>,
    pub new_threshold: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationResult {
    Keygen(KeygenResult),
    Signing(SigningResult),
    Resharing(ResharingResult),
}

/// The durable, terminal-only record of an operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationRecord {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub session_id: SessionId,
    pub participants: Vec<NodeId>,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub request: OperationRequest,
    pub result: Option<OperationResult>,
}

fn storage_key(operation_id: &OperationId) -> String {
    format!("operation:{}", operation_id.as_str())
}

/// Typed access to [`OperationRecord`]s over a generic [`Kv`] backend.
pub struct OperationStore {
    kv: Arc<dyn Kv>,
}

impl OperationStore {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    pub async fn put(&self, record: &OperationRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.kv.put(&storage_key(&record.operation_id), bytes).await
    }

    pub async fn get(&self, operation_id: &OperationId) -> Result<Option<OperationRecord>> {
        match self.kv.get(&storage_key(operation_id)).await? {
            Some(bytes) => {
                let record = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::Serialisation(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKv;

    fn sample_record() -> OperationRecord {
        OperationRecord {
            operation_id: OperationId::generate(),
            kind: OperationKind::Keygen,
            session_id: SessionId::generate(),
            participants: vec![NodeId::new("n1"), NodeId::new("n2")],
            status: Status::Completed,
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
            error: None,
            request: OperationRequest::Keygen {
                threshold: 1,
                participants: vec![NodeId::new("n1"), NodeId::new("n2")],
            },
            result: Some(OperationResult::Keygen(KeygenResult {
                public_key_hex: "04abcd".into(),
                key_id: KeyId::from_uncompressed_pubkey(&[1u8; 32], &[2u8; 32]),
            })),
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = OperationStore::new(Arc::new(MemoryKv::new()));
        let record = sample_record();
        store.put(&record).await.unwrap();
        let fetched = store.get(&record.operation_id).await.unwrap().unwrap();
        assert_eq!(fetched.operation_id, record.operation_id);
        assert_eq!(fetched.status, Status::Completed);
    }

    #[tokio::test]
    async fn unknown_operation_id_returns_none() {
        let store = OperationStore::new(Arc::new(MemoryKv::new()));
        assert!(store.get(&OperationId::generate()).await.unwrap().is_none());
    }
}
