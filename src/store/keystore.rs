// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Encrypted key-share records, persisted under `<key_id>` in the [`super::Kv`]
//! store. Key-share bytes are never stored plaintext;
//! this layer only deals in already-encrypted blobs — encryption itself is
//! the caller's job via [`crate::crypto::keys::derive_storage_key`] and the
//! AEAD primitives in [`crate::crypto::encryption`].

use super::Kv;
use crate::error::{Error, Result};
use crate::ids::{KeyId, NodeId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A per-key record, encrypted-at-rest under `key_data`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyShareRecord {
    pub moniker: String,
    pub key_data: Vec<u8>,
    pub threshold: u16,
    pub participants: Vec<NodeId>,
}

/// Typed access to [`KeyShareRecord`]s over a generic [`Kv`] backend.
pub struct KeyStore {
    kv: Arc<dyn Kv>,
}

impl KeyStore {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    pub async fn put(&self, key_id: &KeyId, record: &KeyShareRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.kv.put(key_id.as_str(), bytes).await
    }

    pub async fn get(&self, key_id: &KeyId) -> Result<Option<KeyShareRecord>> {
        match self.kv.get(key_id.as_str()).await? {
            Some(bytes) => {
                let record = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::Serialisation(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub async fn exists(&self, key_id: &KeyId) -> Result<bool> {
        Ok(self.get(key_id).await?.is_some())
    }
}
