// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! `sled`-backed [`Kv`], the embedded store used by standalone node runs.

use super::Kv;
use crate::error::{Error, Result};
use async_trait::async_trait;

pub struct SledKv {
    db: sled::Db,
}

impl SledKv {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let db = sled::open(path).map_err(|e| Error::StorageError(e.to_string()))?;
        Ok(Self { db })
    }
}

#[async_trait]
impl Kv for SledKv {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let db = self.db.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            db.insert(key.as_bytes(), value)
                .map_err(|e| Error::StorageError(e.to_string()))?;
            db.flush().map_err(|e| Error::StorageError(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| Error::StorageError(e.to_string()))?
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let db = self.db.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            db.get(key.as_bytes())
                .map(|opt| opt.map(|ivec| ivec.to_vec()))
                .map_err(|e| Error::StorageError(e.to_string()))
        })
        .await
        .map_err(|e| Error::StorageError(e.to_string()))?
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let db = self.db.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            db.remove(key.as_bytes())
                .map_err(|e| Error::StorageError(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| Error::StorageError(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let kv = SledKv::open(dir.path()).unwrap();
            kv.put("k", b"v".to_vec()).await.unwrap();
        }
        let kv = SledKv::open(dir.path()).unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let dir = tempfile::tempdir().unwrap();
        let kv = SledKv::open(dir.path()).unwrap();
        kv.put("k", b"v".to_vec()).await.unwrap();
        kv.delete("k").await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), None);
    }
}
