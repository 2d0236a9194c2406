// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The embedded key-value store, treated as a `put(key, bytes)/get(key) ->
//! bytes` interface (the out-of-scope collaborator). [`memory`] and
//! [`sled_store`] provide two concrete backends; [`keystore`] and [`opstore`]
//! layer the typed persisted records (`KeyShare`, completed `Operation`) on
//! top of either.

pub mod keystore;
pub mod memory;
pub mod opstore;
pub mod sled_store;

use crate::error::Result;
use async_trait::async_trait;

/// The minimal durable storage contract the engine depends on.
#[async_trait]
pub trait Kv: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn delete(&self, key: &str) -> Result<()>;
}

pub use keystore::KeyStore;
pub use memory::MemoryKv;
pub use opstore::OperationStore;
pub use sled_store::SledKv;
