// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The GG20 cryptographic party: an opaque object with `start()`,
//! `update_from_bytes(from, broadcast, bytes)`, an outbound-message stream,
//! and a completion value. A production deployment plugs in a real GG20
//! library here; [`reference`] ships a stand-in that produces genuinely
//! verifiable secp256k1 signatures without implementing a secure
//! MtA-based threshold scheme (see module docs there).

pub mod keygen;
pub mod reference;
pub mod resharing;
pub mod signing;

use crate::error::{Error, Result};
use crate::ids::PartyIndex;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

/// One message a party wants delivered to its peers: broadcast if `to` is
/// empty, else a directed send to each listed party index.
#[derive(Debug, Clone)]
pub struct PartyMessage {
    pub is_broadcast: bool,
    pub to: Vec<PartyIndex>,
    pub bytes: Bytes,
}

pub type PartyOutboundReceiver = mpsc::Receiver<PartyMessage>;
pub type PartyEndReceiver<Output> = oneshot::Receiver<Result<Output>>;

/// The black-box cryptographic party, parameterized by nothing but raw
/// inbound/outbound bytes — the engine never inspects protocol internals.
#[async_trait]
pub trait Party: Send + Sync {
    /// Kicks off round 1: typically emits this party's first outbound message.
    async fn start(&self) -> Result<()>;

    /// Feeds an inbound protocol message from `from` into the party.
    async fn update_from_bytes(&self, from: PartyIndex, is_broadcast: bool, bytes: Bytes) -> Result<()>;
}

pub(crate) fn channel_closed() -> Error {
    Error::PartyError("party outbound channel closed".into())
}
