// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Reference resharing party.
//!
//! Since the reference keygen scheme discloses the full private key to every
//! original participant (see [`super::reference`]), resharing reduces to:
//! any party that already holds the secret (self was in the old committee)
//! broadcasts it once; any party in the new committee adopts the first copy
//! it sees. The aggregate public key is unchanged by construction.

use super::{channel_closed, Party, PartyEndReceiver, PartyMessage, PartyOutboundReceiver};
use crate::error::Result;
use crate::ids::PartyIndex;
use crate::tss::reference::bytes_to_scalar;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

pub struct ResharingOutput {
    /// The new share for `self`, present iff `self` is in the new committee.
    pub secret_scalar: Option<[u8; 32]>,
}

struct ResharingParty {
    self_index: PartyIndex,
    in_new_committee: bool,
    known_secret: Option<[u8; 32]>,
    outbound_tx: mpsc::Sender<PartyMessage>,
    end_tx: Mutex<Option<oneshot::Sender<Result<ResharingOutput>>>>,
}

/// Constructs a resharing party. `known_secret` is `Some` iff `self_index`
/// was part of the old committee and already holds the key locally.
/// `in_new_committee` tells the party whether to produce an output share.
pub fn start(
    self_index: PartyIndex,
    in_new_committee: bool,
    known_secret: Option<[u8; 32]>,
) -> (Arc<dyn Party>, PartyOutboundReceiver, PartyEndReceiver<ResharingOutput>) {
    let (outbound_tx, outbound_rx) = mpsc::channel(8);
    let (end_tx, end_rx) = oneshot::channel();
    let party = Arc::new(ResharingParty {
        self_index,
        in_new_committee,
        known_secret,
        outbound_tx,
        end_tx: Mutex::new(Some(end_tx)),
    });
    (party, outbound_rx, end_rx)
}

#[async_trait]
impl Party for ResharingParty {
    async fn start(&self) -> Result<()> {
        if let Some(secret) = self.known_secret {
            self.outbound_tx
                .send(PartyMessage {
                    is_broadcast: true,
                    to: vec![],
                    bytes: Bytes::copy_from_slice(&secret),
                })
                .await
                .map_err(|_| channel_closed())?;
            self.finalize(Some(secret)).await?;
        }
        Ok(())
    }

    async fn update_from_bytes(&self, _from: PartyIndex, _is_broadcast: bool, bytes: Bytes) -> Result<()> {
        if self.known_secret.is_some() {
            // Already finalized from our own knowledge in `start`.
            return Ok(());
        }
        let scalar = bytes_to_scalar(&bytes)?;
        self.finalize(Some(crate::tss::reference::scalar_to_bytes(&scalar))).await
    }
}

impl ResharingParty {
    async fn finalize(&self, secret: Option<[u8; 32]>) -> Result<()> {
        let mut slot = self.end_tx.lock().await;
        let tx = match slot.take() {
            Some(tx) => tx,
            None => return Ok(()),
        };
        let output = ResharingOutput {
            secret_scalar: if self.in_new_committee { secret } else { None },
        };
        let _ = tx.send(Ok(output));
        Ok(())
    }
}
