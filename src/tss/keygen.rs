// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Reference keygen party: a single-round all-to-all scalar sum (see
//! [`super::reference`] for why this discloses the full key rather than
//! sharing it).

use super::reference::{bytes_to_scalar, random_scalar, scalar_to_bytes};
use super::{channel_closed, Party, PartyEndReceiver, PartyMessage, PartyOutboundReceiver};
use crate::error::Result;
use crate::ids::PartyIndex;
use async_trait::async_trait;
use bytes::Bytes;
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::Field;
use k256::{NonZeroScalar, Scalar};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

/// Output handed to the engine's end-channel watcher on completion.
pub struct KeygenOutput {
    pub public_key_uncompressed: Vec<u8>,
    pub secret_scalar: [u8; 32],
}

struct KeygenParty {
    self_index: PartyIndex,
    participants: Vec<PartyIndex>,
    own_contribution: Scalar,
    outbound_tx: mpsc::Sender<PartyMessage>,
    received: Mutex<HashMap<PartyIndex, Scalar>>,
    end_tx: Mutex<Option<oneshot::Sender<Result<KeygenOutput>>>>,
}

/// Constructs a keygen party for `self_index` among `participants` (both
/// produced by [`crate::ids::assign_party_indices`]).
pub fn start(
    self_index: PartyIndex,
    participants: Vec<PartyIndex>,
) -> (Arc<dyn Party>, PartyOutboundReceiver, PartyEndReceiver<KeygenOutput>) {
    let (outbound_tx, outbound_rx) = mpsc::channel(32);
    let (end_tx, end_rx) = oneshot::channel();
    let party = Arc::new(KeygenParty {
        self_index,
        participants,
        own_contribution: random_scalar(),
        outbound_tx,
        received: Mutex::new(HashMap::new()),
        end_tx: Mutex::new(Some(end_tx)),
    });
    (party, outbound_rx, end_rx)
}

#[async_trait]
impl Party for KeygenParty {
    async fn start(&self) -> Result<()> {
        let bytes = scalar_to_bytes(&self.own_contribution);
        self.outbound_tx
            .send(PartyMessage {
                is_broadcast: true,
                to: vec![],
                bytes: Bytes::copy_from_slice(&bytes),
            })
            .await
            .map_err(|_| channel_closed())?;
        self.received
            .lock()
            .await
            .insert(self.self_index, self.own_contribution);
        self.maybe_finalize().await
    }

    async fn update_from_bytes(&self, from: PartyIndex, _is_broadcast: bool, bytes: Bytes) -> Result<()> {
        let scalar = bytes_to_scalar(&bytes)?;
        self.received.lock().await.insert(from, scalar);
        self.maybe_finalize().await
    }
}

impl KeygenParty {
    async fn maybe_finalize(&self) -> Result<()> {
        let received = self.received.lock().await;
        if !self.participants.iter().all(|p| received.contains_key(p)) {
            return Ok(());
        }
        let mut secret = Scalar::ZERO;
        for p in &self.participants {
            secret = secret + received[p];
        }
        drop(received);

        let nonzero = Option::<NonZeroScalar>::from(NonZeroScalar::new(secret))
            .ok_or_else(|| crate::error::Error::PartyError("aggregate secret is zero".into()))?;
        let signing_key = SigningKey::from(nonzero);
        let encoded = signing_key.verifying_key().to_encoded_point(false);
        let mut public_key_uncompressed = Vec::with_capacity(65);
        public_key_uncompressed.push(0x04);
        public_key_uncompressed.extend_from_slice(encoded.x().expect("uncompressed point has x"));
        public_key_uncompressed.extend_from_slice(encoded.y().expect("uncompressed point has y"));

        let output = KeygenOutput {
            public_key_uncompressed,
            secret_scalar: scalar_to_bytes(&secret),
        };
        if let Some(tx) = self.end_tx.lock().await.take() {
            let _ = tx.send(Ok(output));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PARTY_INDEX_BASE;

    #[tokio::test]
    async fn three_parties_converge_on_the_same_public_key() {
        let participants = vec![PARTY_INDEX_BASE, PARTY_INDEX_BASE + 1, PARTY_INDEX_BASE + 2];

        let (p1, mut out1, end1) = start(participants[0], participants.clone());
        let (p2, mut out2, end2) = start(participants[1], participants.clone());
        let (p3, mut out3, end3) = start(participants[2], participants.clone());

        p1.start().await.unwrap();
        p2.start().await.unwrap();
        p3.start().await.unwrap();

        let m1 = out1.recv().await.unwrap();
        let m2 = out2.recv().await.unwrap();
        let m3 = out3.recv().await.unwrap();

        p2.update_from_bytes(participants[0], true, m1.bytes.clone()).await.unwrap();
        p3.update_from_bytes(participants[0], true, m1.bytes).await.unwrap();
        p1.update_from_bytes(participants[1], true, m2.bytes.clone()).await.unwrap();
        p3.update_from_bytes(participants[1], true, m2.bytes).await.unwrap();
        p1.update_from_bytes(participants[2], true, m3.bytes.clone()).await.unwrap();
        p2.update_from_bytes(participants[2], true, m3.bytes).await.unwrap();

        let out1 = end1.await.unwrap().unwrap();
        let out2 = end2.await.unwrap().unwrap();
        let out3 = end3.await.unwrap().unwrap();

        assert_eq!(out1.public_key_uncompressed, out2.public_key_uncompressed);
        assert_eq!(out2.public_key_uncompressed, out3.public_key_uncompressed);
    }
}
