// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Reference signing party.
//!
//! Every signer already holds the full private key (per [`super::keygen`]'s
//! full-disclosure scheme), so no combine round is cryptographically
//! necessary; the party still runs a trivial broadcast round of
//! "ready" pings so the engine's outbound-pump / inbound-path machinery is
//! exercised the same way it would be against a real MPC party. Signing
//! itself is deterministic (RFC 6979), so every signer's locally computed
//! signature is bit-identical.

use super::{channel_closed, Party, PartyEndReceiver, PartyMessage, PartyOutboundReceiver};
use crate::error::{Error, Result};
use crate::tss::reference::{bytes_to_scalar, sha256_digest};
use async_trait::async_trait;
use bytes::Bytes;
use k256::ecdsa::SigningKey;
use k256::NonZeroScalar;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::ids::PartyIndex;

pub struct SigningOutput {
    pub signature_der_free: Vec<u8>,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

struct SigningParty {
    self_index: PartyIndex,
    signers: Vec<PartyIndex>,
    secret_scalar: [u8; 32],
    message: Vec<u8>,
    outbound_tx: mpsc::Sender<PartyMessage>,
    ready: Mutex<HashSet<PartyIndex>>,
    end_tx: Mutex<Option<oneshot::Sender<Result<SigningOutput>>>>,
}

pub fn start(
    self_index: PartyIndex,
    signers: Vec<PartyIndex>,
    secret_scalar: [u8; 32],
    message: Vec<u8>,
) -> (Arc<dyn Party>, PartyOutboundReceiver, PartyEndReceiver<SigningOutput>) {
    let (outbound_tx, outbound_rx) = mpsc::channel(32);
    let (end_tx, end_rx) = oneshot::channel();
    let party = Arc::new(SigningParty {
        self_index,
        signers,
        secret_scalar,
        message,
        outbound_tx,
        ready: Mutex::new(HashSet::new()),
        end_tx: Mutex::new(Some(end_tx)),
    });
    (party, outbound_rx, end_rx)
}

#[async_trait]
impl Party for SigningParty {
    async fn start(&self) -> Result<()> {
        self.outbound_tx
            .send(PartyMessage {
                is_broadcast: true,
                to: vec![],
                bytes: Bytes::from_static(b"ready"),
            })
            .await
            .map_err(|_| channel_closed())?;
        self.ready.lock().await.insert(self.self_index);
        self.maybe_finalize().await
    }

    async fn update_from_bytes(&self, from: PartyIndex, _is_broadcast: bool, _bytes: Bytes) -> Result<()> {
        self.ready.lock().await.insert(from);
        self.maybe_finalize().await
    }
}

impl SigningParty {
    async fn maybe_finalize(&self) -> Result<()> {
        let ready = self.ready.lock().await;
        if !self.signers.iter().all(|s| ready.contains(s)) {
            return Ok(());
        }
        drop(ready);

        let scalar = bytes_to_scalar(&self.secret_scalar)?;
        let nonzero = Option::<NonZeroScalar>::from(NonZeroScalar::new(scalar))
            .ok_or_else(|| Error::PartyError("signing key scalar is zero".into()))?;
        let signing_key = SigningKey::from(nonzero);
        let digest = sha256_digest(&self.message);
        let signature: k256::ecdsa::Signature = signing_key
            .sign_prehash(&digest)
            .map_err(|e| Error::PartyError(format!("ecdsa sign failed: {}", e)))?;

        let sig_bytes = signature.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&sig_bytes[..32]);
        s.copy_from_slice(&sig_bytes[32..]);

        let output = SigningOutput {
            signature_der_free: sig_bytes.to_vec(),
            r,
            s,
        };
        if let Some(tx) = self.end_tx.lock().await.take() {
            let _ = tx.send(Ok(output));
        }
        Ok(())
    }
}
