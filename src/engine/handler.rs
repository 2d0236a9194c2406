// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Inbound dispatch: the other half of the network/engine trait-object pair
//! described in [`super`]. On each delivered [`Message`], finds the matching
//! operation by `SessionID`, resolves the sender to a party index, and feeds
//! the (decrypted) payload to the party in a spawned task so one slow update
//! can't block the rest of the inbound stream.

use super::{sync::OperationSync, MessageHandler, OperationEngine};
use crate::addressbook::AddressBookSnapshot;
use crate::codec::{Message, MessageType};
use crate::crypto::encryption::EncryptionContext;
use crate::ids::NodeId;
use async_trait::async_trait;
use tracing::warn;

#[async_trait]
impl MessageHandler for OperationEngine {
    async fn handle_message(&self, msg: Message, received_from: NodeId) {
        match msg.kind {
            MessageType::OperationSync => self.on_operation_sync(msg).await,
            MessageType::Mapping => self.on_mapping(msg).await,
            MessageType::GossipRoute => {
                warn!("gossip_route message reached the engine directly; the routing layer should have unwrapped it");
            }
            MessageType::Keygen | MessageType::Signing | MessageType::Resharing => {
                self.on_party_message(msg, received_from).await;
            }
        }
    }
}

impl OperationEngine {
    async fn on_party_message(&self, msg: Message, _received_from: NodeId) {
        let operation_id = match self.session_index.get(&msg.session_id) {
            Some(id) => id.value().clone(),
            None => {
                warn!(session_id = %msg.session_id, "dropping message: no matching operation for session");
                return;
            }
        };
        let op = match self.operations.get(&operation_id) {
            Some(op) => op.value().clone(),
            None => return,
        };
        let from_index = match op.party_index_for(&msg.from) {
            Some(idx) => idx,
            None => {
                warn!(from = %msg.from, "dropping message: sender is not a participant in this operation");
                return;
            }
        };

        let ctx = EncryptionContext {
            payload: msg.data.clone(),
            is_broadcast: msg.is_broadcast,
            recipients: vec![self.self_id.clone()],
            session_id: msg.session_id,
            counterparty: msg.from.clone(),
        };
        let plaintext = if msg.encrypted {
            match self.encryption.decrypt(&ctx) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "dropping message: decryption failed");
                    return;
                }
            }
        } else {
            msg.data
        };

        let party = op.party.clone();
        let is_broadcast = msg.is_broadcast;
        tokio::spawn(async move {
            if let Err(e) = party.update_from_bytes(from_index, is_broadcast, plaintext).await {
                warn!(error = %e, "party rejected an inbound message");
            }
        });
    }

    /// Admits a mirror operation for an `operation_sync` broadcast, per the
    /// rule that a node only joins a session it was listed as a participant
    /// in — never because some other peer merely claims it should.
    async fn on_operation_sync(&self, msg: Message) {
        let sync: OperationSync = match serde_json::from_slice(&msg.data) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "dropping malformed operation_sync");
                return;
            }
        };
        let operation_id = sync.operation_id().clone();
        if self.operations.contains_key(&operation_id) {
            return;
        }
        if matches!(self.op_store.get(&operation_id).await, Ok(Some(_))) {
            return;
        }
        if !sync.participants().contains(&self.self_id) {
            warn!(operation_id = %operation_id, "ignoring operation_sync for a session we are not a participant in");
            return;
        }

        match sync {
            OperationSync::Keygen {
                operation_id,
                session_id,
                threshold,
                participants,
                ..
            } => {
                if let Err(e) = self.run_keygen(operation_id, session_id, threshold, participants, false).await {
                    warn!(error = %e, "failed to mirror keygen operation");
                }
            }
            OperationSync::Signing {
                operation_id,
                session_id,
                key_id,
                message,
                participants,
            } => {
                if let Err(e) = self
                    .run_signing(operation_id, session_id, key_id, message, participants, false)
                    .await
                {
                    warn!(error = %e, "failed to mirror signing operation");
                }
            }
            OperationSync::Resharing {
                operation_id,
                session_id,
                key_id,
                old_threshold,
                new_threshold,
                old_participants,
                new_participants,
            } => {
                if let Err(e) = self
                    .run_resharing(
                        operation_id,
                        session_id,
                        key_id,
                        old_threshold,
                        new_threshold,
                        old_participants,
                        new_participants,
                        false,
                    )
                    .await
                {
                    warn!(error = %e, "failed to mirror resharing operation");
                }
            }
        }
    }

    async fn on_mapping(&self, msg: Message) {
        match serde_json::from_slice::<AddressBookSnapshot>(&msg.data) {
            Ok(snapshot) => {
                if let Err(e) = self.address_book.merge_snapshot(snapshot) {
                    warn!(error = %e, "failed to merge address book snapshot");
                }
            }
            Err(e) => warn!(error = %e, "dropping malformed mapping message"),
        }
    }
}
