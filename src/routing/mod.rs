// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Direct delivery when connected, bounded-TTL gossip flood otherwise.

pub mod comm;
pub mod dedup;

use crate::codec::{wire, Message, MessageType, RoutedMessage, PROTOCOL_GOSSIP, PROTOCOL_TSS_PARTY};
use crate::engine::MessageSender;
use crate::ids::NodeId;
use async_trait::async_trait;
use comm::Comm;
use dedup::DuplicateTable;
use std::sync::Arc;

/// Routes [`Message`]s to a set of targets: direct send when connected,
/// bounded-TTL gossip flood otherwise. Operates per-target — callers
/// (typically the engine's outbound pump) resolve the target list, whether
/// from an operation's participant set (broadcast) or a message's `to` list
/// (directed).
pub struct Router {
    self_id: NodeId,
    comm: Arc<Comm>,
    dedup: Arc<DuplicateTable>,
}

impl Router {
    pub fn new(self_id: NodeId, comm: Arc<Comm>, dedup: Arc<DuplicateTable>) -> Self {
        Self {
            self_id,
            comm,
            dedup,
        }
    }

    /// Sends `msg` to every target in `targets`, skipping self. Best-effort:
    /// a failed target is logged and does not fail the others.
    pub async fn send(&self, msg: &Message, targets: &[NodeId]) {
        for target in targets {
            if *target == self.self_id {
                continue;
            }
            self.send_to_target(msg, target).await;
        }
    }

    async fn send_to_target(&self, msg: &Message, target: &NodeId) {
        let payload = match wire::encode(msg) {
            Ok(p) => p,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode outbound message");
                return;
            }
        };

        if self.comm.is_connected(target) {
            match self.comm.send_to(target, PROTOCOL_TSS_PARTY, payload).await {
                Ok(()) => return,
                Err(err) => {
                    tracing::warn!(%target, error = %err, "direct send failed, falling back to gossip");
                }
            }
        }

        let routed = RoutedMessage::new(msg.clone(), self.self_id.clone(), target.clone());
        self.flood(routed, None).await;
    }

    async fn flood(&self, routed: RoutedMessage, exclude: Option<&NodeId>) {
        let payload = match wire::encode_routed(&routed) {
            Ok(p) => p,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode routed message");
                return;
            }
        };
        for peer in self.comm.connected_peers() {
            if Some(&peer) == exclude || peer == self.self_id {
                continue;
            }
            if let Err(err) = self.comm.send_to(&peer, PROTOCOL_GOSSIP, payload.clone()).await {
                tracing::warn!(%peer, error = %err, "gossip forward failed");
            }
        }
    }

    /// Handles a [`RoutedMessage`] received on the gossip protocol, per the
    /// forwarding rules: dedup, TTL, deliver-if-final-target,
    /// direct-if-reachable, else decrement-and-reforward.
    ///
    /// Returns the inner [`Message`] when `self` is the final target and it
    /// should be handed to the local operation engine.
    pub async fn handle_routed_message(
        &self,
        routed: RoutedMessage,
        received_from: NodeId,
    ) -> Option<Message> {
        if self.dedup.check_and_record(&routed.message_id) {
            return None;
        }
        if routed.ttl == 0 {
            return None;
        }
        if routed.final_target == self.self_id {
            return Some(routed.message);
        }
        if self.comm.is_connected(&routed.final_target) {
            if let Ok(payload) = wire::encode(&routed.message) {
                let target = routed.final_target.clone();
                if let Err(err) = self.comm.send_to(&target, PROTOCOL_TSS_PARTY, payload).await {
                    tracing::warn!(%target, error = %err, "direct relay of gossiped message failed");
                }
            }
            return None;
        }
        let forwarded = routed.forwarded_through(self.self_id.clone());
        self.flood(forwarded, Some(&received_from)).await;
        None
    }

    /// Publishes an address-book `Mapping` message to every connected peer,
    /// invoked by the periodic address-book gossip ticker.
    pub async fn broadcast_mapping(&self, session_id: crate::ids::SessionId, payload: bytes::Bytes) {
        let msg = Message::new(
            PROTOCOL_GOSSIP,
            session_id,
            MessageType::Mapping,
            self.self_id.clone(),
            vec![],
            true,
            payload,
            self.self_id.as_str().to_string(),
        );
        let targets = self.comm.connected_peers();
        self.send(&msg, &targets).await;
    }
}

#[async_trait]
impl MessageSender for Router {
    async fn send(&self, msg: &Message, targets: &[NodeId]) {
        Router::send(self, msg, targets).await
    }
}
