// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Typed message envelope and length-prefixed framed I/O.
//!
//! A wire message is serialized as structured JSON, then gzip-compressed (see
//! [`wire`]). Over a long-lived per-peer stream, frames are length-prefixed with a
//! 32-bit unsigned big-endian byte count (see [`framing`]).

pub mod framing;
pub mod wire;

use crate::ids::{NodeId, SessionId};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use custom_debug::Debug as CustomDebug;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol identifiers carried by [`Message::protocol_id`].
pub const PROTOCOL_TSS_PARTY: &str = "/tss/party/1.0.0";
pub const PROTOCOL_GOSSIP: &str = "/tss/gossip/1.0.0";

/// Tag discriminating the payload carried inside a [`Message`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Keygen,
    Signing,
    Resharing,
    OperationSync,
    GossipRoute,
    Mapping,
}

/// The wire envelope exchanged between nodes.
#[derive(Clone, CustomDebug, Serialize, Deserialize)]
pub struct Message {
    pub protocol_id: String,
    pub session_id: SessionId,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub from: NodeId,
    pub to: Vec<NodeId>,
    pub is_broadcast: bool,
    #[debug(skip)]
    #[serde(with = "bytes_as_base64")]
    pub data: Bytes,
    pub encrypted: bool,
    pub timestamp: DateTime<Utc>,
    pub sender_peer_id: String,
    #[serde(default)]
    pub is_to_old_committee: bool,
    #[serde(default)]
    pub is_to_old_and_new_committees: bool,
}

impl Message {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        protocol_id: impl Into<String>,
        session_id: SessionId,
        kind: MessageType,
        from: NodeId,
        to: Vec<NodeId>,
        is_broadcast: bool,
        data: Bytes,
        sender_peer_id: impl Into<String>,
    ) -> Self {
        Self {
            protocol_id: protocol_id.into(),
            session_id,
            kind,
            from,
            to,
            is_broadcast,
            data,
            encrypted: false,
            timestamp: Utc::now(),
            sender_peer_id: sender_peer_id.into(),
            is_to_old_committee: false,
            is_to_old_and_new_committees: false,
        }
    }
}

/// A wrapper used when a [`Message`] must be forwarded across a partially
/// connected mesh via bounded-TTL gossip flood.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutedMessage {
    pub message: Message,
    pub original_sender: NodeId,
    pub final_target: NodeId,
    pub path: Vec<NodeId>,
    pub ttl: u8,
    pub message_id: MessageId,
}

impl RoutedMessage {
    pub const DEFAULT_TTL: u8 = 10;

    pub fn new(message: Message, original_sender: NodeId, final_target: NodeId) -> Self {
        let message_id = MessageId::for_session(message.session_id);
        Self {
            message,
            original_sender,
            final_target,
            path: Vec::new(),
            ttl: Self::DEFAULT_TTL,
            message_id,
        }
    }

    /// Decrements the TTL and appends `hop` to the traversed path, in place, as
    /// the message continues its flood.
    pub fn forwarded_through(mut self, hop: NodeId) -> Self {
        self.ttl = self.ttl.saturating_sub(1);
        self.path.push(hop);
        self
    }
}

/// Unique id of a [`RoutedMessage`], `session_id || '-' || monotonic_nanos`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn for_session(session_id: SessionId) -> Self {
        // A per-process monotonic counter guarantees uniqueness even when two
        // messages for the same session are minted within the same nanosecond.
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let nanos = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("{}-{}", session_id, nanos))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serializes `Bytes` as base64 so the envelope can round-trip through JSON.
mod bytes_as_base64 {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&base64::encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Bytes, D::Error> {
        let s = String::deserialize(de)?;
        let bytes = base64::decode(&s).map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(bytes))
    }
}
