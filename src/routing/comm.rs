// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Per-peer framed stream cache and low-level send.
//!
//! Grounded on the same shape as a libp2p-backed `Comm`: a connection/stream is
//! cached per peer and protocol, reused across sends, and recreated on any I/O
//! error. The actual transport (establishing a byte stream to a peer) is the
//! network-layer collaborator's job, exposed here through [`PeerTransport`].

use crate::codec::framing;
use crate::error::{Error, Result};
use crate::ids::NodeId;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;

/// A boxed bidirectional byte stream to a single peer.
pub type BoxedDuplex = Box<dyn DuplexStream>;

/// Combines `AsyncRead` + `AsyncWrite` so it can be named as a single trait
/// object; implemented for anything that already satisfies both.
pub trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> DuplexStream for T {}

/// What the network-layer collaborator (the libp2p host, out of scope here)
/// must provide so [`Comm`] can do per-peer framed sends.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Whether we currently hold an open connection to `peer`.
    fn is_connected(&self, peer: &NodeId) -> bool;

    /// All peers we currently hold an open connection to.
    fn connected_peers(&self) -> Vec<NodeId>;

    /// Opens (or re-opens) a stream to `peer` for `protocol_id`.
    async fn open_stream(&self, peer: &NodeId, protocol_id: &str) -> Result<BoxedDuplex>;
}

/// Caches one framed stream per `(peer, protocol_id)`, writing length-prefixed
/// frames and recreating the stream on any I/O error.
pub struct Comm {
    transport: Arc<dyn PeerTransport>,
    streams: DashMap<(NodeId, String), Arc<Mutex<BoxedDuplex>>>,
    max_frame_bytes: u32,
}

impl Comm {
    pub fn new(transport: Arc<dyn PeerTransport>, max_frame_bytes: u32) -> Self {
        Self {
            transport,
            streams: DashMap::new(),
            max_frame_bytes,
        }
    }

    pub fn is_connected(&self, peer: &NodeId) -> bool {
        self.transport.is_connected(peer)
    }

    pub fn connected_peers(&self) -> Vec<NodeId> {
        self.transport.connected_peers()
    }

    /// Sends `payload` to `peer` over the cached stream for `protocol_id`,
    /// resetting and recreating the stream once on failure.
    pub async fn send_to(&self, peer: &NodeId, protocol_id: &str, payload: Bytes) -> Result<()> {
        let key = (peer.clone(), protocol_id.to_string());

        if let Some(entry) = self.streams.get(&key) {
            let stream = entry.clone();
            drop(entry);
            let mut guard = stream.lock().await;
            if framing::write_frame(&mut *guard, &payload).await.is_ok() {
                return Ok(());
            }
            drop(guard);
            let _ = self.streams.remove(&key);
        }

        let fresh = self.transport.open_stream(peer, protocol_id).await?;
        let fresh = Arc::new(Mutex::new(fresh));
        {
            let mut guard = fresh.lock().await;
            framing::write_frame(&mut *guard, &payload).await?;
        }
        self.streams.insert(key, fresh);
        Ok(())
    }

    /// Drops the cached stream for `(peer, protocol_id)`, forcing the next
    /// send to reconnect. Used when the caller observes a read-side failure.
    pub fn reset(&self, peer: &NodeId, protocol_id: &str) {
        let _ = self.streams.remove(&(peer.clone(), protocol_id.to_string()));
    }

    pub fn max_frame_bytes(&self) -> u32 {
        self.max_frame_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use tokio::io::duplex;

    /// A transport that hands out one end of an in-memory duplex pipe per
    /// `(peer, protocol_id)`, the other end held by the test.
    struct FakeTransport {
        connected: Vec<NodeId>,
        pipes: StdMutex<HashMap<(NodeId, String), tokio::io::DuplexStream>>,
    }

    #[async_trait]
    impl PeerTransport for FakeTransport {
        fn is_connected(&self, peer: &NodeId) -> bool {
            self.connected.contains(peer)
        }

        fn connected_peers(&self) -> Vec<NodeId> {
            self.connected.clone()
        }

        async fn open_stream(&self, peer: &NodeId, protocol_id: &str) -> Result<BoxedDuplex> {
            let mut pipes = self.pipes.lock().unwrap();
            let key = (peer.clone(), protocol_id.to_string());
            let our_end = pipes
                .remove(&key)
                .ok_or_else(|| Error::TransportError("no pipe wired for peer".into()))?;
            Ok(Box::new(our_end))
        }
    }

    #[tokio::test]
    async fn send_to_writes_a_frame_the_peer_can_read() {
        let (our_end, mut their_end) = duplex(4096);
        let mut pipes = HashMap::new();
        pipes.insert((NodeId::new("bob"), "/tss/party/1.0.0".to_string()), our_end);
        let transport = Arc::new(FakeTransport {
            connected: vec![],
            pipes: StdMutex::new(pipes),
        });
        let comm = Comm::new(transport, 1024 * 1024);

        comm.send_to(&NodeId::new("bob"), "/tss/party/1.0.0", Bytes::from_static(b"hi"))
            .await
            .unwrap();

        let frame = framing::read_frame(&mut their_end, 1024 * 1024)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&frame[..], b"hi");
    }

    #[tokio::test]
    async fn send_to_an_unwired_peer_fails_with_transport_error() {
        let transport = Arc::new(FakeTransport {
            connected: vec![],
            pipes: StdMutex::new(HashMap::new()),
        });
        let comm = Comm::new(transport, 1024 * 1024);

        let result = comm
            .send_to(&NodeId::new("eve"), "/tss/party/1.0.0", Bytes::from_static(b"hi"))
            .await;

        assert_matches::assert_matches!(result, Err(Error::TransportError(_)));
    }
}
