// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! JSON + gzip encode/decode of the [`super::Message`] envelope.

use super::{Message, RoutedMessage};
use crate::error::{Error, Result};
use bytes::Bytes;
use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;
use std::io::Read;

/// Default cap on the decompressed size of a single frame (16 MiB).
pub const DEFAULT_DECOMPRESSION_CAP: u32 = 16 * 1024 * 1024;

/// Serializes `msg` to JSON, then gzip-compresses it.
pub fn encode(msg: &Message) -> Result<Bytes> {
    let json = serde_json::to_vec(msg)?;
    let mut encoder = GzEncoder::new(json.as_slice(), Compression::default());
    let mut out = Vec::new();
    encoder
        .read_to_end(&mut out)
        .map_err(|e| Error::Serialisation(format!("gzip compression failed: {}", e)))?;
    Ok(Bytes::from(out))
}

/// Gunzips `bytes` and deserializes the resulting JSON into a [`Message`],
/// rejecting frames whose decompressed size exceeds `cap`.
pub fn decode(bytes: &[u8], cap: u32) -> Result<Message> {
    let decompressed = decompress_capped(bytes, cap)?;
    let msg = serde_json::from_slice(&decompressed)?;
    Ok(msg)
}

/// Serializes a [`RoutedMessage`] (gossip envelope) to JSON, then gzip.
pub fn encode_routed(msg: &RoutedMessage) -> Result<Bytes> {
    let json = serde_json::to_vec(msg)?;
    let mut encoder = GzEncoder::new(json.as_slice(), Compression::default());
    let mut out = Vec::new();
    encoder
        .read_to_end(&mut out)
        .map_err(|e| Error::Serialisation(format!("gzip compression failed: {}", e)))?;
    Ok(Bytes::from(out))
}

/// Gunzips and deserializes a [`RoutedMessage`], enforcing `cap`.
pub fn decode_routed(bytes: &[u8], cap: u32) -> Result<RoutedMessage> {
    let decompressed = decompress_capped(bytes, cap)?;
    let msg = serde_json::from_slice(&decompressed)?;
    Ok(msg)
}

/// Gunzips `bytes`, rejecting output larger than `cap` bytes.
pub fn decompress_capped(bytes: &[u8], cap: u32) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    let mut limited = (&mut decoder).take(cap as u64 + 1);
    limited
        .read_to_end(&mut out)
        .map_err(|e| Error::Serialisation(format!("gzip decompression failed: {}", e)))?;
    if out.len() > cap as usize {
        return Err(Error::FrameTooLarge {
            size: out.len(),
            cap,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{MessageType, PROTOCOL_TSS_PARTY};
    use crate::ids::{NodeId, SessionId};

    fn sample_message() -> Message {
        Message::new(
            PROTOCOL_TSS_PARTY,
            SessionId::generate(),
            MessageType::Keygen,
            NodeId::new("n1"),
            vec![NodeId::new("n2")],
            false,
            Bytes::from_static(b"hello world"),
            "peer-n1",
        )
    }

    #[test]
    fn gzip_round_trip_is_bit_identical() {
        let msg = sample_message();
        let encoded = encode(&msg).expect("encode");
        let decoded = decode(&encoded, DEFAULT_DECOMPRESSION_CAP).expect("decode");
        assert_eq!(decoded.session_id, msg.session_id);
        assert_eq!(decoded.data, msg.data);
        assert_eq!(decoded.from, msg.from);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let msg = sample_message();
        let encoded = encode(&msg).expect("encode");
        let result = decode(&encoded, 4);
        assert!(matches!(result, Err(Error::FrameTooLarge { .. })));
    }
}
