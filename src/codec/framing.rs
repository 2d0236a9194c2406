// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Length-prefixed framing over a bidirectional byte stream.
//!
//! Each frame is a 32-bit unsigned big-endian byte count followed by that many
//! gzip-compressed JSON bytes (see [`super::wire`]). The framing contract is
//! reusable: callers are expected to cache one stream per `(peer, protocol_id)`
//! and recreate it on any I/O error (see `routing::comm`).

use crate::error::{Error, Result};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Writes a single length-prefixed frame to `writer`.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::Serialisation("frame exceeds u32::MAX bytes".into()))?;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| Error::TransportError(e.to_string()))?;
    writer
        .write_all(payload)
        .await
        .map_err(|e| Error::TransportError(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::TransportError(e.to_string()))?;
    Ok(())
}

/// Reads a single length-prefixed frame from `reader`, rejecting frames whose
/// declared length exceeds `max_frame_bytes` before allocating a buffer for
/// them (a coarser, pre-decompression guard; [`super::wire::decode`] enforces
/// the decompressed-size cap separately).
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_bytes: u32,
) -> Result<Option<Bytes>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::TransportError(e.to_string())),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > max_frame_bytes {
        return Err(Error::FrameTooLarge {
            size: len as usize,
            cap: max_frame_bytes,
        });
    }
    let mut buf = vec![0u8; len as usize];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| Error::TransportError(e.to_string()))?;
    Ok(Some(Bytes::from(buf)))
}

/// Drives a read loop over `reader`, invoking `on_frame` for every frame in a
/// freshly spawned task so a slow handler never blocks the next `read_frame`.
pub async fn read_loop<R, F, Fut>(mut reader: R, max_frame_bytes: u32, on_frame: F)
where
    R: AsyncRead + Unpin + Send + 'static,
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let on_frame = std::sync::Arc::new(on_frame);
    loop {
        match read_frame(&mut reader, max_frame_bytes).await {
            Ok(Some(frame)) => {
                let on_frame = on_frame.clone();
                tokio::spawn(async move { on_frame(frame).await });
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "frame read failed, ending read loop");
                break;
            }
        }
    }
}
