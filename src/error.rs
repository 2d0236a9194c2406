// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Crate-wide error taxonomy.
//!
//! Mirrors the error *kinds* of the operation engine: each
//! variant here is one of the dispositions the engine and its collaborators can
//! reach, composed from the component-local error sources via `#[from]`.

use std::result;
use thiserror::Error;

/// A specialised `Result` type for this crate.
pub type Result<T> = result::Result<T, Error>;

/// Main error type for the crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Precondition failed in a `start_*` path; the caller gets this back and no
    /// operation is created.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown `OperationId` in `get_operation`/`cancel_operation`.
    #[error("operation not found: {0}")]
    NotFound(String),

    /// Per-message decryption failed; the message is dropped, never retried.
    #[error("decryption failed: {0}")]
    DecryptError(String),

    /// Stream I/O failed; the routing layer resets the cached stream and may
    /// fall back to gossip.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The TSS party rejected a message or failed to start.
    #[error("party error: {0}")]
    PartyError(String),

    /// Operation-level context expired.
    #[error("operation timed out")]
    Timeout,

    /// The external signing-authorization service rejected the request.
    #[error("validation rejected: {0}")]
    ValidationRejected(String),

    /// The key/operation store failed.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Message or payload serialisation failed.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Frame exceeded the configured decompression cap.
    #[error("frame of {size} bytes exceeds the {cap} byte decompression cap")]
    FrameTooLarge { size: usize, cap: u32 },

    /// Underlying I/O failure outside the transport abstraction (e.g. address
    /// book file access).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn not_found(op_id: impl std::fmt::Display) -> Self {
        Error::NotFound(op_id.to_string())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Error::StorageError(msg.into())
    }

    pub fn party(msg: impl Into<String>) -> Self {
        Error::PartyError(msg.into())
    }

    pub fn validation_rejected(msg: impl Into<String>) -> Self {
        Error::ValidationRejected(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialisation(err.to_string())
    }
}
