// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Per-recipient and session-scoped symmetric encryption of message payloads.

pub mod encryption;
pub mod keys;
pub mod peerstore;

pub use encryption::{EncryptionContext, EncryptionLayer};
pub use keys::NodeKeypair;
pub use peerstore::PeerStore;
