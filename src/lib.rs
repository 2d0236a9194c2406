// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! DKNet: the operation engine for a GG20-family threshold-ECDSA P2P node.
//!
//! This crate owns keygen/signing/resharing orchestration, message framing
//! and routing, at-rest encryption, and persistence. It deliberately treats
//! the actual multi-party-computation math as a pluggable black box (see
//! [`tss`]) and the network transport as a collaborator it calls into (see
//! [`routing::comm::PeerTransport`]) rather than owning either.

pub mod addressbook;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod ids;
pub mod node;
pub mod routing;
pub mod store;
pub mod tss;

pub use error::{Error, Result};
