// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! AEAD encryption of message payloads, in two orthogonal modes:
//!
//! - **Per-recipient** (direct, non-broadcast): a key derived from ECDH between
//!   the sender's long-term identity key and the recipient's public key.
//!   Applied only when there is exactly one recipient; broadcasts skip it
//!   since fan-out recipients are not all known to a single encryption call.
//! - **Session-scoped** (optional): a key derived by HKDF(seed, session_id),
//!   wrapping the plaintext before the per-recipient layer when enabled, for
//!   forward secrecy within the session.

use crate::crypto::keys::NodeKeypair;
use crate::crypto::peerstore::PeerStore;
use crate::error::{Error, Result};
use crate::ids::{NodeId, SessionId};
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, AeadCore, Key, Nonce};
use bytes::Bytes;
use hkdf::Hkdf;
use sha2::Sha256;
use std::sync::Arc;

const NONCE_LEN: usize = 12;

/// The context a caller exposes to [`EncryptionLayer::encrypt`] /
/// [`EncryptionLayer::decrypt`]: the payload, the broadcast flag, the
/// recipient list, the session id, and the identity of the other side (the
/// sole recipient on encrypt, the sender on decrypt).
pub struct EncryptionContext {
    pub payload: Bytes,
    pub is_broadcast: bool,
    pub recipients: Vec<NodeId>,
    pub session_id: SessionId,
    pub counterparty: NodeId,
}

/// Symmetric encrypt/decrypt of message payloads over an [`EncryptionContext`].
pub struct EncryptionLayer {
    keypair: NodeKeypair,
    peerstore: Arc<dyn PeerStore>,
    session_scoped_enabled: bool,
    session_seed: [u8; 32],
}

impl EncryptionLayer {
    pub fn new(
        keypair: NodeKeypair,
        peerstore: Arc<dyn PeerStore>,
        session_scoped_enabled: bool,
        session_seed: [u8; 32],
    ) -> Self {
        Self {
            keypair,
            peerstore,
            session_scoped_enabled,
            session_seed,
        }
    }

    fn applies_per_recipient(ctx: &EncryptionContext) -> bool {
        !ctx.is_broadcast && ctx.recipients.len() == 1
    }

    /// Encrypts `ctx.payload`, returning the ciphertext and whether any
    /// encryption was actually applied (the wire envelope's `encrypted` flag).
    pub fn encrypt(&self, ctx: &EncryptionContext) -> Result<(Bytes, bool)> {
        let mut buf = ctx.payload.to_vec();
        let mut encrypted = false;

        if self.session_scoped_enabled {
            let key = derive_session_key(&self.session_seed, ctx.session_id);
            buf = seal(&key, &buf)?;
            encrypted = true;
        }

        if Self::applies_per_recipient(ctx) {
            let their_pub = self.peerstore.public_key(&ctx.counterparty).ok_or_else(|| {
                Error::DecryptError(format!(
                    "no public key on file for recipient {}",
                    ctx.counterparty
                ))
            })?;
            let shared = self.keypair.diffie_hellman(&their_pub);
            let key = derive_recipient_key(&shared);
            buf = seal(&key, &buf)?;
            encrypted = true;
        }

        Ok((Bytes::from(buf), encrypted))
    }

    /// Decrypts `ctx.payload`, reversing whichever layers [`encrypt`] applied.
    /// A decryption failure here is a hard error: the caller drops the message
    /// and logs it, with no retry.
    pub fn decrypt(&self, ctx: &EncryptionContext) -> Result<Bytes> {
        let mut buf = ctx.payload.to_vec();

        if Self::applies_per_recipient(ctx) {
            let their_pub = self.peerstore.public_key(&ctx.counterparty).ok_or_else(|| {
                Error::DecryptError(format!(
                    "no public key on file for sender {}",
                    ctx.counterparty
                ))
            })?;
            let shared = self.keypair.diffie_hellman(&their_pub);
            let key = derive_recipient_key(&shared);
            buf = open(&key, &buf)?;
        }

        if self.session_scoped_enabled {
            let key = derive_session_key(&self.session_seed, ctx.session_id);
            buf = open(&key, &buf)?;
        }

        Ok(Bytes::from(buf))
    }
}

fn derive_recipient_key(shared_secret: &[u8; 32]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut okm = [0u8; 32];
    hk.expand(b"dknet-per-recipient-key", &mut okm)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    okm
}

fn derive_session_key(seed: &[u8; 32], session_id: SessionId) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(session_id.0.as_bytes()), seed);
    let mut okm = [0u8; 32];
    hk.expand(b"dknet-session-key", &mut okm)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    okm
}

pub(crate) fn seal(key_bytes: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let key = Key::<Aes256Gcm>::from_slice(key_bytes);
    let cipher = Aes256Gcm::new(key);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::DecryptError(format!("encryption failed: {}", e)))?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub(crate) fn open(key_bytes: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(Error::DecryptError("ciphertext shorter than nonce".into()));
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let key = Key::<Aes256Gcm>::from_slice(key_bytes);
    let cipher = Aes256Gcm::new(key);
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| Error::DecryptError(format!("decryption failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::peerstore::InMemoryPeerStore;

    fn wired_pair() -> (EncryptionLayer, EncryptionLayer, NodeId, NodeId) {
        let alice_kp = NodeKeypair::generate();
        let bob_kp = NodeKeypair::generate();
        let alice_id = NodeId::new("alice");
        let bob_id = NodeId::new("bob");

        let alice_store = Arc::new(InMemoryPeerStore::new());
        alice_store.insert(bob_id.clone(), bob_kp.public_key_bytes());
        let bob_store = Arc::new(InMemoryPeerStore::new());
        bob_store.insert(alice_id.clone(), alice_kp.public_key_bytes());

        let seed = [7u8; 32];
        let alice_layer = EncryptionLayer::new(alice_kp, alice_store, false, seed);
        let bob_layer = EncryptionLayer::new(bob_kp, bob_store, false, seed);
        (alice_layer, bob_layer, alice_id, bob_id)
    }

    #[test]
    fn per_recipient_round_trip() {
        let (alice, bob, _alice_id, bob_id) = wired_pair();
        let session_id = SessionId::generate();
        let ctx = EncryptionContext {
            payload: Bytes::from_static(b"share bytes"),
            is_broadcast: false,
            recipients: vec![bob_id.clone()],
            session_id,
            counterparty: bob_id,
        };
        let (ciphertext, encrypted) = alice.encrypt(&ctx).unwrap();
        assert!(encrypted);

        let alice_id = NodeId::new("alice");
        let decrypt_ctx = EncryptionContext {
            payload: ciphertext,
            is_broadcast: false,
            recipients: vec![NodeId::new("bob")],
            session_id,
            counterparty: alice_id,
        };
        let plaintext = bob.decrypt(&decrypt_ctx).unwrap();
        assert_eq!(&plaintext[..], b"share bytes");
    }

    #[test]
    fn broadcast_is_not_encrypted_when_session_scoping_disabled() {
        let (alice, _bob, _alice_id, bob_id) = wired_pair();
        let ctx = EncryptionContext {
            payload: Bytes::from_static(b"broadcast payload"),
            is_broadcast: true,
            recipients: vec![],
            session_id: SessionId::generate(),
            counterparty: bob_id,
        };
        let (out, encrypted) = alice.encrypt(&ctx).unwrap();
        assert!(!encrypted);
        assert_eq!(&out[..], b"broadcast payload");
    }

    #[test]
    fn session_scoped_layer_wraps_broadcasts_too() {
        let alice_kp = NodeKeypair::generate();
        let store = Arc::new(InMemoryPeerStore::new());
        let seed = [9u8; 32];
        let layer = EncryptionLayer::new(alice_kp, store, true, seed);
        let session_id = SessionId::generate();
        let ctx = EncryptionContext {
            payload: Bytes::from_static(b"broadcast payload"),
            is_broadcast: true,
            recipients: vec![],
            session_id,
            counterparty: NodeId::new("irrelevant"),
        };
        let (ciphertext, encrypted) = layer.encrypt(&ctx).unwrap();
        assert!(encrypted);
        assert_ne!(&ciphertext[..], b"broadcast payload");

        let decrypt_ctx = EncryptionContext {
            payload: ciphertext,
            is_broadcast: true,
            recipients: vec![],
            session_id,
            counterparty: NodeId::new("irrelevant"),
        };
        let plaintext = layer.decrypt(&decrypt_ctx).unwrap();
        assert_eq!(&plaintext[..], b"broadcast payload");
    }

    #[test]
    fn decrypt_with_wrong_key_fails_hard() {
        let (alice, _bob, _alice_id, bob_id) = wired_pair();
        let session_id = SessionId::generate();
        let ctx = EncryptionContext {
            payload: Bytes::from_static(b"share bytes"),
            is_broadcast: false,
            recipients: vec![bob_id.clone()],
            session_id,
            counterparty: bob_id,
        };
        let (ciphertext, _) = alice.encrypt(&ctx).unwrap();

        // A third party with no ECDH relationship to alice cannot decrypt.
        let mallory_kp = NodeKeypair::generate();
        let mallory_store = Arc::new(InMemoryPeerStore::new());
        mallory_store.insert(NodeId::new("alice"), NodeKeypair::generate().public_key_bytes());
        let mallory = EncryptionLayer::new(mallory_kp, mallory_store, false, [7u8; 32]);
        let decrypt_ctx = EncryptionContext {
            payload: ciphertext,
            is_broadcast: false,
            recipients: vec![NodeId::new("bob")],
            session_id,
            counterparty: NodeId::new("alice"),
        };
        assert!(mallory.decrypt(&decrypt_ctx).is_err());
    }
}
