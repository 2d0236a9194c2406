// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Node long-term identity key and storage-encryption key derivation.

use crate::error::{Error, Result};
use hkdf::Hkdf;
use rand_core::OsRng;
use sha2::Sha256;
use std::path::Path;
use x25519_dalek::{PublicKey, StaticSecret};

/// The node's long-term X25519 identity keypair, persisted at
/// `<data_dir>/p2p_key`. Used as the ECDH input for per-recipient encryption.
///
/// A production deployment derives this from the libp2p host's static Noise
/// key; DKNet only requires that the network-layer collaborator expose a
/// stable keypair per `NodeId` through [`super::PeerStore`].
pub struct NodeKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl NodeKeypair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Loads the keypair from `path`, generating and persisting a fresh one if
    /// it doesn't exist yet.
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        if let Ok(bytes) = std::fs::read(path) {
            let arr: [u8; 32] = bytes
                .try_into()
                .map_err(|_| Error::Config("p2p_key file is not 32 bytes".into()))?;
            let secret = StaticSecret::from(arr);
            let public = PublicKey::from(&secret);
            return Ok(Self { secret, public });
        }
        let keypair = Self::generate();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, keypair.secret.to_bytes())?;
        Ok(keypair)
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Computes the ECDH shared secret with `their_public`.
    pub fn diffie_hellman(&self, their_public: &[u8; 32]) -> [u8; 32] {
        let their_public = PublicKey::from(*their_public);
        self.secret.diffie_hellman(&their_public).to_bytes()
    }
}

/// Derives the node's key-encryption key from the configured password or seed,
/// via HKDF-SHA256. Key-share bytes are never stored plaintext; decryption
/// requires this derived key.
pub fn derive_storage_key(password: &str) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(b"dknet-storage-key-salt"), password.as_bytes());
    let mut okm = [0u8; 32];
    hk.expand(b"dknet-storage-key", &mut okm)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    okm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecdh_is_symmetric_between_two_keypairs() {
        let a = NodeKeypair::generate();
        let b = NodeKeypair::generate();
        let shared_a = a.diffie_hellman(&b.public_key_bytes());
        let shared_b = b.diffie_hellman(&a.public_key_bytes());
        assert_eq!(shared_a, shared_b);
    }

    #[test]
    fn storage_key_derivation_is_deterministic() {
        let a = derive_storage_key("hunter2");
        let b = derive_storage_key("hunter2");
        let c = derive_storage_key("different");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn load_or_generate_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p2p_key");
        let first = NodeKeypair::load_or_generate(&path).unwrap();
        let second = NodeKeypair::load_or_generate(&path).unwrap();
        assert_eq!(first.public_key_bytes(), second.public_key_bytes());
    }
}
