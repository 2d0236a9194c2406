// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Shared scalar/digest primitives for the reference [`super::Party`]
//! implementations in [`super::keygen`], [`super::signing`] and
//! [`super::resharing`].
//!
//! The reference scheme is deliberately simple: keygen has every participant
//! broadcast a random scalar contribution, and once a party has received one
//! from every participant it sums them into the full private key. Every
//! participant therefore ends up holding the complete secret, not a genuine
//! `t`-of-`n` Shamir share — this is a full-disclosure stand-in for the MtA
//! based, never-reconstructed-in-the-clear schemes real GG20 libraries use.
//! It exists so the engine above it has a real, independently verifiable
//! secp256k1 signature to drive against in tests and standalone runs.

use crate::error::{Error, Result};
use k256::elliptic_curve::{Field, PrimeField};
use k256::{FieldBytes, Scalar};
use rand_core::OsRng;
use sha2::{Digest, Sha256};

/// Samples a fresh random scalar contribution.
pub fn random_scalar() -> Scalar {
    Scalar::random(&mut OsRng)
}

pub fn scalar_to_bytes(scalar: &Scalar) -> [u8; 32] {
    let repr = scalar.to_repr();
    let mut out = [0u8; 32];
    out.copy_from_slice(repr.as_slice());
    out
}

pub fn bytes_to_scalar(bytes: &[u8]) -> Result<Scalar> {
    if bytes.len() != 32 {
        return Err(Error::PartyError(format!(
            "expected a 32-byte scalar, got {} bytes",
            bytes.len()
        )));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(bytes);
    let repr = FieldBytes::from(arr);
    Option::from(Scalar::from_repr(repr))
        .ok_or_else(|| Error::PartyError("bytes do not encode a valid secp256k1 scalar".into()))
}

pub fn sha256_digest(message: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(message);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_byte_round_trip() {
        let s = random_scalar();
        let bytes = scalar_to_bytes(&s);
        let back = bytes_to_scalar(&bytes).unwrap();
        assert_eq!(s, back);
    }
}
