//! Crypto profiles: the primitive operations behind an enctype
//!
//! An [`EncType`] carries the parameters; its profile carries the behaviour.
//! Both registered families share AES-CTS and HMAC but differ in key
//! derivation, checksum coverage and PRF.

mod rfc3961;
mod rfc8009;

use std::fmt;

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha384};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

pub use rfc3961::Rfc3961Simplified;
pub use rfc8009::Rfc8009;

use crate::{
    enctype::EncType,
    error::CryptoError,
    keys::{ChecksumKey, EncKeyPair, SecretKey},
};

/// Primitive operations for one family of enctypes.
///
/// All operations are deterministic. `encrypt` expects the confounder to
/// already sit at the front of `payload`.
pub trait CryptoProfile: fmt::Debug + Send + Sync {
    /// Derive a key of `out_len` bytes from `base` for the usage `label`.
    fn derive_key(
        &self,
        enctype: &EncType,
        base: &[u8],
        label: &[u8],
        out_len: usize,
    ) -> Result<SecretKey, CryptoError>;

    /// Pseudo-random function, output is `enctype.prf_len` bytes.
    fn prf(
        &self,
        enctype: &EncType,
        key: &[u8],
        octets: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError>;

    /// Encrypt `payload` (`confounder | data | padding`) in place and fill
    /// `cksum` with the integrity checksum.
    fn encrypt(
        &self,
        enctype: &EncType,
        keys: &EncKeyPair,
        payload: &mut [u8],
        cksum: &mut [u8],
    ) -> Result<(), CryptoError>;

    /// Decrypt `payload` in place and verify `cksum`.
    ///
    /// On failure the contents of `payload` are unspecified; callers must
    /// decrypt into scratch space they can discard.
    fn decrypt(
        &self,
        enctype: &EncType,
        keys: &EncKeyPair,
        payload: &mut [u8],
        cksum: &[u8],
    ) -> Result<(), CryptoError>;

    /// Keyed checksum over the concatenation of `parts`, truncated into `out`.
    fn checksum(
        &self,
        enctype: &EncType,
        key: &ChecksumKey,
        parts: &[&[u8]],
        out: &mut [u8],
    ) -> Result<(), CryptoError> {
        let digest = hmac_parts(enctype.hash, key.key().as_bytes(), parts);
        truncate_into(&digest, out)
    }
}

/// Hash function underlying an enctype's HMAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    /// SHA-1, 20-byte digest
    Sha1,
    /// SHA-256, 32-byte digest
    Sha256,
    /// SHA-384, 48-byte digest
    Sha384,
}

impl HashAlg {
    /// Digest length in bytes.
    pub const fn output_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
        }
    }
}

fn mac_parts<M: Mac + hmac::digest::KeyInit>(key: &[u8], parts: &[&[u8]]) -> Zeroizing<Vec<u8>> {
    let Ok(mut mac) = <M as Mac>::new_from_slice(key) else {
        unreachable!("HMAC accepts any key size");
    };
    for part in parts {
        mac.update(part);
    }
    Zeroizing::new(mac.finalize().into_bytes().to_vec())
}

/// Full-length HMAC over the concatenation of `parts`.
pub(crate) fn hmac_parts(alg: HashAlg, key: &[u8], parts: &[&[u8]]) -> Zeroizing<Vec<u8>> {
    match alg {
        HashAlg::Sha1 => mac_parts::<Hmac<Sha1>>(key, parts),
        HashAlg::Sha256 => mac_parts::<Hmac<Sha256>>(key, parts),
        HashAlg::Sha384 => mac_parts::<Hmac<Sha384>>(key, parts),
    }
}

pub(crate) fn truncate_into(digest: &[u8], out: &mut [u8]) -> Result<(), CryptoError> {
    let Some(prefix) = digest.get(..out.len()) else {
        return Err(CryptoError::InvalidLayout { reason: "checksum longer than digest" });
    };
    out.copy_from_slice(prefix);
    Ok(())
}

/// Constant-time comparison of a computed digest prefix against a received
/// checksum.
pub(crate) fn verify_truncated(digest: &[u8], received: &[u8]) -> Result<(), CryptoError> {
    let Some(expected) = digest.get(..received.len()) else {
        return Err(CryptoError::IntegrityCheckFailed);
    };
    if bool::from(expected.ct_eq(received)) {
        Ok(())
    } else {
        Err(CryptoError::IntegrityCheckFailed)
    }
}
