//! Key material containers
//!
//! Every type here zeroizes its bytes when dropped. Allocation goes through
//! `try_reserve_exact` so an out-of-memory condition surfaces as
//! [`CryptoError::ResourceExhausted`] instead of aborting the process.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

/// Raw symmetric key bytes.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    bytes: Vec<u8>,
}

impl SecretKey {
    /// Copy key bytes into a new zeroize-on-drop container.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let mut key = Self::zeroed(bytes.len())?;
        key.bytes.copy_from_slice(bytes);
        Ok(key)
    }

    /// Allocate an all-zero key of `len` bytes to be filled in place.
    pub(crate) fn zeroed(len: usize) -> Result<Self, CryptoError> {
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(len).map_err(|_| CryptoError::ResourceExhausted { bytes: len })?;
        bytes.resize(len, 0);
        Ok(Self { bytes })
    }

    /// Key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Key length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for a zero-length key. Derived keys are never empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED; {}])", self.bytes.len())
    }
}

/// Encryption key and integrity key.
///
/// RFC 3961 `encrypt()` needs both, so they are always derived together from
/// the same base key and usage number.
#[derive(Clone, Debug)]
pub struct EncKeyPair {
    ke: SecretKey,
    ki: SecretKey,
}

impl EncKeyPair {
    /// Pair up an encryption key (Ke) and integrity key (Ki).
    pub fn new(ke: SecretKey, ki: SecretKey) -> Self {
        Self { ke, ki }
    }

    /// Encryption key (Ke).
    pub fn ke(&self) -> &SecretKey {
        &self.ke
    }

    /// Integrity key (Ki).
    pub fn ki(&self) -> &SecretKey {
        &self.ki
    }
}

/// Checksum key (Kc) used for standalone MICs.
#[derive(Clone, Debug)]
pub struct ChecksumKey(SecretKey);

impl ChecksumKey {
    /// Wrap a derived Kc.
    pub fn new(key: SecretKey) -> Self {
        Self(key)
    }

    /// Underlying key bytes.
    pub fn key(&self) -> &SecretKey {
        &self.0
    }
}

/// Zeroed scratch space for in-flight plaintext.
pub(crate) fn scratch(len: usize) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| CryptoError::ResourceExhausted { bytes: len })?;
    buf.resize(len, 0);
    Ok(Zeroizing::new(buf))
}
