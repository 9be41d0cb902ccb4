//! RFC 8009: AES-CTS with HMAC-SHA2, encrypt-then-MAC
//!
//! ```text
//! KDF(key, label, ctx, k) = HMAC(key, 0x00000001 | label | 0x00 | ctx | k)[..k/8]
//! ciphertext              = C | HMAC(Ki, iv | C)[..h]   where C = CTS(Ke, N | plain)
//! PRF(key, s)             = KDF(key, "prf", s, 8 * hash_len)
//! ```

use zeroize::Zeroizing;

use super::{CryptoProfile, hmac_parts, truncate_into, verify_truncated};
use crate::{
    aes_cts::{self, AES_BLOCK_LEN, AesKey},
    enctype::EncType,
    error::CryptoError,
    keys::{EncKeyPair, SecretKey},
};

/// Label for the PRF derivation.
const PRF_LABEL: &[u8] = b"prf";

/// Cipher state is never carried between messages, so the IV is all zero.
const ZERO_IV: [u8; AES_BLOCK_LEN] = [0u8; AES_BLOCK_LEN];

/// RFC 8009 profile (aes128-cts-hmac-sha256-128, aes256-cts-hmac-sha384-192).
#[derive(Debug)]
pub struct Rfc8009;

/// KDF-HMAC-SHA2 in counter mode with a single iteration.
fn kdf_hmac_sha2(
    enctype: &EncType,
    key: &[u8],
    label: &[u8],
    context: &[u8],
    out_len: usize,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if out_len > enctype.hash.output_len() {
        return Err(CryptoError::InvalidLayout { reason: "KDF output longer than one HMAC block" });
    }

    let counter = 1u32.to_be_bytes();
    let bits = u32::try_from(out_len * 8)
        .map_err(|_| CryptoError::InvalidLayout { reason: "KDF output length overflow" })?
        .to_be_bytes();

    let mut digest = hmac_parts(enctype.hash, key, &[&counter, label, &[0u8], context, &bits]);
    digest.truncate(out_len);
    Ok(digest)
}

impl CryptoProfile for Rfc8009 {
    fn derive_key(
        &self,
        enctype: &EncType,
        base: &[u8],
        label: &[u8],
        out_len: usize,
    ) -> Result<SecretKey, CryptoError> {
        if base.len() != enctype.key_len {
            return Err(CryptoError::InvalidKeyLength {
                expected: enctype.key_len,
                actual: base.len(),
            });
        }
        let raw = kdf_hmac_sha2(enctype, base, label, &[], out_len)?;
        SecretKey::from_slice(&raw)
    }

    fn prf(
        &self,
        enctype: &EncType,
        key: &[u8],
        octets: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        kdf_hmac_sha2(enctype, key, PRF_LABEL, octets, enctype.prf_len)
    }

    fn encrypt(
        &self,
        enctype: &EncType,
        keys: &EncKeyPair,
        payload: &mut [u8],
        cksum: &mut [u8],
    ) -> Result<(), CryptoError> {
        let cipher = AesKey::new(keys.ke().as_bytes())?;
        aes_cts::encrypt(&cipher, payload)?;

        let digest = hmac_parts(enctype.hash, keys.ki().as_bytes(), &[&ZERO_IV, &*payload]);
        truncate_into(&digest, cksum)
    }

    fn decrypt(
        &self,
        enctype: &EncType,
        keys: &EncKeyPair,
        payload: &mut [u8],
        cksum: &[u8],
    ) -> Result<(), CryptoError> {
        let digest = hmac_parts(enctype.hash, keys.ki().as_bytes(), &[&ZERO_IV, &*payload]);
        verify_truncated(&digest, cksum)?;

        let cipher = AesKey::new(keys.ke().as_bytes())?;
        aes_cts::decrypt(&cipher, payload)
    }
}
