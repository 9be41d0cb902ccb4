//! Usage-specific key derivation and PRF+
//!
//! Every protocol key is expanded into per-usage keys before use. The usage
//! number is folded into a 5-byte constant `usage_be32 | kind`:
//!
//! ```text
//! usage | 0x99 → Kc (checksum key)
//! usage | 0xAA → Ke (encryption key)
//! usage | 0x55 → Ki (integrity key)
//! ```

use zeroize::Zeroizing;

use crate::{
    enctype::EncType,
    error::CryptoError,
    keys::{ChecksumKey, EncKeyPair, SecretKey, scratch},
};

/// Usage-constant suffix for the checksum key Kc.
pub const KEY_USAGE_CHECKSUM: u8 = 0x99;
/// Usage-constant suffix for the encryption key Ke.
pub const KEY_USAGE_ENCRYPTION: u8 = 0xAA;
/// Usage-constant suffix for the integrity key Ki.
pub const KEY_USAGE_INTEGRITY: u8 = 0x55;

/// Build the 5-byte derivation constant for `usage` and `kind`.
pub fn usage_constant(usage: u32, kind: u8) -> [u8; 5] {
    let [a, b, c, d] = usage.to_be_bytes();
    [a, b, c, d, kind]
}

/// Derive the Ke/Ki pair used by the encryption engine for `usage`.
///
/// # Errors
///
/// - `InvalidKeyLength` if `base` is not a protocol key for `enctype`
/// - `ResourceExhausted` if key storage cannot be allocated
pub fn derive_enc_keys(
    enctype: &EncType,
    base: &SecretKey,
    usage: u32,
) -> Result<EncKeyPair, CryptoError> {
    let profile = enctype.profile;
    let ke = profile.derive_key(
        enctype,
        base.as_bytes(),
        &usage_constant(usage, KEY_USAGE_ENCRYPTION),
        enctype.ke_len,
    )?;
    let ki = profile.derive_key(
        enctype,
        base.as_bytes(),
        &usage_constant(usage, KEY_USAGE_INTEGRITY),
        enctype.ki_len,
    )?;
    Ok(EncKeyPair::new(ke, ki))
}

/// Derive the Kc used by the MIC engine for `usage`.
///
/// # Errors
///
/// Same as [`derive_enc_keys`].
pub fn derive_checksum_key(
    enctype: &EncType,
    base: &SecretKey,
    usage: u32,
) -> Result<ChecksumKey, CryptoError> {
    let kc = enctype.profile.derive_key(
        enctype,
        base.as_bytes(),
        &usage_constant(usage, KEY_USAGE_CHECKSUM),
        enctype.kc_len,
    )?;
    Ok(ChecksumKey::new(kc))
}

/// Apply the enctype's random-to-key to exactly `key_bytes` of input.
pub fn random_to_key(enctype: &EncType, random: &[u8]) -> Result<SecretKey, CryptoError> {
    if random.len() != enctype.key_bytes {
        return Err(CryptoError::InvalidKeyLength {
            expected: enctype.key_bytes,
            actual: random.len(),
        });
    }
    (enctype.random_to_key)(random)
}

/// PRF+ from RFC 6113: `PRF(key, 1 | input) | PRF(key, 2 | input) | ...`,
/// truncated to `out_len` bytes.
///
/// The counter is a single octet, so at most 255 PRF blocks can be produced.
pub fn prf_plus(
    enctype: &EncType,
    key: &SecretKey,
    out_len: usize,
    input: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let blocks = out_len.div_ceil(enctype.prf_len);
    if blocks > usize::from(u8::MAX) {
        return Err(CryptoError::InvalidLayout { reason: "PRF+ output too long" });
    }

    let mut seed = scratch(1 + input.len())?;
    seed[1..].copy_from_slice(input);

    let mut out = scratch(blocks * enctype.prf_len)?;
    for (counter, chunk) in (1..=u8::MAX).zip(out.chunks_mut(enctype.prf_len)) {
        seed[0] = counter;
        let block = enctype.profile.prf(enctype, key.as_bytes(), &seed)?;
        chunk.copy_from_slice(&block[..chunk.len()]);
    }
    out.truncate(out_len);

    Ok(out)
}
