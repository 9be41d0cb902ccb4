//! Encryption-type registry
//!
//! Static table mapping negotiated Kerberos enctype identifiers to their
//! parameters and crypto profile. The table is immutable for the life of the
//! process; lookups are a linear scan over four entries.

use std::fmt;

use crate::{
    error::CryptoError,
    keys::SecretKey,
    profile::{CryptoProfile, HashAlg, Rfc3961Simplified, Rfc8009},
};

/// aes128-cts-hmac-sha1-96 (RFC 3962)
pub const ENCTYPE_AES128_CTS_HMAC_SHA1_96: u32 = 17;
/// aes256-cts-hmac-sha1-96 (RFC 3962)
pub const ENCTYPE_AES256_CTS_HMAC_SHA1_96: u32 = 18;
/// aes128-cts-hmac-sha256-128 (RFC 8009)
pub const ENCTYPE_AES128_CTS_HMAC_SHA256_128: u32 = 19;
/// aes256-cts-hmac-sha384-192 (RFC 8009)
pub const ENCTYPE_AES256_CTS_HMAC_SHA384_192: u32 = 20;

/// Parameters and primitive operations for one encryption type.
///
/// Secure regions produced with this enctype are laid out as
/// `confounder | data | padding | checksum`.
pub struct EncType {
    /// Encryption type identifier
    pub etype: u32,
    /// Checksum type identifier
    pub ctype: u32,
    /// Friendly name
    pub name: &'static str,
    /// Cipher block length
    pub block_len: usize,
    /// Confounder length (equal to the block length for every AES enctype)
    pub conf_len: usize,
    /// Truncated checksum length on the wire
    pub cksum_len: usize,
    /// Length of random-to-key input
    pub key_bytes: usize,
    /// Length of a protocol key
    pub key_len: usize,
    /// Length of PRF output
    pub prf_len: usize,
    /// Length of a derived checksum key (Kc)
    pub kc_len: usize,
    /// Length of a derived encryption key (Ke)
    pub ke_len: usize,
    /// Length of a derived integrity key (Ki)
    pub ki_len: usize,
    /// Checksum is keyed
    pub keyed_cksum: bool,
    /// Plaintext must be padded to the block length
    pub pad: bool,
    /// Hash under the HMAC
    pub hash: HashAlg,
    /// Primitive operations
    pub profile: &'static dyn CryptoProfile,
    /// Turn `key_bytes` of random input into a protocol key
    pub random_to_key: fn(&[u8]) -> Result<SecretKey, CryptoError>,
}

impl EncType {
    /// Number of padding bytes needed after `conf_len + data_len` bytes.
    pub fn pad_len(&self, data_len: usize) -> usize {
        if !self.pad {
            return 0;
        }
        let base = self.conf_len + data_len;
        base.next_multiple_of(self.block_len) - base
    }

    /// Size of the secure region needed to encrypt `data_len` bytes.
    pub fn encrypted_len(&self, data_len: usize) -> usize {
        self.conf_len + data_len + self.pad_len(data_len) + self.cksum_len
    }

    /// Size of the secure region needed to MIC `data_len` bytes.
    pub fn mic_len(&self, data_len: usize) -> usize {
        self.cksum_len + data_len
    }
}

impl fmt::Debug for EncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncType")
            .field("etype", &self.etype)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Identity random-to-key used by every AES enctype.
fn identity_random_to_key(input: &[u8]) -> Result<SecretKey, CryptoError> {
    SecretKey::from_slice(input)
}

static ENCTYPES: [EncType; 4] = [
    EncType {
        etype: ENCTYPE_AES128_CTS_HMAC_SHA1_96,
        ctype: 15,
        name: "aes128-cts-hmac-sha1-96",
        block_len: 16,
        conf_len: 16,
        cksum_len: 12,
        key_bytes: 16,
        key_len: 16,
        prf_len: 16,
        kc_len: 16,
        ke_len: 16,
        ki_len: 16,
        keyed_cksum: true,
        pad: false,
        hash: HashAlg::Sha1,
        profile: &Rfc3961Simplified,
        random_to_key: identity_random_to_key,
    },
    EncType {
        etype: ENCTYPE_AES256_CTS_HMAC_SHA1_96,
        ctype: 16,
        name: "aes256-cts-hmac-sha1-96",
        block_len: 16,
        conf_len: 16,
        cksum_len: 12,
        key_bytes: 32,
        key_len: 32,
        prf_len: 16,
        kc_len: 32,
        ke_len: 32,
        ki_len: 32,
        keyed_cksum: true,
        pad: false,
        hash: HashAlg::Sha1,
        profile: &Rfc3961Simplified,
        random_to_key: identity_random_to_key,
    },
    EncType {
        etype: ENCTYPE_AES128_CTS_HMAC_SHA256_128,
        ctype: 19,
        name: "aes128-cts-hmac-sha256-128",
        block_len: 16,
        conf_len: 16,
        cksum_len: 16,
        key_bytes: 16,
        key_len: 16,
        prf_len: 32,
        kc_len: 16,
        ke_len: 16,
        ki_len: 16,
        keyed_cksum: true,
        pad: false,
        hash: HashAlg::Sha256,
        profile: &Rfc8009,
        random_to_key: identity_random_to_key,
    },
    EncType {
        etype: ENCTYPE_AES256_CTS_HMAC_SHA384_192,
        ctype: 20,
        name: "aes256-cts-hmac-sha384-192",
        block_len: 16,
        conf_len: 16,
        cksum_len: 24,
        key_bytes: 32,
        key_len: 32,
        prf_len: 48,
        kc_len: 24,
        ke_len: 32,
        ki_len: 24,
        keyed_cksum: true,
        pad: false,
        hash: HashAlg::Sha384,
        profile: &Rfc8009,
        random_to_key: identity_random_to_key,
    },
];

/// Look up an enctype by its negotiated identifier.
///
/// # Errors
///
/// - `UnsupportedEncryptionType` if the identifier is not registered. There is
///   no fallback; the caller must abort session setup.
pub fn find_enctype(enctype: u32) -> Result<&'static EncType, CryptoError> {
    ENCTYPES
        .iter()
        .find(|et| et.etype == enctype)
        .ok_or(CryptoError::UnsupportedEncryptionType { enctype })
}

/// All registered enctypes, in preference order for negotiation.
pub fn supported_enctypes() -> impl Iterator<Item = &'static EncType> {
    ENCTYPES.iter().rev()
}
