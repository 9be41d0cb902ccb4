//! RxGK Cryptographic Primitives
//!
//! Kerberos 5 enctypes and the two engines that secure Rx packets with them.
//! Everything here is a pure function of its inputs: confounders are passed
//! in by the caller, so outputs are reproducible in tests.
//!
//! # Key Hierarchy
//!
//! ```text
//! Transport key (per connection, per key number)
//!        │
//!        ▼
//! derive(usage | 0xAA) → Ke ─┐
//! derive(usage | 0x55) → Ki ─┴─► encryption engine
//! derive(usage | 0x99) → Kc ───► MIC engine
//! ```
//!
//! Usage numbers differ by direction, so a client and a server sharing one
//! transport key never encrypt or sign with the same derived key.
//!
//! # Buffers
//!
//! Packets arrive as fragment chains. The engines address them through a
//! scatter list of at most [`MAX_FRAGMENTS`] slices and work on zeroizing
//! scratch copies, so a failed integrity check leaves the packet untouched.
//!
//! # Security
//!
//! - Checksums are compared in constant time
//! - Key material and scratch plaintext are zeroized on drop
//! - `Debug` output of keys is redacted

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod aes_cts;
pub mod buffer;
pub mod derivation;
pub mod engine;
pub mod enctype;
pub mod error;
pub mod keys;
pub mod mic;
pub mod profile;

pub use aes_cts::AES_BLOCK_LEN;
pub use buffer::{FragmentedBuffer, MAX_FRAGMENTS, Region, ScatterList};
pub use derivation::{
    derive_checksum_key, derive_enc_keys, prf_plus, random_to_key, usage_constant,
};
pub use enctype::{
    ENCTYPE_AES128_CTS_HMAC_SHA1_96, ENCTYPE_AES128_CTS_HMAC_SHA256_128,
    ENCTYPE_AES256_CTS_HMAC_SHA1_96, ENCTYPE_AES256_CTS_HMAC_SHA384_192, EncType, find_enctype,
    supported_enctypes,
};
pub use error::CryptoError;
pub use keys::{ChecksumKey, EncKeyPair, SecretKey};
pub use profile::{CryptoProfile, HashAlg, Rfc3961Simplified, Rfc8009};
