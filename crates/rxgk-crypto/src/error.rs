//! Error types for enctype lookup, key derivation and the crypto engines

use thiserror::Error;

/// Errors from the crypto layer.
///
/// Three classes matter to callers:
///
/// - Configuration: [`CryptoError::UnsupportedEncryptionType`]. Session setup
///   must abort, there is no fallback enctype.
/// - Resource: allocation failure, too many fragments, regions that do not fit
///   the buffer. The caller may retry with a coalesced buffer.
/// - Authentication: see [`CryptoError::is_authentication_failure`]. The
///   packet must be dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Negotiated enctype identifier is not in the registry
    #[error("unsupported encryption type: {enctype}")]
    UnsupportedEncryptionType {
        /// The identifier that was looked up
        enctype: u32,
    },

    /// Allocation for key material or scratch space failed
    #[error("resource exhausted allocating {bytes} bytes")]
    ResourceExhausted {
        /// Size of the failed allocation
        bytes: usize,
    },

    /// Region needs more fragments than a scatter list can address
    #[error("region needs {needed} fragments, at most {max} can be addressed")]
    TooManyFragments {
        /// Fragments required to cover the region
        needed: usize,
        /// Scatter list capacity
        max: usize,
    },

    /// Region extends past the end of the buffer
    #[error("region {offset}+{len} exceeds buffer of {buffer_len} bytes")]
    RegionOutOfBounds {
        /// Region start
        offset: usize,
        /// Region length
        len: usize,
        /// Total buffer length
        buffer_len: usize,
    },

    /// Secure and data regions are inconsistent with the enctype layout
    #[error("invalid region layout: {reason}")]
    InvalidLayout {
        /// What was wrong with the layout
        reason: &'static str,
    },

    /// Secured region is shorter than confounder plus checksum
    #[error("secured region too short: {len} bytes, need at least {min}")]
    PacketTooShort {
        /// Length of the region
        len: usize,
        /// Minimum length for this enctype
        min: usize,
    },

    /// Ciphertext is not aligned to the block size of a padded enctype
    #[error("malformed padding: {len} bytes is not a multiple of {block_len}")]
    MalformedPadding {
        /// Length of the encrypted payload
        len: usize,
        /// Cipher block length
        block_len: usize,
    },

    /// Checksum or MIC did not match
    #[error("integrity check failed")]
    IntegrityCheckFailed,

    /// Key material has the wrong length for the cipher
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length
        expected: usize,
        /// Actual key length
        actual: usize,
    },
}

impl CryptoError {
    /// Returns true if the secured data failed authentication.
    ///
    /// The caller must drop the packet and must not consume any part of the
    /// region. Repeated failures on one key are grounds for aborting the
    /// connection.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::IntegrityCheckFailed | Self::MalformedPadding { .. } | Self::PacketTooShort { .. }
        )
    }

    /// Returns true if the operation may succeed if retried with different
    /// buffer geometry (e.g. after coalescing fragments).
    pub fn is_resource_error(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. } | Self::TooManyFragments { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_failure_is_authentication_class() {
        assert!(CryptoError::IntegrityCheckFailed.is_authentication_failure());
        let padding = CryptoError::MalformedPadding { len: 17, block_len: 16 };
        assert!(padding.is_authentication_failure());
        assert!(!CryptoError::IntegrityCheckFailed.is_resource_error());
    }

    #[test]
    fn fragment_overflow_is_resource_class() {
        let err = CryptoError::TooManyFragments { needed: 17, max: 16 };
        assert!(err.is_resource_error());
        assert!(!err.is_authentication_failure());
    }

    #[test]
    fn unsupported_enctype_is_neither() {
        let err = CryptoError::UnsupportedEncryptionType { enctype: 23 };
        assert!(!err.is_resource_error());
        assert!(!err.is_authentication_failure());
        assert_eq!(err.to_string(), "unsupported encryption type: 23");
    }
}
