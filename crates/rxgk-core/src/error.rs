//! Error types for the RxGK session layer.
//!
//! Every error maps onto an RxGK abort code so the transport can abort the
//! call or connection with the value peers expect on the wire.

use rxgk_crypto::CryptoError;
use thiserror::Error;

/// com_err base of the RxGK error table.
pub const RXGK_ABORT_BASE: u32 = 1_233_242_880;

/// RxGK abort codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AbortCode {
    /// Security layer state is inconsistent
    Inconsistency = RXGK_ABORT_BASE,
    /// Packet too short for the security trailer
    PacketShort = RXGK_ABORT_BASE + 1,
    /// Challenge did not decode
    BadChallenge = RXGK_ABORT_BASE + 2,
    /// Sealed data did not verify or did not match the packet
    SealedIncon = RXGK_ABORT_BASE + 3,
    /// Caller is not authenticated
    NotAuth = RXGK_ABORT_BASE + 4,
    /// Key or token has expired
    Expired = RXGK_ABORT_BASE + 5,
    /// Security level not acceptable
    BadLevel = RXGK_ABORT_BASE + 6,
    /// Key number outside the acceptable window
    BadKeyNo = RXGK_ABORT_BASE + 7,
    /// Peer does not speak RxGK
    NotRxgk = RXGK_ABORT_BASE + 8,
    /// Unsupported enctype or feature
    Unsupported = RXGK_ABORT_BASE + 9,
    /// GSS-API failure during token exchange
    GssError = RXGK_ABORT_BASE + 10,
}

impl AbortCode {
    const ALL: [Self; 11] = [
        Self::Inconsistency,
        Self::PacketShort,
        Self::BadChallenge,
        Self::SealedIncon,
        Self::NotAuth,
        Self::Expired,
        Self::BadLevel,
        Self::BadKeyNo,
        Self::NotRxgk,
        Self::Unsupported,
        Self::GssError,
    ];

    /// Wire value of the abort code.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Decode a wire value, `None` if it is not an RxGK code.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}

/// Errors from session key management and packet security.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// Failure in the crypto layer
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Packet carries a key number outside the window around the current key
    #[error("bad key number {received} (current key {current})")]
    BadKeyNumber {
        /// Low 16 bits of the key number from the packet
        received: u16,
        /// Current key number of the connection
        current: u32,
    },

    /// The connection has used every key number
    #[error("key number space exhausted")]
    KeyNumberExhausted,

    /// The key is past its hard expiry
    #[error("key expired at {expiry}, now {now}")]
    Expired {
        /// Expiry in seconds since the Unix epoch
        expiry: u64,
        /// Time of the check
        now: u64,
    },

    /// Decrypted header does not describe the packet it arrived in
    #[error("sealed header mismatch in {field}")]
    SealedHeaderMismatch {
        /// First field that differed
        field: &'static str,
    },

    /// Security level on the wire is unknown or not permitted
    #[error("bad security level {level}")]
    BadSecurityLevel {
        /// Raw level value
        level: u8,
    },
}

impl SecurityError {
    /// Abort code to send to the peer for this error.
    pub fn abort_code(&self) -> AbortCode {
        match self {
            Self::Crypto(err) => match err {
                CryptoError::PacketTooShort { .. } => AbortCode::PacketShort,
                CryptoError::IntegrityCheckFailed | CryptoError::MalformedPadding { .. } => {
                    AbortCode::SealedIncon
                },
                CryptoError::UnsupportedEncryptionType { .. } => AbortCode::Unsupported,
                CryptoError::ResourceExhausted { .. }
                | CryptoError::TooManyFragments { .. }
                | CryptoError::RegionOutOfBounds { .. }
                | CryptoError::InvalidLayout { .. }
                | CryptoError::InvalidKeyLength { .. } => AbortCode::Inconsistency,
            },
            Self::BadKeyNumber { .. } | Self::KeyNumberExhausted => AbortCode::BadKeyNo,
            Self::Expired { .. } => AbortCode::Expired,
            Self::SealedHeaderMismatch { .. } => AbortCode::SealedIncon,
            Self::BadSecurityLevel { .. } => AbortCode::BadLevel,
        }
    }

    /// Returns true if the packet failed authentication and must be dropped.
    pub fn is_authentication_failure(&self) -> bool {
        match self {
            Self::Crypto(err) => err.is_authentication_failure(),
            Self::SealedHeaderMismatch { .. } => true,
            _ => false,
        }
    }

    /// Returns true unless the operation may succeed on retry.
    ///
    /// Only resource errors are retryable: the caller can coalesce the buffer
    /// or wait for memory. Everything else either aborts the call or the
    /// connection.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Crypto(err) if err.is_resource_error())
    }
}
