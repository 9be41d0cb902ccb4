//! RxGK Session Security
//!
//! Session keys, rekeying and per-packet security for Rx connections
//! authenticated with RxGK. Built on the enctype profiles and engines in
//! `rxgk_crypto`.
//!
//! # Key Lifecycle
//!
//! Each connection derives a fresh transport key per key number from the
//! token key in its ticket. Every transport key yields one
//! [`SessionKeyContext`] holding the directional packet keys and the
//! accounting that decides when to move to the next key number.
//!
//! ```text
//! Token key K0 (from the ticket)
//!        │
//!        ▼
//! PRF+ → Transport key (per connection, per key number)
//!        │
//!        ▼
//! DK   → SessionKeyContext (tx/rx enc, tx/rx Kc, response)
//!        │
//!        ▼
//! ConnectionKeys window → secure_packet / verify_packet
//! ```
//!
//! Contexts are shared through `Arc`. A context replaced by a rekey stays
//! usable until the last packet holding it is done, then its keys are
//! zeroed.
//!
//! # Security
//!
//! Accounting:
//! - Every transmit operation charges the byte budget after it succeeds
//! - Exactly one operation observes the budget crossing zero and flags a rekey
//! - Expiry inside the grace window also flags a rekey
//!
//! Verification:
//! - Contexts past their hard expiry refuse to verify
//! - The sealed header must describe the call the packet arrived on
//! - Failed verification leaves the caller's region unchanged
//!
//! Errors map onto RxGK abort codes through [`SecurityError::abort_code`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod connection;
pub mod context;
pub mod env;
pub mod error;
pub mod kdf;
pub mod keyring;
pub mod packet;
pub mod system_env;

pub use connection::{
    ConnectionSecurity, DEFAULT_AUTH_FAILURE_LIMIT, DEFAULT_REKEY_GRACE, SecurityConfig,
    SecuredPacket,
};
pub use context::{ConnectionState, KeyLifetime, RekeyReason, Role, SessionKeyContext};
pub use env::Environment;
pub use error::{AbortCode, RXGK_ABORT_BASE, SecurityError};
pub use kdf::{
    ConnectionInfo, RXGK_CLIENT_ENC_PACKET, RXGK_CLIENT_ENC_RESPONSE, RXGK_CLIENT_MIC_PACKET,
    RXGK_SERVER_ENC_PACKET, RXGK_SERVER_ENC_TOKEN, RXGK_SERVER_MIC_PACKET, SessionParams,
    TokenCipher, derive_session_keys, derive_token_keys, derive_transport_key,
};
pub use keyring::{ConnectionKeys, KEY_WINDOW_SIZE};
pub use packet::{RXGK_HEADER_LEN, RxgkHeader, SecurityLevel};
pub use system_env::SystemEnv;
