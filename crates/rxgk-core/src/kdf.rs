//! Session and token key derivation.
//!
//! ```text
//! Token key K0
//!        │
//!        ▼
//! PRF+(K0, epoch | cid | start_time | key_number) → Transport key TK
//!        │
//!        ▼
//! DK(TK, usage) → tx/rx encryption pairs, tx/rx Kc, response pair
//! ```
//!
//! The transport key is only needed while deriving; the resulting
//! [`SessionKeyContext`] keeps the derived keys and nothing else.

use std::{sync::Arc, time::Duration};

use rxgk_crypto::{
    EncKeyPair, EncType, FragmentedBuffer, Region, SecretKey, derive_checksum_key,
    derive_enc_keys, engine, find_enctype, prf_plus, random_to_key,
};

use crate::{
    context::{KeyLifetime, Role, SessionKeyContext, SessionKeys},
    env::Environment,
    error::SecurityError,
};

/// Client-to-server packet encryption.
pub const RXGK_CLIENT_ENC_PACKET: u32 = 1026;
/// Client-to-server packet MIC.
pub const RXGK_CLIENT_MIC_PACKET: u32 = 1027;
/// Server-to-client packet encryption.
pub const RXGK_SERVER_ENC_PACKET: u32 = 1028;
/// Server-to-client packet MIC.
pub const RXGK_SERVER_MIC_PACKET: u32 = 1029;
/// Challenge response encryption, always client-sealed.
pub const RXGK_CLIENT_ENC_RESPONSE: u32 = 1030;
/// Token encryption by the server.
pub const RXGK_SERVER_ENC_TOKEN: u32 = 1036;

/// Identity of the connection a transport key is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Rx epoch
    pub epoch: u32,
    /// Connection ID
    pub cid: u32,
    /// Token start time, from the ticket
    pub start_time: u64,
}

impl ConnectionInfo {
    /// PRF+ input for `key_number`: all fields big-endian.
    fn prf_input(&self, key_number: u32) -> [u8; 20] {
        let mut input = [0u8; 20];
        input[..4].copy_from_slice(&self.epoch.to_be_bytes());
        input[4..8].copy_from_slice(&self.cid.to_be_bytes());
        input[8..16].copy_from_slice(&self.start_time.to_be_bytes());
        input[16..].copy_from_slice(&key_number.to_be_bytes());
        input
    }
}

/// Per-connection parameters for deriving session contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    /// Which end of the connection we are
    pub role: Role,
    /// Budget and expiry applied to every key number
    pub lifetime: KeyLifetime,
    /// How long before expiry to ask for a rekey
    pub rekey_grace: Duration,
}

/// Derive the transport key for `key_number` from the token key.
///
/// # Errors
///
/// - `InvalidKeyLength` if `token_key` does not suit `enctype`
pub fn derive_transport_key(
    enctype: &EncType,
    token_key: &SecretKey,
    conn: &ConnectionInfo,
    key_number: u32,
) -> Result<SecretKey, SecurityError> {
    let random = prf_plus(enctype, token_key, enctype.key_bytes, &conn.prf_input(key_number))?;
    Ok(random_to_key(enctype, &random)?)
}

/// Derive every session key from a transport key.
///
/// Transmit and receive usages are chosen by `params.role`, so a client
/// context and a server context derived from the same transport key
/// interoperate. The response pair always uses
/// [`RXGK_CLIENT_ENC_RESPONSE`].
///
/// # Errors
///
/// - `InvalidKeyLength` if the transport key does not suit `enctype`
/// - `ResourceExhausted` if key storage cannot be allocated; keys derived so
///   far are zeroed as they drop
pub fn derive_session_keys(
    transport_key: &SecretKey,
    enctype: &'static EncType,
    key_number: u32,
    params: &SessionParams,
) -> Result<Arc<SessionKeyContext>, SecurityError> {
    let client_enc = derive_enc_keys(enctype, transport_key, RXGK_CLIENT_ENC_PACKET)?;
    let server_enc = derive_enc_keys(enctype, transport_key, RXGK_SERVER_ENC_PACKET)?;
    let client_kc = derive_checksum_key(enctype, transport_key, RXGK_CLIENT_MIC_PACKET)?;
    let server_kc = derive_checksum_key(enctype, transport_key, RXGK_SERVER_MIC_PACKET)?;
    let resp_enc = derive_enc_keys(enctype, transport_key, RXGK_CLIENT_ENC_RESPONSE)?;

    let keys = match params.role {
        Role::Client => SessionKeys {
            tx_enc: client_enc,
            rx_enc: server_enc,
            tx_kc: client_kc,
            rx_kc: server_kc,
            resp_enc,
        },
        Role::Server => SessionKeys {
            tx_enc: server_enc,
            rx_enc: client_enc,
            tx_kc: server_kc,
            rx_kc: client_kc,
            resp_enc,
        },
    };

    tracing::debug!(
        enctype = enctype.name,
        key_number,
        role = ?params.role,
        "derived session keys"
    );

    Ok(Arc::new(SessionKeyContext::new(
        key_number,
        enctype,
        params.role,
        params.lifetime,
        params.rekey_grace,
        keys,
    )))
}

/// Derive the single encryption pair used to seal or open a token.
///
/// # Errors
///
/// - `UnsupportedEncryptionType` if `enctype_id` is not registered
/// - `InvalidKeyLength` if `token_key` does not suit the enctype
pub fn derive_token_keys(
    enctype_id: u32,
    token_key: &[u8],
    usage: u32,
) -> Result<(EncKeyPair, &'static EncType), SecurityError> {
    let enctype = find_enctype(enctype_id)?;
    let key = SecretKey::from_slice(token_key)?;
    let keys = derive_enc_keys(enctype, &key, usage)?;

    tracing::debug!(enctype = enctype.name, usage, "set up token cipher");
    Ok((keys, enctype))
}

/// Cipher for the ticket-carrying token exchanged before a session exists.
#[derive(Debug)]
pub struct TokenCipher {
    enctype: &'static EncType,
    keys: EncKeyPair,
}

impl TokenCipher {
    /// Set up a token cipher for `usage`.
    pub fn new(enctype_id: u32, token_key: &[u8], usage: u32) -> Result<Self, SecurityError> {
        let (keys, enctype) = derive_token_keys(enctype_id, token_key, usage)?;
        Ok(Self { enctype, keys })
    }

    /// Token cipher for tokens sealed by a server.
    pub fn server_token(enctype_id: u32, token_key: &[u8]) -> Result<Self, SecurityError> {
        Self::new(enctype_id, token_key, RXGK_SERVER_ENC_TOKEN)
    }

    /// Enctype the cipher was set up with.
    pub fn enctype(&self) -> &'static EncType {
        self.enctype
    }

    /// Seal `data` in place with a fresh confounder.
    pub fn seal<E: Environment>(
        &self,
        env: &E,
        buf: &mut FragmentedBuffer,
        secure: Region,
        data: Region,
    ) -> Result<usize, SecurityError> {
        let mut confounder = vec![0u8; self.enctype.conf_len];
        env.random_bytes(&mut confounder);
        Ok(engine::encrypt(self.enctype, &self.keys, buf, secure, data, Some(&confounder))?)
    }

    /// Open a sealed token. On success `region` describes the plaintext.
    pub fn open(
        &self,
        buf: &mut FragmentedBuffer,
        region: &mut Region,
    ) -> Result<(), SecurityError> {
        Ok(engine::decrypt(self.enctype, &self.keys, buf, region)?)
    }
}

#[cfg(test)]
mod tests {
    use rxgk_crypto::{
        CryptoError, ENCTYPE_AES128_CTS_HMAC_SHA1_96, ENCTYPE_AES256_CTS_HMAC_SHA384_192,
    };

    use super::*;

    const CONN: ConnectionInfo = ConnectionInfo { epoch: 0x5e55_1011, cid: 0x40, start_time: 17 };

    #[test]
    fn prf_input_layout() {
        let input = CONN.prf_input(2);
        assert_eq!(hex::encode(input), "5e55101100000040000000000000001100000002");
    }

    #[test]
    fn transport_key_depends_on_key_number() {
        let et = find_enctype(ENCTYPE_AES128_CTS_HMAC_SHA1_96).unwrap();
        let k0 = SecretKey::from_slice(&[0x0f; 16]).unwrap();

        let tk0 = derive_transport_key(et, &k0, &CONN, 0).unwrap();
        let tk0_again = derive_transport_key(et, &k0, &CONN, 0).unwrap();
        let tk1 = derive_transport_key(et, &k0, &CONN, 1).unwrap();

        assert_eq!(tk0.len(), et.key_len);
        assert_eq!(tk0.as_bytes(), tk0_again.as_bytes());
        assert_ne!(tk0.as_bytes(), tk1.as_bytes());
    }

    #[test]
    fn transport_key_depends_on_connection() {
        let et = find_enctype(ENCTYPE_AES256_CTS_HMAC_SHA384_192).unwrap();
        let k0 = SecretKey::from_slice(&[0x0f; 32]).unwrap();
        let other = ConnectionInfo { cid: 0x44, ..CONN };

        let a = derive_transport_key(et, &k0, &CONN, 0).unwrap();
        let b = derive_transport_key(et, &k0, &other, 0).unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn session_context_starts_fresh() {
        let et = find_enctype(ENCTYPE_AES128_CTS_HMAC_SHA1_96).unwrap();
        let tk = SecretKey::from_slice(&[0x21; 16]).unwrap();
        let params = SessionParams {
            role: Role::Client,
            lifetime: KeyLifetime::new(1_000, 5_000),
            rekey_grace: Duration::from_secs(60),
        };

        let ctx = derive_session_keys(&tk, et, 7, &params).unwrap();
        assert_eq!(ctx.key_number(), 7);
        assert_eq!(ctx.bytes_remaining(), 1_000);
        assert_eq!(ctx.expiry(), 5_000);
        assert!(!ctx.needs_rekey());
        assert_eq!(ctx.state(), crate::context::ConnectionState::Fresh { key_number: 7 });
    }

    #[test]
    fn wrong_transport_key_length_is_rejected() {
        let et = find_enctype(ENCTYPE_AES128_CTS_HMAC_SHA1_96).unwrap();
        let tk = SecretKey::from_slice(&[0x21; 32]).unwrap();
        let params = SessionParams {
            role: Role::Server,
            lifetime: KeyLifetime::unlimited(),
            rekey_grace: Duration::ZERO,
        };
        assert_eq!(
            derive_session_keys(&tk, et, 0, &params).unwrap_err(),
            SecurityError::Crypto(CryptoError::InvalidKeyLength { expected: 16, actual: 32 })
        );
    }

    #[test]
    fn token_keys_reject_unknown_enctype() {
        let err = derive_token_keys(23, &[0u8; 16], RXGK_SERVER_ENC_TOKEN).unwrap_err();
        assert_eq!(
            err,
            SecurityError::Crypto(CryptoError::UnsupportedEncryptionType { enctype: 23 })
        );
    }
}
