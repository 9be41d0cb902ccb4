//! Packet security for one Rx connection.
//!
//! Ties the negotiated security level and the key window together. Outbound
//! packets are secured with the current key number, which cranks on its own
//! once the current context asks for a rekey. Inbound packets pick their
//! context by the key number on the wire.
//!
//! ```text
//!            secure_packet                       verify_packet
//!  data ──> current() ──> level transform ──> wire ──> get(key_no) ──> data
//! ```

use std::time::Duration;

use rxgk_crypto::{EncType, FragmentedBuffer, Region};

use crate::{
    context::{KeyLifetime, Role, SessionKeyContext},
    env::Environment,
    error::SecurityError,
    kdf::{ConnectionInfo, SessionParams},
    keyring::ConnectionKeys,
    packet::{self, RxgkHeader, SecurityLevel},
};

/// How long before the hard expiry a context asks to be rekeyed.
pub const DEFAULT_REKEY_GRACE: Duration = Duration::from_secs(300);

/// Authentication failures on the current key before the connection should
/// be aborted.
pub const DEFAULT_AUTH_FAILURE_LIMIT: u32 = 8;

/// Connection security configuration
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Protection applied to every packet
    pub level: SecurityLevel,
    /// Expiry grace window that flags a rekey
    pub rekey_grace: Duration,
    /// Threshold for [`ConnectionSecurity::should_abort`]
    pub auth_failure_limit: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            level: SecurityLevel::Encrypt,
            rekey_grace: DEFAULT_REKEY_GRACE,
            auth_failure_limit: DEFAULT_AUTH_FAILURE_LIMIT,
        }
    }
}

/// Result of securing an outbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecuredPacket {
    /// Bytes of the secure region holding the secured payload
    pub len: usize,
    /// Low 16 bits of the key number, for the Rx packet header
    pub key_number: u16,
}

/// Packet security for one connection.
#[derive(Debug)]
pub struct ConnectionSecurity<E: Environment> {
    env: E,
    config: SecurityConfig,
    keys: ConnectionKeys,
}

impl<E: Environment> ConnectionSecurity<E> {
    /// Set up security for a connection from the token key in its ticket.
    ///
    /// The connection starts at key number 0.
    ///
    /// # Errors
    ///
    /// - `UnsupportedEncryptionType` if `enctype_id` is not registered
    /// - `InvalidKeyLength` if `token_key` does not suit the enctype
    pub fn new(
        env: E,
        config: SecurityConfig,
        enctype_id: u32,
        token_key: &[u8],
        conn: ConnectionInfo,
        role: Role,
        lifetime: KeyLifetime,
    ) -> Result<Self, SecurityError> {
        let params = SessionParams { role, lifetime, rekey_grace: config.rekey_grace };
        let keys = ConnectionKeys::new(enctype_id, token_key, conn, params, 0)?;
        Ok(Self { env, config, keys })
    }

    /// Configuration in force.
    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Security level applied to packets.
    pub fn level(&self) -> SecurityLevel {
        self.config.level
    }

    /// Negotiated enctype.
    pub fn enctype(&self) -> &'static EncType {
        self.keys.enctype()
    }

    /// Key window of the connection.
    pub fn keys(&self) -> &ConnectionKeys {
        &self.keys
    }

    /// Offset of the application data inside an outbound secure region.
    pub fn data_offset(&self) -> usize {
        packet::data_offset(self.enctype(), self.config.level)
    }

    /// Secure region size needed for `data_len` bytes of data.
    pub fn secure_len(&self, data_len: usize) -> usize {
        packet::secure_len(self.enctype(), self.config.level, data_len)
    }

    /// Secure an outbound packet with the current key.
    ///
    /// `data` must sit at [`Self::data_offset`] within `secure`.
    ///
    /// # Errors
    ///
    /// - `Expired` if the current key is past its hard expiry
    /// - `KeyNumberExhausted` if a rekey is due but no key numbers are left
    /// - layout and resource errors from the engines
    pub fn secure_packet(
        &self,
        header: &RxgkHeader,
        buf: &mut FragmentedBuffer,
        secure: Region,
        data: Region,
    ) -> Result<SecuredPacket, SecurityError> {
        let ctx = self.keys.current()?;
        let now = self.env.wall_clock_secs();
        if ctx.is_expired(now) {
            return Err(SecurityError::Expired { expiry: ctx.expiry(), now });
        }

        let len =
            packet::secure_packet(&ctx, &self.env, self.config.level, header, buf, secure, data)?;
        Ok(SecuredPacket { len, key_number: wire_key_number(&ctx) })
    }

    /// Verify an inbound packet secured under `wire_key_number`.
    ///
    /// On success `region` describes exactly the application data. On
    /// failure `region` is unchanged.
    ///
    /// # Errors
    ///
    /// - `BadKeyNumber` if the key number is outside the window
    /// - `Expired` if the selected key is past its hard expiry
    /// - authentication errors; see [`Self::should_abort`]
    pub fn verify_packet(
        &self,
        wire_key_number: u16,
        header: &RxgkHeader,
        buf: &mut FragmentedBuffer,
        region: &mut Region,
    ) -> Result<(), SecurityError> {
        let ctx = self.keys.get(wire_key_number)?;
        packet::verify_packet(
            &ctx,
            self.env.wall_clock_secs(),
            self.config.level,
            header,
            buf,
            region,
        )
    }

    /// Seal a challenge response with the current key.
    pub fn encrypt_response(
        &self,
        buf: &mut FragmentedBuffer,
        secure: Region,
        data: Region,
    ) -> Result<SecuredPacket, SecurityError> {
        let ctx = self.keys.current()?;
        let len = ctx.encrypt_response(&self.env, buf, secure, data)?;
        Ok(SecuredPacket { len, key_number: wire_key_number(&ctx) })
    }

    /// Open a challenge response sealed under `wire_key_number`.
    pub fn decrypt_response(
        &self,
        wire_key_number: u16,
        buf: &mut FragmentedBuffer,
        region: &mut Region,
    ) -> Result<(), SecurityError> {
        self.keys.get(wire_key_number)?.decrypt_response(buf, region)
    }

    /// Install the next key number now.
    pub fn rekey(&self) -> Result<u32, SecurityError> {
        Ok(self.keys.rekey()?.key_number())
    }

    /// True once authentication failures on the current key reach the
    /// configured limit.
    ///
    /// Advisory: the caller decides whether to abort the connection with
    /// `SealedIncon`.
    pub fn should_abort(&self) -> bool {
        self.keys
            .peek_current()
            .is_some_and(|ctx| ctx.auth_failures() >= self.config.auth_failure_limit)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn wire_key_number(ctx: &SessionKeyContext) -> u16 {
    ctx.key_number() as u16
}
