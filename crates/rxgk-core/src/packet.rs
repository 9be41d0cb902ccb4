//! RxGK packet security levels.
//!
//! ```text
//! Plain:   [ data ]
//! Auth:    [ mic | data ]                             mic over header | data
//! Encrypt: [ conf | header | data | pad | cksum ]     header sealed with data
//! ```
//!
//! The 24-byte header binds the secured payload to the call it belongs to.
//! At the Auth level it is never sent; both ends rebuild it from the Rx
//! packet header and feed it to the MIC as metadata.

use rxgk_crypto::{CryptoError, EncType, FragmentedBuffer, Region};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{context::SessionKeyContext, env::Environment, error::SecurityError};

/// Length of the sealed RxGK header.
pub const RXGK_HEADER_LEN: usize = 24;

/// Protection applied to packet payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum SecurityLevel {
    /// No protection
    Plain = 0,
    /// Integrity only
    Auth = 1,
    /// Confidentiality and integrity
    #[default]
    Encrypt = 2,
}

impl TryFrom<u8> for SecurityLevel {
    type Error = SecurityError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::Plain),
            1 => Ok(Self::Auth),
            2 => Ok(Self::Encrypt),
            level => Err(SecurityError::BadSecurityLevel { level }),
        }
    }
}

/// Per-packet header sealed or MIC'd together with the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxgkHeader {
    /// Rx epoch
    pub epoch: u32,
    /// Connection ID
    pub cid: u32,
    /// Call number
    pub call_number: u32,
    /// Packet sequence number
    pub seq: u32,
    /// Security index of the connection
    pub sec_index: u32,
    /// Length of the application data
    pub data_len: u32,
}

/// Big-endian wire form of [`RxgkHeader`].
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct WireHeader {
    epoch: [u8; 4],
    cid: [u8; 4],
    call_number: [u8; 4],
    seq: [u8; 4],
    sec_index: [u8; 4],
    data_len: [u8; 4],
}

impl RxgkHeader {
    /// Serialize to the 24-byte wire form.
    pub fn to_bytes(&self) -> [u8; RXGK_HEADER_LEN] {
        let wire = WireHeader {
            epoch: self.epoch.to_be_bytes(),
            cid: self.cid.to_be_bytes(),
            call_number: self.call_number.to_be_bytes(),
            seq: self.seq.to_be_bytes(),
            sec_index: self.sec_index.to_be_bytes(),
            data_len: self.data_len.to_be_bytes(),
        };
        let mut out = [0u8; RXGK_HEADER_LEN];
        out.copy_from_slice(wire.as_bytes());
        out
    }

    /// Parse the wire form from the front of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SecurityError> {
        let (wire, _) = WireHeader::ref_from_prefix(bytes).map_err(|_| {
            CryptoError::PacketTooShort { len: bytes.len(), min: RXGK_HEADER_LEN }
        })?;
        Ok(Self {
            epoch: u32::from_be_bytes(wire.epoch),
            cid: u32::from_be_bytes(wire.cid),
            call_number: u32::from_be_bytes(wire.call_number),
            seq: u32::from_be_bytes(wire.seq),
            sec_index: u32::from_be_bytes(wire.sec_index),
            data_len: u32::from_be_bytes(wire.data_len),
        })
    }

    /// Same header with `data_len` replaced.
    pub fn with_data_len(self, data_len: u32) -> Self {
        Self { data_len, ..self }
    }

    /// Check that a decrypted header belongs to the `expected` call.
    ///
    /// `data_len` is not compared; the sender sets it.
    fn check_call(&self, expected: &Self) -> Result<(), SecurityError> {
        let fields = [
            ("epoch", self.epoch, expected.epoch),
            ("cid", self.cid, expected.cid),
            ("call_number", self.call_number, expected.call_number),
            ("seq", self.seq, expected.seq),
            ("sec_index", self.sec_index, expected.sec_index),
        ];
        match fields.into_iter().find(|(_, got, want)| got != want) {
            Some((field, ..)) => Err(SecurityError::SealedHeaderMismatch { field }),
            None => Ok(()),
        }
    }
}

/// Offset of the application data inside the secure region.
pub fn data_offset(enctype: &EncType, level: SecurityLevel) -> usize {
    match level {
        SecurityLevel::Plain => 0,
        SecurityLevel::Auth => enctype.cksum_len,
        SecurityLevel::Encrypt => enctype.conf_len + RXGK_HEADER_LEN,
    }
}

/// Size of the secure region needed for `data_len` bytes of data.
pub fn secure_len(enctype: &EncType, level: SecurityLevel, data_len: usize) -> usize {
    match level {
        SecurityLevel::Plain => data_len,
        SecurityLevel::Auth => enctype.mic_len(data_len),
        SecurityLevel::Encrypt => enctype.encrypted_len(RXGK_HEADER_LEN + data_len),
    }
}

fn data_len_u32(len: usize) -> Result<u32, SecurityError> {
    u32::try_from(len)
        .map_err(|_| CryptoError::InvalidLayout { reason: "data longer than u32::MAX" }.into())
}

/// Secure a packet payload at `level` with the transmit keys of `ctx`.
///
/// `data` must already sit at [`data_offset`] within `secure`. `header`
/// identifies the call; its `data_len` is filled in from `data`. Returns the
/// number of bytes of `secure` the secured payload occupies.
pub fn secure_packet<E: Environment>(
    ctx: &SessionKeyContext,
    env: &E,
    level: SecurityLevel,
    header: &RxgkHeader,
    buf: &mut FragmentedBuffer,
    secure: Region,
    data: Region,
) -> Result<usize, SecurityError> {
    let header = header.with_data_len(data_len_u32(data.len)?);
    match level {
        SecurityLevel::Plain => Ok(data.len),
        SecurityLevel::Auth => ctx.get_mic(env, &header.to_bytes(), buf, secure, data),
        SecurityLevel::Encrypt => {
            let header_at = secure.offset.checked_add(ctx.enctype().conf_len);
            if header_at.and_then(|at| at.checked_add(RXGK_HEADER_LEN)) != Some(data.offset) {
                let reason = "data must follow the header";
                return Err(CryptoError::InvalidLayout { reason }.into());
            }
            let header_at = data.offset - RXGK_HEADER_LEN;
            let sealed_len = data
                .len
                .checked_add(RXGK_HEADER_LEN)
                .ok_or(CryptoError::InvalidLayout { reason: "data region too large" })?;

            buf.scatter_list(Region::new(header_at, RXGK_HEADER_LEN))?
                .scatter(0, &header.to_bytes())?;

            ctx.encrypt(env, buf, secure, Region::new(header_at, sealed_len))
        },
    }
}

/// Verify a received packet payload at `level` with the context the packet's
/// key number selected.
///
/// `expected` identifies the call the packet arrived on. On success `region`
/// describes exactly the application data. On failure `region` is unchanged.
///
/// # Errors
///
/// - `Expired` if `now` is past the context's hard expiry
/// - `SealedHeaderMismatch` if the sealed header names another call or claims
///   more data than was sealed
/// - authentication errors from the engines
pub fn verify_packet(
    ctx: &SessionKeyContext,
    now: u64,
    level: SecurityLevel,
    expected: &RxgkHeader,
    buf: &mut FragmentedBuffer,
    region: &mut Region,
) -> Result<(), SecurityError> {
    if ctx.is_expired(now) {
        return Err(SecurityError::Expired { expiry: ctx.expiry(), now });
    }

    match level {
        SecurityLevel::Plain => Ok(()),
        SecurityLevel::Auth => {
            let data_len = region.len.saturating_sub(ctx.enctype().cksum_len);
            let header = expected.with_data_len(data_len_u32(data_len)?);
            ctx.verify_mic(&header.to_bytes(), buf, region)
        },
        SecurityLevel::Encrypt => {
            let mut plain = *region;
            ctx.decrypt(buf, &mut plain)?;

            let sealed =
                buf.copy_region(Region::new(plain.offset, plain.len.min(RXGK_HEADER_LEN)))?;
            let checked = RxgkHeader::from_bytes(&sealed).and_then(|header| {
                header.check_call(expected)?;
                if header.data_len as usize > plain.len - RXGK_HEADER_LEN {
                    return Err(SecurityError::SealedHeaderMismatch { field: "data_len" });
                }
                Ok(header)
            });
            let header = checked.inspect_err(|err| ctx.record_auth_failure(err))?;

            *region = Region::new(plain.offset + RXGK_HEADER_LEN, header.data_len as usize);
            Ok(())
        },
    }
}
