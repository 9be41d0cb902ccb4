//! MIC engine: keyed checksum over metadata and data
//!
//! ```text
//! secure region: [ mic | data ]
//!                  cksum_len
//! mic = checksum(Kc, metadata | data)
//! ```
//!
//! The metadata (connection and call identifiers) is never transmitted; both
//! ends reconstruct it.

use arrayvec::ArrayVec;

use crate::{
    buffer::{FragmentedBuffer, MAX_FRAGMENTS, Region},
    enctype::EncType,
    error::CryptoError,
    keys::{ChecksumKey, scratch},
    profile::verify_truncated,
};

/// Compute the MIC over `metadata | data` and write it in front of `data`.
///
/// `data` must start exactly `cksum_len` bytes after `secure`. Returns the
/// number of bytes of `secure` used.
///
/// # Errors
///
/// - `InvalidLayout` if the regions do not follow the MIC layout
/// - `RegionOutOfBounds` / `TooManyFragments` for bad buffer geometry
pub fn get_mic(
    enctype: &EncType,
    kc: &ChecksumKey,
    metadata: &[u8],
    buf: &mut FragmentedBuffer,
    secure: Region,
    data: Region,
) -> Result<usize, CryptoError> {
    let cksum_len = enctype.cksum_len;
    if secure.offset.checked_add(cksum_len) != Some(data.offset) {
        return Err(CryptoError::InvalidLayout { reason: "data must follow the MIC" });
    }
    let wire_len = cksum_len
        .checked_add(data.len)
        .ok_or(CryptoError::InvalidLayout { reason: "data region too large" })?;
    if wire_len > secure.len {
        return Err(CryptoError::InvalidLayout { reason: "secure region too small" });
    }

    let mut sg = buf.scatter_list(Region::new(secure.offset, wire_len))?;
    let mut mic = scratch(cksum_len)?;
    {
        let mut parts: ArrayVec<&[u8], { MAX_FRAGMENTS + 1 }> = ArrayVec::new();
        parts.push(metadata);
        parts.extend(sg.slices(cksum_len, data.len)?);
        enctype.profile.checksum(enctype, kc, &parts, &mut mic)?;
    }
    sg.scatter(0, &mic)?;

    Ok(wire_len)
}

/// Verify the MIC at the front of `region` over `metadata | data`.
///
/// On success `region` is narrowed to the data. On failure neither the
/// buffer nor `region` is modified.
///
/// # Errors
///
/// - `PacketTooShort` if the region cannot hold a MIC
/// - `IntegrityCheckFailed` if the MIC does not verify
/// - `RegionOutOfBounds` / `TooManyFragments` for bad buffer geometry
pub fn verify_mic(
    enctype: &EncType,
    kc: &ChecksumKey,
    metadata: &[u8],
    buf: &mut FragmentedBuffer,
    region: &mut Region,
) -> Result<(), CryptoError> {
    let cksum_len = enctype.cksum_len;
    if region.len < cksum_len {
        return Err(CryptoError::PacketTooShort { len: region.len, min: cksum_len });
    }
    let data_len = region.len - cksum_len;

    let sg = buf.scatter_list(*region)?;
    let mut received = scratch(cksum_len)?;
    sg.gather(0, &mut received)?;

    let mut parts: ArrayVec<&[u8], { MAX_FRAGMENTS + 1 }> = ArrayVec::new();
    parts.push(metadata);
    parts.extend(sg.slices(cksum_len, data_len)?);

    let mut expected = scratch(cksum_len)?;
    enctype.profile.checksum(enctype, kc, &parts, &mut expected)?;
    verify_truncated(&expected, &received)?;

    region.offset += cksum_len;
    region.len = data_len;
    Ok(())
}
