//! Encryption engine over fragmented buffers
//!
//! ```text
//! secure region: [ confounder | data | padding | checksum ]
//!                  conf_len     data   pad_len   cksum_len
//! ```
//!
//! Both directions gather the region into zeroizing scratch, run the
//! profile there and scatter back. A failed decrypt therefore leaves the
//! buffer and the caller's [`Region`] exactly as they were.

use crate::{
    buffer::{FragmentedBuffer, Region},
    enctype::EncType,
    error::CryptoError,
    keys::{EncKeyPair, scratch},
};

/// Encrypt the data region in place and append the keyed checksum.
///
/// `data` must start exactly `conf_len` bytes after `secure`; the confounder
/// goes into that gap. Pass `None` for `confounder` when the caller already
/// wrote one there.
///
/// Returns the number of bytes of `secure` now holding the sealed message.
///
/// # Errors
///
/// - `InvalidLayout` if the regions do not follow the enctype layout, the
///   secure region is too small, or the confounder has the wrong length
/// - `RegionOutOfBounds` / `TooManyFragments` for bad buffer geometry
/// - `ResourceExhausted` if scratch space cannot be allocated
pub fn encrypt(
    enctype: &EncType,
    keys: &EncKeyPair,
    buf: &mut FragmentedBuffer,
    secure: Region,
    data: Region,
    confounder: Option<&[u8]>,
) -> Result<usize, CryptoError> {
    let conf_len = enctype.conf_len;
    if secure.offset.checked_add(conf_len) != Some(data.offset) {
        return Err(CryptoError::InvalidLayout { reason: "data must follow the confounder" });
    }

    let align = if enctype.pad { enctype.block_len } else { 1 };
    let wire_len = conf_len
        .checked_add(data.len)
        .and_then(|len| len.checked_next_multiple_of(align))
        .and_then(|len| len.checked_add(enctype.cksum_len))
        .ok_or(CryptoError::InvalidLayout { reason: "data region too large" })?;
    let payload_len = wire_len - enctype.cksum_len;
    if wire_len > secure.len {
        return Err(CryptoError::InvalidLayout { reason: "secure region too small" });
    }

    let mut sg = buf.scatter_list(secure)?;
    let mut payload = scratch(payload_len)?;

    match confounder {
        Some(bytes) if bytes.len() == conf_len => payload[..conf_len].copy_from_slice(bytes),
        Some(_) => {
            return Err(CryptoError::InvalidLayout { reason: "confounder length mismatch" });
        },
        None => sg.gather(0, &mut payload[..conf_len])?,
    }
    sg.gather(conf_len, &mut payload[conf_len..conf_len + data.len])?;

    let mut cksum = scratch(enctype.cksum_len)?;
    enctype.profile.encrypt(enctype, keys, &mut payload, &mut cksum)?;

    sg.scatter(0, &payload)?;
    sg.scatter(payload_len, &cksum)?;

    Ok(wire_len)
}

/// Verify and decrypt a sealed region in place.
///
/// On success `region` is narrowed to the decrypted data (confounder and
/// checksum stripped). Any padding the sender added is still included; the
/// packet layer trims it using its own length field.
///
/// # Errors
///
/// - `PacketTooShort` if the region cannot hold confounder and checksum
/// - `MalformedPadding` if a padded enctype sees an unaligned payload
/// - `IntegrityCheckFailed` if the checksum does not verify
/// - `RegionOutOfBounds` / `TooManyFragments` for bad buffer geometry
pub fn decrypt(
    enctype: &EncType,
    keys: &EncKeyPair,
    buf: &mut FragmentedBuffer,
    region: &mut Region,
) -> Result<(), CryptoError> {
    let min = enctype.conf_len + enctype.cksum_len;
    if region.len < min {
        return Err(CryptoError::PacketTooShort { len: region.len, min });
    }

    let payload_len = region.len - enctype.cksum_len;
    if enctype.pad && payload_len % enctype.block_len != 0 {
        return Err(CryptoError::MalformedPadding {
            len: payload_len,
            block_len: enctype.block_len,
        });
    }

    let mut sg = buf.scatter_list(*region)?;
    let mut sealed = scratch(region.len)?;
    sg.gather(0, &mut sealed)?;

    let (payload, cksum) = sealed.split_at_mut(payload_len);
    enctype.profile.decrypt(enctype, keys, payload, cksum)?;

    sg.scatter(0, payload)?;
    region.offset += enctype.conf_len;
    region.len = payload_len - enctype.conf_len;

    Ok(())
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::{
        derivation::derive_enc_keys,
        enctype::{ENCTYPE_AES128_CTS_HMAC_SHA1_96, ENCTYPE_AES256_CTS_HMAC_SHA1_96, find_enctype},
        keys::SecretKey,
    };

    fn keys_for(et: &EncType) -> EncKeyPair {
        let base = SecretKey::from_slice(&vec![0x5c; et.key_len]).unwrap();
        derive_enc_keys(et, &base, 1026).unwrap()
    }

    fn sealed_buffer(et: &EncType, plaintext: &[u8]) -> (FragmentedBuffer, usize) {
        let keys = keys_for(et);
        let total = et.encrypted_len(plaintext.len());
        let mut raw = vec![0u8; total];
        raw[et.conf_len..et.conf_len + plaintext.len()].copy_from_slice(plaintext);
        let mut buf = FragmentedBuffer::contiguous(&raw);

        let written = encrypt(
            et,
            &keys,
            &mut buf,
            Region::new(0, total),
            Region::new(et.conf_len, plaintext.len()),
            Some(&[0xc0; 16]),
        )
        .unwrap();
        (buf, written)
    }

    #[test]
    fn roundtrip_contiguous() {
        let et = find_enctype(ENCTYPE_AES128_CTS_HMAC_SHA1_96).unwrap();
        let plaintext = b"rx data packet payload";
        let (mut buf, written) = sealed_buffer(et, plaintext);
        assert_eq!(written, et.encrypted_len(plaintext.len()));
        assert_ne!(&buf.to_vec()[16..16 + plaintext.len()], plaintext);

        let mut region = Region::new(0, written);
        decrypt(et, &keys_for(et), &mut buf, &mut region).unwrap();
        assert_eq!(region, Region::new(16, plaintext.len()));
        assert_eq!(buf.copy_region(region).unwrap(), plaintext);
    }

    #[test]
    fn preconfounded_matches_explicit_confounder() {
        let et = find_enctype(ENCTYPE_AES256_CTS_HMAC_SHA1_96).unwrap();
        let keys = keys_for(et);
        let plaintext = [0x42u8; 20];
        let total = et.encrypted_len(plaintext.len());

        let mut raw = vec![0u8; total];
        raw[..16].fill(0xc0);
        raw[16..36].copy_from_slice(&plaintext);
        let mut buf = FragmentedBuffer::contiguous(&raw);
        encrypt(et, &keys, &mut buf, Region::new(0, total), Region::new(16, 20), None).unwrap();

        let (explicit, _) = sealed_buffer(et, &plaintext);
        assert_eq!(buf.to_vec(), explicit.to_vec());
    }

    #[test]
    fn oversized_data_region_is_a_layout_error() {
        let et = find_enctype(ENCTYPE_AES128_CTS_HMAC_SHA1_96).unwrap();
        let mut buf = FragmentedBuffer::contiguous(&[0u8; 64]);
        for len in [usize::MAX, usize::MAX - 16, usize::MAX - 20] {
            let result = encrypt(
                et,
                &keys_for(et),
                &mut buf,
                Region::new(0, 64),
                Region::new(16, len),
                Some(&[0xc0; 16]),
            );
            assert_eq!(
                result,
                Err(CryptoError::InvalidLayout { reason: "data region too large" }),
                "{len}"
            );
        }
        assert_eq!(buf.to_vec(), [0u8; 64]);
    }

    #[test]
    fn secure_region_at_end_of_address_space_is_rejected() {
        let et = find_enctype(ENCTYPE_AES128_CTS_HMAC_SHA1_96).unwrap();
        let mut buf = FragmentedBuffer::contiguous(&[0u8; 64]);
        let result = encrypt(
            et,
            &keys_for(et),
            &mut buf,
            Region::new(usize::MAX - 4, 64),
            Region::new(16, 8),
            Some(&[0xc0; 16]),
        );
        assert!(matches!(result, Err(CryptoError::InvalidLayout { .. })));
    }

    #[test]
    fn roundtrip_across_fragments() {
        let et = find_enctype(ENCTYPE_AES128_CTS_HMAC_SHA1_96).unwrap();
        let plaintext: Vec<u8> = (0..50).collect();
        let (sealed, written) = sealed_buffer(et, &plaintext);

        let bytes = sealed.to_vec();
        let mut buf = FragmentedBuffer::from_fragments(
            bytes.chunks(7).map(BytesMut::from),
        );
        let mut region = Region::new(0, written);
        decrypt(et, &keys_for(et), &mut buf, &mut region).unwrap();
        assert_eq!(buf.copy_region(region).unwrap(), plaintext);
    }

    #[test]
    fn tampering_leaves_buffer_and_region_untouched() {
        let et = find_enctype(ENCTYPE_AES128_CTS_HMAC_SHA1_96).unwrap();
        let (sealed, written) = sealed_buffer(et, b"do not touch");

        let mut bytes = sealed.to_vec();
        bytes[20] ^= 0x01;
        let mut buf = FragmentedBuffer::contiguous(&bytes);
        let mut region = Region::new(0, written);

        let result = decrypt(et, &keys_for(et), &mut buf, &mut region);
        assert_eq!(result, Err(CryptoError::IntegrityCheckFailed));
        assert_eq!(region, Region::new(0, written));
        assert_eq!(buf.to_vec(), bytes);
    }

    #[test]
    fn short_region_is_rejected() {
        let et = find_enctype(ENCTYPE_AES128_CTS_HMAC_SHA1_96).unwrap();
        let mut buf = FragmentedBuffer::contiguous(&[0u8; 27]);
        let mut region = Region::new(0, 27);
        assert_eq!(
            decrypt(et, &keys_for(et), &mut buf, &mut region),
            Err(CryptoError::PacketTooShort { len: 27, min: 28 })
        );
    }

    #[test]
    fn misplaced_data_region_is_rejected() {
        let et = find_enctype(ENCTYPE_AES128_CTS_HMAC_SHA1_96).unwrap();
        let mut buf = FragmentedBuffer::contiguous(&[0u8; 64]);
        let result =
            encrypt(et, &keys_for(et), &mut buf, Region::new(0, 64), Region::new(8, 4), None);
        assert!(matches!(result, Err(CryptoError::InvalidLayout { .. })));
    }

    #[test]
    fn undersized_secure_region_is_rejected() {
        let et = find_enctype(ENCTYPE_AES128_CTS_HMAC_SHA1_96).unwrap();
        let mut buf = FragmentedBuffer::contiguous(&[0u8; 64]);
        let result =
            encrypt(et, &keys_for(et), &mut buf, Region::new(0, 40), Region::new(16, 20), None);
        assert!(matches!(result, Err(CryptoError::InvalidLayout { .. })));
    }

    #[test]
    fn wrong_confounder_length_is_rejected() {
        let et = find_enctype(ENCTYPE_AES128_CTS_HMAC_SHA1_96).unwrap();
        let mut buf = FragmentedBuffer::contiguous(&[0u8; 64]);
        let result = encrypt(
            et,
            &keys_for(et),
            &mut buf,
            Region::new(0, 64),
            Region::new(16, 4),
            Some(&[0u8; 8]),
        );
        assert!(matches!(result, Err(CryptoError::InvalidLayout { .. })));
    }
}
