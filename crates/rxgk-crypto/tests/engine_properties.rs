//! Property-based tests for the encryption and MIC engines
//!
//! These tests verify the engine invariants for every registered enctype:
//!
//! 1. **Round-trip**: decrypt(encrypt(m)) == m for any length and fragmentation
//! 2. **Tamper detection**: flipping any sealed byte fails verification
//! 3. **No partial commit**: a failed verification leaves buffer and region
//!    unchanged
//! 4. **Known answers**: RFC 8009 test vector through the engine

use bytes::BytesMut;
use proptest::prelude::*;
use rxgk_crypto::{
    ChecksumKey, CryptoError, ENCTYPE_AES128_CTS_HMAC_SHA1_96, ENCTYPE_AES128_CTS_HMAC_SHA256_128,
    EncKeyPair, EncType, FragmentedBuffer, MAX_FRAGMENTS, Region, SecretKey, derive_checksum_key,
    derive_enc_keys, engine, find_enctype, mic, supported_enctypes,
};

const ENCTYPE_IDS: [u32; 4] = [17, 18, 19, 20];

fn enc_keys(et: &EncType, seed: u8) -> EncKeyPair {
    let base = SecretKey::from_slice(&vec![seed; et.key_len]).unwrap();
    derive_enc_keys(et, &base, 1026).unwrap()
}

fn mic_key(et: &EncType, seed: u8) -> ChecksumKey {
    let base = SecretKey::from_slice(&vec![seed; et.key_len]).unwrap();
    derive_checksum_key(et, &base, 1027).unwrap()
}

/// Split `bytes` into fragments of at most `chunk` bytes.
fn fragmented(bytes: &[u8], chunk: usize) -> FragmentedBuffer {
    FragmentedBuffer::from_fragments(bytes.chunks(chunk.max(1)).map(BytesMut::from))
}

/// Seal `plaintext` in a contiguous buffer and return the wire bytes.
fn seal(et: &EncType, keys: &EncKeyPair, plaintext: &[u8], confounder: &[u8]) -> Vec<u8> {
    let total = et.encrypted_len(plaintext.len());
    let mut raw = vec![0u8; total];
    raw[et.conf_len..et.conf_len + plaintext.len()].copy_from_slice(plaintext);
    let mut buf = FragmentedBuffer::contiguous(&raw);
    let written = engine::encrypt(
        et,
        keys,
        &mut buf,
        Region::new(0, total),
        Region::new(et.conf_len, plaintext.len()),
        Some(confounder),
    )
    .unwrap();
    assert_eq!(written, total);
    buf.to_vec()
}

fn sign(et: &EncType, kc: &ChecksumKey, metadata: &[u8], data: &[u8]) -> Vec<u8> {
    let total = et.mic_len(data.len());
    let mut raw = vec![0u8; total];
    raw[et.cksum_len..].copy_from_slice(data);
    let mut buf = FragmentedBuffer::contiguous(&raw);
    mic::get_mic(
        et,
        kc,
        metadata,
        &mut buf,
        Region::new(0, total),
        Region::new(et.cksum_len, data.len()),
    )
    .unwrap();
    buf.to_vec()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_encrypt_decrypt_roundtrip(
        enctype in prop::sample::select(ENCTYPE_IDS.to_vec()),
        plaintext in prop::collection::vec(any::<u8>(), 0..300),
        confounder in prop::collection::vec(any::<u8>(), 16..=16),
        chunk in 24usize..128,
        seed in any::<u8>(),
    ) {
        let et = find_enctype(enctype).unwrap();
        let keys = enc_keys(et, seed);
        let wire = seal(et, &keys, &plaintext, &confounder);

        let mut buf = fragmented(&wire, chunk);
        prop_assume!(buf.fragment_count() <= MAX_FRAGMENTS);
        let mut region = Region::new(0, wire.len());
        engine::decrypt(et, &keys, &mut buf, &mut region).unwrap();

        prop_assert_eq!(region, Region::new(et.conf_len, plaintext.len()));
        prop_assert_eq!(buf.copy_region(region).unwrap(), plaintext);
    }

    #[test]
    fn prop_confounder_changes_ciphertext(
        enctype in prop::sample::select(ENCTYPE_IDS.to_vec()),
        plaintext in prop::collection::vec(any::<u8>(), 0..64),
        conf1 in prop::collection::vec(any::<u8>(), 16..=16),
        conf2 in prop::collection::vec(any::<u8>(), 16..=16),
    ) {
        prop_assume!(conf1 != conf2);
        let et = find_enctype(enctype).unwrap();
        let keys = enc_keys(et, 7);
        prop_assert_ne!(seal(et, &keys, &plaintext, &conf1), seal(et, &keys, &plaintext, &conf2));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_any_flipped_byte_fails_decrypt(
        enctype in prop::sample::select(ENCTYPE_IDS.to_vec()),
        plaintext in prop::collection::vec(any::<u8>(), 0..80),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let et = find_enctype(enctype).unwrap();
        let keys = enc_keys(et, 1);
        let mut wire = seal(et, &keys, &plaintext, &[0xa5; 16]);
        let at = position.index(wire.len());
        wire[at] ^= 1 << bit;

        let mut buf = FragmentedBuffer::contiguous(&wire);
        let mut region = Region::new(0, wire.len());
        let result = engine::decrypt(et, &keys, &mut buf, &mut region);

        prop_assert_eq!(result, Err(CryptoError::IntegrityCheckFailed));
        prop_assert_eq!(region, Region::new(0, wire.len()));
        prop_assert_eq!(buf.to_vec(), wire);
    }

    #[test]
    fn prop_wrong_key_fails_decrypt(
        enctype in prop::sample::select(ENCTYPE_IDS.to_vec()),
        plaintext in prop::collection::vec(any::<u8>(), 0..80),
        seed1 in any::<u8>(),
        seed2 in any::<u8>(),
    ) {
        prop_assume!(seed1 != seed2);
        let et = find_enctype(enctype).unwrap();
        let wire = seal(et, &enc_keys(et, seed1), &plaintext, &[0; 16]);

        let mut buf = FragmentedBuffer::contiguous(&wire);
        let mut region = Region::new(0, wire.len());
        let result = engine::decrypt(et, &enc_keys(et, seed2), &mut buf, &mut region);
        prop_assert!(result.unwrap_err().is_authentication_failure());
    }

    #[test]
    fn prop_mic_roundtrip(
        enctype in prop::sample::select(ENCTYPE_IDS.to_vec()),
        metadata in prop::collection::vec(any::<u8>(), 0..32),
        data in prop::collection::vec(any::<u8>(), 0..300),
        chunk in 24usize..128,
    ) {
        let et = find_enctype(enctype).unwrap();
        let kc = mic_key(et, 9);
        let wire = sign(et, &kc, &metadata, &data);
        prop_assert_eq!(&wire[et.cksum_len..], &data[..]);

        let mut buf = fragmented(&wire, chunk);
        prop_assume!(buf.fragment_count() <= MAX_FRAGMENTS);
        let mut region = Region::new(0, wire.len());
        mic::verify_mic(et, &kc, &metadata, &mut buf, &mut region).unwrap();
        prop_assert_eq!(region, Region::new(et.cksum_len, data.len()));
    }

    #[test]
    fn prop_any_flipped_byte_fails_mic(
        enctype in prop::sample::select(ENCTYPE_IDS.to_vec()),
        data in prop::collection::vec(any::<u8>(), 0..80),
        position in any::<prop::sample::Index>(),
    ) {
        let et = find_enctype(enctype).unwrap();
        let kc = mic_key(et, 9);
        let mut wire = sign(et, &kc, b"call", &data);
        let at = position.index(wire.len());
        wire[at] ^= 0x40;

        let mut buf = FragmentedBuffer::contiguous(&wire);
        let mut region = Region::new(0, wire.len());
        let result = mic::verify_mic(et, &kc, b"call", &mut buf, &mut region);
        prop_assert_eq!(result, Err(CryptoError::IntegrityCheckFailed));
        prop_assert_eq!(region.offset, 0);
    }
}

#[test]
fn rfc8009_aes128_empty_plaintext_known_answer() {
    let et = find_enctype(ENCTYPE_AES128_CTS_HMAC_SHA256_128).unwrap();
    let base =
        SecretKey::from_slice(&hex::decode("3705D96080C17728A0E800EAB6E0D23C").unwrap()).unwrap();
    let keys = derive_enc_keys(et, &base, 2).unwrap();
    let confounder = hex::decode("7E5895EAF2672435BAD817F545A37148").unwrap();

    // Preconfounded: the confounder is already in the buffer
    let mut buf = FragmentedBuffer::contiguous(&[confounder.as_slice(), &[0u8; 16][..]].concat());
    let written =
        engine::encrypt(et, &keys, &mut buf, Region::new(0, 32), Region::new(16, 0), None)
            .unwrap();

    assert_eq!(written, 32);
    assert_eq!(
        hex::encode(buf.to_vec()),
        "ef85fb890bb8472f4dab20394dca781dad877eda39d50c870c0d5a0a8e48c718"
    );
}

#[test]
fn boundary_lengths_roundtrip_for_every_enctype() {
    // Empty, exactly one block, and several blocks plus a partial block
    for et in supported_enctypes() {
        let keys = enc_keys(et, 0x77);
        for len in [0, et.block_len, 3 * et.block_len + 5] {
            let plaintext: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let wire = seal(et, &keys, &plaintext, &[0x11; 16]);

            let mut buf = fragmented(&wire, 9);
            let mut region = Region::new(0, wire.len());
            engine::decrypt(et, &keys, &mut buf, &mut region).unwrap();
            assert_eq!(buf.copy_region(region).unwrap(), plaintext, "{} len {len}", et.name);
        }
    }
}

#[test]
fn seventeen_fragments_are_a_resource_error() {
    let et = find_enctype(ENCTYPE_AES128_CTS_HMAC_SHA1_96).unwrap();
    let keys = enc_keys(et, 3);
    let wire = seal(et, &keys, &[0x55; 40], &[0; 16]);

    // 68 bytes over 4-byte fragments is 17 fragments
    let mut buf = fragmented(&wire, 4);
    assert_eq!(buf.fragment_count(), 17);
    let mut region = Region::new(0, wire.len());
    let err = engine::decrypt(et, &keys, &mut buf, &mut region).unwrap_err();
    assert!(err.is_resource_error());
    assert_eq!(region, Region::new(0, wire.len()));

    // Coalescing lets the caller retry
    buf.coalesce();
    engine::decrypt(et, &keys, &mut buf, &mut region).unwrap();
    assert_eq!(buf.copy_region(region).unwrap(), vec![0x55; 40]);
}

#[test]
fn padded_enctype_rejects_unaligned_payload() {
    let base = find_enctype(ENCTYPE_AES128_CTS_HMAC_SHA1_96).unwrap();
    let padded = EncType { pad: true, name: "padded-test", ..*base };
    let keys = enc_keys(&padded, 4);

    assert_eq!(padded.pad_len(5), 11);
    let wire = seal(&padded, &keys, b"hello", &[0; 16]);
    assert_eq!(wire.len(), 16 + 16 + 12);

    // Padding survives decryption; the caller trims it
    let mut buf = FragmentedBuffer::contiguous(&wire);
    let mut region = Region::new(0, wire.len());
    engine::decrypt(&padded, &keys, &mut buf, &mut region).unwrap();
    assert_eq!(region.len, 16);
    let plain = buf.copy_region(region).unwrap();
    assert_eq!(&plain[..5], b"hello");
    assert!(plain[5..].iter().all(|&b| b == 0));

    // Drop one ciphertext byte: payload is no longer block aligned
    let mut short = wire.clone();
    short.remove(20);
    let mut buf = FragmentedBuffer::contiguous(&short);
    let mut region = Region::new(0, short.len());
    assert_eq!(
        engine::decrypt(&padded, &keys, &mut buf, &mut region),
        Err(CryptoError::MalformedPadding { len: 31, block_len: 16 })
    );
}
