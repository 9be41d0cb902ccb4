//! Fuzz target for the MIC engine
//!
//! # Strategy
//!
//! - Every registered enctype with arbitrary checksum keys
//! - Arbitrary metadata, data and fragment splits
//! - Flipped bytes in the MIC or the data, or mismatched metadata
//!
//! # Invariants
//!
//! - MIC verification never panics on any region
//! - A failed verification leaves the buffer and the region unchanged
//! - Any modification to the MIC, the data or the metadata fails
//!   verification

#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use rxgk_crypto::{
    derive_checksum_key, mic, supported_enctypes, CryptoError, FragmentedBuffer, Region, SecretKey,
};

#[derive(Debug, Clone, Arbitrary)]
struct MicScenario {
    enctype: u8,
    key_seed: u8,
    metadata: Vec<u8>,
    data: Vec<u8>,
    /// Fragment length used to split the signed buffer
    chunk: u8,
    tamper: Tamper,
    /// Arbitrary verify region over the signed buffer
    region: Option<(u16, u16)>,
}

#[derive(Debug, Clone, Arbitrary)]
enum Tamper {
    None,
    FlipByte(u16),
    Metadata(Vec<u8>),
}

fuzz_target!(|scenario: MicScenario| {
    let enctypes: Vec<_> = supported_enctypes().collect();
    let enctype = enctypes[scenario.enctype as usize % enctypes.len()];
    let Ok(base) = SecretKey::from_slice(&vec![scenario.key_seed; enctype.key_len]) else {
        return;
    };
    let Ok(kc) = derive_checksum_key(enctype, &base, 1027) else {
        return;
    };

    let data = &scenario.data[..scenario.data.len().min(4_096)];
    let total = enctype.mic_len(data.len());
    let mut raw = vec![0u8; total];
    raw[enctype.cksum_len..].copy_from_slice(data);
    let mut signed = FragmentedBuffer::contiguous(&raw);
    mic::get_mic(
        enctype,
        &kc,
        &scenario.metadata,
        &mut signed,
        Region::new(0, total),
        Region::new(enctype.cksum_len, data.len()),
    )
    .expect("signing a well-formed layout must succeed");

    let mut wire = signed.to_vec();
    let mut metadata = scenario.metadata.clone();
    let tampered = match scenario.tamper {
        Tamper::None => false,
        Tamper::FlipByte(index) => {
            wire[index as usize % total] ^= 0x01;
            true
        },
        Tamper::Metadata(other) => {
            let changed = other != metadata;
            metadata = other;
            changed
        },
    };

    let chunk = (scenario.chunk as usize).max(1);
    let mut buf = FragmentedBuffer::from_fragments(wire.chunks(chunk).map(BytesMut::from));
    let before = buf.clone();
    let original = match scenario.region {
        Some((offset, len)) => Region::new(offset as usize, len as usize),
        None => Region::new(0, total),
    };
    let mut region = original;

    match mic::verify_mic(enctype, &kc, &metadata, &mut buf, &mut region) {
        Ok(()) => {
            // INVARIANT 1: Only the untouched message over the full region verifies
            if scenario.region.is_none() {
                assert!(!tampered, "tampered message must fail verification");
                assert_eq!(buf.copy_region(region).unwrap(), data);
            }
        },
        Err(err) => {
            // INVARIANT 2: Failure never commits
            assert_eq!(region, original);
            assert_eq!(buf, before);
            if scenario.region.is_none() && !tampered {
                assert!(
                    matches!(err, CryptoError::TooManyFragments { .. }),
                    "untouched message failed: {err}"
                );
            }
        },
    }
});
