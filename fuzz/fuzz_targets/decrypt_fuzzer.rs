//! Fuzz target for the encryption engine over fragmented buffers
//!
//! # Strategy
//!
//! - Every registered enctype, arbitrary key bytes and confounders
//! - Arbitrary fragment splits, including empty fragments and more than a
//!   scatter list can address
//! - Arbitrary sealed regions (garbage input) and sealed messages with a
//!   flipped byte
//!
//! # Invariants
//!
//! - Decrypt never panics on any region or buffer geometry
//! - A failed decrypt leaves the buffer and the region unchanged
//! - An untouched sealed message decrypts to the original plaintext unless
//!   the split needs too many fragments
//! - A flipped byte never verifies

#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use rxgk_crypto::{
    derive_enc_keys, engine, supported_enctypes, CryptoError, FragmentedBuffer, Region, SecretKey,
};

#[derive(Debug, Clone, Arbitrary)]
struct DecryptScenario {
    /// Index into the enctype registry
    enctype: u8,
    /// Seed for the base key
    key_seed: u8,
    /// Key usage for the derived pair
    usage: u32,
    /// Fragment lengths used to split the buffer
    splits: Vec<u8>,
    input: Input,
}

#[derive(Debug, Clone, Arbitrary)]
enum Input {
    /// Decrypt attacker-controlled bytes at an arbitrary region
    Garbage { bytes: Vec<u8>, offset: u16, len: u16 },
    /// Seal a message, optionally flip one byte, then decrypt it
    Sealed { plaintext: Vec<u8>, confounder: [u8; 16], flip: Option<u16> },
}

fn split(bytes: &[u8], splits: &[u8]) -> FragmentedBuffer {
    let mut fragments = Vec::new();
    let mut rest = bytes;
    for &size in splits {
        if rest.is_empty() {
            break;
        }
        let (head, tail) = rest.split_at((size as usize).min(rest.len()));
        fragments.push(BytesMut::from(head));
        rest = tail;
    }
    if !rest.is_empty() {
        fragments.push(BytesMut::from(rest));
    }
    FragmentedBuffer::from_fragments(fragments)
}

fuzz_target!(|scenario: DecryptScenario| {
    let enctypes: Vec<_> = supported_enctypes().collect();
    let enctype = enctypes[scenario.enctype as usize % enctypes.len()];
    let Ok(base) = SecretKey::from_slice(&vec![scenario.key_seed; enctype.key_len]) else {
        return;
    };
    let Ok(keys) = derive_enc_keys(enctype, &base, scenario.usage) else {
        return;
    };

    match scenario.input {
        Input::Garbage { bytes, offset, len } => {
            let mut buf = split(&bytes, &scenario.splits);
            let before = buf.clone();
            let original = Region::new(offset as usize, len as usize);
            let mut region = original;

            // INVARIANT 1: Garbage never panics and never commits
            if engine::decrypt(enctype, &keys, &mut buf, &mut region).is_err() {
                assert_eq!(region, original, "failed decrypt must not move the region");
                assert_eq!(buf, before, "failed decrypt must not touch the buffer");
            }
        },

        Input::Sealed { plaintext, confounder, flip } => {
            let plaintext = &plaintext[..plaintext.len().min(4_096)];
            let total = enctype.encrypted_len(plaintext.len());
            let mut raw = vec![0u8; total];
            raw[enctype.conf_len..enctype.conf_len + plaintext.len()].copy_from_slice(plaintext);
            let mut sealed = FragmentedBuffer::contiguous(&raw);
            let written = engine::encrypt(
                enctype,
                &keys,
                &mut sealed,
                Region::new(0, total),
                Region::new(enctype.conf_len, plaintext.len()),
                Some(&confounder[..enctype.conf_len]),
            )
            .expect("sealing a well-formed layout must succeed");
            assert_eq!(written, total);

            let mut wire = sealed.to_vec();
            let flipped = flip.map(|index| index as usize % total);
            if let Some(index) = flipped {
                wire[index] ^= 0x01;
            }

            let mut buf = split(&wire, &scenario.splits);
            let before = buf.clone();
            let mut region = Region::new(0, total);

            match engine::decrypt(enctype, &keys, &mut buf, &mut region) {
                Ok(()) => {
                    // INVARIANT 2: Only an untouched message verifies
                    assert!(flipped.is_none(), "flipped byte must fail verification");
                    assert_eq!(buf.copy_region(region).unwrap(), plaintext);
                },
                Err(err) => {
                    // INVARIANT 3: Failure leaves everything as it was
                    assert_eq!(region, Region::new(0, total));
                    assert_eq!(buf, before);
                    if flipped.is_none() {
                        assert!(
                            matches!(err, CryptoError::TooManyFragments { .. }),
                            "untouched message failed: {err}"
                        );
                    }
                },
            }
        },
    }
});
