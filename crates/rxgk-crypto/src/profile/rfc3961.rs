//! RFC 3961 simplified profile, as used by the RFC 3962 AES enctypes
//!
//! ```text
//! DK(base, constant) = random-to-key(DR(base, n-fold(constant)))
//! ciphertext         = CTS(Ke, conf | plain) | HMAC-SHA1(Ki, conf | plain)[..h]
//! PRF(key, s)        = CTS(DK(key, "prf"), trunc16(SHA1(s)))
//! ```

use sha1::{Digest, Sha1};
use zeroize::Zeroizing;

use super::{CryptoProfile, hmac_parts, truncate_into, verify_truncated};
use crate::{
    aes_cts::{self, AES_BLOCK_LEN, AesKey},
    enctype::EncType,
    error::CryptoError,
    keys::{EncKeyPair, SecretKey, scratch},
};

/// Constant mixed into the PRF key derivation.
const PRF_CONSTANT: &[u8] = b"prf";

/// RFC 3961 simplified profile with AES-CTS and HMAC-SHA1.
#[derive(Debug)]
pub struct Rfc3961Simplified;

/// RFC 3961 n-fold: stretch or compress `input` to `out_len` bytes.
///
/// The input is replicated `lcm / input.len()` times, each copy rotated a
/// further 13 bits to the right, and the copies are summed with end-around
/// carry.
pub fn nfold(input: &[u8], out_len: usize) -> Vec<u8> {
    let mut out = vec![0u8; out_len];
    let in_len = input.len();
    if in_len == 0 || out_len == 0 {
        return out;
    }

    let lcm = in_len / gcd(in_len, out_len) * out_len;
    let in_bits = in_len << 3;
    let mut carry: u32 = 0;

    for i in (0..lcm).rev() {
        let msbit = ((in_bits - 1) + ((in_bits + 13) * (i / in_len)) + ((in_len - (i % in_len)) << 3))
            % in_bits;

        let hi = u32::from(input[((in_len - 1) - (msbit >> 3)) % in_len]);
        let lo = u32::from(input[(in_len - (msbit >> 3)) % in_len]);
        carry += (((hi << 8) | lo) >> ((msbit & 7) + 1)) & 0xff;

        carry += u32::from(out[i % out_len]);
        out[i % out_len] = (carry & 0xff) as u8;
        carry >>= 8;
    }

    if carry != 0 {
        for byte in out.iter_mut().rev() {
            carry += u32::from(*byte);
            *byte = (carry & 0xff) as u8;
            carry >>= 8;
        }
    }

    out
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// DR(base, constant): iterate single-block encryption of the folded
/// constant until `out_len` bytes are produced.
fn derive_random(base: &[u8], constant: &[u8], out_len: usize) -> Result<SecretKey, CryptoError> {
    let cipher = AesKey::new(base)?;

    let mut block = [0u8; AES_BLOCK_LEN];
    if constant.len() == AES_BLOCK_LEN {
        block.copy_from_slice(constant);
    } else {
        block.copy_from_slice(&nfold(constant, AES_BLOCK_LEN));
    }

    let mut out = SecretKey::zeroed(out_len)?;
    for chunk in out.as_mut_bytes().chunks_mut(AES_BLOCK_LEN) {
        aes_cts::encrypt(&cipher, &mut block)?;
        chunk.copy_from_slice(&block[..chunk.len()]);
    }
    zeroize::Zeroize::zeroize(&mut block);

    Ok(out)
}

impl CryptoProfile for Rfc3961Simplified {
    fn derive_key(
        &self,
        enctype: &EncType,
        base: &[u8],
        label: &[u8],
        out_len: usize,
    ) -> Result<SecretKey, CryptoError> {
        if base.len() != enctype.key_len {
            return Err(CryptoError::InvalidKeyLength {
                expected: enctype.key_len,
                actual: base.len(),
            });
        }
        let raw = derive_random(base, label, enctype.key_bytes)?;
        let key = (enctype.random_to_key)(raw.as_bytes())?;
        if key.len() < out_len {
            return Err(CryptoError::InvalidKeyLength { expected: out_len, actual: key.len() });
        }
        SecretKey::from_slice(&key.as_bytes()[..out_len])
    }

    fn prf(
        &self,
        enctype: &EncType,
        key: &[u8],
        octets: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let prf_key = self.derive_key(enctype, key, PRF_CONSTANT, enctype.key_len)?;
        let cipher = AesKey::new(prf_key.as_bytes())?;

        let digest = Sha1::digest(octets);
        let usable = digest.len() - digest.len() % AES_BLOCK_LEN;

        let mut out = scratch(usable)?;
        out.copy_from_slice(&digest[..usable]);
        aes_cts::encrypt(&cipher, &mut out)?;
        out.truncate(enctype.prf_len);
        Ok(out)
    }

    fn encrypt(
        &self,
        enctype: &EncType,
        keys: &EncKeyPair,
        payload: &mut [u8],
        cksum: &mut [u8],
    ) -> Result<(), CryptoError> {
        let digest = hmac_parts(enctype.hash, keys.ki().as_bytes(), &[&*payload]);
        truncate_into(&digest, cksum)?;

        let cipher = AesKey::new(keys.ke().as_bytes())?;
        aes_cts::encrypt(&cipher, payload)
    }

    fn decrypt(
        &self,
        enctype: &EncType,
        keys: &EncKeyPair,
        payload: &mut [u8],
        cksum: &[u8],
    ) -> Result<(), CryptoError> {
        let cipher = AesKey::new(keys.ke().as_bytes())?;
        aes_cts::decrypt(&cipher, payload)?;

        let digest = hmac_parts(enctype.hash, keys.ki().as_bytes(), &[&*payload]);
        verify_truncated(&digest, cksum)
    }
}
