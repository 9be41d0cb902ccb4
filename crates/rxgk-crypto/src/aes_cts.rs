//! AES in CBC mode with ciphertext stealing (RFC 3962 flavour)
//!
//! The final two blocks are always swapped, even when the input is block
//! aligned, and a single-block input degenerates to plain CBC. Inputs shorter
//! than one block are rejected; the enctype confounder guarantees callers
//! never produce them.

use aes::{
    Aes128, Aes256, Block,
    cipher::{BlockDecrypt, BlockEncrypt, KeyInit},
};

use crate::error::CryptoError;

/// AES block length.
pub const AES_BLOCK_LEN: usize = 16;

/// Expanded AES key, 128 or 256 bits.
pub(crate) enum AesKey {
    Aes128(Aes128),
    Aes256(Aes256),
}

impl AesKey {
    pub(crate) fn new(key: &[u8]) -> Result<Self, CryptoError> {
        match key.len() {
            16 => Aes128::new_from_slice(key)
                .map(Self::Aes128)
                .map_err(|_| CryptoError::InvalidKeyLength { expected: 16, actual: key.len() }),
            32 => Aes256::new_from_slice(key)
                .map(Self::Aes256)
                .map_err(|_| CryptoError::InvalidKeyLength { expected: 32, actual: key.len() }),
            actual => Err(CryptoError::InvalidKeyLength { expected: 16, actual }),
        }
    }

    pub(crate) fn encrypt_block(&self, block: &mut [u8; AES_BLOCK_LEN]) {
        let block = Block::from_mut_slice(block);
        match self {
            Self::Aes128(cipher) => cipher.encrypt_block(block),
            Self::Aes256(cipher) => cipher.encrypt_block(block),
        }
    }

    pub(crate) fn decrypt_block(&self, block: &mut [u8; AES_BLOCK_LEN]) {
        let block = Block::from_mut_slice(block);
        match self {
            Self::Aes128(cipher) => cipher.decrypt_block(block),
            Self::Aes256(cipher) => cipher.decrypt_block(block),
        }
    }
}

fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= s;
    }
}

fn load(src: &[u8]) -> [u8; AES_BLOCK_LEN] {
    let mut block = [0u8; AES_BLOCK_LEN];
    block[..src.len()].copy_from_slice(src);
    block
}

/// Encrypt `data` in place with a zero IV.
pub(crate) fn encrypt(key: &AesKey, data: &mut [u8]) -> Result<(), CryptoError> {
    let len = data.len();
    if len < AES_BLOCK_LEN {
        return Err(CryptoError::InvalidLayout { reason: "CTS input shorter than one block" });
    }

    let blocks = len.div_ceil(AES_BLOCK_LEN);
    let tail = len - AES_BLOCK_LEN * (blocks - 1);
    let mut prev = [0u8; AES_BLOCK_LEN];

    if blocks == 1 {
        let mut block = load(data);
        key.encrypt_block(&mut block);
        data.copy_from_slice(&block);
        return Ok(());
    }

    for chunk in data[..AES_BLOCK_LEN * (blocks - 2)].chunks_exact_mut(AES_BLOCK_LEN) {
        let mut block = load(chunk);
        xor_into(&mut block, &prev);
        key.encrypt_block(&mut block);
        chunk.copy_from_slice(&block);
        prev = block;
    }

    let penultimate = AES_BLOCK_LEN * (blocks - 2);
    let last = AES_BLOCK_LEN * (blocks - 1);

    let mut x = load(&data[penultimate..last]);
    xor_into(&mut x, &prev);
    key.encrypt_block(&mut x);

    let mut y = load(&data[last..]);
    xor_into(&mut y, &x);
    key.encrypt_block(&mut y);

    data[penultimate..last].copy_from_slice(&y);
    data[last..].copy_from_slice(&x[..tail]);
    Ok(())
}

/// Decrypt `data` in place with a zero IV.
pub(crate) fn decrypt(key: &AesKey, data: &mut [u8]) -> Result<(), CryptoError> {
    let len = data.len();
    if len < AES_BLOCK_LEN {
        return Err(CryptoError::InvalidLayout { reason: "CTS input shorter than one block" });
    }

    let blocks = len.div_ceil(AES_BLOCK_LEN);
    let tail = len - AES_BLOCK_LEN * (blocks - 1);
    let mut prev = [0u8; AES_BLOCK_LEN];

    if blocks == 1 {
        let mut block = load(data);
        key.decrypt_block(&mut block);
        data.copy_from_slice(&block);
        return Ok(());
    }

    for chunk in data[..AES_BLOCK_LEN * (blocks - 2)].chunks_exact_mut(AES_BLOCK_LEN) {
        let cipher_block = load(chunk);
        let mut block = cipher_block;
        key.decrypt_block(&mut block);
        xor_into(&mut block, &prev);
        chunk.copy_from_slice(&block);
        prev = cipher_block;
    }

    let penultimate = AES_BLOCK_LEN * (blocks - 2);
    let last = AES_BLOCK_LEN * (blocks - 1);

    // D = Pn' ^ X where Pn' is the zero-extended final plaintext block
    let mut d = load(&data[penultimate..last]);
    key.decrypt_block(&mut d);

    let mut x = d;
    x[..tail].copy_from_slice(&data[last..]);

    let mut final_plain = d;
    xor_into(&mut final_plain[..tail], &x[..tail]);

    let mut penultimate_plain = x;
    key.decrypt_block(&mut penultimate_plain);
    xor_into(&mut penultimate_plain, &prev);

    data[penultimate..last].copy_from_slice(&penultimate_plain);
    data[last..].copy_from_slice(&final_plain[..tail]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHICKEN_TERIYAKI: &str = "636869636b656e207465726979616b69";
    const INPUT: &str = "4920776f756c64206c696b65207468652047656e6572616c2047617527732043";

    fn vector(len: usize, expected: &str) {
        let key = AesKey::new(&hex::decode(CHICKEN_TERIYAKI).unwrap()).unwrap();
        let input = hex::decode(INPUT).unwrap();

        let mut data = input[..len].to_vec();
        encrypt(&key, &mut data).unwrap();
        assert_eq!(hex::encode(&data), expected);

        decrypt(&key, &mut data).unwrap();
        assert_eq!(data, &input[..len]);
    }

    #[test]
    fn rfc3962_seventeen_bytes() {
        vector(17, "c6353568f2bf8cb4d8a580362da7ff7f97");
    }

    #[test]
    fn rfc3962_thirty_one_bytes() {
        vector(31, "fc00783e0efdb2c1d445d4c8eff7ed2297687268d6ecccc0c07b25e25ecfe5");
    }

    #[test]
    fn rfc3962_two_full_blocks_are_swapped() {
        vector(32, "39312523a78662d5be7fcbcc98ebf5a897687268d6ecccc0c07b25e25ecfe584");
    }

    #[test]
    fn roundtrip_many_lengths() {
        let key = AesKey::new(&[0x11; 32]).unwrap();
        for len in [16, 17, 31, 32, 33, 47, 48, 49, 64, 100, 255] {
            let original: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let mut data = original.clone();
            encrypt(&key, &mut data).unwrap();
            assert_ne!(data, original, "length {len} must change under encryption");
            decrypt(&key, &mut data).unwrap();
            assert_eq!(data, original, "length {len} must roundtrip");
        }
    }

    #[test]
    fn short_input_is_rejected() {
        let key = AesKey::new(&[0u8; 16]).unwrap();
        let mut data = [0u8; 15];
        assert!(encrypt(&key, &mut data).is_err());
        assert!(decrypt(&key, &mut data).is_err());
    }

    #[test]
    fn odd_key_length_is_rejected() {
        assert!(matches!(
            AesKey::new(&[0u8; 24]),
            Err(CryptoError::InvalidKeyLength { actual: 24, .. })
        ));
    }
}
