//! Single-shot content transform using AES-128-CTR
//!
//! The PSK serves as both the AES key and the initial counter block. CTR is a
//! stream mode, so ciphertext length always equals plaintext length and
//! encryption and decryption apply the same keystream.

use crate::{CryptoError, Psk, Result};
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::Aes128;

/// AES-128 in big-endian 128-bit counter mode
pub type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;

const BLOCK_SIZE: usize = 16;

/// Build a keystream whose first block uses counter value `counter`
pub fn keystream(psk: &Psk, counter: u128) -> Result<Aes128Ctr> {
    Aes128Ctr::new_from_slices(psk.as_bytes(), &counter.to_be_bytes())
        .map_err(|e| CryptoError::InvalidKey(format!("cipher construction failed: {}", e)))
}

/// Transform `buf` in place with a fresh keystream
///
/// The counter starts at the PSK and wraps modulo 2^128, so every PSK can
/// transform any length.
pub fn apply(psk: &Psk, buf: &mut [u8]) -> Result<()> {
    let mut counter = u128::from_be_bytes(*psk.as_bytes());
    let mut rest: &mut [u8] = buf;

    while !rest.is_empty() {
        let before_wrap = u128::MAX - counter;
        if before_wrap == 0 {
            // The all-ones counter block, then wrap to zero
            let n = rest.len().min(BLOCK_SIZE);
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(n);
            xor_counter_block(psk, counter, head);
            rest = tail;
            counter = 0;
            continue;
        }

        let n = usize::try_from(before_wrap)
            .ok()
            .and_then(|blocks| blocks.checked_mul(BLOCK_SIZE))
            .map_or(rest.len(), |max| max.min(rest.len()));
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(n);
        keystream(psk, counter)?
            .try_apply_keystream(head)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;
        rest = tail;
        // Only reached again when `head` ran right up to the all-ones block
        counter = u128::MAX;
    }
    Ok(())
}

fn xor_counter_block(psk: &Psk, counter: u128, buf: &mut [u8]) {
    let cipher = Aes128::new(GenericArray::from_slice(psk.as_bytes()));
    let mut block = GenericArray::from(counter.to_be_bytes());
    cipher.encrypt_block(&mut block);
    for (b, k) in buf.iter_mut().zip(block.iter()) {
        *b ^= k;
    }
}

/// Encrypt data in one shot
pub fn encrypt(psk: &Psk, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut buf = plaintext.to_vec();
    apply(psk, &mut buf)?;
    Ok(buf)
}

/// Decrypt data in one shot
pub fn decrypt(psk: &Psk, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let mut buf = ciphertext.to_vec();
    apply(psk, &mut buf).map_err(|e| CryptoError::Decryption(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ctr_roundtrip() {
        let psk = Psk::generate();
        let plaintext = b"Hello, World!";

        let ciphertext = encrypt(&psk, plaintext).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len());
        assert_ne!(ciphertext.as_slice(), plaintext.as_slice());

        let decrypted = decrypt(&psk, &ciphertext).unwrap();
        assert_eq!(decrypted.as_slice(), plaintext.as_slice());
    }

    #[test]
    fn test_empty_input() {
        let psk = Psk::generate();
        assert!(encrypt(&psk, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_key_yields_garbage() {
        let plaintext = b"secret data";
        let ciphertext = encrypt(&Psk::generate(), plaintext).unwrap();
        let decrypted = decrypt(&Psk::generate(), &ciphertext).unwrap();
        assert_ne!(decrypted.as_slice(), plaintext.as_slice());
    }

    fn aes_block(psk: &Psk, counter: u128) -> Vec<u8> {
        let cipher = Aes128::new(GenericArray::from_slice(psk.as_bytes()));
        let mut block = GenericArray::from(counter.to_be_bytes());
        cipher.encrypt_block(&mut block);
        block.to_vec()
    }

    #[test]
    fn test_counter_wraps_from_all_ones() {
        let psk = Psk::from([0xff; crate::PSK_SIZE]);
        let plaintext: Vec<u8> = (0..40u8).collect();

        let ciphertext = encrypt(&psk, &plaintext).unwrap();
        assert_eq!(decrypt(&psk, &ciphertext).unwrap(), plaintext);

        let keystream = encrypt(&psk, &[0u8; 48]).unwrap();
        assert_eq!(keystream[..16], aes_block(&psk, u128::MAX)[..]);
        assert_eq!(keystream[16..32], aes_block(&psk, 0)[..]);
        assert_eq!(keystream[32..], aes_block(&psk, 1)[..]);
    }

    #[test]
    fn test_counter_wraps_mid_buffer() {
        let mut key = [0xff; crate::PSK_SIZE];
        key[15] = 0xfe;
        let psk = Psk::from(key);

        let keystream = encrypt(&psk, &[0u8; 40]).unwrap();
        assert_eq!(keystream[..16], aes_block(&psk, u128::MAX - 1)[..]);
        assert_eq!(keystream[16..32], aes_block(&psk, u128::MAX)[..]);
        assert_eq!(keystream[32..], aes_block(&psk, 0)[..8]);
    }

    #[test]
    fn test_matches_block_cipher_from_psk_counter() {
        let psk = Psk::from([7u8; crate::PSK_SIZE]);
        let keystream = encrypt(&psk, &[0u8; 32]).unwrap();
        let start = u128::from_be_bytes([7u8; crate::PSK_SIZE]);
        assert_eq!(keystream[..16], aes_block(&psk, start)[..]);
        assert_eq!(keystream[16..], aes_block(&psk, start + 1)[..]);
    }

    #[test]
    fn test_deterministic_for_same_key() {
        let psk = Psk::from([9u8; crate::PSK_SIZE]);
        assert_eq!(encrypt(&psk, b"abc").unwrap(), encrypt(&psk, b"abc").unwrap());
    }
}
