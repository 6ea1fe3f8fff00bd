//! Per-object symmetric keys
//!
//! A PSK is drawn fresh for every object that does not use a caller-supplied
//! key. The same 16 bytes key the block cipher and seed its counter block.

use crate::{CryptoError, Result};
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a PSK in bytes (128 bits)
pub const PSK_SIZE: usize = 16;

/// A per-object symmetric key
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Psk {
    key: [u8; PSK_SIZE],
}

impl Psk {
    /// Generate a new random PSK from the OS CSPRNG
    pub fn generate() -> Self {
        let mut key = [0u8; PSK_SIZE];
        rand::RngCore::fill_bytes(&mut OsRng, &mut key);
        Self { key }
    }

    /// Create a PSK from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PSK_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "PSK must be {} bytes, got {}",
                PSK_SIZE,
                bytes.len()
            )));
        }
        let mut key = [0u8; PSK_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; PSK_SIZE] {
        &self.key
    }
}

impl From<[u8; PSK_SIZE]> for Psk {
    fn from(key: [u8; PSK_SIZE]) -> Self {
        Self { key }
    }
}

impl std::fmt::Debug for Psk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Psk(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_differ() {
        let a = Psk::generate();
        let b = Psk::generate();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        assert!(matches!(
            Psk::from_bytes(&[0u8; 15]),
            Err(CryptoError::InvalidKey(_))
        ));
        assert!(Psk::from_bytes(&[]).is_err());
        assert!(Psk::from_bytes(&[7u8; PSK_SIZE]).is_ok());
    }

    #[test]
    fn test_debug_hides_key() {
        let psk = Psk::from([0xAB; PSK_SIZE]);
        assert_eq!(format!("{:?}", psk), "Psk(..)");
    }
}
