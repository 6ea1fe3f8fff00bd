//! RSA-OAEP wrapping of per-object keys
//!
//! `wrap(psk) = hex(RSA-OAEP(public_key, SHA-1, psk))`. The hex text is what
//! travels in the `encryption-key` metadata header and in `<key>.key` side
//! objects.

use crate::{CryptoError, Psk, Result};
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::Oaep;
use sha1::Sha1;
use zeroize::Zeroizing;

pub use rsa::{RsaPrivateKey, RsaPublicKey};

/// Wraps and unwraps PSKs with an RSA key pair
///
/// Either half may be absent: a write-only uploader holds just the public
/// key, and unwrapping then fails with [`CryptoError::NoPrivateKey`].
#[derive(Clone, Default)]
pub struct KeyWrapper {
    public: Option<RsaPublicKey>,
    private: Option<RsaPrivateKey>,
}

impl KeyWrapper {
    /// Create from parsed keys. A missing public key is derived from the
    /// private key when one is given.
    pub fn new(public: Option<RsaPublicKey>, private: Option<RsaPrivateKey>) -> Self {
        let public = public.or_else(|| private.as_ref().map(RsaPublicKey::from));
        Self { public, private }
    }

    /// Create from PEM text. Accepts SPKI or PKCS#1 public keys and PKCS#8
    /// or PKCS#1 private keys.
    pub fn from_pem(public_pem: Option<&str>, private_pem: Option<&str>) -> Result<Self> {
        let public = public_pem.map(parse_public_pem).transpose()?;
        let private = private_pem.map(parse_private_pem).transpose()?;
        Ok(Self::new(public, private))
    }

    /// Whether a public key is available for wrapping
    pub fn can_wrap(&self) -> bool {
        self.public.is_some()
    }

    /// Whether a private key is available for unwrapping
    pub fn can_unwrap(&self) -> bool {
        self.private.is_some()
    }

    /// Get the public key
    pub fn public_key(&self) -> Option<&RsaPublicKey> {
        self.public.as_ref()
    }

    /// Export the public key as SPKI PEM
    pub fn public_key_pem(&self) -> Result<Option<String>> {
        self.public
            .as_ref()
            .map(|k| k.to_public_key_pem(LineEnding::LF))
            .transpose()
            .map_err(|e| CryptoError::KeyParse(e.to_string()))
    }

    /// Export the private key as PKCS#8 PEM
    pub fn private_key_pem(&self) -> Result<Option<Zeroizing<String>>> {
        self.private
            .as_ref()
            .map(|k| k.to_pkcs8_pem(LineEnding::LF))
            .transpose()
            .map_err(|e| CryptoError::KeyParse(e.to_string()))
    }

    /// Encrypt a PSK with the public key and hex encode the result
    pub fn wrap(&self, psk: &Psk) -> Result<String> {
        let public = self.public.as_ref().ok_or(CryptoError::NoPublicKey)?;
        let ciphertext = public
            .encrypt(&mut OsRng, Oaep::new::<Sha1>(), psk.as_bytes())
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;
        Ok(hex::encode(ciphertext))
    }

    /// Decode and decrypt a wrapped PSK
    pub fn unwrap(&self, wrapped_hex: &str) -> Result<Psk> {
        let private = self.private.as_ref().ok_or(CryptoError::NoPrivateKey)?;
        let ciphertext = hex::decode(wrapped_hex.trim())?;
        let plaintext = private.decrypt(Oaep::new::<Sha1>(), &ciphertext)?;
        Psk::from_bytes(&plaintext)
    }
}

impl std::fmt::Debug for KeyWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyWrapper")
            .field("public", &self.public.is_some())
            .field("private", &self.private.is_some())
            .finish()
    }
}

fn parse_public_pem(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| CryptoError::KeyParse(format!("public key: {}", e)))
}

fn parse_private_pem(pem: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| CryptoError::KeyParse(format!("private key: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    fn test_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 1024).unwrap())
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let wrapper = KeyWrapper::new(None, Some(test_key().clone()));
        let psk = Psk::generate();

        let wrapped = wrapper.wrap(&psk).unwrap();
        assert!(wrapped.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(wrapper.unwrap(&wrapped).unwrap(), psk);
    }

    #[test]
    fn test_wrapping_is_randomized() {
        let wrapper = KeyWrapper::new(None, Some(test_key().clone()));
        let psk = Psk::generate();
        assert_ne!(wrapper.wrap(&psk).unwrap(), wrapper.wrap(&psk).unwrap());
    }

    #[test]
    fn test_unwrap_without_private_key() {
        let public = RsaPublicKey::from(test_key());
        let wrapper = KeyWrapper::new(Some(public), None);
        let wrapped = wrapper.wrap(&Psk::generate()).unwrap();

        assert!(matches!(wrapper.unwrap(&wrapped), Err(CryptoError::NoPrivateKey)));
        assert!(matches!(wrapper.unwrap("not hex"), Err(CryptoError::NoPrivateKey)));
    }

    #[test]
    fn test_wrap_without_public_key() {
        let wrapper = KeyWrapper::default();
        assert!(matches!(wrapper.wrap(&Psk::generate()), Err(CryptoError::NoPublicKey)));
    }

    #[test]
    fn test_unwrap_rejects_garbage() {
        let wrapper = KeyWrapper::new(None, Some(test_key().clone()));
        assert!(matches!(wrapper.unwrap("zz"), Err(CryptoError::HexDecode(_))));
        assert!(matches!(wrapper.unwrap("abcd"), Err(CryptoError::Decryption(_))));
    }

    #[test]
    fn test_from_pem() {
        let private_pem = test_key().to_pkcs8_pem(LineEnding::LF).unwrap();
        let public_pem = RsaPublicKey::from(test_key())
            .to_public_key_pem(LineEnding::LF)
            .unwrap();

        let writer = KeyWrapper::from_pem(Some(public_pem.as_str()), None).unwrap();
        let reader = KeyWrapper::from_pem(None, Some(private_pem.as_str())).unwrap();
        assert!(writer.can_wrap() && !writer.can_unwrap());
        assert!(reader.can_wrap() && reader.can_unwrap());

        let psk = Psk::generate();
        let wrapped = writer.wrap(&psk).unwrap();
        assert_eq!(reader.unwrap(&wrapped).unwrap(), psk);
    }

    #[test]
    fn test_pem_export_roundtrip() {
        let original = KeyWrapper::new(None, Some(test_key().clone()));
        let public_pem = original.public_key_pem().unwrap().unwrap();
        let private_pem = original.private_key_pem().unwrap().unwrap();

        let restored =
            KeyWrapper::from_pem(Some(public_pem.as_str()), Some(private_pem.as_str())).unwrap();
        let psk = Psk::generate();
        assert_eq!(restored.unwrap(&original.wrap(&psk).unwrap()).unwrap(), psk);
        assert!(KeyWrapper::default().public_key_pem().unwrap().is_none());
    }

    #[test]
    fn test_from_pem_rejects_garbage() {
        let result = KeyWrapper::from_pem(Some("-----BEGIN NOTHING-----"), None);
        assert!(matches!(result, Err(CryptoError::KeyParse(_))));
    }
}
