//! Shared fixtures for unit tests

use lockbox_crypto::{KeyWrapper, RsaPrivateKey};
use std::sync::OnceLock;

/// A key pair generated once per test binary
pub(crate) fn test_keys() -> KeyWrapper {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    let key = KEY
        .get_or_init(|| RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).expect("generate RSA key"))
        .clone();
    KeyWrapper::new(None, Some(key))
}
