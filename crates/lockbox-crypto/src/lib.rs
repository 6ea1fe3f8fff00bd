//! # Lockbox Crypto
//!
//! Envelope encryption primitives for Lockbox object storage.
//!
//! This crate provides:
//! - **PSK**: A fresh 16-byte per-object symmetric key
//! - **Key Wrapping**: RSA-OAEP (SHA-1) protection of the PSK, hex encoded
//! - **Content Transform**: AES-128-CTR keyed and IV'd by the PSK, length preserving
//! - **Chunked Streaming**: Bounded-memory encryption/decryption of unbounded objects
//!
//! ## Envelope Model
//!
//! ```text
//! ┌────────────────────────┐      ┌────────────────────────┐
//! │   RSA key pair (KEK)   │      │   caller-supplied PSK  │
//! └───────────┬────────────┘      └───────────┬────────────┘
//!             │ wrap / unwrap                 │
//!             ▼                               │
//! ┌────────────────────────┐                  │
//! │  PSK (16 bytes, fresh) │◄─────────────────┘
//! └───────────┬────────────┘
//!             │ AES-128-CTR, one keystream per chunk
//!             ▼
//! ┌────────────────────────┐
//! │     object content     │
//! └────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use lockbox_crypto::{Psk, KeyWrapper, symmetric};
//!
//! let psk = Psk::generate();
//! let wrapped = KeyWrapper::new(Some(public_key), Some(private_key)).wrap(&psk)?;
//!
//! let ciphertext = symmetric::encrypt(&psk, b"Hello, World!")?;
//! assert_eq!(symmetric::decrypt(&psk, &ciphertext)?, b"Hello, World!");
//! ```

pub mod chunked;
pub mod error;
pub mod psk;
pub mod symmetric;
pub mod wrap;

pub use chunked::{ChunkedCipherReader, decrypt_chunked, encrypt_chunked};
pub use error::{CryptoError, Result};
pub use psk::{Psk, PSK_SIZE};
pub use wrap::{KeyWrapper, RsaPrivateKey, RsaPublicKey};

/// Default block size for chunked streaming (5 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;
