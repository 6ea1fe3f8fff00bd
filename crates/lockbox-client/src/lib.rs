//! # Lockbox Client SDK
//!
//! Chunked uploads to S3-compatible object storage with optional client-side
//! envelope encryption.
//!
//! ## Features
//!
//! - **Multipart coordination**: parts are submitted one call at a time and the
//!   upload completes exactly when every part is present
//! - **Envelope encryption**: a fresh PSK per object, wrapped with RSA-OAEP
//!   or supplied by the caller
//! - **Streaming**: content is encrypted and decrypted in bounded blocks
//! - **Pluggable transport**: HTTP for real services, in-memory for tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use lockbox_client::{Config, EncryptionConfig, RequestContext, StorageClient, UploadPartRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let encryption = EncryptionConfig::from_pem(Some(&public_pem), Some(&private_pem))?;
//!     let client = StorageClient::new(
//!         Config::new("http://localhost:9000", "media").with_encryption(encryption),
//!     )?;
//!     let ctx = RequestContext::background();
//!
//!     // Upload part 1 of 2
//!     let request = UploadPartRequest::new("video.mp4", 1, 2);
//!     let outcome = client.upload_part(&ctx, &request, first_part).await?;
//!     assert!(!outcome.all_parts_uploaded);
//!
//!     // Poll from elsewhere
//!     let done = client.check_part_uploaded(&ctx, &request).await?;
//!
//!     Ok(())
//! }
//! ```

mod client;
mod codec;
mod config;
mod context;
mod coordinator;
mod encryption;
mod error;
mod multipart;
mod settings;
pub mod transport;
mod types;

#[cfg(test)]
mod test_support;

pub use client::{parse_psk, StorageClient};
pub use codec::{ContentCodec, PlainCodec, SessionKeying};
pub use config::{Config, EncryptionConfig, DEFAULT_PART_SIZE};
pub use context::RequestContext;
pub use coordinator::UploadCoordinator;
pub use encryption::{session_key_name, EnvelopeCipher, ENCRYPTION_KEY_HEADER, SESSION_KEY_SUFFIX};
pub use error::{ClientError, ObjectTarget, Operation, Result, TransportError, TransportResult};
pub use multipart::{part_count, upload_reader, ProgressCallback, UploadProgress};
pub use settings::{EncryptionSettings, Settings};
pub use transport::{HttpTransport, MemoryTransport, ObjectTransport};
pub use types::*;

// Re-export crypto types needed to configure encryption
pub use lockbox_crypto::{KeyWrapper, Psk, PSK_SIZE};
