//! Client configuration

use crate::{ClientError, Result};
use lockbox_crypto::{KeyWrapper, DEFAULT_CHUNK_SIZE};
use std::time::Duration;

/// Default size of parts produced by [`crate::upload_reader`] (5 MiB, the S3
/// minimum for non-final parts)
pub const DEFAULT_PART_SIZE: usize = 5 * 1024 * 1024;

/// Client configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Storage endpoint URL
    pub endpoint: String,
    /// Bucket every operation targets
    pub bucket: String,
    /// Access token (bearer)
    pub access_token: Option<String>,
    /// Request timeout
    pub timeout: Duration,
    /// User agent string
    pub user_agent: String,
    /// Part size used when splitting a reader into parts
    pub part_size: usize,
    /// Client-side encryption; `None` stores content as-is
    pub encryption: Option<EncryptionConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            bucket: String::new(),
            access_token: None,
            timeout: Duration::from_secs(30),
            user_agent: format!("lockbox-client/{}", env!("CARGO_PKG_VERSION")),
            part_size: DEFAULT_PART_SIZE,
            encryption: None,
        }
    }
}

impl Config {
    /// Create a new config with the given endpoint and bucket
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    /// Set the access token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Enable encryption
    pub fn with_encryption(mut self, encryption: EncryptionConfig) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the part size for reader uploads
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size;
        self
    }

    /// Check the configuration before any network call is made
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(ClientError::InvalidConfig("bucket must not be empty".to_string()));
        }
        if self.part_size == 0 {
            return Err(ClientError::InvalidConfig("part size must be positive".to_string()));
        }
        if let Some(encryption) = &self.encryption {
            encryption.validate()?;
            // Parts are sealed independently but read back as one stream
            if self.part_size % encryption.chunk_size != 0 {
                return Err(ClientError::InvalidConfig(format!(
                    "part size {} must be a multiple of the encryption chunk size {}",
                    self.part_size, encryption.chunk_size
                )));
            }
        }
        Ok(())
    }
}

/// Configuration for client-side encryption
#[derive(Clone, Debug)]
pub struct EncryptionConfig {
    /// RSA key pair used to wrap and unwrap generated PSKs
    pub keys: KeyWrapper,
    /// Callers always supply the PSK; nothing is generated or wrapped
    pub user_defined_psk: bool,
    /// Streaming block size
    pub chunk_size: usize,
}

impl EncryptionConfig {
    /// Create with an RSA key pair
    pub fn new(keys: KeyWrapper) -> Self {
        Self {
            keys,
            user_defined_psk: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Create from PEM-encoded keys
    pub fn from_pem(public_pem: Option<&str>, private_pem: Option<&str>) -> Result<Self> {
        Ok(Self::new(KeyWrapper::from_pem(public_pem, private_pem)?))
    }

    /// Create for caller-supplied PSKs only
    pub fn user_defined_psk() -> Self {
        Self {
            keys: KeyWrapper::default(),
            user_defined_psk: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set the streaming block size
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Reject configurations that could never encrypt anything
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ClientError::InvalidConfig("chunk size must be positive".to_string()));
        }
        if !self.user_defined_psk && !self.keys.can_wrap() {
            return Err(ClientError::InvalidConfig(
                "encryption needs a public key or a user-defined PSK".to_string(),
            ));
        }
        Ok(())
    }
}
