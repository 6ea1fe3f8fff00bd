//! File and environment configuration
//!
//! Settings are layered: an optional config file, then `LOCKBOX__*`
//! environment variables (a `.env` file is honored). Nested keys use a double
//! underscore, e.g. `LOCKBOX__ENCRYPTION__PUBLIC_KEY_PATH`.

use crate::{ClientError, Config, EncryptionConfig, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Deserializable client settings
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub endpoint: String,
    pub bucket: String,
    pub access_token: Option<String>,
    pub timeout_secs: u64,
    pub part_size: usize,
    pub encryption: Option<EncryptionSettings>,
}

/// Encryption section of [`Settings`]
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EncryptionSettings {
    pub public_key_path: Option<PathBuf>,
    pub private_key_path: Option<PathBuf>,
    pub user_defined_psk: bool,
    pub chunk_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        let config = Config::default();
        Self {
            endpoint: config.endpoint,
            bucket: config.bucket,
            access_token: None,
            timeout_secs: config.timeout.as_secs(),
            part_size: config.part_size,
            encryption: None,
        }
    }
}

impl Default for EncryptionSettings {
    fn default() -> Self {
        Self {
            public_key_path: None,
            private_key_path: None,
            user_defined_psk: false,
            chunk_size: lockbox_crypto::DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Settings {
    /// Load settings from an optional file plus the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("LOCKBOX")
                .prefix_separator("__")
                .separator("__"),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ClientError::InvalidConfig(e.to_string()))
    }

    /// Resolve into a validated [`Config`], reading PEM key files
    pub fn into_config(self) -> Result<Config> {
        let encryption = self.encryption.map(|e| e.into_config()).transpose()?;
        let config = Config {
            endpoint: self.endpoint,
            bucket: self.bucket,
            access_token: self.access_token,
            timeout: Duration::from_secs(self.timeout_secs),
            part_size: self.part_size,
            encryption,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }
}

impl EncryptionSettings {
    fn into_config(self) -> Result<EncryptionConfig> {
        let config = if self.user_defined_psk {
            EncryptionConfig::user_defined_psk()
        } else {
            let public = self.public_key_path.as_deref().map(read_pem).transpose()?;
            let private = self.private_key_path.as_deref().map(read_pem).transpose()?;
            EncryptionConfig::from_pem(public.as_deref(), private.as_deref())?
        };
        Ok(config.with_chunk_size(self.chunk_size))
    }
}

fn read_pem(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| ClientError::InvalidConfig(format!("cannot read {}: {}", path.display(), e)))
}
