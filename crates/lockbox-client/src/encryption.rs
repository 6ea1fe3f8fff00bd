//! Client-side envelope encryption
//!
//! Every object gets a fresh 16-byte PSK. The PSK encrypts the content with
//! AES-128-CTR, one keystream per `chunk_size` block, and is itself wrapped
//! with the configured RSA public key:
//! - single-shot puts carry the wrapped PSK in the `encryption-key` metadata
//! - multipart uploads carry it on the session and in a `<key>.key` side
//!   object that later parts read back
//!
//! With `user_defined_psk` the caller supplies the PSK on every call and no
//! key material is generated, wrapped or stored.

use crate::codec::{cipher_body, download, ContentCodec, SessionKeying};
use crate::config::EncryptionConfig;
use crate::context::RequestContext;
use crate::error::{ClientError, ObjectTarget, Operation, Result, TransportError};
use crate::transport::ObjectTransport;
use crate::types::{DownloadedObject, GetObjectOutput, ObjectBody, ObjectMetadata};
use async_trait::async_trait;
use lockbox_crypto::{symmetric, ChunkedCipherReader, KeyWrapper, Psk};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, instrument, warn};

/// Metadata name of the wrapped PSK
pub const ENCRYPTION_KEY_HEADER: &str = "encryption-key";

/// Suffix of the side object holding a multipart session's wrapped PSK
pub const SESSION_KEY_SUFFIX: &str = ".key";

/// Key of the side object for `key`
pub fn session_key_name(key: &str) -> String {
    format!("{}{}", key, SESSION_KEY_SUFFIX)
}

/// Envelope encryption codec
pub struct EnvelopeCipher {
    transport: Arc<dyn ObjectTransport>,
    keys: KeyWrapper,
    user_defined_psk: bool,
    chunk_size: usize,
}

impl EnvelopeCipher {
    /// Create a cipher; the transport is used only for the side object
    pub fn new(transport: Arc<dyn ObjectTransport>, config: &EncryptionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            keys: config.keys.clone(),
            user_defined_psk: config.user_defined_psk,
            chunk_size: config.chunk_size,
        })
    }

    /// Whether callers must supply every PSK
    pub fn is_user_defined_psk(&self) -> bool {
        self.user_defined_psk
    }

    /// Draw a fresh PSK
    pub fn generate_psk(&self) -> Psk {
        Psk::generate()
    }

    /// Wrap a PSK with the public key
    pub fn wrap_psk(&self, psk: &Psk) -> Result<String> {
        Ok(self.keys.wrap(psk)?)
    }

    /// Unwrap a hex-encoded PSK with the private key
    pub fn unwrap_psk(&self, wrapped: &str) -> Result<Psk> {
        Ok(self.keys.unwrap(wrapped)?)
    }

    /// Encrypt a buffer in one shot
    pub fn encrypt(&self, psk: &Psk, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(symmetric::encrypt(psk, plaintext)?)
    }

    /// Decrypt a buffer in one shot
    pub fn decrypt(&self, psk: &Psk, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(symmetric::decrypt(psk, ciphertext)?)
    }

    /// Stream a reader through the chunked transform. Encryption and
    /// decryption are the same operation.
    pub fn cipher_reader<R: AsyncRead>(&self, reader: R, psk: Psk) -> Result<ChunkedCipherReader<R>> {
        Ok(ChunkedCipherReader::new(reader, psk, self.chunk_size)?)
    }

    /// Write a wrapped PSK to the side object of `target`
    #[instrument(skip(self, ctx, target, wrapped), fields(object = %target))]
    pub async fn put_session_key(
        &self,
        ctx: &RequestContext,
        target: &ObjectTarget,
        wrapped: &str,
    ) -> Result<()> {
        let side = side_target(target);
        let body = ObjectBody::from(wrapped.as_bytes().to_vec());
        ctx.run(
            Operation::PutSessionKey,
            &side,
            self.transport
                .put_object(&side.bucket, &side.key, body, &ObjectMetadata::new()),
        )
        .await?;
        debug!(key = %side.key, "stored session key");
        Ok(())
    }

    /// Read and unwrap the PSK from the side object of `target`
    #[instrument(skip(self, ctx, target), fields(object = %target))]
    pub async fn get_session_key(&self, ctx: &RequestContext, target: &ObjectTarget) -> Result<Psk> {
        let side = side_target(target);
        let wrapped = ctx
            .run(Operation::GetSessionKey, &side, async {
                let mut object = self.transport.get_object(&side.bucket, &side.key).await?;
                let mut wrapped = String::new();
                object.body.read_to_string(&mut wrapped).await?;
                Ok::<_, TransportError>(wrapped)
            })
            .await?;

        let wrapped = wrapped.trim();
        if wrapped.is_empty() {
            return Err(ClientError::NoEncryptionKey {
                bucket: side.bucket,
                key: side.key,
            });
        }
        self.unwrap_psk(wrapped)
    }

    /// Delete the side object of `target`
    #[instrument(skip(self, ctx, target), fields(object = %target))]
    pub async fn remove_session_key(&self, ctx: &RequestContext, target: &ObjectTarget) -> Result<()> {
        let side = side_target(target);
        ctx.run(
            Operation::DeleteSessionKey,
            &side,
            self.transport.delete_object(&side.bucket, &side.key),
        )
        .await?;
        debug!(key = %side.key, "removed session key");
        Ok(())
    }

    fn require_psk(&self, user_psk: Option<&Psk>) -> Result<()> {
        if self.user_defined_psk && user_psk.is_none() {
            return Err(ClientError::MissingPsk);
        }
        Ok(())
    }

    /// PSK for a fetched object: the caller's, or the unwrapped metadata key
    fn object_psk(
        &self,
        target: &ObjectTarget,
        user_psk: Option<Psk>,
        metadata: &ObjectMetadata,
    ) -> Result<Psk> {
        self.require_psk(user_psk.as_ref())?;
        if let Some(psk) = user_psk {
            return Ok(psk);
        }
        let wrapped = metadata
            .get(ENCRYPTION_KEY_HEADER)
            .filter(|w| !w.is_empty())
            .ok_or_else(|| ClientError::NoEncryptionKey {
                bucket: target.bucket.clone(),
                key: target.key.clone(),
            })?;
        self.unwrap_psk(wrapped)
    }
}

impl std::fmt::Debug for EnvelopeCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeCipher")
            .field("keys", &self.keys)
            .field("user_defined_psk", &self.user_defined_psk)
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

fn side_target(target: &ObjectTarget) -> ObjectTarget {
    ObjectTarget {
        key: session_key_name(&target.key),
        ..target.clone()
    }
}

#[async_trait]
impl ContentCodec for EnvelopeCipher {
    fn name(&self) -> &'static str {
        "envelope"
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn check_psk(&self, user_psk: Option<&Psk>) -> Result<()> {
        self.require_psk(user_psk)
    }

    fn begin_session(&self, user_psk: Option<&Psk>) -> Result<SessionKeying> {
        self.require_psk(user_psk)?;
        if let Some(psk) = user_psk {
            return Ok(SessionKeying {
                psk: Some(psk.clone()),
                ..Default::default()
            });
        }

        let psk = self.generate_psk();
        let wrapped = self.wrap_psk(&psk)?;
        Ok(SessionKeying {
            metadata: HashMap::from([(ENCRYPTION_KEY_HEADER.to_string(), wrapped.clone())]),
            psk: Some(psk),
            wrapped_key: Some(wrapped),
        })
    }

    async fn store_session_key(
        &self,
        ctx: &RequestContext,
        target: &ObjectTarget,
        keying: &SessionKeying,
    ) -> Result<()> {
        match &keying.wrapped_key {
            Some(wrapped) => self.put_session_key(ctx, target, wrapped).await,
            None => Ok(()),
        }
    }

    async fn part_key(
        &self,
        ctx: &RequestContext,
        target: &ObjectTarget,
        user_psk: Option<&Psk>,
    ) -> Result<Option<Psk>> {
        self.require_psk(user_psk)?;
        match user_psk {
            Some(psk) => Ok(Some(psk.clone())),
            None => self.get_session_key(ctx, target).await.map(Some),
        }
    }

    async fn end_session(&self, ctx: &RequestContext, target: &ObjectTarget) {
        if self.user_defined_psk {
            return;
        }
        if let Err(e) = self.remove_session_key(ctx, target).await {
            warn!(object = %target, error = %e, "failed to remove session key object");
        }
    }

    fn seal_object(
        &self,
        _target: &ObjectTarget,
        user_psk: Option<Psk>,
        body: ObjectBody,
        mut metadata: ObjectMetadata,
    ) -> Result<(ObjectBody, ObjectMetadata)> {
        self.require_psk(user_psk.as_ref())?;
        let psk = match user_psk {
            Some(psk) => psk,
            None => {
                let psk = self.generate_psk();
                metadata
                    .user_metadata
                    .insert(ENCRYPTION_KEY_HEADER.to_string(), self.wrap_psk(&psk)?);
                psk
            }
        };
        Ok((cipher_body(body, psk, self.chunk_size)?, metadata))
    }

    fn open_object(
        &self,
        target: &ObjectTarget,
        user_psk: Option<Psk>,
        object: GetObjectOutput,
    ) -> Result<DownloadedObject> {
        let psk = self.object_psk(target, user_psk, &object.metadata)?;
        download(object, Some(psk), self.chunk_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_keys;
    use crate::transport::MemoryTransport;
    use lockbox_crypto::decrypt_chunked;

    fn cipher(transport: &MemoryTransport) -> EnvelopeCipher {
        let config = EncryptionConfig::new(test_keys()).with_chunk_size(8);
        EnvelopeCipher::new(Arc::new(transport.clone()), &config).unwrap()
    }

    async fn read_all(mut object: DownloadedObject) -> Vec<u8> {
        let mut data = Vec::new();
        object.body.read_to_end(&mut data).await.unwrap();
        data
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let cipher = cipher(&MemoryTransport::new());
        let psk = cipher.generate_psk();
        let wrapped = cipher.wrap_psk(&psk).unwrap();

        assert!(hex::decode(&wrapped).is_ok());
        assert_eq!(cipher.unwrap_psk(&wrapped).unwrap(), psk);
    }

    #[test]
    fn test_unwrap_without_private_key() {
        let keys = KeyWrapper::new(test_keys().public_key().cloned(), None);
        let config = EncryptionConfig::new(keys);
        let cipher = EnvelopeCipher::new(Arc::new(MemoryTransport::new()), &config).unwrap();

        let err = cipher.unwrap_psk("00ff").unwrap_err();
        assert!(matches!(err, ClientError::NoPrivateKey));
    }

    #[test]
    fn test_single_shot_roundtrip() {
        let cipher = cipher(&MemoryTransport::new());
        let psk = cipher.generate_psk();
        let ciphertext = cipher.encrypt(&psk, b"attack at dawn").unwrap();

        assert_eq!(ciphertext.len(), 14);
        assert_eq!(cipher.decrypt(&psk, &ciphertext).unwrap(), b"attack at dawn");
    }

    #[test]
    fn test_rejects_config_without_public_key() {
        let config = EncryptionConfig::new(KeyWrapper::default());
        let err = EnvelopeCipher::new(Arc::new(MemoryTransport::new()), &config).unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_session_key_side_object() {
        let transport = MemoryTransport::new();
        let cipher = cipher(&transport);
        let ctx = RequestContext::background();
        let target = ObjectTarget::object("b", "movie.mp4");

        let keying = cipher.begin_session(None).unwrap();
        assert_eq!(
            keying.metadata.get(ENCRYPTION_KEY_HEADER),
            keying.wrapped_key.as_ref()
        );
        cipher.store_session_key(&ctx, &target, &keying).await.unwrap();
        assert!(transport.contains_object("b", "movie.mp4.key"));

        let recovered = cipher.part_key(&ctx, &target, None).await.unwrap();
        assert_eq!(recovered, keying.psk);

        cipher.end_session(&ctx, &target).await;
        assert!(!transport.contains_object("b", "movie.mp4.key"));
    }

    #[tokio::test]
    async fn test_missing_side_object_is_transport_error() {
        let cipher = cipher(&MemoryTransport::new());
        let err = cipher
            .get_session_key(&RequestContext::background(), &ObjectTarget::object("b", "k"))
            .await
            .unwrap_err();
        assert_eq!(err.operation(), Some(Operation::GetSessionKey));
    }

    #[tokio::test]
    async fn test_caller_psk_is_not_stored() {
        let transport = MemoryTransport::new();
        let cipher = cipher(&transport);
        let psk = Psk::generate();

        let keying = cipher.begin_session(Some(&psk)).unwrap();
        assert!(keying.wrapped_key.is_none());
        assert!(keying.metadata.is_empty());

        cipher
            .store_session_key(&RequestContext::background(), &ObjectTarget::object("b", "k"), &keying)
            .await
            .unwrap();
        assert_eq!(transport.call_count(Operation::PutObject), 0);
    }

    #[tokio::test]
    async fn test_object_roundtrip_through_metadata() {
        let transport = MemoryTransport::new();
        let cipher = cipher(&transport);
        let target = ObjectTarget::object("b", "doc.txt");
        let plaintext = b"twenty-one bytes long".to_vec();

        let (body, metadata) = cipher
            .seal_object(&target, None, ObjectBody::from(plaintext.clone()), ObjectMetadata::new())
            .unwrap();
        transport.put_object("b", "doc.txt", body, &metadata).await.unwrap();

        let stored = transport.object("b", "doc.txt").unwrap();
        assert_eq!(stored.len(), plaintext.len());
        assert_ne!(&stored[..], &plaintext[..]);

        let wrapped = metadata.get(ENCRYPTION_KEY_HEADER).unwrap();
        let psk = cipher.unwrap_psk(wrapped).unwrap();
        assert_eq!(decrypt_chunked(&psk, &stored, 8).unwrap(), plaintext);

        let fetched = transport.get_object("b", "doc.txt").await.unwrap();
        let opened = cipher.open_object(&target, None, fetched).unwrap();
        assert_eq!(read_all(opened).await, plaintext);
    }

    #[tokio::test]
    async fn test_open_unencrypted_object() {
        let transport = MemoryTransport::new();
        transport
            .put_object("b", "plain", ObjectBody::from(b"x".to_vec()), &ObjectMetadata::new())
            .await
            .unwrap();

        let fetched = transport.get_object("b", "plain").await.unwrap();
        let err = cipher(&transport)
            .open_object(&ObjectTarget::object("b", "plain"), None, fetched)
            .unwrap_err();
        assert!(matches!(err, ClientError::NoEncryptionKey { .. }));
    }

    #[test]
    fn test_user_defined_mode_requires_psk() {
        let config = EncryptionConfig::user_defined_psk();
        let cipher = EnvelopeCipher::new(Arc::new(MemoryTransport::new()), &config).unwrap();

        assert!(matches!(cipher.check_psk(None), Err(ClientError::MissingPsk)));
        assert!(matches!(cipher.begin_session(None), Err(ClientError::MissingPsk)));
        assert!(cipher.check_psk(Some(&Psk::generate())).is_ok());
    }
}
