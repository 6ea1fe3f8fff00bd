//! Main client implementation

use crate::codec::{ContentCodec, PlainCodec};
use crate::context::RequestContext;
use crate::coordinator::UploadCoordinator;
use crate::encryption::EnvelopeCipher;
use crate::error::{ClientError, ObjectTarget, Operation, Result};
use crate::multipart::{self, ProgressCallback};
use crate::transport::{HttpTransport, ObjectTransport};
use crate::types::*;
use crate::Config;
use bytes::Bytes;
use lockbox_crypto::Psk;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{info, instrument};

/// Lockbox storage client
///
/// Uploads, downloads and multipart coordination for one bucket. Content is
/// encrypted client-side when the configuration carries an
/// [`crate::EncryptionConfig`].
pub struct StorageClient {
    config: Config,
    transport: Arc<dyn ObjectTransport>,
    codec: Arc<dyn ContentCodec>,
    coordinator: UploadCoordinator,
}

impl StorageClient {
    /// Create a client speaking HTTP to the configured endpoint
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let transport = Arc::new(HttpTransport::new(&config)?);
        Self::with_transport(config, transport)
    }

    /// Create a client over any transport
    pub fn with_transport(config: Config, transport: Arc<dyn ObjectTransport>) -> Result<Self> {
        config.validate()?;

        let codec: Arc<dyn ContentCodec> = match &config.encryption {
            Some(encryption) => Arc::new(EnvelopeCipher::new(Arc::clone(&transport), encryption)?),
            None => Arc::new(PlainCodec::new()),
        };
        let coordinator =
            UploadCoordinator::new(config.bucket.clone(), Arc::clone(&transport), Arc::clone(&codec));

        info!(bucket = %config.bucket, codec = codec.name(), "storage client ready");
        Ok(Self {
            config,
            transport,
            codec,
            coordinator,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The bucket every operation targets
    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    /// Whether content is encrypted client-side
    pub fn is_encrypting(&self) -> bool {
        self.config.encryption.is_some()
    }

    // ==================== Multipart Operations ====================

    /// Upload one part of a chunked upload
    pub async fn upload_part(
        &self,
        ctx: &RequestContext,
        request: &UploadPartRequest,
        payload: impl Into<Bytes>,
    ) -> Result<UploadPartOutcome> {
        self.coordinator
            .submit_part(ctx, request, payload.into(), None)
            .await
    }

    /// Upload one part encrypted with a caller-supplied PSK
    pub async fn upload_part_with_psk(
        &self,
        ctx: &RequestContext,
        request: &UploadPartRequest,
        payload: impl Into<Bytes>,
        psk: &[u8],
    ) -> Result<UploadPartOutcome> {
        let psk = parse_psk(psk)?;
        self.coordinator
            .submit_part(ctx, request, payload.into(), Some(psk))
            .await
    }

    /// Check whether a part has been recorded
    pub async fn check_part_uploaded(
        &self,
        ctx: &RequestContext,
        request: &UploadPartRequest,
    ) -> Result<bool> {
        self.coordinator.check_part_uploaded(ctx, request).await
    }

    /// Abort the in-progress upload for `key`
    pub async fn abort_upload(&self, ctx: &RequestContext, key: &str) -> Result<()> {
        self.coordinator.abort(ctx, key).await
    }

    /// Upload a reader of known length in `part_size` parts
    pub async fn upload_reader<R: AsyncRead + Unpin + Send>(
        &self,
        ctx: &RequestContext,
        key: &str,
        content_type: Option<&str>,
        reader: R,
        total_len: u64,
        progress: Option<ProgressCallback>,
    ) -> Result<UploadPartOutcome> {
        multipart::upload_reader(self, ctx, key, content_type, reader, total_len, progress).await
    }

    // ==================== Object Operations ====================

    /// Put an object
    pub async fn put_object(
        &self,
        ctx: &RequestContext,
        key: &str,
        body: impl Into<ObjectBody>,
    ) -> Result<PutObjectResult> {
        self.put(ctx, key, body.into(), ObjectMetadata::new(), None).await
    }

    /// Put an object with metadata
    pub async fn put_object_with_metadata(
        &self,
        ctx: &RequestContext,
        key: &str,
        body: impl Into<ObjectBody>,
        metadata: ObjectMetadata,
    ) -> Result<PutObjectResult> {
        self.put(ctx, key, body.into(), metadata, None).await
    }

    /// Put an object encrypted with a caller-supplied PSK
    pub async fn put_object_with_psk(
        &self,
        ctx: &RequestContext,
        key: &str,
        body: impl Into<ObjectBody>,
        psk: &[u8],
    ) -> Result<PutObjectResult> {
        let psk = parse_psk(psk)?;
        self.put(ctx, key, body.into(), ObjectMetadata::new(), Some(psk))
            .await
    }

    /// Get an object, decrypting as it is read
    pub async fn get_object(&self, ctx: &RequestContext, key: &str) -> Result<DownloadedObject> {
        self.get(ctx, key, None).await
    }

    /// Get an object encrypted with a caller-supplied PSK
    pub async fn get_object_with_psk(
        &self,
        ctx: &RequestContext,
        key: &str,
        psk: &[u8],
    ) -> Result<DownloadedObject> {
        let psk = parse_psk(psk)?;
        self.get(ctx, key, Some(psk)).await
    }

    /// Delete an object
    #[instrument(skip(self, ctx), fields(bucket = %self.config.bucket))]
    pub async fn delete_object(&self, ctx: &RequestContext, key: &str) -> Result<()> {
        let target = self.target(key, false)?;
        ctx.run(
            Operation::DeleteObject,
            &target,
            self.transport.delete_object(&target.bucket, &target.key),
        )
        .await
    }

    // ==================== Helper Methods ====================

    fn target(&self, key: &str, user_psk: bool) -> Result<ObjectTarget> {
        if key.is_empty() {
            return Err(ClientError::EmptyKey);
        }
        Ok(ObjectTarget::object(&self.config.bucket, key).with_user_psk(user_psk))
    }

    #[instrument(skip(self, ctx, body, metadata, psk), fields(bucket = %self.config.bucket, user_psk = psk.is_some()))]
    async fn put(
        &self,
        ctx: &RequestContext,
        key: &str,
        body: ObjectBody,
        metadata: ObjectMetadata,
        psk: Option<Psk>,
    ) -> Result<PutObjectResult> {
        let target = self.target(key, psk.is_some())?;
        self.codec.check_psk(psk.as_ref())?;
        ctx.check(Operation::PutObject)?;

        let (body, metadata) = self.codec.seal_object(&target, psk, body, metadata)?;
        ctx.run(
            Operation::PutObject,
            &target,
            self.transport
                .put_object(&target.bucket, &target.key, body, &metadata),
        )
        .await
    }

    #[instrument(skip(self, ctx, psk), fields(bucket = %self.config.bucket, user_psk = psk.is_some()))]
    async fn get(
        &self,
        ctx: &RequestContext,
        key: &str,
        psk: Option<Psk>,
    ) -> Result<DownloadedObject> {
        let target = self.target(key, psk.is_some())?;
        self.codec.check_psk(psk.as_ref())?;

        let object = ctx
            .run(
                Operation::GetObject,
                &target,
                self.transport.get_object(&target.bucket, &target.key),
            )
            .await?;
        self.codec.open_object(&target, psk, object)
    }
}

impl std::fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageClient")
            .field("endpoint", &self.config.endpoint)
            .field("bucket", &self.config.bucket)
            .field("codec", &self.codec.name())
            .finish_non_exhaustive()
    }
}

/// Validate caller-supplied PSK bytes
pub fn parse_psk(bytes: &[u8]) -> Result<Psk> {
    if bytes.is_empty() {
        return Err(ClientError::MissingPsk);
    }
    Psk::from_bytes(bytes).map_err(|e| ClientError::InvalidPsk(e.to_string()))
}
