//! Multipart upload coordination
//!
//! Drives one object's chunked upload to completion, one part per call:
//!
//! ```text
//! NoSession ──create──▶ SessionOpen ──part──▶ PartsAccumulating ──all parts──▶ Complete
//!                                                   ▲        │
//!                                                   └─part───┘
//! ```
//!
//! Completion is triggered by whichever call first observes a full part
//! listing. Nothing is cached between calls; progress is always re-derived by
//! listing parts on the storage service.

use crate::codec::ContentCodec;
use crate::context::RequestContext;
use crate::error::{ClientError, ObjectTarget, Operation, Result};
use crate::transport::ObjectTransport;
use crate::types::{ObjectMetadata, PartRecord, UploadPartOutcome, UploadPartRequest};
use bytes::Bytes;
use dashmap::DashMap;
use lockbox_crypto::Psk;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

/// Serializes session resolution per object
#[derive(Debug, Default)]
struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    async fn acquire(&self, key: String) -> KeyGuard<'_> {
        let lock = self.locks.entry(key.clone()).or_default().clone();
        // Built before waiting so a cancelled waiter still prunes the entry
        // once its handle on the lock is gone
        let mut pending = KeyGuard {
            locks: self,
            key,
            guard: None,
        };
        pending.guard = Some(lock.lock_owned().await);
        pending
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

struct KeyGuard<'a> {
    locks: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own handle left means nobody is waiting
        self.locks
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Part numbers present are exactly `1..=total`
fn all_parts_present(parts: &[PartRecord], total: u32) -> bool {
    let numbers: BTreeSet<u32> = parts.iter().map(|p| p.part_number).collect();
    numbers.len() == total as usize && numbers.into_iter().eq(1..=total)
}

/// Coordinates multipart uploads for one bucket
pub struct UploadCoordinator {
    bucket: String,
    transport: Arc<dyn ObjectTransport>,
    codec: Arc<dyn ContentCodec>,
    locks: KeyedLocks,
}

impl UploadCoordinator {
    /// Create a coordinator for `bucket`
    pub fn new(
        bucket: impl Into<String>,
        transport: Arc<dyn ObjectTransport>,
        codec: Arc<dyn ContentCodec>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            transport,
            codec,
            locks: KeyedLocks::default(),
        }
    }

    /// The bucket every upload targets
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Submit one part, completing the upload if it was the last one missing
    #[instrument(
        skip(self, ctx, request, payload, user_psk),
        fields(
            bucket = %self.bucket,
            key = %request.upload_key,
            chunk = request.chunk_number,
            total = request.total_chunks,
            codec = self.codec.name(),
        )
    )]
    pub async fn submit_part(
        &self,
        ctx: &RequestContext,
        request: &UploadPartRequest,
        payload: Bytes,
        user_psk: Option<Psk>,
    ) -> Result<UploadPartOutcome> {
        let target = self.validate(ctx, request, user_psk.is_some())?;
        self.codec.check_psk(user_psk.as_ref())?;

        let (session_id, in_hand) = {
            let _guard = self.locks.acquire(self.lock_key(&target)).await;
            self.resolve_or_create(ctx, &target, request, user_psk.as_ref())
                .await?
        };

        let psk = match in_hand {
            Some(psk) => Some(psk),
            None => self.codec.part_key(ctx, &target, user_psk.as_ref()).await?,
        };

        if psk.is_some()
            && request.chunk_number < request.total_chunks
            && payload.len() % self.codec.chunk_size() != 0
        {
            warn!(
                len = payload.len(),
                chunk_size = self.codec.chunk_size(),
                "non-final part is not a multiple of the chunk size; whole-object decryption will misalign"
            );
        }
        let body = self.codec.seal_part(psk.as_ref(), payload)?;

        let etag = ctx
            .run(
                Operation::SubmitPart,
                &target,
                self.transport.submit_part(
                    &target.bucket,
                    &target.key,
                    &session_id,
                    request.chunk_number,
                    body,
                ),
            )
            .await?;
        debug!(%etag, "part accepted");

        let all_parts_uploaded = match self.list_parts(ctx, &target, &session_id).await {
            Ok(parts) => {
                self.complete_if_ready(ctx, &target, &session_id, request.total_chunks, parts)
                    .await?
            }
            Err(ClientError::Transport { source, .. }) if source.is_no_such_upload() => {
                warn!(%session_id, "session finalized by a concurrent caller after this part was accepted");
                true
            }
            Err(e) => return Err(e),
        };

        Ok(UploadPartOutcome {
            etag,
            all_parts_uploaded,
        })
    }

    /// Check whether a part is recorded, completing the upload if every part is
    ///
    /// Fails with [`ClientError::KeyNotFoundInUploads`] when no session exists
    /// and [`ClientError::ChunkNumberNotFound`] when the part is missing.
    #[instrument(
        skip(self, ctx, request),
        fields(
            bucket = %self.bucket,
            key = %request.upload_key,
            chunk = request.chunk_number,
            total = request.total_chunks,
        )
    )]
    pub async fn check_part_uploaded(
        &self,
        ctx: &RequestContext,
        request: &UploadPartRequest,
    ) -> Result<bool> {
        let target = self.validate(ctx, request, false)?;

        let session_id = {
            let _guard = self.locks.acquire(self.lock_key(&target)).await;
            self.find_session(ctx, &target).await?
        }
        .ok_or_else(|| ClientError::KeyNotFoundInUploads {
            bucket: target.bucket.clone(),
            key: target.key.clone(),
        })?;

        let parts = self.list_parts(ctx, &target, &session_id).await?;
        let has_chunk = parts.iter().any(|p| p.part_number == request.chunk_number);

        if self
            .complete_if_ready(ctx, &target, &session_id, request.total_chunks, parts)
            .await?
        {
            return Ok(true);
        }
        if has_chunk {
            return Ok(true);
        }

        Err(ClientError::ChunkNumberNotFound {
            bucket: target.bucket,
            key: target.key,
            chunk_number: request.chunk_number,
        })
    }

    /// Abort the in-progress upload for `key` and drop its key material
    #[instrument(skip(self, ctx), fields(bucket = %self.bucket))]
    pub async fn abort(&self, ctx: &RequestContext, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(ClientError::EmptyKey);
        }
        ctx.check(Operation::ListSessions)?;
        let target = ObjectTarget::object(&self.bucket, key);

        let _guard = self.locks.acquire(self.lock_key(&target)).await;
        let session_id = self.find_session(ctx, &target).await?.ok_or_else(|| {
            ClientError::KeyNotFoundInUploads {
                bucket: target.bucket.clone(),
                key: target.key.clone(),
            }
        })?;

        ctx.run(
            Operation::AbortSession,
            &target,
            self.transport
                .abort_session(&target.bucket, &target.key, &session_id),
        )
        .await?;
        info!(%session_id, "aborted upload session");

        self.codec.end_session(ctx, &target).await;
        Ok(())
    }

    fn lock_key(&self, target: &ObjectTarget) -> String {
        format!("{}/{}", target.bucket, target.key)
    }

    fn validate(
        &self,
        ctx: &RequestContext,
        request: &UploadPartRequest,
        user_psk: bool,
    ) -> Result<ObjectTarget> {
        if request.upload_key.is_empty() {
            return Err(ClientError::EmptyKey);
        }
        if let Some(bucket) = &request.bucket {
            if *bucket != self.bucket {
                return Err(ClientError::BucketMismatch {
                    expected: self.bucket.clone(),
                    actual: bucket.clone(),
                });
            }
        }
        if request.total_chunks == 0
            || request.chunk_number == 0
            || request.chunk_number > request.total_chunks
        {
            return Err(ClientError::InvalidChunk {
                chunk_number: request.chunk_number,
                total_chunks: request.total_chunks,
            });
        }
        ctx.check(Operation::ListSessions)?;

        Ok(ObjectTarget::object(&self.bucket, &request.upload_key)
            .with_chunk(request.chunk_number, request.total_chunks)
            .with_user_psk(user_psk))
    }

    async fn find_session(&self, ctx: &RequestContext, target: &ObjectTarget) -> Result<Option<String>> {
        let sessions = ctx
            .run(
                Operation::ListSessions,
                target,
                self.transport.list_sessions(&target.bucket),
            )
            .await?;
        Ok(sessions
            .into_iter()
            .find(|s| s.key == target.key)
            .map(|s| s.session_id))
    }

    /// Caller must hold the key lock
    async fn resolve_or_create(
        &self,
        ctx: &RequestContext,
        target: &ObjectTarget,
        request: &UploadPartRequest,
        user_psk: Option<&Psk>,
    ) -> Result<(String, Option<Psk>)> {
        if let Some(session_id) = self.find_session(ctx, target).await? {
            debug!(%session_id, "reusing upload session");
            return Ok((session_id, None));
        }

        let keying = self.codec.begin_session(user_psk)?;
        let metadata = ObjectMetadata {
            content_type: request.content_type.clone(),
            user_metadata: keying.metadata.clone(),
        };

        let session_id = ctx
            .run(
                Operation::CreateSession,
                target,
                self.transport
                    .create_session(&target.bucket, &target.key, &metadata),
            )
            .await?;
        info!(%session_id, file_name = ?request.file_name, "created upload session");

        if let Err(e) = self.codec.store_session_key(ctx, target, &keying).await {
            // Later parts could not recover the PSK
            if let Err(abort_err) = self
                .transport
                .abort_session(&target.bucket, &target.key, &session_id)
                .await
            {
                warn!(%session_id, error = %abort_err, "failed to abort session after key store failure");
            }
            return Err(e);
        }

        Ok((session_id, keying.psk))
    }

    async fn list_parts(
        &self,
        ctx: &RequestContext,
        target: &ObjectTarget,
        session_id: &str,
    ) -> Result<Vec<PartRecord>> {
        ctx.run(
            Operation::ListParts,
            target,
            self.transport
                .list_parts(&target.bucket, &target.key, session_id),
        )
        .await
    }

    async fn complete_if_ready(
        &self,
        ctx: &RequestContext,
        target: &ObjectTarget,
        session_id: &str,
        total: u32,
        mut parts: Vec<PartRecord>,
    ) -> Result<bool> {
        if !all_parts_present(&parts, total) {
            if parts.len() >= total as usize {
                warn!(
                    listed = parts.len(),
                    total, "part count reached the total but part numbers are not contiguous"
                );
            }
            debug!(listed = parts.len(), total, "upload not complete yet");
            return Ok(false);
        }

        parts.sort_by_key(|p| p.part_number);
        parts.dedup_by_key(|p| p.part_number);

        match ctx
            .run(
                Operation::CompleteSession,
                target,
                self.transport
                    .complete_session(&target.bucket, &target.key, session_id, &parts),
            )
            .await
        {
            Ok(etag) => info!(%session_id, %etag, parts = parts.len(), "upload completed"),
            Err(ClientError::Transport { source, .. }) if source.is_no_such_upload() => {
                warn!(%session_id, "upload session already finalized by a concurrent caller");
            }
            Err(e) => return Err(e),
        }

        self.codec.end_session(ctx, target).await;
        Ok(true)
    }
}

impl std::fmt::Debug for UploadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadCoordinator")
            .field("bucket", &self.bucket)
            .field("codec", &self.codec.name())
            .finish_non_exhaustive()
    }
}
