//! Storage transport capability
//!
//! The narrow set of S3-style calls the upload coordinator and the envelope
//! codec need. Implementations own the wire protocol, authentication and any
//! transport-level retries; callers above this layer never retry.

mod http;
mod memory;

pub use http::HttpTransport;
pub use memory::MemoryTransport;

use crate::error::TransportResult;
use crate::types::{
    GetObjectOutput, ObjectBody, ObjectMetadata, PartRecord, PutObjectResult, SessionSummary,
};
use async_trait::async_trait;
use bytes::Bytes;

/// Object storage operations, all keyed by bucket and object key
#[async_trait]
pub trait ObjectTransport: Send + Sync {
    /// Start a multipart session; `metadata` applies to the finished object
    async fn create_session(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> TransportResult<String>;

    /// List every in-progress session in a bucket
    async fn list_sessions(&self, bucket: &str) -> TransportResult<Vec<SessionSummary>>;

    /// Upload one part and return its entity tag
    async fn submit_part(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> TransportResult<String>;

    /// List every part recorded for a session
    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
    ) -> TransportResult<Vec<PartRecord>>;

    /// Finalize a session from parts ordered by part number
    async fn complete_session(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
        parts: &[PartRecord],
    ) -> TransportResult<String>;

    /// Discard a session and its parts
    async fn abort_session(&self, bucket: &str, key: &str, session_id: &str)
        -> TransportResult<()>;

    /// Store a whole object
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ObjectBody,
        metadata: &ObjectMetadata,
    ) -> TransportResult<PutObjectResult>;

    /// Fetch a whole object as a stream
    async fn get_object(&self, bucket: &str, key: &str) -> TransportResult<GetObjectOutput>;

    /// Delete an object; deleting a missing object succeeds
    async fn delete_object(&self, bucket: &str, key: &str) -> TransportResult<()>;
}
