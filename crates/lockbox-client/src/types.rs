//! Common types for the client SDK

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// A boxed object body reader
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Object metadata
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Content type
    pub content_type: Option<String>,
    /// User-defined metadata (sent as `x-amz-meta-*`)
    pub user_metadata: HashMap<String, String>,
}

impl ObjectMetadata {
    /// Create new empty metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Set content type
    pub fn with_content_type(mut self, ct: impl Into<String>) -> Self {
        self.content_type = Some(ct.into());
        self
    }

    /// Add user metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_metadata.insert(key.into(), value.into());
        self
    }

    /// Look up a user metadata value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.user_metadata.get(key).map(String::as_str)
    }
}

/// An object body on its way to storage
pub struct ObjectBody {
    /// Content reader
    pub reader: ObjectReader,
    /// Length in bytes, when known up front
    pub content_length: Option<u64>,
}

impl ObjectBody {
    /// Wrap a reader
    pub fn from_reader(reader: impl AsyncRead + Send + 'static, content_length: Option<u64>) -> Self {
        Self {
            reader: Box::pin(reader),
            content_length,
        }
    }
}

impl From<Bytes> for ObjectBody {
    fn from(data: Bytes) -> Self {
        let len = data.len() as u64;
        Self::from_reader(std::io::Cursor::new(data), Some(len))
    }
}

impl From<Vec<u8>> for ObjectBody {
    fn from(data: Vec<u8>) -> Self {
        Bytes::from(data).into()
    }
}

impl From<&'static [u8]> for ObjectBody {
    fn from(data: &'static [u8]) -> Self {
        Bytes::from_static(data).into()
    }
}

impl std::fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBody")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Raw get result from a transport
pub struct GetObjectOutput {
    /// Body reader
    pub body: ObjectReader,
    /// Object metadata
    pub metadata: ObjectMetadata,
    /// Content length
    pub content_length: u64,
    /// ETag
    pub etag: String,
}

impl std::fmt::Debug for GetObjectOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetObjectOutput")
            .field("metadata", &self.metadata)
            .field("content_length", &self.content_length)
            .field("etag", &self.etag)
            .finish_non_exhaustive()
    }
}

/// A downloaded object, decrypted as it is read
pub struct DownloadedObject {
    /// Plaintext reader
    pub body: ObjectReader,
    /// Content length (ciphertext and plaintext lengths are equal)
    pub content_length: u64,
    /// Content type
    pub content_type: Option<String>,
    /// ETag
    pub etag: String,
}

impl std::fmt::Debug for DownloadedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadedObject")
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .field("etag", &self.etag)
            .finish_non_exhaustive()
    }
}

/// Put object result
#[derive(Clone, Debug)]
pub struct PutObjectResult {
    /// ETag of the uploaded object
    pub etag: String,
}

/// An in-progress upload session as listed by the storage service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSummary {
    /// Object key
    pub key: String,
    /// Storage-side session (upload) ID
    pub session_id: String,
    /// When the session was initiated
    pub initiated: Option<DateTime<Utc>>,
}

/// A part accepted by the storage service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRecord {
    /// Part number (1-based)
    pub part_number: u32,
    /// Entity tag reported for the part
    pub etag: String,
}

/// Describes one part of a chunked upload
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UploadPartRequest {
    /// Key of the eventual whole object
    pub upload_key: String,
    /// Content type of the whole object
    pub content_type: Option<String>,
    /// 1-based ordinal of this part
    pub chunk_number: u32,
    /// Expected final part count
    pub total_chunks: u32,
    /// Original file name, for diagnostics only
    pub file_name: Option<String>,
    /// Bucket the caller expects; must match the client's bucket when set
    pub bucket: Option<String>,
}

impl UploadPartRequest {
    /// Create a request for part `chunk_number` of `total_chunks`
    pub fn new(upload_key: impl Into<String>, chunk_number: u32, total_chunks: u32) -> Self {
        Self {
            upload_key: upload_key.into(),
            chunk_number,
            total_chunks,
            ..Default::default()
        }
    }

    /// Set content type
    pub fn with_content_type(mut self, ct: impl Into<String>) -> Self {
        self.content_type = Some(ct.into());
        self
    }

    /// Set the diagnostic file name
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Pin the request to a bucket
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }
}

/// Result of submitting one part
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadPartOutcome {
    /// Entity tag of the accepted part
    pub etag: String,
    /// Whether this call observed every part and completed the upload
    pub all_parts_uploaded: bool,
}
