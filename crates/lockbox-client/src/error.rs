//! Client error types

use lockbox_crypto::CryptoError;
use std::fmt;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, ClientError>;

/// Result type for storage transport calls
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors raised by a storage transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// S3 API error
    #[error("S3 error ({code}): {message}")]
    S3 {
        code: String,
        message: String,
        request_id: Option<String>,
    },

    /// Object not found
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// The request could not be built
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid response
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// XML parsing error
    #[error("XML parsing error: {0}")]
    XmlParse(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Parse an S3 error from XML response
    pub fn from_s3_xml(xml: &str, status: u16) -> Self {
        let code = extract_xml_element(xml, "Code").unwrap_or_else(|| format!("HTTP{}", status));
        let message = extract_xml_element(xml, "Message").unwrap_or_else(|| "Unknown error".to_string());
        let request_id = extract_xml_element(xml, "RequestId");

        Self::S3 {
            code,
            message,
            request_id,
        }
    }

    /// Build an S3-style error from a code
    pub fn s3(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::S3 {
            code: code.into(),
            message: message.into(),
            request_id: None,
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
            || matches!(self, Self::S3 { code, .. } if code == "NoSuchKey" || code == "HTTP404")
    }

    /// Check if the upload session no longer exists
    pub fn is_no_such_upload(&self) -> bool {
        matches!(self, Self::S3 { code, .. } if code == "NoSuchUpload")
    }
}

/// The transport step an error came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    ListSessions,
    CreateSession,
    SubmitPart,
    ListParts,
    CompleteSession,
    AbortSession,
    PutObject,
    GetObject,
    DeleteObject,
    PutSessionKey,
    GetSessionKey,
    DeleteSessionKey,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ListSessions => "list sessions",
            Self::CreateSession => "create session",
            Self::SubmitPart => "submit part",
            Self::ListParts => "list parts",
            Self::CompleteSession => "complete session",
            Self::AbortSession => "abort session",
            Self::PutObject => "put object",
            Self::GetObject => "get object",
            Self::DeleteObject => "delete object",
            Self::PutSessionKey => "put session key",
            Self::GetSessionKey => "get session key",
            Self::DeleteSessionKey => "delete session key",
        };
        f.write_str(name)
    }
}

/// Where an operation was aimed, carried by every transport error
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectTarget {
    /// Bucket name
    pub bucket: String,
    /// Object key
    pub key: String,
    /// Part being submitted or checked
    pub chunk_number: Option<u32>,
    /// Expected final part count
    pub total_chunks: Option<u32>,
    /// Whether the caller supplied the PSK
    pub user_psk: bool,
}

impl ObjectTarget {
    /// Target a whole object
    pub fn object(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            ..Default::default()
        }
    }

    /// Attach part coordinates
    pub fn with_chunk(mut self, chunk_number: u32, total_chunks: u32) -> Self {
        self.chunk_number = Some(chunk_number);
        self.total_chunks = Some(total_chunks);
        self
    }

    /// Record whether a caller PSK is in use
    pub fn with_user_psk(mut self, user_psk: bool) -> Self {
        self.user_psk = user_psk;
        self
    }
}

impl fmt::Display for ObjectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)?;
        if let (Some(chunk), Some(total)) = (self.chunk_number, self.total_chunks) {
            write!(f, " (chunk {}/{})", chunk, total)?;
        }
        if self.user_psk {
            f.write_str(" [user psk]")?;
        }
        Ok(())
    }
}

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// A storage transport call failed
    #[error("{operation} failed for {target}: {source}")]
    Transport {
        operation: Operation,
        target: ObjectTarget,
        #[source]
        source: TransportError,
    },

    /// No in-progress upload exists for the key
    #[error("not uploaded: no upload in progress for {bucket}/{key}")]
    KeyNotFoundInUploads { bucket: String, key: String },

    /// The upload exists but the chunk has not been recorded
    #[error("chunk number {chunk_number} not found for {bucket}/{key}")]
    ChunkNumberNotFound {
        bucket: String,
        key: String,
        chunk_number: u32,
    },

    /// A wrapped key must be unwrapped but no private key is configured
    #[error("no private key configured")]
    NoPrivateKey,

    /// The object carries no wrapped key, so it is not encrypted
    #[error("no encryption key for object {bucket}/{key}")]
    NoEncryptionKey { bucket: String, key: String },

    /// Invalid uploader configuration
    #[error("invalid uploader configuration: {0}")]
    InvalidConfig(String),

    /// Empty object key
    #[error("object key must not be empty")]
    EmptyKey,

    /// A PSK is required but none was supplied
    #[error("a PSK is required for this operation")]
    MissingPsk,

    /// A supplied PSK has the wrong shape
    #[error("invalid PSK: {0}")]
    InvalidPsk(String),

    /// The request names a bucket other than the configured one
    #[error("bucket mismatch: client is configured for {expected}, request names {actual}")]
    BucketMismatch { expected: String, actual: String },

    /// Chunk coordinates are out of range
    #[error("invalid chunk {chunk_number} of {total_chunks}")]
    InvalidChunk { chunk_number: u32, total_chunks: u32 },

    /// The request context was cancelled
    #[error("{operation} cancelled")]
    Cancelled { operation: Operation },

    /// The request context deadline passed
    #[error("{operation} exceeded the request deadline")]
    DeadlineExceeded { operation: Operation },

    /// Encryption error
    #[error("encryption error: {0}")]
    Crypto(#[source] CryptoError),

    /// Reading caller-supplied content failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CryptoError> for ClientError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::NoPrivateKey => ClientError::NoPrivateKey,
            other => ClientError::Crypto(other),
        }
    }
}

impl ClientError {
    /// Wrap a transport failure with its operation and target
    pub fn transport(operation: Operation, target: &ObjectTarget, source: TransportError) -> Self {
        Self::Transport {
            operation,
            target: target.clone(),
            source,
        }
    }

    /// The upload or chunk is not there yet; polling may succeed later
    pub fn is_not_uploaded(&self) -> bool {
        matches!(
            self,
            Self::KeyNotFoundInUploads { .. } | Self::ChunkNumberNotFound { .. }
        )
    }

    /// A transport call failed
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// The client is not set up for what was asked
    pub fn is_misconfiguration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_) | Self::NoPrivateKey | Self::BucketMismatch { .. }
        )
    }

    /// The failing transport operation, if any
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Self::Transport { operation, .. }
            | Self::Cancelled { operation }
            | Self::DeadlineExceeded { operation } => Some(*operation),
            _ => None,
        }
    }
}

fn extract_xml_element(xml: &str, element: &str) -> Option<String> {
    let start_tag = format!("<{}>", element);
    let end_tag = format!("</{}>", element);

    let start = xml.find(&start_tag)? + start_tag.len();
    let end = xml.find(&end_tag)?;

    if start < end {
        Some(xml[start..end].to_string())
    } else {
        None
    }
}
