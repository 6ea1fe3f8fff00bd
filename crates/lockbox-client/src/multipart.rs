//! Multipart upload support for large files

use crate::context::RequestContext;
use crate::types::{UploadPartOutcome, UploadPartRequest};
use crate::{ClientError, Result, StorageClient};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, instrument};

/// Progress callback type
pub type ProgressCallback = Box<dyn Fn(UploadProgress) + Send + Sync>;

/// Upload progress information
#[derive(Clone, Debug)]
pub struct UploadProgress {
    /// Bytes uploaded so far
    pub bytes_uploaded: u64,
    /// Total bytes to upload
    pub total_bytes: u64,
    /// Current part number
    pub current_part: u32,
    /// Total number of parts
    pub total_parts: u32,
}

impl UploadProgress {
    /// Get percentage complete
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.bytes_uploaded as f64 / self.total_bytes as f64) * 100.0
    }
}

/// Number of parts needed for `total_len` bytes; an empty object is one part
pub fn part_count(total_len: u64, part_size: usize) -> Result<u32> {
    let part_size = part_size.max(1) as u64;
    let parts = total_len.div_ceil(part_size).max(1);
    u32::try_from(parts).map_err(|_| {
        ClientError::InvalidConfig(format!(
            "{total_len} bytes need {parts} parts of {part_size} bytes, more than a part number can address"
        ))
    })
}

/// Upload `total_len` bytes from `reader` as a multipart upload
///
/// Parts are `config.part_size` bytes except the last. Each part goes through
/// [`StorageClient::upload_part`], so encryption, session handling and
/// completion are the same as for caller-driven parts.
#[instrument(skip(client, ctx, reader, progress), fields(bucket = %client.bucket()))]
pub async fn upload_reader<R: AsyncRead + Unpin + Send>(
    client: &StorageClient,
    ctx: &RequestContext,
    key: &str,
    content_type: Option<&str>,
    mut reader: R,
    total_len: u64,
    progress: Option<ProgressCallback>,
) -> Result<UploadPartOutcome> {
    let part_size = client.config().part_size;
    if part_size == 0 {
        return Err(ClientError::InvalidConfig("part size must be positive".to_string()));
    }
    let total_parts = part_count(total_len, part_size)?;

    let mut bytes_uploaded = 0u64;
    let mut last = None;

    for part_number in 1..=total_parts {
        let len = (total_len - bytes_uploaded).min(part_size as u64) as usize;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;

        let mut request = UploadPartRequest::new(key, part_number, total_parts);
        if let Some(ct) = content_type {
            request = request.with_content_type(ct);
        }

        let outcome = client.upload_part(ctx, &request, buf).await?;
        bytes_uploaded += len as u64;
        debug!(part_number, total_parts, bytes_uploaded, "uploaded part");

        if let Some(ref cb) = progress {
            cb(UploadProgress {
                bytes_uploaded,
                total_bytes: total_len,
                current_part: part_number,
                total_parts,
            });
        }

        last = Some(outcome);
    }

    last.ok_or_else(|| ClientError::InvalidChunk {
        chunk_number: 0,
        total_chunks: total_parts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Operation;
    use crate::test_support::test_keys;
    use crate::transport::MemoryTransport;
    use crate::{Config, EncryptionConfig};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_progress_percentage() {
        let progress = UploadProgress {
            bytes_uploaded: 25,
            total_bytes: 100,
            current_part: 1,
            total_parts: 4,
        };
        assert_eq!(progress.percentage(), 25.0);

        let empty = UploadProgress {
            bytes_uploaded: 0,
            total_bytes: 0,
            current_part: 1,
            total_parts: 1,
        };
        assert_eq!(empty.percentage(), 100.0);
    }

    #[test]
    fn test_part_count() {
        assert_eq!(part_count(0, 10).unwrap(), 1);
        assert_eq!(part_count(10, 10).unwrap(), 1);
        assert_eq!(part_count(11, 10).unwrap(), 2);
        assert_eq!(part_count(30, 10).unwrap(), 3);
        assert_eq!(part_count(u32::MAX as u64, 1).unwrap(), u32::MAX);
    }

    #[test]
    fn test_part_count_overflow() {
        let err = part_count(u32::MAX as u64 + 1, 1).unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_upload_reader_rejects_unaddressable_length() {
        let transport = MemoryTransport::new();
        let config = Config::new("http://localhost:9000", "media").with_part_size(1);
        let client = StorageClient::with_transport(config, Arc::new(transport.clone())).unwrap();
        let ctx = RequestContext::background();

        let err = upload_reader(&client, &ctx, "huge.bin", None, tokio::io::empty(), u32::MAX as u64 + 1, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_upload_reader_reports_progress() {
        let transport = MemoryTransport::new();
        let config = Config::new("http://localhost:9000", "media")
            .with_part_size(16)
            .with_encryption(EncryptionConfig::new(test_keys()).with_chunk_size(16));
        let client = StorageClient::with_transport(config, Arc::new(transport.clone())).unwrap();
        let ctx = RequestContext::background();

        let data: Vec<u8> = (0..50u8).collect();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Box::new(move |p: UploadProgress| sink.lock().unwrap().push(p.current_part));

        let outcome = client
            .upload_reader(&ctx, "stream.bin", Some("application/octet-stream"), &data[..], 50, Some(callback))
            .await
            .unwrap();

        assert!(outcome.all_parts_uploaded);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(transport.call_count(Operation::CreateSession), 1);
        assert_eq!(transport.call_count(Operation::CompleteSession), 1);

        let mut object = client.get_object(&ctx, "stream.bin").await.unwrap();
        let mut plaintext = Vec::new();
        object.body.read_to_end(&mut plaintext).await.unwrap();
        assert_eq!(plaintext, data);
    }

    #[tokio::test]
    async fn test_upload_reader_short_source() {
        let transport = MemoryTransport::new();
        let config = Config::new("http://localhost:9000", "media").with_part_size(8);
        let client = StorageClient::with_transport(config, Arc::new(transport)).unwrap();

        let err = client
            .upload_reader(&RequestContext::background(), "k", None, &b"short"[..], 20, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
    }
}
