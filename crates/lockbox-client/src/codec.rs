//! Content codecs
//!
//! A [`ContentCodec`] decides what happens to object content on its way to and
//! from storage. The client picks one at construction: [`PlainCodec`] when no
//! encryption is configured, [`crate::EnvelopeCipher`] otherwise.

use crate::context::RequestContext;
use crate::error::{ObjectTarget, Result};
use crate::types::{DownloadedObject, GetObjectOutput, ObjectBody, ObjectMetadata};
use async_trait::async_trait;
use bytes::Bytes;
use lockbox_crypto::{encrypt_chunked, ChunkedCipherReader, Psk, DEFAULT_CHUNK_SIZE};
use std::collections::HashMap;

/// Key material chosen when a multipart session is created
#[derive(Debug, Default)]
pub struct SessionKeying {
    /// Metadata attached to the finished object
    pub metadata: HashMap<String, String>,
    /// PSK for the part that creates the session
    pub psk: Option<Psk>,
    /// Wrapped PSK to persist for later parts
    pub wrapped_key: Option<String>,
}

/// Content transform applied by the client
#[async_trait]
pub trait ContentCodec: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Block size of the chunked transform
    fn chunk_size(&self) -> usize;

    /// Reject a call whose PSK argument cannot work, before any network call
    fn check_psk(&self, _user_psk: Option<&Psk>) -> Result<()> {
        Ok(())
    }

    /// Choose key material for a new multipart session
    fn begin_session(&self, user_psk: Option<&Psk>) -> Result<SessionKeying>;

    /// Persist what later parts of the session need to recover the PSK
    async fn store_session_key(
        &self,
        ctx: &RequestContext,
        target: &ObjectTarget,
        keying: &SessionKeying,
    ) -> Result<()>;

    /// Recover the PSK for one part of an existing session
    async fn part_key(
        &self,
        ctx: &RequestContext,
        target: &ObjectTarget,
        user_psk: Option<&Psk>,
    ) -> Result<Option<Psk>>;

    /// Clean up after a session is completed or aborted. Never fails.
    async fn end_session(&self, ctx: &RequestContext, target: &ObjectTarget);

    /// Transform one part's payload
    fn seal_part(&self, psk: Option<&Psk>, payload: Bytes) -> Result<Bytes> {
        match psk {
            Some(psk) => Ok(Bytes::from(encrypt_chunked(psk, &payload, self.chunk_size())?)),
            None => Ok(payload),
        }
    }

    /// Prepare a whole object for a single-shot put
    fn seal_object(
        &self,
        target: &ObjectTarget,
        user_psk: Option<Psk>,
        body: ObjectBody,
        metadata: ObjectMetadata,
    ) -> Result<(ObjectBody, ObjectMetadata)>;

    /// Turn a fetched object into a plaintext download
    fn open_object(
        &self,
        target: &ObjectTarget,
        user_psk: Option<Psk>,
        object: GetObjectOutput,
    ) -> Result<DownloadedObject>;
}

/// Run a body through the chunked transform; the length is unchanged
pub(crate) fn cipher_body(body: ObjectBody, psk: Psk, chunk_size: usize) -> Result<ObjectBody> {
    let reader = ChunkedCipherReader::new(body.reader, psk, chunk_size)?;
    Ok(ObjectBody {
        reader: Box::pin(reader),
        content_length: body.content_length,
    })
}

/// Build a download, decrypting as it is read when a PSK is given
pub(crate) fn download(
    object: GetObjectOutput,
    psk: Option<Psk>,
    chunk_size: usize,
) -> Result<DownloadedObject> {
    let GetObjectOutput {
        body,
        metadata,
        content_length,
        etag,
    } = object;

    let body: crate::types::ObjectReader = match psk {
        Some(psk) => Box::pin(ChunkedCipherReader::new(body, psk, chunk_size)?),
        None => body,
    };

    Ok(DownloadedObject {
        body,
        content_length,
        content_type: metadata.content_type,
        etag,
    })
}

/// Stores content as given; applies a caller PSK without persisting any key
#[derive(Clone, Debug)]
pub struct PlainCodec {
    chunk_size: usize,
}

impl PlainCodec {
    /// Create with the default chunk size
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set the block size used when a caller PSK is applied
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

impl Default for PlainCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentCodec for PlainCodec {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn begin_session(&self, user_psk: Option<&Psk>) -> Result<SessionKeying> {
        Ok(SessionKeying {
            psk: user_psk.cloned(),
            ..Default::default()
        })
    }

    async fn store_session_key(
        &self,
        _ctx: &RequestContext,
        _target: &ObjectTarget,
        _keying: &SessionKeying,
    ) -> Result<()> {
        Ok(())
    }

    async fn part_key(
        &self,
        _ctx: &RequestContext,
        _target: &ObjectTarget,
        user_psk: Option<&Psk>,
    ) -> Result<Option<Psk>> {
        Ok(user_psk.cloned())
    }

    async fn end_session(&self, _ctx: &RequestContext, _target: &ObjectTarget) {}

    fn seal_object(
        &self,
        _target: &ObjectTarget,
        user_psk: Option<Psk>,
        body: ObjectBody,
        metadata: ObjectMetadata,
    ) -> Result<(ObjectBody, ObjectMetadata)> {
        match user_psk {
            Some(psk) => Ok((cipher_body(body, psk, self.chunk_size)?, metadata)),
            None => Ok((body, metadata)),
        }
    }

    fn open_object(
        &self,
        _target: &ObjectTarget,
        user_psk: Option<Psk>,
        object: GetObjectOutput,
    ) -> Result<DownloadedObject> {
        download(object, user_psk, self.chunk_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbox_crypto::decrypt_chunked;
    use tokio::io::AsyncReadExt;

    fn fetched(data: &'static [u8]) -> GetObjectOutput {
        GetObjectOutput {
            body: Box::pin(data),
            metadata: ObjectMetadata::new().with_content_type("text/plain"),
            content_length: data.len() as u64,
            etag: "e".to_string(),
        }
    }

    #[test]
    fn test_plain_part_passes_through() {
        let codec = PlainCodec::new();
        let sealed = codec.seal_part(None, Bytes::from_static(b"abc")).unwrap();
        assert_eq!(sealed, Bytes::from_static(b"abc"));
    }

    #[test]
    fn test_plain_part_with_psk_is_encrypted() {
        let codec = PlainCodec::new().with_chunk_size(4);
        let psk = Psk::generate();
        let sealed = codec.seal_part(Some(&psk), Bytes::from_static(b"hello world")).unwrap();

        assert_ne!(&sealed[..], b"hello world");
        assert_eq!(decrypt_chunked(&psk, &sealed, 4).unwrap(), b"hello world");
    }

    #[test]
    fn test_plain_session_keeps_no_key_material() {
        let keying = PlainCodec::new().begin_session(None).unwrap();
        assert!(keying.psk.is_none());
        assert!(keying.wrapped_key.is_none());
        assert!(keying.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_plain_download() {
        let codec = PlainCodec::new();
        let target = ObjectTarget::object("b", "k");
        let mut out = codec.open_object(&target, None, fetched(b"plain text")).unwrap();

        let mut data = Vec::new();
        out.body.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"plain text");
        assert_eq!(out.content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_plain_object_roundtrip_with_psk() {
        let codec = PlainCodec::new().with_chunk_size(3);
        let target = ObjectTarget::object("b", "k");
        let psk = Psk::generate();

        let (mut sealed, _) = codec
            .seal_object(&target, Some(psk.clone()), ObjectBody::from(b"secret".to_vec()), ObjectMetadata::new())
            .unwrap();
        assert_eq!(sealed.content_length, Some(6));

        let mut ciphertext = Vec::new();
        sealed.reader.read_to_end(&mut ciphertext).await.unwrap();
        assert_ne!(ciphertext, b"secret");

        let object = GetObjectOutput {
            content_length: ciphertext.len() as u64,
            body: Box::pin(std::io::Cursor::new(ciphertext)),
            metadata: ObjectMetadata::new(),
            etag: String::new(),
        };
        let mut out = codec.open_object(&target, Some(psk), object).unwrap();
        let mut plaintext = Vec::new();
        out.body.read_to_end(&mut plaintext).await.unwrap();
        assert_eq!(plaintext, b"secret");
    }
}
