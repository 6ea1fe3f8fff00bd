//! In-memory transport for testing and demos

use super::ObjectTransport;
use crate::error::{Operation, TransportError, TransportResult};
use crate::types::{
    GetObjectOutput, ObjectBody, ObjectMetadata, PartRecord, PutObjectResult, SessionSummary,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct StoredObject {
    data: Bytes,
    metadata: ObjectMetadata,
    etag: String,
}

#[derive(Clone, Debug)]
struct Session {
    bucket: String,
    key: String,
    metadata: ObjectMetadata,
    parts: BTreeMap<u32, (String, Bytes)>,
    initiated: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    objects: DashMap<(String, String), StoredObject>,
    sessions: DashMap<String, Session>,
    calls: DashMap<Operation, usize>,
    failures: DashMap<Operation, String>,
}

/// A storage service held entirely in memory
///
/// Clones share the same state, so a test can keep one handle for inspection
/// while the client owns another.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<State>,
}

impl MemoryTransport {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `operation` fail with an S3 error `code`
    pub fn fail_next(&self, operation: Operation, code: impl Into<String>) {
        self.state.failures.insert(operation, code.into());
    }

    /// Number of times `operation` has been called
    pub fn call_count(&self, operation: Operation) -> usize {
        self.state.calls.get(&operation).map(|c| *c).unwrap_or(0)
    }

    /// Stored bytes of an object
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.data.clone())
    }

    /// Stored metadata of an object
    pub fn object_metadata(&self, bucket: &str, key: &str) -> Option<ObjectMetadata> {
        self.state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.metadata.clone())
    }

    /// Whether an object exists
    pub fn contains_object(&self, bucket: &str, key: &str) -> bool {
        self.state
            .objects
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    /// Number of in-progress sessions for a key
    pub fn session_count(&self, bucket: &str, key: &str) -> usize {
        self.state
            .sessions
            .iter()
            .filter(|s| s.bucket == bucket && s.key == key)
            .count()
    }

    /// Metadata a session was created with
    pub fn session_metadata(&self, session_id: &str) -> Option<ObjectMetadata> {
        self.state.sessions.get(session_id).map(|s| s.metadata.clone())
    }

    fn record(&self, operation: Operation) -> TransportResult<()> {
        *self.state.calls.entry(operation).or_insert(0) += 1;
        match self.state.failures.remove(&operation) {
            Some((_, code)) => Err(TransportError::s3(code, "injected failure")),
            None => Ok(()),
        }
    }

    fn no_such_upload(session_id: &str) -> TransportError {
        TransportError::s3(
            "NoSuchUpload",
            format!("The specified upload does not exist: {}", session_id),
        )
    }
}

fn etag_of(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

#[async_trait]
impl ObjectTransport for MemoryTransport {
    async fn create_session(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> TransportResult<String> {
        self.record(Operation::CreateSession)?;
        let session_id = Uuid::new_v4().to_string();
        self.state.sessions.insert(
            session_id.clone(),
            Session {
                bucket: bucket.to_string(),
                key: key.to_string(),
                metadata: metadata.clone(),
                parts: BTreeMap::new(),
                initiated: Utc::now(),
            },
        );
        Ok(session_id)
    }

    async fn list_sessions(&self, bucket: &str) -> TransportResult<Vec<SessionSummary>> {
        self.record(Operation::ListSessions)?;
        let mut sessions: Vec<SessionSummary> = self
            .state
            .sessions
            .iter()
            .filter(|s| s.bucket == bucket)
            .map(|s| SessionSummary {
                key: s.key.clone(),
                session_id: s.key().clone(),
                initiated: Some(s.initiated),
            })
            .collect();
        sessions.sort_by(|a, b| a.key.cmp(&b.key).then(a.initiated.cmp(&b.initiated)));
        Ok(sessions)
    }

    async fn submit_part(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> TransportResult<String> {
        self.record(Operation::SubmitPart)?;
        let mut session = self
            .state
            .sessions
            .get_mut(session_id)
            .filter(|s| s.bucket == bucket && s.key == key)
            .ok_or_else(|| Self::no_such_upload(session_id))?;

        let etag = etag_of(&body);
        session.parts.insert(part_number, (etag.clone(), body));
        Ok(etag)
    }

    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
    ) -> TransportResult<Vec<PartRecord>> {
        self.record(Operation::ListParts)?;
        let session = self
            .state
            .sessions
            .get(session_id)
            .filter(|s| s.bucket == bucket && s.key == key)
            .ok_or_else(|| Self::no_such_upload(session_id))?;

        Ok(session
            .parts
            .iter()
            .map(|(number, (etag, _))| PartRecord {
                part_number: *number,
                etag: etag.clone(),
            })
            .collect())
    }

    async fn complete_session(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
        parts: &[PartRecord],
    ) -> TransportResult<String> {
        self.record(Operation::CompleteSession)?;
        let (_, session) = self
            .state
            .sessions
            .remove_if(session_id, |_, s| s.bucket == bucket && s.key == key)
            .ok_or_else(|| Self::no_such_upload(session_id))?;

        let mut data = BytesMut::new();
        let mut digest = Md5::new();
        for part in parts {
            match session.parts.get(&part.part_number) {
                Some((etag, body)) if *etag == part.etag => {
                    data.extend_from_slice(body);
                    digest.update(etag.as_bytes());
                }
                _ => {
                    // Put it back so the caller can retry with a correct list
                    self.state.sessions.insert(session_id.to_string(), session);
                    return Err(TransportError::s3(
                        "InvalidPart",
                        format!("part {} does not match an uploaded part", part.part_number),
                    ));
                }
            }
        }

        let etag = format!("{}-{}", hex::encode(digest.finalize()), parts.len());
        self.state.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data: data.freeze(),
                metadata: session.metadata,
                etag: etag.clone(),
            },
        );
        Ok(etag)
    }

    async fn abort_session(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
    ) -> TransportResult<()> {
        self.record(Operation::AbortSession)?;
        self.state
            .sessions
            .remove_if(session_id, |_, s| s.bucket == bucket && s.key == key)
            .map(|_| ())
            .ok_or_else(|| Self::no_such_upload(session_id))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        mut body: ObjectBody,
        metadata: &ObjectMetadata,
    ) -> TransportResult<PutObjectResult> {
        self.record(Operation::PutObject)?;
        let mut data = Vec::with_capacity(body.content_length.unwrap_or(0) as usize);
        body.reader.read_to_end(&mut data).await?;

        let etag = etag_of(&data);
        self.state.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data: Bytes::from(data),
                metadata: metadata.clone(),
                etag: etag.clone(),
            },
        );
        Ok(PutObjectResult { etag })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> TransportResult<GetObjectOutput> {
        self.record(Operation::GetObject)?;
        let object = self
            .state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.clone())
            .ok_or_else(|| TransportError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;

        Ok(GetObjectOutput {
            content_length: object.data.len() as u64,
            body: Box::pin(std::io::Cursor::new(object.data)),
            metadata: object.metadata,
            etag: object.etag,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> TransportResult<()> {
        self.record(Operation::DeleteObject)?;
        self.state
            .objects
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_lifecycle() {
        let transport = MemoryTransport::new();
        let meta = ObjectMetadata::new().with_content_type("text/plain");

        let id = transport.create_session("b", "k", &meta).await.unwrap();
        let e2 = transport.submit_part("b", "k", &id, 2, Bytes::from_static(b" world")).await.unwrap();
        let e1 = transport.submit_part("b", "k", &id, 1, Bytes::from_static(b"hello")).await.unwrap();

        let parts = transport.list_parts("b", "k", &id).await.unwrap();
        assert_eq!(parts.iter().map(|p| p.part_number).collect::<Vec<_>>(), vec![1, 2]);

        let ordered = vec![
            PartRecord { part_number: 1, etag: e1 },
            PartRecord { part_number: 2, etag: e2 },
        ];
        let etag = transport.complete_session("b", "k", &id, &ordered).await.unwrap();
        assert!(etag.ends_with("-2"));

        assert_eq!(transport.object("b", "k").unwrap(), Bytes::from_static(b"hello world"));
        assert_eq!(
            transport.object_metadata("b", "k").unwrap().content_type.as_deref(),
            Some("text/plain")
        );
        assert_eq!(transport.session_count("b", "k"), 0);
    }

    #[tokio::test]
    async fn test_complete_twice_is_no_such_upload() {
        let transport = MemoryTransport::new();
        let id = transport.create_session("b", "k", &ObjectMetadata::new()).await.unwrap();
        let etag = transport.submit_part("b", "k", &id, 1, Bytes::from_static(b"x")).await.unwrap();
        let parts = vec![PartRecord { part_number: 1, etag }];

        transport.complete_session("b", "k", &id, &parts).await.unwrap();
        let err = transport.complete_session("b", "k", &id, &parts).await.unwrap_err();
        assert!(err.is_no_such_upload());
    }

    #[tokio::test]
    async fn test_complete_rejects_unknown_part() {
        let transport = MemoryTransport::new();
        let id = transport.create_session("b", "k", &ObjectMetadata::new()).await.unwrap();
        transport.submit_part("b", "k", &id, 1, Bytes::from_static(b"x")).await.unwrap();

        let bogus = vec![PartRecord { part_number: 1, etag: "nope".into() }];
        let err = transport.complete_session("b", "k", &id, &bogus).await.unwrap_err();
        assert!(matches!(err, TransportError::S3 { ref code, .. } if code == "InvalidPart"));
        assert_eq!(transport.session_count("b", "k"), 1);
    }

    #[tokio::test]
    async fn test_list_sessions_is_scoped_to_bucket() {
        let transport = MemoryTransport::new();
        transport.create_session("a", "k1", &ObjectMetadata::new()).await.unwrap();
        transport.create_session("b", "k2", &ObjectMetadata::new()).await.unwrap();

        let sessions = transport.list_sessions("a").await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].key, "k1");
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let transport = MemoryTransport::new();
        let meta = ObjectMetadata::new().with_metadata("encryption-key", "abcd");
        transport
            .put_object("b", "k", ObjectBody::from(b"data".to_vec()), &meta)
            .await
            .unwrap();

        let mut out = transport.get_object("b", "k").await.unwrap();
        let mut data = Vec::new();
        out.body.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"data");
        assert_eq!(out.content_length, 4);
        assert_eq!(out.metadata.get("encryption-key"), Some("abcd"));

        transport.delete_object("b", "k").await.unwrap();
        let err = transport.get_object("b", "k").await.unwrap_err();
        assert!(err.is_not_found());
        // Deleting again is not an error
        transport.delete_object("b", "k").await.unwrap();
    }

    #[tokio::test]
    async fn test_fail_next_is_one_shot() {
        let transport = MemoryTransport::new();
        transport.fail_next(Operation::ListSessions, "SlowDown");

        let err = transport.list_sessions("b").await.unwrap_err();
        assert!(matches!(err, TransportError::S3 { ref code, .. } if code == "SlowDown"));
        assert!(transport.list_sessions("b").await.is_ok());
        assert_eq!(transport.call_count(Operation::ListSessions), 2);
    }
}
